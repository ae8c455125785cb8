//! Agent step types: tool enablement, human-in-the-loop suspension, and
//! cumulative usage accounting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-tool settings on an agent definition, keyed by the qualified tool id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolToggle {
    #[serde(default)]
    pub enabled: bool,
}

/// Returned when the agent requests human input instead of executing tools.
///
/// The workflow is suspended until the caller resubmits with a matching
/// [`HumanInput`] payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInputRequired {
    /// The suspended tool call; the resume payload must carry the same id.
    pub tool_call_id: String,
    /// Suggested values extracted from the tool-call arguments.
    pub data: Value,
}

/// The caller's answer to a [`HumanInputRequired`] suspension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanInput {
    pub tool_call_id: String,
    pub user_input: Value,
}

/// Usage counters accumulated across all turns of one agent step.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentUsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

impl AgentUsageTotals {
    /// Fold one turn's usage into the running totals.
    pub fn add_usage(&mut self, usage: &crate::llm::TokenUsage) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total_tokens);
    }
}
