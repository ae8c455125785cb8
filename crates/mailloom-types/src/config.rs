//! Engine configuration.
//!
//! Values are read from the environment by the infrastructure layer; this
//! type only carries them with their defaults.

use serde::{Deserialize, Serialize};

/// Runtime knobs recognized by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum tool calls executed concurrently within one agent turn
    /// (`WORKFLOW_AGENT_MAX_PARALLEL_TOOL_CALLS`).
    pub max_parallel_tool_calls: usize,
    /// Maximum LLM turns per agent step (`MAX_AGENT_CYCLES`).
    pub max_agent_cycles: usize,
    /// Concurrent IMAP sessions per user (`IMAP_MAX_CONCURRENCY_PER_USER`).
    pub imap_max_concurrency_per_user: usize,
    /// Model ids permitted for LLM/agent steps. Empty means no restriction.
    #[serde(default)]
    pub allowed_models: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_tool_calls: 5,
            max_agent_cycles: 10,
            imap_max_concurrency_per_user: 2,
            allowed_models: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Whether `model` may be used under this configuration.
    pub fn model_allowed(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model)
    }
}
