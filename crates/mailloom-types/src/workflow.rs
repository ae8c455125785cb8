//! Workflow domain types for Mailloom.
//!
//! Defines workflow definitions (an ordered list of step UUIDs), the
//! polymorphic step definitions (`StepSpec` tagged union), triggers, and the
//! execution-side models (`WorkflowInstance`, `StepInstance`,
//! `StepOutputData`). Persistence stores the polymorphic fields as a JSON
//! `details` column next to the promoted columns, so every type here is
//! round-trippable through serde.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::ToolToggle;
use crate::message::ChatMessage;

// ---------------------------------------------------------------------------
// Workflow definition
// ---------------------------------------------------------------------------

/// The definition of a linear workflow: an ordered list of step UUIDs.
///
/// Steps are shared entities referenced by UUID; duplicates are forbidden and
/// every UUID must resolve to a step owned by the same user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub uuid: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Inactive workflows are never started by triggers.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Forward reference to the owned trigger (1:1; the trigger holds the
    /// back reference).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_uuid: Option<Uuid>,
    /// Ordered step definition UUIDs.
    #[serde(default)]
    pub steps: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl WorkflowDefinition {
    /// Create a new empty workflow owned by `user_id`.
    pub fn new(user_id: Uuid, name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::now_v7(),
            user_id,
            name: name.into(),
            description: description.into(),
            is_active: true,
            trigger_uuid: None,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Step definition (polymorphic)
// ---------------------------------------------------------------------------

/// A single unit-of-work definition, shared across workflows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub uuid: Uuid,
    pub user_id: Uuid,
    /// Unique, user-defined name for this step.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Auto-generated one-line summary for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_summary: Option<String>,
    /// Type-specific configuration, tagged by `type`.
    #[serde(flatten)]
    pub spec: StepSpec,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StepDefinition {
    pub fn new(user_id: Uuid, name: impl Into<String>, spec: StepSpec) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::now_v7(),
            user_id,
            name: name.into(),
            description: String::new(),
            generated_summary: None,
            spec,
            created_at: now,
            updated_at: now,
        }
    }

    /// The step kind tag, matching the persisted `type` column.
    pub fn kind(&self) -> StepKind {
        self.spec.kind()
    }

    /// The prompt-bearing field of this step, if it has one.
    ///
    /// Stop-checkers carry no prompt and are never resolved.
    pub fn system_prompt(&self) -> Option<&str> {
        match &self.spec {
            StepSpec::Llm { system_prompt, .. } => Some(system_prompt),
            StepSpec::Agent { system_prompt, .. } => Some(system_prompt),
            StepSpec::StopChecker { .. } => None,
            StepSpec::Rag { system_prompt, .. } => Some(system_prompt),
        }
    }

    /// Derive a one-line display summary from the step's prompt: the first
    /// non-empty line, truncated to 150 characters.
    pub fn derived_summary(&self) -> String {
        let Some(prompt) = self.system_prompt().map(str::trim).filter(|p| !p.is_empty()) else {
            return "No summary available.".to_string();
        };
        let first_line = prompt.lines().next().unwrap_or_default();
        if first_line.chars().count() > 150 {
            let truncated: String = first_line.chars().take(150).collect();
            format!("{truncated}...")
        } else {
            first_line.to_string()
        }
    }
}

/// Type-specific step configuration.
///
/// Internally tagged by `type` to match the persisted JSON shape:
/// ```json
/// { "type": "agent", "model": "...", "system_prompt": "...", "tools": {...} }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepSpec {
    /// A single LLM call without tools.
    Llm {
        model: String,
        system_prompt: String,
    },
    /// A multi-turn LLM loop with external tool invocation.
    Agent {
        model: String,
        system_prompt: String,
        /// Tool id (`"{server}-{tool}"`) to per-tool settings.
        #[serde(default)]
        tools: BTreeMap<String, ToolToggle>,
    },
    /// Evaluates a textual condition against a prior step's output.
    StopChecker {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_to_check_uuid: Option<Uuid>,
        #[serde(default)]
        check_mode: CheckerMode,
        #[serde(default)]
        match_values: Vec<String>,
    },
    /// Retrieval over a configured vector database.
    Rag {
        system_prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vectordb_uuid: Option<Uuid>,
        #[serde(default)]
        rerank: bool,
        #[serde(default = "default_top_k")]
        top_k: u32,
    },
}

fn default_top_k() -> u32 {
    5
}

impl StepSpec {
    pub fn kind(&self) -> StepKind {
        match self {
            StepSpec::Llm { .. } => StepKind::Llm,
            StepSpec::Agent { .. } => StepKind::Agent,
            StepSpec::StopChecker { .. } => StepKind::StopChecker,
            StepSpec::Rag { .. } => StepKind::Rag,
        }
    }
}

/// Discriminant for the step union, persisted as the `type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Llm,
    Agent,
    StopChecker,
    Rag,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Llm => "llm",
            StepKind::Agent => "agent",
            StepKind::StopChecker => "stop_checker",
            StepKind::Rag => "rag",
        }
    }
}

/// How a stop-checker interprets a match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckerMode {
    #[default]
    StopIfOutputContains,
    ContinueIfOutputContains,
}

/// The result of one stop-checker evaluation.
///
/// Always produced, independent of the matching outcome. Checkers never
/// produce a `StepOutputData`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerResult {
    pub should_stop: bool,
    pub reason: String,
    pub evaluated_input: String,
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Initiation contract for a workflow. 1:1 with the owning workflow and
/// replaced as a whole on change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub uuid: Uuid,
    pub user_id: Uuid,
    /// Back reference to the owning workflow.
    pub workflow_uuid: Uuid,
    /// Source-specific filter rules (e.g. sender allow-lists).
    #[serde(default)]
    pub filter_rules: HashMap<String, Value>,
    /// Description of the initial data passed to the workflow.
    pub initial_data_description: String,
    /// Optional prompt for an LLM-evaluated trigger condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Execution models
// ---------------------------------------------------------------------------

/// Status of a workflow instance. Transitions are monotonic:
/// `Running` moves to exactly one terminal state and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
    Stopped,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InstanceStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Cancelled => "cancelled",
        }
    }
}

/// Status of a single step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

/// The single data carrier between steps.
///
/// Immutable once observable by a later step; a step that needs to "change"
/// its output creates a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutputData {
    pub uuid: Uuid,
    pub user_id: Uuid,
    pub markdown_representation: String,
    pub created_at: DateTime<Utc>,
}

impl StepOutputData {
    pub fn new(user_id: Uuid, markdown_representation: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::now_v7(),
            user_id,
            markdown_representation: markdown_representation.into(),
            created_at: Utc::now(),
        }
    }
}

/// One execution of one step.
///
/// Created at step start, updated in place, terminal once `finished_at` is
/// set. `messages` is append-only and populated for LLM/agent steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInstance {
    pub uuid: Uuid,
    pub user_id: Uuid,
    pub workflow_instance_uuid: Uuid,
    /// Link back to the step definition.
    pub step_definition_uuid: Uuid,
    pub kind: StepKind,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StepOutputData>,
    pub created_at: DateTime<Utc>,
}

impl StepInstance {
    /// Create a new step instance in `Running` state.
    pub fn start(
        user_id: Uuid,
        workflow_instance_uuid: Uuid,
        step_definition_uuid: Uuid,
        kind: StepKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::now_v7(),
            user_id,
            workflow_instance_uuid,
            step_definition_uuid,
            kind,
            status: StepStatus::Running,
            started_at: now,
            finished_at: None,
            error_message: None,
            messages: Vec::new(),
            input_data: None,
            output: None,
            created_at: now,
        }
    }
}

/// One execution run of a workflow.
///
/// Owns its step instances and (transitively) their output data.
/// `trigger_output` is present iff the instance was created via a trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub uuid: Uuid,
    pub user_id: Uuid,
    pub workflow_definition_uuid: Uuid,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_output: Option<StepOutputData>,
    #[serde(default)]
    pub step_instances: Vec<StepInstance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create a new running instance, optionally seeded with trigger output.
    pub fn start(
        user_id: Uuid,
        workflow_definition_uuid: Uuid,
        trigger_output: Option<StepOutputData>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::now_v7(),
            user_id,
            workflow_definition_uuid,
            status: InstanceStatus::Running,
            trigger_output,
            step_instances: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Hydrated view
// ---------------------------------------------------------------------------

/// A fully hydrated workflow: definition plus its trigger and step
/// definitions, in step order. Used by workflow editors and the prompt
/// validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDetails {
    pub workflow: WorkflowDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerDefinition>,
    pub steps: Vec<StepDefinition>,
}

// ---------------------------------------------------------------------------
// Prompt reference validation
// ---------------------------------------------------------------------------

/// Why a `<<…>>` reference was rejected at save time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceIssueCode {
    /// The placeholder does not match any recognized form.
    Malformed,
    /// A `step_output.` reference whose suffix is not a UUID.
    BadUuid,
    /// References a step that does not precede the owning step.
    NonPrecedingStep,
    /// The base keyword is neither `trigger_output` nor `step_output`
    /// nor a built-in dynamic value.
    UnknownBase,
}

/// One invalid placeholder found by the prompt validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceIssue {
    /// The placeholder text without the `<<` `>>` markers.
    pub placeholder: String,
    pub code: ReferenceIssueCode,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
