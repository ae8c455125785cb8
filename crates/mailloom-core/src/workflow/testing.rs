//! Hand-rolled fakes and fixtures shared by the workflow test modules.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::{Value, json};
use uuid::Uuid;

use mailloom_types::error::{BalanceError, RepositoryError, ToolError};
use mailloom_types::llm::{ChatOutcome, ChatRequest, LlmError, TokenUsage, ToolSpec};
use mailloom_types::log::LogEntry;
use mailloom_types::message::{ChatMessage, MessageRole, ToolCall, ToolFunction};
use mailloom_types::workflow::{
    StepDefinition, StepOutputData, StepSpec, TriggerDefinition, WorkflowDefinition,
    WorkflowDetails, WorkflowInstance,
};

use crate::llm::provider::ChatProvider;
use crate::rag::retriever::{RagError, RagQuery, RagRetriever};
use crate::repository::balance::BalanceLedger;
use crate::repository::log::RunLog;
use crate::repository::workflow::WorkflowStore;
use crate::tool::broker::{ToolBroker, ToolCallContext};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn llm_definition(user_id: Uuid, name: &str) -> StepDefinition {
    StepDefinition::new(
        user_id,
        name,
        StepSpec::Llm {
            model: "google/gemini-2.5-pro".to_string(),
            system_prompt: format!("You are the '{name}' step."),
        },
    )
}

pub fn agent_definition(user_id: Uuid, name: &str) -> StepDefinition {
    StepDefinition::new(
        user_id,
        name,
        StepSpec::Agent {
            model: "google/gemini-2.5-pro".to_string(),
            system_prompt: format!("You are the '{name}' agent."),
            tools: BTreeMap::new(),
        },
    )
}

pub fn workflow_with_steps(user_id: Uuid, steps: &[Uuid]) -> WorkflowDefinition {
    let mut workflow = WorkflowDefinition::new(user_id, "test-flow", "a test workflow");
    workflow.steps = steps.to_vec();
    workflow
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        call_type: "function".to_string(),
        function: ToolFunction {
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// FakeProvider
// ---------------------------------------------------------------------------

/// Scripted chat provider that records every request it receives.
pub struct FakeProvider {
    script: Mutex<VecDeque<ChatOutcome>>,
    calls: Mutex<Vec<ChatRequest>>,
    cost_per_generation: f64,
}

impl FakeProvider {
    pub fn scripted(outcomes: Vec<ChatOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            calls: Mutex::new(Vec::new()),
            cost_per_generation: 0.0,
        }
    }

    /// A provider answering each call with the next plain text response.
    pub fn answering<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self::scripted(texts.into_iter().map(Self::text_turn).collect())
    }

    pub fn with_cost(mut self, cost_per_generation: f64) -> Self {
        self.cost_per_generation = cost_per_generation;
        self
    }

    pub fn text_turn(text: &str) -> ChatOutcome {
        ChatOutcome {
            generation_id: Some(format!("gen-{}", Uuid::now_v7())),
            message: ChatMessage::assistant(text),
            usage: Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            }),
            raw: json!({}),
        }
    }

    pub fn tool_turn(tool_calls: Vec<ToolCall>) -> ChatOutcome {
        ChatOutcome {
            generation_id: Some(format!("gen-{}", Uuid::now_v7())),
            message: ChatMessage {
                role: MessageRole::Assistant,
                content: None,
                tool_calls: Some(tool_calls),
                tool_call_id: None,
                name: None,
            },
            usage: Some(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
                total_tokens: 120,
            }),
            raw: json!({}),
        }
    }

    pub fn calls(&self) -> Vec<ChatRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl ChatProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, LlmError> {
        self.calls.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Provider("provider script exhausted".to_string()))
    }

    async fn generation_cost(&self, _generation_id: &str) -> Result<f64, LlmError> {
        Ok(self.cost_per_generation)
    }
}

// ---------------------------------------------------------------------------
// FakeBroker
// ---------------------------------------------------------------------------

enum ToolBehavior {
    Succeed(Value),
    Fail(String),
}

/// Tool broker with a static tool table and recorded invocations.
#[derive(Default)]
pub struct FakeBroker {
    tools: HashMap<(String, String), ToolBehavior>,
    calls: Mutex<Vec<(String, String, Value)>>,
}

impl FakeBroker {
    pub fn with_tool(mut self, server: &str, tool: &str, result: Value) -> Self {
        self.tools.insert(
            (server.to_string(), tool.to_string()),
            ToolBehavior::Succeed(result),
        );
        self
    }

    pub fn with_tool_error(mut self, server: &str, tool: &str, reason: &str) -> Self {
        self.tools.insert(
            (server.to_string(), tool.to_string()),
            ToolBehavior::Fail(reason.to_string()),
        );
        self
    }

    pub fn calls(&self) -> Vec<(String, String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolBroker for FakeBroker {
    fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().map(|(s, _)| s.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    async fn list_tools(&self, server: &str) -> Result<Vec<ToolSpec>, ToolError> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .keys()
            .filter(|(s, _)| s == server)
            .map(|(_, tool)| ToolSpec {
                name: tool.clone(),
                description: format!("fake tool {tool}"),
                input_schema: json!({"type": "object"}),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        _context: &ToolCallContext,
    ) -> Result<Value, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((server.to_string(), tool.to_string(), arguments));
        match self.tools.get(&(server.to_string(), tool.to_string())) {
            Some(ToolBehavior::Succeed(value)) => Ok(value.clone()),
            Some(ToolBehavior::Fail(reason)) => Err(ToolError::CallFailed {
                server: server.to_string(),
                tool: tool.to_string(),
                reason: reason.clone(),
            }),
            None => Err(ToolError::ServerUnavailable(server.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeBalance
// ---------------------------------------------------------------------------

/// Balance ledger with a fixed gate decision and recorded deductions.
pub struct FakeBalance {
    depleted: bool,
    deductions: Mutex<Vec<f64>>,
}

impl FakeBalance {
    pub fn unrestricted() -> Self {
        Self {
            depleted: false,
            deductions: Mutex::new(Vec::new()),
        }
    }

    pub fn depleted() -> Self {
        Self {
            depleted: true,
            deductions: Mutex::new(Vec::new()),
        }
    }

    pub fn deductions(&self) -> Vec<f64> {
        self.deductions.lock().unwrap().clone()
    }
}

impl BalanceLedger for FakeBalance {
    async fn check(&self, _user_id: &Uuid) -> Result<(), BalanceError> {
        if self.depleted {
            Err(BalanceError::InsufficientBalance)
        } else {
            Ok(())
        }
    }

    async fn deduct(&self, _user_id: &Uuid, amount_usd: f64) -> Result<(), BalanceError> {
        self.deductions.lock().unwrap().push(amount_usd);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeLog
// ---------------------------------------------------------------------------

/// In-memory run log.
#[derive(Default)]
pub struct FakeLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl FakeLog {
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl RunLog for FakeLog {
    async fn append(&self, entry: &LogEntry) -> Result<(), RepositoryError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeRag
// ---------------------------------------------------------------------------

/// Retriever returning a fixed markdown result.
pub struct FakeRag {
    markdown: Option<String>,
}

impl FakeRag {
    pub fn returning(markdown: &str) -> Self {
        Self {
            markdown: Some(markdown.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self { markdown: None }
    }
}

impl RagRetriever for FakeRag {
    async fn retrieve(&self, query: &RagQuery) -> Result<StepOutputData, RagError> {
        match &self.markdown {
            Some(markdown) => Ok(StepOutputData::new(query.user_id, markdown.clone())),
            None => Err(RagError::RetrievalFailed("fake retrieval failure".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStoreInner {
    workflows: HashMap<Uuid, WorkflowDefinition>,
    steps: HashMap<Uuid, StepDefinition>,
    triggers: HashMap<Uuid, TriggerDefinition>,
    instances: HashMap<Uuid, WorkflowInstance>,
    outputs: HashMap<Uuid, StepOutputData>,
}

/// In-memory [`WorkflowStore`] for runner tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn seed_workflow(&self, workflow: WorkflowDefinition) {
        self.inner
            .lock()
            .unwrap()
            .workflows
            .insert(workflow.uuid, workflow);
    }

    pub fn seed_step(&self, step: StepDefinition) {
        self.inner.lock().unwrap().steps.insert(step.uuid, step);
    }

    pub fn seed_instance(&self, instance: WorkflowInstance) {
        self.inner
            .lock()
            .unwrap()
            .instances
            .insert(instance.uuid, instance);
    }

    pub fn instance(&self, uuid: &Uuid) -> Option<WorkflowInstance> {
        self.inner.lock().unwrap().instances.get(uuid).cloned()
    }
}

impl WorkflowStore for MemoryStore {
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .workflows
            .insert(workflow.uuid, workflow.clone());
        Ok(())
    }

    async fn get_workflow(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .workflows
            .get(uuid)
            .filter(|w| &w.user_id == user_id)
            .cloned())
    }

    async fn list_workflows(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut workflows: Vec<WorkflowDefinition> = self
            .inner
            .lock()
            .unwrap()
            .workflows
            .values()
            .filter(|w| &w.user_id == user_id)
            .cloned()
            .collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }

    async fn delete_workflow(&self, uuid: &Uuid, user_id: &Uuid) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let existed = inner
            .workflows
            .get(uuid)
            .is_some_and(|w| &w.user_id == user_id);
        if existed {
            let workflow = inner.workflows.remove(uuid);
            if let Some(trigger_uuid) = workflow.and_then(|w| w.trigger_uuid) {
                inner.triggers.remove(&trigger_uuid);
            }
            inner
                .instances
                .retain(|_, i| &i.workflow_definition_uuid != uuid);
        }
        Ok(existed)
    }

    async fn append_workflow_step(
        &self,
        workflow_uuid: &Uuid,
        step_uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let workflow = inner
            .workflows
            .get_mut(workflow_uuid)
            .filter(|w| &w.user_id == user_id)
            .ok_or(RepositoryError::NotFound)?;
        if !workflow.steps.contains(step_uuid) {
            workflow.steps.push(*step_uuid);
        }
        Ok(())
    }

    async fn remove_workflow_step(
        &self,
        workflow_uuid: &Uuid,
        step_uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        let workflow = inner
            .workflows
            .get_mut(workflow_uuid)
            .filter(|w| &w.user_id == user_id)
            .ok_or(RepositoryError::NotFound)?;
        if let Some(position) = workflow.steps.iter().position(|s| s == step_uuid) {
            workflow.steps.remove(position);
        }
        Ok(())
    }

    async fn get_workflow_details(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<WorkflowDetails>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        let Some(workflow) = inner
            .workflows
            .get(uuid)
            .filter(|w| &w.user_id == user_id)
            .cloned()
        else {
            return Ok(None);
        };
        let trigger = workflow
            .trigger_uuid
            .and_then(|t| inner.triggers.get(&t).cloned());
        let steps = workflow
            .steps
            .iter()
            .filter_map(|s| inner.steps.get(s).cloned())
            .collect();
        Ok(Some(WorkflowDetails {
            workflow,
            trigger,
            steps,
        }))
    }

    async fn save_step(&self, step: &StepDefinition) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .steps
            .insert(step.uuid, step.clone());
        Ok(())
    }

    async fn get_step(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<StepDefinition>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .steps
            .get(uuid)
            .filter(|s| &s.user_id == user_id)
            .cloned())
    }

    async fn delete_step(&self, uuid: &Uuid, user_id: &Uuid) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.workflows.values().any(|w| w.steps.contains(uuid)) {
            return Err(RepositoryError::Conflict(
                "step is referenced by a workflow".to_string(),
            ));
        }
        Ok(inner
            .steps
            .remove(uuid)
            .is_some_and(|s| &s.user_id == user_id))
    }

    async fn save_trigger(&self, trigger: &TriggerDefinition) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .triggers
            .insert(trigger.uuid, trigger.clone());
        Ok(())
    }

    async fn get_trigger(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<TriggerDefinition>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .triggers
            .get(uuid)
            .filter(|t| &t.user_id == user_id)
            .cloned())
    }

    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .instances
            .insert(instance.uuid, instance.clone());
        Ok(())
    }

    async fn get_instance(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .instances
            .get(uuid)
            .filter(|i| &i.user_id == user_id)
            .cloned())
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.instances.contains_key(&instance.uuid) {
            return Err(RepositoryError::NotFound);
        }
        inner.instances.insert(instance.uuid, instance.clone());
        Ok(())
    }

    async fn list_running_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .instances
            .values()
            .filter(|i| !i.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn create_step_output(&self, output: &StepOutputData) -> Result<(), RepositoryError> {
        self.inner
            .lock()
            .unwrap()
            .outputs
            .insert(output.uuid, output.clone());
        Ok(())
    }

    async fn get_step_output(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<StepOutputData>, RepositoryError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .outputs
            .get(uuid)
            .filter(|o| &o.user_id == user_id)
            .cloned())
    }
}
