//! Workflow runner: per-instance state machine.
//!
//! Executes one `WorkflowInstance` to a terminal state, strictly sequentially
//! with respect to that instance. Responsible for step dispatch, reference
//! resolution, persistence of per-step progress (the whole instance document
//! is written after every step), stop conditions, cooperative cancellation
//! (observed only between steps), and human-input suspension.
//!
//! The definition is loaded once at run start and never re-read
//! (reload-once semantics); a step list edited mid-run has no effect on an
//! in-flight instance.
//!
//! Step execution errors never unwind to the caller: they are captured into
//! the instance (`status = failed`, `error_message`). Errors are only
//! returned for precondition violations the runner cannot record, such as a
//! missing instance row.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mailloom_types::agent::{HumanInput, HumanInputRequired};
use mailloom_types::config::EngineConfig;
use mailloom_types::error::RepositoryError;
use mailloom_types::log::{LogEntry, LogKind};
use mailloom_types::message::ChatMessage;
use mailloom_types::workflow::{
    InstanceStatus, StepDefinition, StepInstance, StepKind, StepSpec, StepStatus,
    WorkflowDefinition, WorkflowInstance,
};

use crate::llm::provider::ChatProvider;
use crate::rag::retriever::RagRetriever;
use crate::repository::balance::BalanceLedger;
use crate::repository::log::RunLog;
use crate::repository::workflow::WorkflowStore;
use crate::tool::broker::ToolBroker;

use super::agent_step::{AgentStepOutcome, AgentStepRunner};
use super::checker_step::evaluate_checker;
use super::llm_step::run_llm_step;
use super::rag_step::run_rag_step;
use super::resolver::{OutputIndex, resolve_references};

// ---------------------------------------------------------------------------
// Outcome & errors
// ---------------------------------------------------------------------------

/// Result of driving one instance.
#[derive(Debug)]
pub enum RunOutcome {
    /// The instance reached a terminal status.
    Finished(InstanceStatus),
    /// An agent step requested human input; the instance stays `running`
    /// until [`WorkflowRunner::resume_with_input`] is called.
    Suspended(HumanInputRequired),
}

/// Precondition failures the runner cannot record on the instance itself.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("workflow instance {0} is not in running state")]
    InstanceNotRunning(Uuid),

    #[error("workflow instance {0} has no suspended agent step")]
    NoSuspendedStep(Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

enum DriveEnd {
    Terminal,
    Suspended(HumanInputRequired),
}

// ---------------------------------------------------------------------------
// WorkflowRunner
// ---------------------------------------------------------------------------

/// Executes workflow instances against the injected store, provider, tool
/// broker, balance ledger, run log and retrieval backend.
///
/// Instances run strictly sequentially internally; distinct instances may be
/// driven concurrently from separate tasks, sharing no mutable state beyond
/// the store.
pub struct WorkflowRunner<S, P, T, B, L, G> {
    store: Arc<S>,
    provider: Arc<P>,
    tools: Arc<T>,
    balance: Arc<B>,
    log: Arc<L>,
    rag: Arc<G>,
    config: EngineConfig,
    /// In-process cancellation requests keyed by instance UUID.
    cancellations: DashMap<Uuid, CancellationToken>,
}

impl<S, P, T, B, L, G> WorkflowRunner<S, P, T, B, L, G>
where
    S: WorkflowStore,
    P: ChatProvider,
    T: ToolBroker,
    B: BalanceLedger,
    L: RunLog,
    G: RagRetriever,
{
    pub fn new(
        store: Arc<S>,
        provider: Arc<P>,
        tools: Arc<T>,
        balance: Arc<B>,
        log: Arc<L>,
        rag: Arc<G>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            tools,
            balance,
            log,
            rag,
            config,
            cancellations: DashMap::new(),
        }
    }

    /// Request cooperative cancellation of a running instance.
    ///
    /// Observed by the run loop between steps; an in-flight step is never
    /// interrupted.
    pub fn request_cancel(&self, instance_uuid: Uuid) {
        self.cancellations
            .entry(instance_uuid)
            .or_insert_with(CancellationToken::new)
            .cancel();
    }

    /// Execute an instance from its first step.
    pub async fn run(&self, instance_uuid: Uuid, user_id: Uuid) -> Result<RunOutcome, RunnerError> {
        tracing::info!(instance = %instance_uuid, "starting workflow run");
        let mut instance = self.load_running_instance(instance_uuid, user_id).await?;

        let Some(definition) = self.load_definition(&mut instance, user_id).await? else {
            return Ok(RunOutcome::Finished(InstanceStatus::Failed));
        };

        self.drive(definition, instance, 0, None).await
    }

    /// Resume an instance suspended on human input.
    ///
    /// Re-enters the loop at the suspended agent step, synthesizing the
    /// paired `tool` message from the caller's payload, then continues with
    /// the remaining steps.
    pub async fn resume_with_input(
        &self,
        instance_uuid: Uuid,
        user_id: Uuid,
        human_input: HumanInput,
    ) -> Result<RunOutcome, RunnerError> {
        tracing::info!(instance = %instance_uuid, "resuming workflow run with human input");
        let mut instance = self.load_running_instance(instance_uuid, user_id).await?;

        let suspended = instance
            .step_instances
            .last()
            .filter(|s| {
                s.kind == StepKind::Agent
                    && s.status == StepStatus::Running
                    && s.finished_at.is_none()
            })
            .cloned()
            .ok_or(RunnerError::NoSuspendedStep(instance_uuid))?;
        instance.step_instances.pop();

        let Some(definition) = self.load_definition(&mut instance, user_id).await? else {
            return Ok(RunOutcome::Finished(InstanceStatus::Failed));
        };

        let Some(index) = definition
            .steps
            .iter()
            .position(|s| *s == suspended.step_definition_uuid)
        else {
            let message = format!(
                "suspended step {} is no longer part of workflow {}",
                suspended.step_definition_uuid, definition.uuid
            );
            self.fail_instance(&mut instance, message).await;
            self.append_workflow_log(Some(&definition), &instance).await;
            return Ok(RunOutcome::Finished(InstanceStatus::Failed));
        };

        self.drive(definition, instance, index, Some((suspended, human_input)))
            .await
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn load_running_instance(
        &self,
        instance_uuid: Uuid,
        user_id: Uuid,
    ) -> Result<WorkflowInstance, RunnerError> {
        let instance = self
            .store
            .get_instance(&instance_uuid, &user_id)
            .await?
            .ok_or(RunnerError::InstanceNotFound(instance_uuid))?;
        if instance.status != InstanceStatus::Running {
            return Err(RunnerError::InstanceNotRunning(instance_uuid));
        }
        Ok(instance)
    }

    /// Load the definition once. A missing definition fails the instance and
    /// yields `None`.
    async fn load_definition(
        &self,
        instance: &mut WorkflowInstance,
        user_id: Uuid,
    ) -> Result<Option<WorkflowDefinition>, RunnerError> {
        match self
            .store
            .get_workflow(&instance.workflow_definition_uuid, &user_id)
            .await?
        {
            Some(definition) => Ok(Some(definition)),
            None => {
                let message = format!(
                    "workflow definition {} not found for instance {}",
                    instance.workflow_definition_uuid, instance.uuid
                );
                tracing::error!("{message}");
                self.fail_instance(instance, message).await;
                self.append_workflow_log(None, instance).await;
                Ok(None)
            }
        }
    }

    async fn drive(
        &self,
        definition: WorkflowDefinition,
        mut instance: WorkflowInstance,
        start_index: usize,
        resume: Option<(StepInstance, HumanInput)>,
    ) -> Result<RunOutcome, RunnerError> {
        let token = self
            .cancellations
            .entry(instance.uuid)
            .or_insert_with(CancellationToken::new)
            .clone();

        tracing::info!(
            workflow = definition.name.as_str(),
            instance = %instance.uuid,
            steps = definition.steps.len(),
            start_index,
            "executing workflow"
        );

        let end = self
            .run_steps(&definition, &mut instance, start_index, resume, &token)
            .await;

        self.cancellations.remove(&instance.uuid);

        match end {
            DriveEnd::Suspended(request) => Ok(RunOutcome::Suspended(request)),
            DriveEnd::Terminal => {
                self.append_workflow_log(Some(&definition), &instance).await;
                Ok(RunOutcome::Finished(instance.status))
            }
        }
    }

    async fn run_steps(
        &self,
        definition: &WorkflowDefinition,
        instance: &mut WorkflowInstance,
        start_index: usize,
        mut resume: Option<(StepInstance, HumanInput)>,
        token: &CancellationToken,
    ) -> DriveEnd {
        let user_id = instance.user_id;
        let mut index = start_index;

        loop {
            if index >= definition.steps.len() {
                tracing::info!(instance = %instance.uuid, "workflow completed all steps");
                instance.status = InstanceStatus::Completed;
                self.persist(instance).await;
                return DriveEnd::Terminal;
            }

            // Cancellation is cooperative, observed only between steps.
            if self.cancel_requested(instance, token).await {
                tracing::info!(instance = %instance.uuid, "workflow cancelled between steps");
                instance.status = InstanceStatus::Cancelled;
                self.persist(instance).await;
                return DriveEnd::Terminal;
            }

            let step_uuid = definition.steps[index];
            let step_def = match self.store.get_step(&step_uuid, &user_id).await {
                Ok(Some(step_def)) => step_def,
                Ok(None) => {
                    let message = format!(
                        "step definition {step_uuid} not found in workflow {}",
                        definition.uuid
                    );
                    tracing::error!("{message}");
                    self.fail_instance(instance, message).await;
                    return DriveEnd::Terminal;
                }
                Err(error) => {
                    self.fail_instance(instance, format!("failed to load step {step_uuid}: {error}"))
                        .await;
                    return DriveEnd::Terminal;
                }
            };

            let outputs = OutputIndex::from_instance(instance);
            let resolved_prompt = step_def
                .system_prompt()
                .map(|prompt| resolve_references(prompt, &outputs));

            match &step_def.spec {
                StepSpec::Llm { model, .. } => {
                    let step_instance = run_llm_step(
                        self.provider.as_ref(),
                        self.balance.as_ref(),
                        self.log.as_ref(),
                        &self.config,
                        &step_def,
                        model,
                        resolved_prompt.as_deref().unwrap_or_default(),
                        user_id,
                        instance.uuid,
                        definition,
                    )
                    .await;
                    if self.absorb(instance, &step_uuid, step_instance).await {
                        return DriveEnd::Terminal;
                    }
                }
                StepSpec::Agent { model, tools, .. } => {
                    let agent = AgentStepRunner {
                        provider: self.provider.as_ref(),
                        tools: self.tools.as_ref(),
                        balance: self.balance.as_ref(),
                        log: self.log.as_ref(),
                        config: &self.config,
                    };
                    let outcome = match resume.take() {
                        Some((pending, human_input)) => {
                            agent
                                .resume(
                                    &step_def, model, tools, pending, human_input, user_id,
                                    definition,
                                )
                                .await
                        }
                        None => {
                            agent
                                .run(
                                    &step_def,
                                    model,
                                    tools,
                                    resolved_prompt.as_deref().unwrap_or_default(),
                                    user_id,
                                    instance.uuid,
                                    definition,
                                )
                                .await
                        }
                    };
                    match outcome {
                        AgentStepOutcome::Finished(step_instance) => {
                            if self.absorb(instance, &step_uuid, step_instance).await {
                                return DriveEnd::Terminal;
                            }
                        }
                        AgentStepOutcome::AwaitingHuman {
                            instance: step_instance,
                            request,
                        } => {
                            tracing::info!(
                                instance = %instance.uuid,
                                step = %step_uuid,
                                "workflow suspended awaiting human input"
                            );
                            instance.step_instances.push(step_instance);
                            self.persist(instance).await;
                            return DriveEnd::Suspended(request);
                        }
                    }
                }
                StepSpec::StopChecker {
                    step_to_check_uuid,
                    check_mode,
                    match_values,
                } => {
                    let mut checker_instance = StepInstance::start(
                        user_id,
                        instance.uuid,
                        step_uuid,
                        StepKind::StopChecker,
                    );
                    let result = evaluate_checker(
                        &step_def.name,
                        step_to_check_uuid.as_ref(),
                        *check_mode,
                        match_values,
                        &outputs,
                    );
                    checker_instance.status = StepStatus::Completed;
                    checker_instance.finished_at = Some(Utc::now());
                    instance.step_instances.push(checker_instance.clone());
                    self.persist(instance).await;

                    self.append_checker_log(&step_def, &checker_instance, instance, &result)
                        .await;

                    if result.should_stop {
                        tracing::info!(
                            instance = %instance.uuid,
                            checker = step_def.name.as_str(),
                            "workflow stopped by checker step"
                        );
                        instance.status = InstanceStatus::Stopped;
                        self.persist(instance).await;
                        return DriveEnd::Terminal;
                    }
                }
                StepSpec::Rag {
                    vectordb_uuid,
                    rerank,
                    top_k,
                    ..
                } => {
                    let step_instance = run_rag_step(
                        self.rag.as_ref(),
                        &step_def,
                        *vectordb_uuid,
                        *rerank,
                        *top_k,
                        resolved_prompt.as_deref().unwrap_or_default(),
                        user_id,
                        instance.uuid,
                    )
                    .await;
                    if self.absorb(instance, &step_uuid, step_instance).await {
                        return DriveEnd::Terminal;
                    }
                }
            }

            index += 1;
        }
    }

    /// Record a finished step on the instance and persist. Returns `true`
    /// when the step failed and the run must stop.
    async fn absorb(
        &self,
        instance: &mut WorkflowInstance,
        step_uuid: &Uuid,
        step_instance: StepInstance,
    ) -> bool {
        let failed = step_instance.status == StepStatus::Failed;
        let step_error = step_instance.error_message.clone();

        if let Some(output) = &step_instance.output {
            if let Err(error) = self.store.create_step_output(output).await {
                tracing::error!(output = %output.uuid, %error, "failed to persist step output");
            }
        }

        instance.step_instances.push(step_instance);
        self.persist(instance).await;

        if failed {
            let message = format!(
                "error executing step {step_uuid} in workflow instance {}: {}",
                instance.uuid,
                step_error.unwrap_or_else(|| "unknown error".to_string())
            );
            self.fail_instance(instance, message).await;
        }
        failed
    }

    async fn fail_instance(&self, instance: &mut WorkflowInstance, message: String) {
        instance.status = InstanceStatus::Failed;
        instance.error_message = Some(message);
        self.persist(instance).await;
    }

    async fn persist(&self, instance: &mut WorkflowInstance) {
        instance.updated_at = Utc::now();
        if let Err(error) = self.store.update_instance(instance).await {
            tracing::error!(instance = %instance.uuid, %error, "failed to persist instance");
        }
    }

    /// Cancellation check between steps: an in-process request or an
    /// externally written `cancelled` status.
    async fn cancel_requested(
        &self,
        instance: &WorkflowInstance,
        token: &CancellationToken,
    ) -> bool {
        if token.is_cancelled() {
            return true;
        }
        matches!(
            self.store.get_instance(&instance.uuid, &instance.user_id).await,
            Ok(Some(stored)) if stored.status == InstanceStatus::Cancelled
        )
    }

    /// The single workflow-level log record, emitted once per finished run.
    async fn append_workflow_log(
        &self,
        definition: Option<&WorkflowDefinition>,
        instance: &WorkflowInstance,
    ) {
        let mut entry = LogEntry::new(instance.user_id, LogKind::Workflow, instance.created_at);
        entry.workflow_uuid = Some(instance.workflow_definition_uuid);
        entry.workflow_instance_uuid = Some(instance.uuid);
        entry.workflow_name = definition.map(|d| d.name.clone());
        entry.reference = Some(
            instance
                .trigger_output
                .as_ref()
                .map(|t| t.markdown_representation.clone())
                .unwrap_or_else(|| "Workflow started without trigger data.".to_string()),
        );

        let workflow_name = definition.map(|d| d.name.as_str()).unwrap_or("<unknown>");
        let mut summary = format!(
            "Workflow '{workflow_name}' finished with status: {}.",
            instance.status.as_str()
        );
        if let Some(error) = &instance.error_message {
            summary.push_str(&format!("\nError: {error}"));
        }
        entry.messages = vec![ChatMessage::system(summary)];
        entry.status = Some(instance.status.as_str().to_string());
        entry.end_time = Some(Utc::now());

        if let Err(error) = self.log.append(&entry).await {
            tracing::error!(instance = %instance.uuid, %error, "failed to save workflow log");
        }
    }

    async fn append_checker_log(
        &self,
        step_def: &StepDefinition,
        checker_instance: &StepInstance,
        instance: &WorkflowInstance,
        result: &mailloom_types::workflow::CheckerResult,
    ) {
        let mut entry = LogEntry::new(
            instance.user_id,
            LogKind::StopChecker,
            checker_instance.started_at,
        );
        entry.workflow_uuid = Some(instance.workflow_definition_uuid);
        entry.workflow_instance_uuid = Some(instance.uuid);
        entry.step_uuid = Some(step_def.uuid);
        entry.step_instance_uuid = Some(checker_instance.uuid);
        entry.step_name = Some(step_def.name.clone());
        entry.messages = vec![
            ChatMessage::system(format!(
                "Input to be evaluated:\n\n---\n{}\n---",
                result.evaluated_input
            )),
            ChatMessage::system(format!("Result: {}", result.reason)),
        ];
        entry.status = Some("completed".to_string());
        entry.end_time = checker_instance.finished_at;

        if let Err(error) = self.log.append(&entry).await {
            tracing::error!(instance = %instance.uuid, %error, "failed to save checker log");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::agent_step::HUMAN_INPUT_TOOL;
    use crate::workflow::testing::{
        FakeBalance, FakeBroker, FakeLog, FakeProvider, FakeRag, MemoryStore, tool_call,
        workflow_with_steps,
    };
    use mailloom_types::message::MessageRole;
    use mailloom_types::workflow::{CheckerMode, StepOutputData, StepSpec};
    use serde_json::json;

    struct Harness {
        store: Arc<MemoryStore>,
        provider: Arc<FakeProvider>,
        log: Arc<FakeLog>,
        runner: WorkflowRunner<MemoryStore, FakeProvider, FakeBroker, FakeBalance, FakeLog, FakeRag>,
    }

    fn harness(provider: FakeProvider) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let provider = Arc::new(provider);
        let log = Arc::new(FakeLog::default());
        let runner = WorkflowRunner::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            Arc::new(FakeBroker::default()),
            Arc::new(FakeBalance::unrestricted()),
            Arc::clone(&log),
            Arc::new(FakeRag::returning("retrieved")),
            EngineConfig::default(),
        );
        Harness {
            store,
            provider,
            log,
            runner,
        }
    }

    fn llm_step(user_id: Uuid, name: &str, prompt: &str) -> mailloom_types::workflow::StepDefinition {
        mailloom_types::workflow::StepDefinition::new(
            user_id,
            name,
            StepSpec::Llm {
                model: "google/gemini-2.5-pro".to_string(),
                system_prompt: prompt.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn two_step_reference_resolution() {
        let user_id = Uuid::now_v7();
        let h = harness(FakeProvider::answering(["Hello, world.", "Hello, world."]));

        let step_a = llm_step(user_id, "greet", "Say Hello, <<trigger_output>>.");
        let step_b = llm_step(user_id, "echo", &format!("Echo: <<step_output.{}>>", step_a.uuid));
        let workflow = workflow_with_steps(user_id, &[step_a.uuid, step_b.uuid]);
        let instance = WorkflowInstance::start(
            user_id,
            workflow.uuid,
            Some(StepOutputData::new(user_id, "world")),
        );
        let instance_uuid = instance.uuid;

        let step_uuids = [step_a.uuid, step_b.uuid];
        h.store.seed_step(step_a);
        h.store.seed_step(step_b);
        h.store.seed_workflow(workflow);
        h.store.seed_instance(instance);

        let outcome = h.runner.run(instance_uuid, user_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(InstanceStatus::Completed)));

        let stored = h.store.instance(&instance_uuid).unwrap();
        assert_eq!(stored.status, InstanceStatus::Completed);
        assert_eq!(stored.step_instances.len(), 2);
        for (step_instance, expected_uuid) in stored.step_instances.iter().zip(step_uuids) {
            assert_eq!(step_instance.step_definition_uuid, expected_uuid);
        }
        assert_eq!(
            stored.step_instances[1]
                .output
                .as_ref()
                .unwrap()
                .markdown_representation,
            "Hello, world."
        );

        // The resolved prompts reached the provider.
        let calls = h.provider.calls();
        assert_eq!(calls[0].messages[0].content.as_deref(), Some("Say Hello, world."));
        assert_eq!(calls[1].messages[0].content.as_deref(), Some("Echo: Hello, world."));

        // One workflow-level log entry on top of the two step entries.
        let workflow_logs: Vec<_> = h
            .log
            .entries()
            .into_iter()
            .filter(|e| e.kind == LogKind::Workflow)
            .collect();
        assert_eq!(workflow_logs.len(), 1);
        assert_eq!(workflow_logs[0].status.as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn stop_checker_short_circuits_remaining_steps() {
        let user_id = Uuid::now_v7();
        let h = harness(FakeProvider::answering(["Decision: STOP now", "Unreachable"]));

        let step_a = llm_step(user_id, "decide", "Decide.");
        let checker = mailloom_types::workflow::StepDefinition::new(
            user_id,
            "gate",
            StepSpec::StopChecker {
                step_to_check_uuid: Some(step_a.uuid),
                check_mode: CheckerMode::StopIfOutputContains,
                match_values: vec!["stop".to_string()],
            },
        );
        let step_c = llm_step(user_id, "after", "Never runs.");
        let workflow = workflow_with_steps(user_id, &[step_a.uuid, checker.uuid, step_c.uuid]);
        let instance = WorkflowInstance::start(user_id, workflow.uuid, None);
        let instance_uuid = instance.uuid;
        let step_c_uuid = step_c.uuid;

        h.store.seed_step(step_a);
        h.store.seed_step(checker);
        h.store.seed_step(step_c);
        h.store.seed_workflow(workflow);
        h.store.seed_instance(instance);

        let outcome = h.runner.run(instance_uuid, user_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(InstanceStatus::Stopped)));

        let stored = h.store.instance(&instance_uuid).unwrap();
        assert_eq!(stored.status, InstanceStatus::Stopped);
        // No StepInstance exists for the unreachable step.
        assert_eq!(stored.step_instances.len(), 2);
        assert!(
            stored
                .step_instances
                .iter()
                .all(|s| s.step_definition_uuid != step_c_uuid)
        );
        assert_eq!(h.provider.calls().len(), 1);
    }

    #[tokio::test]
    async fn unknown_placeholder_is_passed_verbatim_to_llm() {
        let user_id = Uuid::now_v7();
        let h = harness(FakeProvider::answering(["ok"]));

        let prompt = "Use <<step_output.00000000-0000-0000-0000-000000000000>> here.";
        let step = llm_step(user_id, "verbatim", prompt);
        let workflow = workflow_with_steps(user_id, &[step.uuid]);
        let instance = WorkflowInstance::start(user_id, workflow.uuid, None);
        let instance_uuid = instance.uuid;

        h.store.seed_step(step);
        h.store.seed_workflow(workflow);
        h.store.seed_instance(instance);

        let outcome = h.runner.run(instance_uuid, user_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(InstanceStatus::Completed)));
        assert_eq!(h.provider.calls()[0].messages[0].content.as_deref(), Some(prompt));
    }

    #[tokio::test]
    async fn missing_step_definition_fails_instance() {
        let user_id = Uuid::now_v7();
        let h = harness(FakeProvider::answering([]));

        let ghost = Uuid::now_v7();
        let workflow = workflow_with_steps(user_id, &[ghost]);
        let instance = WorkflowInstance::start(user_id, workflow.uuid, None);
        let instance_uuid = instance.uuid;

        h.store.seed_workflow(workflow);
        h.store.seed_instance(instance);

        let outcome = h.runner.run(instance_uuid, user_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(InstanceStatus::Failed)));

        let stored = h.store.instance(&instance_uuid).unwrap();
        assert!(stored.error_message.unwrap().contains(&ghost.to_string()));
    }

    #[tokio::test]
    async fn missing_definition_fails_instance() {
        let user_id = Uuid::now_v7();
        let h = harness(FakeProvider::answering([]));

        let instance = WorkflowInstance::start(user_id, Uuid::now_v7(), None);
        let instance_uuid = instance.uuid;
        h.store.seed_instance(instance);

        let outcome = h.runner.run(instance_uuid, user_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(InstanceStatus::Failed)));
        let stored = h.store.instance(&instance_uuid).unwrap();
        assert!(stored.error_message.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn step_failure_marks_instance_failed_and_stops() {
        let user_id = Uuid::now_v7();
        // Script exhausted on the first call: the LLM step fails.
        let h = harness(FakeProvider::answering([]));

        let step_a = llm_step(user_id, "boom", "prompt");
        let step_b = llm_step(user_id, "after", "prompt");
        let workflow = workflow_with_steps(user_id, &[step_a.uuid, step_b.uuid]);
        let instance = WorkflowInstance::start(user_id, workflow.uuid, None);
        let instance_uuid = instance.uuid;

        h.store.seed_step(step_a);
        h.store.seed_step(step_b);
        h.store.seed_workflow(workflow);
        h.store.seed_instance(instance);

        let outcome = h.runner.run(instance_uuid, user_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(InstanceStatus::Failed)));

        let stored = h.store.instance(&instance_uuid).unwrap();
        // Exactly one step instance: the failed one; nothing after it ran.
        assert_eq!(stored.step_instances.len(), 1);
        assert_eq!(stored.step_instances[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn cancellation_is_observed_before_dispatch() {
        let user_id = Uuid::now_v7();
        let h = harness(FakeProvider::answering(["never"]));

        let step = llm_step(user_id, "slow", "prompt");
        let workflow = workflow_with_steps(user_id, &[step.uuid]);
        let instance = WorkflowInstance::start(user_id, workflow.uuid, None);
        let instance_uuid = instance.uuid;

        h.store.seed_step(step);
        h.store.seed_workflow(workflow);
        h.store.seed_instance(instance);

        h.runner.request_cancel(instance_uuid);
        let outcome = h.runner.run(instance_uuid, user_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(InstanceStatus::Cancelled)));
        assert!(h.provider.calls().is_empty());
    }

    #[tokio::test]
    async fn instance_not_found_is_a_precondition_error() {
        let h = harness(FakeProvider::answering([]));
        let result = h.runner.run(Uuid::now_v7(), Uuid::now_v7()).await;
        assert!(matches!(result, Err(RunnerError::InstanceNotFound(_))));
    }

    #[tokio::test]
    async fn human_input_suspends_and_resume_continues_to_next_step() {
        let user_id = Uuid::now_v7();
        // Turn 1: agent asks for human input. Turn 2 (after resume): agent
        // finishes. Turn 3: the following LLM step runs.
        let h = harness(FakeProvider::scripted(vec![
            FakeProvider::tool_turn(vec![tool_call(
                "call_h",
                HUMAN_INPUT_TOOL,
                r#"{"suggested_name":"X","suggested_description":"Y"}"#,
            )]),
            FakeProvider::text_turn("agent done"),
            FakeProvider::text_turn("llm done"),
        ]));

        let agent = mailloom_types::workflow::StepDefinition::new(
            user_id,
            "ask",
            StepSpec::Agent {
                model: "google/gemini-2.5-pro".to_string(),
                system_prompt: "ask the human".to_string(),
                tools: Default::default(),
            },
        );
        let follow_up = llm_step(user_id, "wrap-up", "Summarize.");
        let workflow = workflow_with_steps(user_id, &[agent.uuid, follow_up.uuid]);
        let instance = WorkflowInstance::start(user_id, workflow.uuid, None);
        let instance_uuid = instance.uuid;

        h.store.seed_step(agent);
        h.store.seed_step(follow_up);
        h.store.seed_workflow(workflow);
        h.store.seed_instance(instance);

        let outcome = h.runner.run(instance_uuid, user_id).await.unwrap();
        let request = match outcome {
            RunOutcome::Suspended(request) => request,
            other => panic!("expected suspension, got {other:?}"),
        };
        assert_eq!(request.tool_call_id, "call_h");
        assert_eq!(request.data, json!({"name": "X", "description": "Y"}));

        // Suspended: instance still running, one in-flight step persisted.
        let stored = h.store.instance(&instance_uuid).unwrap();
        assert_eq!(stored.status, InstanceStatus::Running);
        assert_eq!(stored.step_instances.len(), 1);
        assert_eq!(stored.step_instances[0].status, StepStatus::Running);

        let outcome = h
            .runner
            .resume_with_input(
                instance_uuid,
                user_id,
                HumanInput {
                    tool_call_id: "call_h".to_string(),
                    user_input: json!({"approved": true}),
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(InstanceStatus::Completed)));

        let stored = h.store.instance(&instance_uuid).unwrap();
        assert_eq!(stored.step_instances.len(), 2);
        assert_eq!(stored.step_instances[0].status, StepStatus::Completed);
        // The synthesized tool message carries the caller's payload.
        let tool_message = stored.step_instances[0]
            .messages
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .unwrap();
        assert_eq!(tool_message.content.as_deref(), Some(r#"{"approved":true}"#));
        assert_eq!(
            stored.step_instances[1]
                .output
                .as_ref()
                .unwrap()
                .markdown_representation,
            "llm done"
        );
    }

    #[tokio::test]
    async fn rag_step_output_is_indexed_for_later_steps() {
        let user_id = Uuid::now_v7();
        let h = harness(FakeProvider::answering(["summarized"]));

        let rag = mailloom_types::workflow::StepDefinition::new(
            user_id,
            "retrieve",
            StepSpec::Rag {
                system_prompt: "find context".to_string(),
                vectordb_uuid: Some(Uuid::now_v7()),
                rerank: false,
                top_k: 5,
            },
        );
        let summarize = llm_step(
            user_id,
            "summarize",
            &format!("Summarize: <<step_output.{}>>", rag.uuid),
        );
        let workflow = workflow_with_steps(user_id, &[rag.uuid, summarize.uuid]);
        let instance = WorkflowInstance::start(user_id, workflow.uuid, None);
        let instance_uuid = instance.uuid;

        h.store.seed_step(rag);
        h.store.seed_step(summarize);
        h.store.seed_workflow(workflow);
        h.store.seed_instance(instance);

        let outcome = h.runner.run(instance_uuid, user_id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Finished(InstanceStatus::Completed)));
        assert_eq!(
            h.provider.calls()[0].messages[0].content.as_deref(),
            Some("Summarize: retrieved")
        );
    }
}
