//! Agent step runner: a bounded multi-turn LLM loop with parallel external
//! tool invocation.
//!
//! Per turn the runner checks the user's balance, calls the LLM with the
//! offered tool list, and either finishes (no tool calls), suspends (the
//! designated human-input tool was requested), or executes the first
//! `max_parallel_tool_calls` calls concurrently while synthesizing structured
//! error responses for the overflow. Every `tool_call.id` produced by the
//! LLM is answered by exactly one `tool` message before the next LLM call.
//!
//! Usage counters and cost accumulate across turns; cost is deducted once on
//! exit, and one structured log entry is emitted on every path so partial
//! runs stay observable.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::{Value, json};
use uuid::Uuid;

use mailloom_types::agent::{AgentUsageTotals, HumanInput, HumanInputRequired, ToolToggle};
use mailloom_types::config::EngineConfig;
use mailloom_types::error::BalanceError;
use mailloom_types::llm::{ChatRequest, ToolChoice, ToolSpec};
use mailloom_types::log::{LogEntry, LogKind};
use mailloom_types::message::{ChatMessage, ToolCall};
use mailloom_types::workflow::{
    StepDefinition, StepInstance, StepKind, StepOutputData, StepStatus, WorkflowDefinition,
};

use crate::llm::provider::ChatProvider;
use crate::repository::balance::BalanceLedger;
use crate::repository::log::RunLog;
use crate::tool::broker::{ToolBroker, ToolCallContext};

/// Tool name that suspends the step for human input instead of executing.
pub const HUMAN_INPUT_TOOL: &str = "feature_request";

/// Fallback output when the final assistant turn had no content.
pub const NO_ANSWER_FALLBACK: &str = "Agent provided no final answer.";

const TIMEOUT_OUTPUT: &str =
    "## Agent Timed Out\n\nAgent reached maximum execution cycles and was terminated.";

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of running (or resuming) one agent step.
#[derive(Debug)]
pub enum AgentStepOutcome {
    /// The step reached a terminal status (completed or failed).
    Finished(StepInstance),
    /// The agent requested human input; no tool was executed this turn and
    /// the step instance stays in `Running` until the caller resumes.
    AwaitingHuman {
        instance: StepInstance,
        request: HumanInputRequired,
    },
}

enum ExecEnd {
    Completed,
    Suspended(HumanInputRequired),
    Failed(String),
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Executes agent steps against a provider, tool broker, balance ledger and
/// run log.
pub struct AgentStepRunner<'a, P, T, B, L> {
    pub provider: &'a P,
    pub tools: &'a T,
    pub balance: &'a B,
    pub log: &'a L,
    pub config: &'a EngineConfig,
}

impl<P, T, B, L> AgentStepRunner<'_, P, T, B, L>
where
    P: ChatProvider,
    T: ToolBroker,
    B: BalanceLedger,
    L: RunLog,
{
    /// Run an agent step from the beginning.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        definition: &StepDefinition,
        model: &str,
        tool_settings: &BTreeMap<String, ToolToggle>,
        resolved_prompt: &str,
        user_id: Uuid,
        workflow_instance_uuid: Uuid,
        workflow: &WorkflowDefinition,
    ) -> AgentStepOutcome {
        tracing::info!(
            step = %definition.uuid,
            instance = %workflow_instance_uuid,
            "starting agent step"
        );
        let mut instance = StepInstance::start(
            user_id,
            workflow_instance_uuid,
            definition.uuid,
            StepKind::Agent,
        );
        instance.messages.push(ChatMessage::system(resolved_prompt));

        self.drive(definition, model, tool_settings, instance, user_id, workflow)
            .await
    }

    /// Resume a suspended agent step with the caller's human input.
    ///
    /// Synthesizes the paired `tool` message and re-enters the main loop
    /// with a fresh cycle budget.
    #[allow(clippy::too_many_arguments)]
    pub async fn resume(
        &self,
        definition: &StepDefinition,
        model: &str,
        tool_settings: &BTreeMap<String, ToolToggle>,
        mut instance: StepInstance,
        human_input: HumanInput,
        user_id: Uuid,
        workflow: &WorkflowDefinition,
    ) -> AgentStepOutcome {
        tracing::info!(
            step_instance = %instance.uuid,
            tool_call_id = human_input.tool_call_id.as_str(),
            "resuming agent step with human input"
        );
        let content = serde_json::to_string(&human_input.user_input)
            .unwrap_or_else(|_| "null".to_string());
        instance.messages.push(ChatMessage::tool_response(
            human_input.tool_call_id,
            Some(HUMAN_INPUT_TOOL.to_string()),
            content,
        ));

        self.drive(definition, model, tool_settings, instance, user_id, workflow)
            .await
    }

    /// Shared driver: tool discovery, the main loop, cost deduction, and the
    /// unconditional log entry.
    async fn drive(
        &self,
        definition: &StepDefinition,
        model: &str,
        tool_settings: &BTreeMap<String, ToolToggle>,
        mut instance: StepInstance,
        user_id: Uuid,
        workflow: &WorkflowDefinition,
    ) -> AgentStepOutcome {
        let mut totals = AgentUsageTotals::default();

        let end = self
            .execute(&mut instance, model, tool_settings, user_id, &mut totals)
            .await;

        // Cost deduction happens once per drive, on every exit path, and
        // never changes the step's terminal status.
        if totals.total_cost > 0.0 {
            tracing::info!(
                %user_id,
                cost = totals.total_cost,
                "deducting agent step cost"
            );
            if let Err(error) = self.balance.deduct(&user_id, totals.total_cost).await {
                tracing::error!(%user_id, %error, "failed to deduct agent step cost");
            }
        }

        let (outcome_status, request) = match end {
            ExecEnd::Completed => {
                instance.status = StepStatus::Completed;
                instance.finished_at = Some(Utc::now());
                ("completed", None)
            }
            ExecEnd::Failed(error) => {
                tracing::error!(step_instance = %instance.uuid, %error, "agent step failed");
                instance.status = StepStatus::Failed;
                instance.error_message = Some(error);
                instance.finished_at = Some(Utc::now());
                ("failed", None)
            }
            ExecEnd::Suspended(request) => ("running", Some(request)),
        };

        let mut entry = LogEntry::new(user_id, LogKind::Agent, instance.started_at);
        entry.workflow_uuid = Some(workflow.uuid);
        entry.workflow_instance_uuid = Some(instance.workflow_instance_uuid);
        entry.workflow_name = Some(workflow.name.clone());
        entry.step_uuid = Some(definition.uuid);
        entry.step_instance_uuid = Some(instance.uuid);
        entry.step_name = Some(definition.name.clone());
        entry.messages = instance.messages.clone();
        entry.prompt_tokens = Some(totals.prompt_tokens);
        entry.completion_tokens = Some(totals.completion_tokens);
        entry.total_tokens = Some(totals.total_tokens);
        entry.total_cost = Some(totals.total_cost);
        entry.model = Some(model.to_string());
        entry.status = Some(outcome_status.to_string());
        entry.end_time = Some(Utc::now());
        if let Err(error) = self.log.append(&entry).await {
            tracing::error!(step_instance = %instance.uuid, %error, "failed to save agent step log");
        }

        match request {
            Some(request) => AgentStepOutcome::AwaitingHuman { instance, request },
            None => AgentStepOutcome::Finished(instance),
        }
    }

    async fn execute(
        &self,
        instance: &mut StepInstance,
        model: &str,
        tool_settings: &BTreeMap<String, ToolToggle>,
        user_id: Uuid,
        totals: &mut AgentUsageTotals,
    ) -> ExecEnd {
        if !self.config.model_allowed(model) {
            return ExecEnd::Failed(format!("model '{model}' is not on the allow-list"));
        }

        let offered = match self.discover_tools(tool_settings, instance).await {
            Ok(offered) => offered,
            Err(end) => return end,
        };

        let max_cycles = self.config.max_agent_cycles;
        tracing::info!(
            step_instance = %instance.uuid,
            tools = offered.len(),
            max_cycles,
            "starting agent execution loop"
        );

        for turn in 1..=max_cycles {
            tracing::debug!(step_instance = %instance.uuid, turn, max_cycles, "agent turn");

            match self.balance.check(&user_id).await {
                Ok(()) => {}
                Err(BalanceError::InsufficientBalance) => {
                    return ExecEnd::Failed("insufficient balance".to_string());
                }
                Err(error) => return ExecEnd::Failed(format!("balance check failed: {error}")),
            }

            let request = ChatRequest {
                model: model.to_string(),
                messages: instance.messages.clone(),
                tools: (!offered.is_empty()).then(|| offered.clone()),
                tool_choice: Some(if offered.is_empty() {
                    ToolChoice::None
                } else {
                    ToolChoice::Auto
                }),
                response_format_json: false,
            };

            let outcome = match self.provider.chat(&request).await {
                Ok(outcome) => outcome,
                Err(error) => return ExecEnd::Failed(error.to_string()),
            };

            if let Some(usage) = &outcome.usage {
                totals.add_usage(usage);
            }
            if let Some(generation_id) = &outcome.generation_id {
                match self.provider.generation_cost(generation_id).await {
                    Ok(cost) => totals.total_cost += cost,
                    Err(error) => {
                        tracing::error!(
                            generation_id = generation_id.as_str(),
                            %error,
                            "could not retrieve generation cost"
                        );
                    }
                }
            }

            instance.messages.push(outcome.message.clone());

            let calls = outcome.message.tool_calls().to_vec();
            if calls.is_empty() {
                tracing::info!(step_instance = %instance.uuid, turn, "agent finished execution loop");
                let content = outcome.content().unwrap_or_default();
                let markdown = if content.is_empty() {
                    NO_ANSWER_FALLBACK.to_string()
                } else {
                    content.to_string()
                };
                instance.output = Some(StepOutputData::new(user_id, markdown));
                return ExecEnd::Completed;
            }

            // Human-input short-circuit: nothing executes this turn.
            if let Some(call) = calls.iter().find(|c| c.function.name == HUMAN_INPUT_TOOL) {
                match human_input_request(call) {
                    Ok(request) => {
                        tracing::info!(
                            step_instance = %instance.uuid,
                            tool_call_id = call.id.as_str(),
                            "human input required, suspending agent step"
                        );
                        return ExecEnd::Suspended(request);
                    }
                    Err(error) => {
                        // Malformed suspension arguments: answer every call
                        // with an error so the pairing invariant holds, then
                        // let the LLM retry.
                        tracing::error!(
                            step_instance = %instance.uuid,
                            %error,
                            "invalid human input request arguments"
                        );
                        for call in &calls {
                            instance.messages.push(ChatMessage::tool_response(
                                &call.id,
                                Some(call.function.name.clone()),
                                format!("Error executing tool: {error}"),
                            ));
                        }
                        continue;
                    }
                }
            }

            self.run_tool_calls(instance, &calls, user_id).await;

            if turn == max_cycles {
                tracing::warn!(
                    step_instance = %instance.uuid,
                    max_cycles,
                    "agent reached max cycles, finishing"
                );
                instance.output = Some(StepOutputData::new(user_id, TIMEOUT_OUTPUT));
                return ExecEnd::Completed;
            }
        }

        // Only reachable with max_cycles == 0.
        instance.output = Some(StepOutputData::new(user_id, TIMEOUT_OUTPUT));
        ExecEnd::Completed
    }

    /// Open every configured server, list tools in parallel, and gate the
    /// offered set on the agent's enabled tool ids.
    ///
    /// Listing errors on individual servers are logged and skipped; the step
    /// fails only when an enabled tool ends up unavailable.
    async fn discover_tools(
        &self,
        tool_settings: &BTreeMap<String, ToolToggle>,
        instance: &mut StepInstance,
    ) -> Result<Vec<ToolSpec>, ExecEnd> {
        let servers = self.tools.server_names();
        let listings = join_all(servers.iter().map(|server| async move {
            (server.clone(), self.tools.list_tools(server).await)
        }))
        .await;

        let mut available = BTreeSet::new();
        let mut offered = Vec::new();
        for (server, result) in listings {
            match result {
                Ok(tools) => {
                    for tool in tools {
                        let qualified = format!("{server}-{}", tool.name);
                        available.insert(qualified.clone());
                        offered.push(ToolSpec {
                            name: qualified,
                            description: tool.description,
                            input_schema: tool.input_schema,
                        });
                    }
                }
                Err(error) => {
                    tracing::error!(server = server.as_str(), %error, "failed to list tools from server");
                }
            }
        }
        tracing::info!(total = available.len(), "discovered tools from all servers");

        let enabled: BTreeSet<String> = tool_settings
            .iter()
            .filter(|(_, toggle)| toggle.enabled)
            .map(|(id, _)| id.clone())
            .collect();

        let missing: Vec<String> = enabled.difference(&available).cloned().collect();
        if !missing.is_empty() {
            let message = format!(
                "required tools unavailable: {}",
                missing.join(", ")
            );
            instance.messages.push(ChatMessage::system(message.clone()));
            return Err(ExecEnd::Failed(message));
        }

        offered.retain(|tool| enabled.contains(&tool.name));
        Ok(offered)
    }

    /// Execute one turn's tool calls: the first `max_parallel_tool_calls`
    /// concurrently, the overflow answered with structured error payloads.
    async fn run_tool_calls(&self, instance: &mut StepInstance, calls: &[ToolCall], user_id: Uuid) {
        let cap = self.config.max_parallel_tool_calls;
        let split = calls.len().min(cap);
        let (accepted, rejected) = calls.split_at(split);

        let context = ToolCallContext {
            user_id,
            workflow_instance_uuid: instance.workflow_instance_uuid,
        };

        let results = join_all(accepted.iter().map(|call| self.dispatch(call, &context))).await;
        for (call, content) in accepted.iter().zip(results) {
            instance.messages.push(ChatMessage::tool_response(
                &call.id,
                Some(call.function.name.clone()),
                content,
            ));
        }

        for (offset, call) in rejected.iter().enumerate() {
            let payload = json!({
                "error": "too_many_parallel_tool_calls",
                "called": calls.len(),
                "max_allowed": cap,
                "rejected_index": split + offset,
                "note": "The agent requested more tool calls than allowed in a single turn. \
                         Please retry with fewer calls.",
            });
            instance.messages.push(ChatMessage::tool_response(
                &call.id,
                Some(call.function.name.clone()),
                payload.to_string(),
            ));
        }
    }

    /// Dispatch one accepted tool call, returning the `tool` message content.
    async fn dispatch(&self, call: &ToolCall, context: &ToolCallContext) -> String {
        let Some((server, tool)) = call.function.name.split_once('-') else {
            return format!(
                "Error executing tool: malformed tool name '{}'",
                call.function.name
            );
        };

        let arguments = match serde_json::from_str::<Value>(&call.function.arguments) {
            Ok(value) => decode_string_arguments(value),
            Err(error) => return format!("Error executing tool: invalid arguments: {error}"),
        };

        match self.tools.call_tool(server, tool, arguments, context).await {
            Ok(payload) => {
                let unwrapped = match payload {
                    Value::Object(ref map) if map.contains_key("result") => map["result"].clone(),
                    other => other,
                };
                serde_json::to_string(&unwrapped).unwrap_or_else(|_| "null".to_string())
            }
            Err(error) => {
                tracing::error!(tool = call.function.name.as_str(), %error, "error calling tool");
                format!("Error executing tool: {error}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a [`HumanInputRequired`] descriptor from the suspended tool call.
fn human_input_request(call: &ToolCall) -> Result<HumanInputRequired, String> {
    let args: Value = serde_json::from_str(&call.function.arguments)
        .map_err(|e| format!("invalid human input request arguments: {e}"))?;
    Ok(HumanInputRequired {
        tool_call_id: call.id.clone(),
        data: json!({
            "name": args.get("suggested_name").and_then(Value::as_str).unwrap_or_default(),
            "description": args.get("suggested_description").and_then(Value::as_str).unwrap_or_default(),
        }),
    })
}

/// Undo one level of JSON string encoding on object values.
///
/// Providers sometimes double-encode argument values as JSON strings; a
/// single decode is attempted per value and the raw string is forwarded when
/// decoding fails.
fn decode_string_arguments(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| {
                    let v = match v {
                        Value::String(s) => match serde_json::from_str::<Value>(&s) {
                            Ok(decoded) => decoded,
                            Err(_) => Value::String(s),
                        },
                        other => other,
                    };
                    (key, v)
                })
                .collect(),
        ),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
