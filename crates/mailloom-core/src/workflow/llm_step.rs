//! LLM step runner: a single non-tool chat call.
//!
//! The returned instance always carries a terminal status and `finished_at`;
//! failures are recorded on the instance rather than propagated, so the
//! workflow runner can fail the run without unwinding. Exactly one assistant
//! message is appended per successful run, and cost is deducted once per call
//! but only when the provider returned a generation id.

use chrono::Utc;
use mailloom_types::config::EngineConfig;
use mailloom_types::error::BalanceError;
use mailloom_types::llm::ChatRequest;
use mailloom_types::log::{LogEntry, LogKind};
use mailloom_types::message::ChatMessage;
use mailloom_types::workflow::{
    StepDefinition, StepInstance, StepKind, StepOutputData, StepStatus, WorkflowDefinition,
};
use uuid::Uuid;

use crate::llm::provider::ChatProvider;
use crate::repository::balance::BalanceLedger;
use crate::repository::log::RunLog;

/// Prompt sent as the user turn of every LLM step.
pub const PROCEED_PROMPT: &str = "Proceed as instructed.";

/// Fallback output when the assistant returned no content.
pub const NO_ANSWER_FALLBACK: &str = "LLM provided no final answer.";

/// Run one LLM step to a terminal state.
#[allow(clippy::too_many_arguments)]
pub async fn run_llm_step<P, B, L>(
    provider: &P,
    balance: &B,
    log: &L,
    config: &EngineConfig,
    definition: &StepDefinition,
    model: &str,
    resolved_prompt: &str,
    user_id: Uuid,
    workflow_instance_uuid: Uuid,
    workflow: &WorkflowDefinition,
) -> StepInstance
where
    P: ChatProvider,
    B: BalanceLedger,
    L: RunLog,
{
    tracing::info!(step = %definition.uuid, instance = %workflow_instance_uuid, "starting LLM step");

    let mut instance = StepInstance::start(
        user_id,
        workflow_instance_uuid,
        definition.uuid,
        StepKind::Llm,
    );

    let mut usage = None;
    let mut total_cost = None;

    match drive(provider, balance, config, &mut instance, model, resolved_prompt, user_id).await {
        Ok(outcome) => {
            usage = outcome.0;
            total_cost = outcome.1;
            instance.status = StepStatus::Completed;
            tracing::info!(step_instance = %instance.uuid, "LLM step completed");
        }
        Err(error) => {
            tracing::error!(step_instance = %instance.uuid, %error, "LLM step failed");
            instance.status = StepStatus::Failed;
            instance.error_message = Some(error);
        }
    }

    instance.finished_at = Some(Utc::now());

    let mut entry = LogEntry::new(user_id, LogKind::Llm, instance.started_at);
    entry.workflow_uuid = Some(workflow.uuid);
    entry.workflow_instance_uuid = Some(workflow_instance_uuid);
    entry.workflow_name = Some(workflow.name.clone());
    entry.step_uuid = Some(definition.uuid);
    entry.step_instance_uuid = Some(instance.uuid);
    entry.step_name = Some(definition.name.clone());
    entry.messages = instance.messages.clone();
    entry.prompt_tokens = usage.map(|u| u64::from(u.prompt_tokens));
    entry.completion_tokens = usage.map(|u| u64::from(u.completion_tokens));
    entry.total_tokens = usage.map(|u| u64::from(u.total_tokens));
    entry.total_cost = total_cost;
    entry.model = Some(model.to_string());
    entry.status = Some(format!("{:?}", instance.status).to_lowercase());
    entry.end_time = instance.finished_at;
    if let Err(error) = log.append(&entry).await {
        tracing::error!(step_instance = %instance.uuid, %error, "failed to save LLM step log");
    }

    instance
}

/// The fallible part of the step: balance gate, chat call, output creation,
/// cost deduction.
async fn drive<P, B>(
    provider: &P,
    balance: &B,
    config: &EngineConfig,
    instance: &mut StepInstance,
    model: &str,
    resolved_prompt: &str,
    user_id: Uuid,
) -> Result<(Option<mailloom_types::llm::TokenUsage>, Option<f64>), String>
where
    P: ChatProvider,
    B: BalanceLedger,
{
    if !config.model_allowed(model) {
        return Err(format!("model '{model}' is not on the allow-list"));
    }

    match balance.check(&user_id).await {
        Ok(()) => {}
        Err(BalanceError::InsufficientBalance) => return Err("insufficient balance".to_string()),
        Err(error) => return Err(format!("balance check failed: {error}")),
    }

    instance.messages = vec![
        ChatMessage::system(resolved_prompt),
        ChatMessage::user(PROCEED_PROMPT),
    ];

    let request = ChatRequest::new(model, instance.messages.clone());
    let outcome = provider.chat(&request).await.map_err(|e| e.to_string())?;

    let content = outcome.content().unwrap_or_default().to_string();
    instance
        .messages
        .push(ChatMessage::assistant(content.clone()));

    let markdown = if content.is_empty() {
        NO_ANSWER_FALLBACK.to_string()
    } else {
        content
    };
    instance.output = Some(StepOutputData::new(user_id, markdown));

    // Cost accounting happens once per call, keyed on the generation id.
    let mut total_cost = None;
    if let Some(generation_id) = &outcome.generation_id {
        match provider.generation_cost(generation_id).await {
            Ok(cost) => {
                total_cost = Some(cost);
                if cost > 0.0 {
                    if let Err(error) = balance.deduct(&user_id, cost).await {
                        tracing::error!(%user_id, %error, "failed to deduct LLM step cost");
                    }
                }
            }
            Err(error) => {
                tracing::error!(
                    generation_id = generation_id.as_str(),
                    %error,
                    "could not retrieve generation cost"
                );
            }
        }
    }

    Ok((outcome.usage, total_cost))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::testing::{
        FakeBalance, FakeLog, FakeProvider, llm_definition, workflow_with_steps,
    };
    use mailloom_types::message::MessageRole;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[tokio::test]
    async fn successful_run_appends_one_assistant_message() {
        let provider = FakeProvider::answering(["Hello, world."]);
        let balance = FakeBalance::unrestricted();
        let log = FakeLog::default();
        let user_id = Uuid::now_v7();
        let definition = llm_definition(user_id, "say-hello");
        let workflow = workflow_with_steps(user_id, &[definition.uuid]);

        let instance = run_llm_step(
            &provider,
            &balance,
            &log,
            &config(),
            &definition,
            "google/gemini-2.5-pro",
            "Say Hello, world.",
            user_id,
            Uuid::now_v7(),
            &workflow,
        )
        .await;

        assert_eq!(instance.status, StepStatus::Completed);
        assert!(instance.finished_at.is_some());
        let assistant_count = instance
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .count();
        assert_eq!(assistant_count, 1);
        assert_eq!(
            instance.output.unwrap().markdown_representation,
            "Hello, world."
        );
        assert_eq!(log.entries().len(), 1);
        // The user turn is the fixed proceed prompt.
        assert_eq!(instance.messages[1].content.as_deref(), Some(PROCEED_PROMPT));
    }

    #[tokio::test]
    async fn empty_content_uses_fallback_output() {
        let provider = FakeProvider::answering([""]);
        let balance = FakeBalance::unrestricted();
        let log = FakeLog::default();
        let user_id = Uuid::now_v7();
        let definition = llm_definition(user_id, "silent");
        let workflow = workflow_with_steps(user_id, &[definition.uuid]);

        let instance = run_llm_step(
            &provider,
            &balance,
            &log,
            &config(),
            &definition,
            "google/gemini-2.5-pro",
            "prompt",
            user_id,
            Uuid::now_v7(),
            &workflow,
        )
        .await;

        assert_eq!(
            instance.output.unwrap().markdown_representation,
            NO_ANSWER_FALLBACK
        );
    }

    #[tokio::test]
    async fn insufficient_balance_fails_before_llm_call() {
        let provider = FakeProvider::answering(["never"]);
        let balance = FakeBalance::depleted();
        let log = FakeLog::default();
        let user_id = Uuid::now_v7();
        let definition = llm_definition(user_id, "gated");
        let workflow = workflow_with_steps(user_id, &[definition.uuid]);

        let instance = run_llm_step(
            &provider,
            &balance,
            &log,
            &config(),
            &definition,
            "google/gemini-2.5-pro",
            "prompt",
            user_id,
            Uuid::now_v7(),
            &workflow,
        )
        .await;

        assert_eq!(instance.status, StepStatus::Failed);
        assert_eq!(instance.error_message.as_deref(), Some("insufficient balance"));
        assert_eq!(provider.calls().len(), 0);
        // The step still logs on failure.
        assert_eq!(log.entries().len(), 1);
    }

    #[tokio::test]
    async fn cost_is_deducted_when_generation_id_present() {
        let provider = FakeProvider::answering(["ok"]).with_cost(0.5);
        let balance = FakeBalance::unrestricted();
        let log = FakeLog::default();
        let user_id = Uuid::now_v7();
        let definition = llm_definition(user_id, "costly");
        let workflow = workflow_with_steps(user_id, &[definition.uuid]);

        run_llm_step(
            &provider,
            &balance,
            &log,
            &config(),
            &definition,
            "google/gemini-2.5-pro",
            "prompt",
            user_id,
            Uuid::now_v7(),
            &workflow,
        )
        .await;

        assert_eq!(balance.deductions(), vec![0.5]);
    }

    #[tokio::test]
    async fn disallowed_model_fails_without_calling_provider() {
        let provider = FakeProvider::answering(["never"]);
        let balance = FakeBalance::unrestricted();
        let log = FakeLog::default();
        let user_id = Uuid::now_v7();
        let definition = llm_definition(user_id, "blocked");
        let workflow = workflow_with_steps(user_id, &[definition.uuid]);
        let config = EngineConfig {
            allowed_models: vec!["other/model".to_string()],
            ..EngineConfig::default()
        };

        let instance = run_llm_step(
            &provider,
            &balance,
            &log,
            &config,
            &definition,
            "google/gemini-2.5-pro",
            "prompt",
            user_id,
            Uuid::now_v7(),
            &workflow,
        )
        .await;

        assert_eq!(instance.status, StepStatus::Failed);
        assert!(provider.calls().is_empty());
    }
}
