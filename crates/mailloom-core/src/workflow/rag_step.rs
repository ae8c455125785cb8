//! RAG step runner: retrieval over a configured vector database.
//!
//! The retrieval backend is an external collaborator behind the
//! [`RagRetriever`] trait. The runner validates the step configuration,
//! delegates, and stores the returned output on a terminal instance.

use chrono::Utc;
use uuid::Uuid;

use mailloom_types::workflow::{StepDefinition, StepInstance, StepKind, StepStatus};

use crate::rag::retriever::{RagQuery, RagRetriever};

/// Run one RAG step to a terminal state.
pub async fn run_rag_step<G>(
    rag: &G,
    definition: &StepDefinition,
    vectordb_uuid: Option<Uuid>,
    rerank: bool,
    top_k: u32,
    resolved_prompt: &str,
    user_id: Uuid,
    workflow_instance_uuid: Uuid,
) -> StepInstance
where
    G: RagRetriever,
{
    let mut instance = StepInstance::start(
        user_id,
        workflow_instance_uuid,
        definition.uuid,
        StepKind::Rag,
    );

    let Some(vectordb_uuid) = vectordb_uuid else {
        let message =
            "RAG step is not configured: edit the step and select a vector database".to_string();
        tracing::error!(step = %definition.uuid, "{message}");
        instance.status = StepStatus::Failed;
        instance.error_message = Some(message);
        instance.finished_at = Some(Utc::now());
        return instance;
    };

    let query = RagQuery {
        user_id,
        workflow_instance_uuid,
        step_definition_uuid: definition.uuid,
        prompt: resolved_prompt.to_string(),
        vectordb_uuid,
        rerank,
        top_k,
    };

    match rag.retrieve(&query).await {
        Ok(output) => {
            tracing::info!(step_instance = %instance.uuid, "RAG step completed");
            instance.output = Some(output);
            instance.status = StepStatus::Completed;
        }
        Err(error) => {
            tracing::error!(step_instance = %instance.uuid, %error, "RAG step failed");
            instance.status = StepStatus::Failed;
            instance.error_message = Some(error.to_string());
        }
    }

    instance.finished_at = Some(Utc::now());
    instance
}
