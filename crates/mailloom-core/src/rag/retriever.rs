//! Retrieval trait for RAG steps.
//!
//! Vector-store integrations are external collaborators; the engine only
//! depends on this contract. Implementations keep one collection per user
//! and create it idempotently (tolerating concurrent creation).

use mailloom_types::workflow::StepOutputData;
use thiserror::Error;
use uuid::Uuid;

/// One retrieval request issued by a RAG step.
#[derive(Debug, Clone)]
pub struct RagQuery {
    pub user_id: Uuid,
    pub workflow_instance_uuid: Uuid,
    pub step_definition_uuid: Uuid,
    /// The resolved query/grounding prompt.
    pub prompt: String,
    pub vectordb_uuid: Uuid,
    pub rerank: bool,
    pub top_k: u32,
}

/// Errors from retrieval backends.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("vector database {0} not found")]
    VectorDbNotFound(Uuid),

    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),
}

/// Trait for retrieval + optional rerank over a configured vector database.
pub trait RagRetriever: Send + Sync {
    fn retrieve(
        &self,
        query: &RagQuery,
    ) -> impl std::future::Future<Output = Result<StepOutputData, RagError>> + Send;
}
