//! ChatProvider trait definition.
//!
//! The central chat contract consumed by every step runner. Providers
//! return the full assistant message (including tool calls), token usage,
//! and a generation id; the cost of a metered generation is retrieved
//! out-of-band via [`ChatProvider::generation_cost`].

use mailloom_types::llm::{ChatOutcome, ChatRequest, LlmError};

/// Trait for LLM chat backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
/// Implementations live in mailloom-infra (e.g. `OpenRouterProvider`).
pub trait ChatProvider: Send + Sync {
    /// Human-readable provider name (e.g. "openrouter").
    fn name(&self) -> &str;

    /// Send a chat completion request and receive the full outcome.
    fn chat(
        &self,
        request: &ChatRequest,
    ) -> impl std::future::Future<Output = Result<ChatOutcome, LlmError>> + Send;

    /// Retrieve the total USD cost of a metered generation.
    ///
    /// Providers may need a short settling delay before the cost is final;
    /// implementations return 0.0 when the cost cannot be determined.
    fn generation_cost(
        &self,
        generation_id: &str,
    ) -> impl std::future::Future<Output = Result<f64, LlmError>> + Send;
}
