//! LLM provider contract types.
//!
//! Models the central chat contract consumed by the step runners: a request
//! with optional tool definitions, and an outcome carrying the provider's
//! message, token usage, a generation id for out-of-band cost retrieval, and
//! the raw response for logging.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ChatMessage;

/// A named external capability offered to the model for tool-use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Fully qualified `"{server}-{tool}"` name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-Schema of the tool arguments.
    pub input_schema: Value,
}

/// Whether the provider may emit tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
}

/// A chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Request strict JSON output from the provider.
    #[serde(default)]
    pub response_format_json: bool,
}

impl ChatRequest {
    /// A plain request without tools.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            tool_choice: None,
            response_format_json: false,
        }
    }
}

/// Token usage reported for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The standardized result of one chat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOutcome {
    /// Provider generation id; present whenever the provider metered the
    /// call. Cost retrieval and deduction key off this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Full raw provider response, recorded for observability.
    #[serde(default)]
    pub raw: Value,
}

impl ChatOutcome {
    /// The assistant text content, if any.
    pub fn content(&self) -> Option<&str> {
        self.message.content.as_deref()
    }
}

/// Errors from LLM provider operations.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("model '{0}' is not on the allow-list")]
    ModelNotAllowed(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("rate limited")]
    RateLimited,

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("request timed out")]
    Timeout,
}
