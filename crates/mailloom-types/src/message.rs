//! Conversation message types shared by the LLM and agent runners.
//!
//! The shapes follow the OpenAI-compatible chat wire format: an assistant
//! message may carry `tool_calls`, and every tool call is answered by a
//! `tool`-role message carrying the originating `tool_call_id`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// A request embedded in an assistant message to invoke an external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: ToolFunction,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// The function half of a tool call: a qualified name and JSON-encoded
/// arguments, exactly as produced by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFunction {
    /// Fully qualified `"{server}-{tool}"` name.
    pub name: String,
    /// JSON object, serialized as a string by the provider.
    pub arguments: String,
}

/// One conversational turn within a step instance. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Set on `tool`-role messages, pairing the response with its call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }

    /// A `tool`-role response paired to `tool_call_id`.
    pub fn tool_response(
        tool_call_id: impl Into<String>,
        name: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name,
        }
    }

    fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Tool calls carried by this message, empty when absent.
    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&MessageRole::Tool).unwrap(), "\"tool\"");
        let parsed: MessageRole = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(parsed, MessageRole::Assistant);
    }

    #[test]
    fn tool_response_pairs_call_id() {
        let msg = ChatMessage::tool_response("call_1", Some("imap-search".to_string()), "{}");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.name.as_deref(), Some("imap-search"));
    }

    #[test]
    fn assistant_message_with_tool_calls_roundtrip() {
        let msg = ChatMessage {
            role: MessageRole::Assistant,
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call_1".to_string(),
                call_type: "function".to_string(),
                function: ToolFunction {
                    name: "imap-search".to_string(),
                    arguments: r#"{"query":"invoices"}"#.to_string(),
                },
            }]),
            tool_call_id: None,
            name: None,
        };
        let json_str = serde_json::to_string(&msg).unwrap();
        // Absent fields are omitted entirely.
        assert!(!json_str.contains("tool_call_id"));
        let parsed: ChatMessage = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.tool_calls().len(), 1);
        assert_eq!(parsed.tool_calls()[0].function.name, "imap-search");
    }

    #[test]
    fn tool_call_type_defaults_to_function() {
        let parsed: ToolCall = serde_json::from_str(
            r#"{"id":"c1","function":{"name":"a-b","arguments":"{}"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.call_type, "function");
    }
}
