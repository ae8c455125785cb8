//! Append-only run log entries.
//!
//! One entry is written per workflow run and per LLM/agent/checker step,
//! carrying the full message transcript, token counts, cost, and the
//! terminal status so partial runs stay observable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::ChatMessage;

/// What produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Workflow,
    Llm,
    Agent,
    StopChecker,
    Rag,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Workflow => "workflow",
            LogKind::Llm => "llm",
            LogKind::Agent => "agent",
            LogKind::StopChecker => "stop_checker",
            LogKind::Rag => "rag",
        }
    }
}

/// One append-only log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub uuid: Uuid,
    pub user_id: Uuid,
    pub kind: LogKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_instance_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_instance_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Full message transcript at the time of logging.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Short human-readable context, e.g. the trigger markdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Terminal status string of the logged unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl LogEntry {
    /// A minimal entry; callers fill in the identifying fields they have.
    pub fn new(user_id: Uuid, kind: LogKind, start_time: DateTime<Utc>) -> Self {
        Self {
            uuid: Uuid::now_v7(),
            user_id,
            kind,
            workflow_uuid: None,
            workflow_instance_uuid: None,
            workflow_name: None,
            step_uuid: None,
            step_instance_uuid: None,
            step_name: None,
            messages: Vec::new(),
            reference: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            total_cost: None,
            model: None,
            status: None,
            start_time,
            end_time: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_kind_strings_match_serde() {
        for kind in [
            LogKind::Workflow,
            LogKind::Llm,
            LogKind::Agent,
            LogKind::StopChecker,
            LogKind::Rag,
        ] {
            let json_str = serde_json::to_string(&kind).unwrap();
            assert_eq!(json_str, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn entry_roundtrip_with_messages() {
        let mut entry = LogEntry::new(Uuid::now_v7(), LogKind::Agent, Utc::now());
        entry.messages.push(ChatMessage::system("prompt"));
        entry.total_cost = Some(0.012);
        entry.status = Some("completed".to_string());
        let json_str = serde_json::to_string(&entry).unwrap();
        let parsed: LogEntry = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.status.as_deref(), Some("completed"));
    }
}
