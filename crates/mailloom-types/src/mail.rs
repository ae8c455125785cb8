//! Mail thread types produced by the IMAP bulk fetcher.
//!
//! A [`MailThread`] groups messages sharing one Gmail thread id
//! (`X-GM-THRID`), sorted in timezone-aware chronological order. Each message
//! carries its body in three shapes (raw, markdown, cleaned) so downstream
//! consumers never re-parse RFC822 content.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Whether the account owner sent or received a message, derived from the
/// presence of the `\Sent` Gmail label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Sent,
    Received,
}

/// The three body shapes extracted from every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyFormats {
    /// HTML reply if present, else the plain-text reply.
    pub raw: String,
    /// HTML reply converted to markdown when HTML is available, else the
    /// plain reply.
    pub markdown: String,
    /// Plain reply with markdown syntax stripped and whitespace normalized
    /// to single spaces.
    pub cleaned: String,
}

/// One email message within a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    /// Contextual id (`base64(mailbox):uid`), stable across folder views.
    pub uid: String,
    /// `Message-ID` header without angle brackets. Never empty; messages
    /// lacking one (drafts) are dropped by the fetcher.
    pub message_id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub cc: String,
    #[serde(default)]
    pub bcc: String,
    pub subject: String,
    /// The raw `Date` header.
    pub date: String,
    pub body: BodyFormats,
    /// Gmail labels attached to the message (`X-GM-LABELS`).
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub references: String,
    #[serde(default)]
    pub in_reply_to: String,
    pub kind: MessageKind,
}

impl MailMessage {
    /// Parse the `Date` header, preserving the sender's offset. Accepts
    /// RFC 2822 (the wire format) and RFC 3339 (normalized by parsers).
    /// Unparseable dates sort first.
    pub fn parsed_date(&self) -> Option<DateTime<chrono::FixedOffset>> {
        let date = self.date.trim();
        DateTime::parse_from_rfc2822(date)
            .or_else(|_| DateTime::parse_from_rfc3339(date))
            .ok()
    }
}

/// A complete email thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailThread {
    /// Gmail thread id (`X-GM-THRID`), unique within a fetch result.
    pub thread_id: String,
    pub message_count: usize,
    /// Messages in timezone-aware chronological order.
    pub messages: Vec<MailMessage>,
    /// Unique addresses seen in From/To/Cc across the thread.
    pub participants: Vec<String>,
    /// Subject of the earliest message.
    pub subject: String,
    pub last_message_date: String,
    /// Union of Gmail labels across the thread.
    pub folders: Vec<String>,
}

impl MailThread {
    /// Assemble a thread from its messages.
    ///
    /// Returns `None` for an empty message list. Messages are sorted by
    /// parsed `Date` ascending; messages with unparseable dates sort first.
    pub fn from_messages(mut messages: Vec<MailMessage>, thread_id: impl Into<String>) -> Option<Self> {
        if messages.is_empty() {
            return None;
        }
        messages.sort_by_key(|m| m.parsed_date().map(|d| d.with_timezone(&chrono::Utc)));

        let mut participants = BTreeSet::new();
        let mut folders = BTreeSet::new();
        for msg in &messages {
            participants.extend(addresses_in(&msg.from));
            participants.extend(addresses_in(&msg.to));
            participants.extend(addresses_in(&msg.cc));
            folders.extend(msg.labels.iter().cloned());
        }

        Some(Self {
            thread_id: thread_id.into(),
            message_count: messages.len(),
            subject: messages[0].subject.clone(),
            last_message_date: messages[messages.len() - 1].date.clone(),
            participants: participants.into_iter().collect(),
            folders: folders.into_iter().collect(),
            messages,
        })
    }

    /// Render the whole thread as a markdown document.
    pub fn markdown(&self) -> String {
        let mut lines = vec!["# Email Thread".to_string(), String::new()];
        for (i, message) in self.messages.iter().enumerate() {
            lines.push(format!("## Message {}:", i + 1));
            lines.push(String::new());
            lines.push(format!("* **From:** {}", message.from));
            lines.push(format!("* **To:** {}", message.to));
            if !message.cc.is_empty() {
                lines.push(format!("* **CC:** {}", message.cc));
            }
            lines.push(format!("* **Date:** {}", message.date));
            lines.push(format!("* **Message ID:** {}", message.message_id));
            lines.push(format!("* **Subject:** {}", message.subject));
            lines.push(String::new());
            lines.push(message.body.markdown.clone());
            lines.push(String::new());
            lines.push("---".to_string());
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

/// Extract bare addresses from a comma-separated header value, unwrapping
/// `Name <addr>` forms.
fn addresses_in(header: &str) -> Vec<String> {
    header
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match (part.rfind('<'), part.rfind('>')) {
            (Some(open), Some(close)) if open < close => part[open + 1..close].to_string(),
            _ => part.to_string(),
        })
        .collect()
}

/// Phase-level durations for one bulk fetch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FetchTiming {
    /// Scanning the source folder for recent UIDs.
    pub source_scan: Duration,
    /// Dynamic `X-GM-THRID` batch discovery.
    pub discovery: Duration,
    /// Full thread retrieval from the all-mail folder.
    pub fetch: Duration,
    pub total: Duration,
}
