//! IMAP session abstraction and the Gmail-backed implementation.
//!
//! All I/O within one session is sequential on one connection (IMAP sessions
//! are not safe to share). The bulk fetcher is generic over [`ImapSession`]
//! so its batching and deduplication logic is exercised against scripted
//! fakes; `GmailSession` is the production implementation over async-imap
//! with TLS.
//!
//! Gmail extension items (`X-GM-THRID`, `X-GM-LABELS`) are fetched with raw
//! commands and parsed from the response text, mirroring how the extension
//! data comes back as untyped fetch attributes. Any protocol failure
//! invalidates the session; callers drop the connection and reconnect on
//! retry.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use futures_util::TryStreamExt;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

use mailloom_types::error::MailError;

use super::folders::Folder;

/// One fully fetched message: UID plus the raw RFC822 bytes.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub uid: u32,
    pub rfc822: Vec<u8>,
}

/// Credentials for one user's IMAP account.
#[derive(Clone)]
pub struct ImapCredentials {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

/// The session operations the bulk fetcher depends on.
pub trait ImapSession: Send {
    /// LIST all folders with their attributes.
    fn list_folders(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Vec<Folder>, MailError>> + Send;

    /// Select a folder read-only.
    fn examine(
        &mut self,
        folder: &str,
    ) -> impl std::future::Future<Output = Result<(), MailError>> + Send;

    /// UIDs of messages received since `cutoff`, ascending.
    fn uid_search_since(
        &mut self,
        cutoff: NaiveDate,
    ) -> impl std::future::Future<Output = Result<Vec<u32>, MailError>> + Send;

    /// UIDs of every message belonging to one Gmail thread.
    fn uid_search_thread(
        &mut self,
        thread_id: u64,
    ) -> impl std::future::Future<Output = Result<Vec<u32>, MailError>> + Send;

    /// Batched `X-GM-THRID` lookup: `(uid, thread_id)` pairs for the batch,
    /// one round trip.
    fn fetch_thread_ids(
        &mut self,
        uids: &[u32],
    ) -> impl std::future::Future<Output = Result<Vec<(u32, u64)>, MailError>> + Send;

    /// Batched `X-GM-LABELS` lookup for the given UIDs.
    fn fetch_labels(
        &mut self,
        uids: &[u32],
    ) -> impl std::future::Future<Output = Result<HashMap<u32, Vec<String>>, MailError>> + Send;

    /// Full RFC822 fetch for the given UIDs, one round trip.
    fn fetch_messages(
        &mut self,
        uids: &[u32],
    ) -> impl std::future::Future<Output = Result<Vec<FetchedMessage>, MailError>> + Send;
}

// ---------------------------------------------------------------------------
// GmailSession
// ---------------------------------------------------------------------------

type TlsSession = async_imap::Session<async_native_tls::TlsStream<tokio::net::TcpStream>>;

/// Production [`ImapSession`] over async-imap with TLS.
pub struct GmailSession {
    session: TlsSession,
}

impl GmailSession {
    /// Connect and authenticate.
    pub async fn connect(credentials: &ImapCredentials) -> Result<Self, MailError> {
        tracing::debug!(
            server = credentials.server.as_str(),
            port = credentials.port,
            "connecting to IMAP server"
        );
        let tcp = tokio::net::TcpStream::connect((credentials.server.as_str(), credentials.port))
            .await
            .map_err(|e| MailError::Connection(e.to_string()))?;
        let tls = async_native_tls::TlsConnector::new();
        let tls_stream = tls
            .connect(credentials.server.as_str(), tcp)
            .await
            .map_err(|e| MailError::Connection(e.to_string()))?;

        let client = async_imap::Client::new(tls_stream);
        let session = client
            .login(
                credentials.username.as_str(),
                credentials.password.expose_secret(),
            )
            .await
            .map_err(|(e, _)| MailError::Connection(format!("login failed: {e}")))?;
        tracing::debug!("IMAP login successful");

        Ok(Self { session })
    }

    /// Close the session, tolerating an already-dropped connection.
    pub async fn logout(mut self) {
        if let Err(error) = self.session.logout().await {
            tracing::warn!(%error, "error during IMAP logout");
        }
    }

    async fn raw_response(&mut self, command: String) -> Result<String, MailError> {
        let id = self
            .session
            .run_command(&command)
            .await
            .map_err(|e| MailError::Protocol(e.to_string()))?;
        let mut bytes = Vec::new();
        loop {
            let response = self
                .session
                .read_response()
                .await
                .map_err(|e| MailError::Protocol(e.to_string()))?
                .ok_or_else(|| MailError::Protocol("IMAP connection closed".to_string()))?;
            if response.request_id() == Some(&id) {
                break;
            }
            bytes.extend_from_slice(response.borrow_owner());
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn list_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\((?P<attrs>[^)]*)\)\s+"(?:[^"]*)"\s+(?P<name>.+)"#)
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Parse one `* LIST (\Attrs) "/" "Name"` line.
pub(crate) fn parse_list_line(line: &str) -> Option<Folder> {
    let caps = list_line_re().captures(line)?;
    let attributes = caps["attrs"]
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let name = caps["name"].trim().trim_matches('"').to_string();
    Some(Folder { name, attributes })
}

/// Parse `(uid, thread_id)` pairs out of a raw `UID FETCH … (X-GM-THRID)`
/// response, e.g. `* 487 FETCH (X-GM-THRID 1835242092809915053 UID 600)`.
pub(crate) fn parse_thread_id_response(response: &str) -> Vec<(u32, u64)> {
    static UID_RE: OnceLock<Regex> = OnceLock::new();
    static THRID_RE: OnceLock<Regex> = OnceLock::new();
    let uid_re = UID_RE.get_or_init(|| Regex::new(r"UID (\d+)").unwrap_or_else(|_| unreachable!()));
    let thrid_re = THRID_RE
        .get_or_init(|| Regex::new(r"X-GM-THRID (\d+)").unwrap_or_else(|_| unreachable!()));

    response
        .lines()
        .filter_map(|line| {
            let uid = uid_re.captures(line)?[1].parse().ok()?;
            let thread_id = thrid_re.captures(line)?[1].parse().ok()?;
            Some((uid, thread_id))
        })
        .collect()
}

/// Parse per-UID Gmail labels out of a raw `UID FETCH … (X-GM-LABELS)`
/// response. Labels may be quoted (`"\\Sent"`) or bare (`\Inbox`).
pub(crate) fn parse_labels_response(response: &str) -> HashMap<u32, Vec<String>> {
    static UID_RE: OnceLock<Regex> = OnceLock::new();
    static LABELS_RE: OnceLock<Regex> = OnceLock::new();
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    let uid_re = UID_RE.get_or_init(|| Regex::new(r"UID (\d+)").unwrap_or_else(|_| unreachable!()));
    let labels_re = LABELS_RE
        .get_or_init(|| Regex::new(r"X-GM-LABELS \(([^)]*)\)").unwrap_or_else(|_| unreachable!()));
    let token_re = TOKEN_RE
        .get_or_init(|| Regex::new(r#""([^"]*)"|(\S+)"#).unwrap_or_else(|_| unreachable!()));

    let mut labels_by_uid = HashMap::new();
    for line in response.lines() {
        let Some(uid) = uid_re.captures(line).and_then(|c| c[1].parse().ok()) else {
            continue;
        };
        let Some(labels_caps) = labels_re.captures(line) else {
            continue;
        };
        let labels = token_re
            .captures_iter(&labels_caps[1])
            .map(|caps| {
                caps.get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str().replace("\\\\", "\\"))
                    .unwrap_or_default()
            })
            .filter(|label| !label.is_empty())
            .collect();
        labels_by_uid.insert(uid, labels);
    }
    labels_by_uid
}

impl ImapSession for GmailSession {
    async fn list_folders(&mut self) -> Result<Vec<Folder>, MailError> {
        let response = self.raw_response(r#"LIST "" "*""#.to_string()).await?;
        Ok(response
            .lines()
            .filter(|line| line.starts_with("* LIST"))
            .filter_map(parse_list_line)
            .collect())
    }

    async fn examine(&mut self, folder: &str) -> Result<(), MailError> {
        self.session
            .examine(folder)
            .await
            .map(|_| ())
            .map_err(|e| MailError::Protocol(e.to_string()))
    }

    async fn uid_search_since(&mut self, cutoff: NaiveDate) -> Result<Vec<u32>, MailError> {
        let query = format!("SINCE {}", cutoff.format("%d-%b-%Y"));
        let uids = self
            .session
            .uid_search(&query)
            .await
            .map_err(|e| MailError::Protocol(e.to_string()))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn uid_search_thread(&mut self, thread_id: u64) -> Result<Vec<u32>, MailError> {
        let uids = self
            .session
            .uid_search(&format!("X-GM-THRID {thread_id}"))
            .await
            .map_err(|e| MailError::Protocol(e.to_string()))?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_thread_ids(&mut self, uids: &[u32]) -> Result<Vec<(u32, u64)>, MailError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .raw_response(format!("UID FETCH {} (X-GM-THRID)", uid_set(uids)))
            .await?;
        Ok(parse_thread_id_response(&response))
    }

    async fn fetch_labels(&mut self, uids: &[u32]) -> Result<HashMap<u32, Vec<String>>, MailError> {
        if uids.is_empty() {
            return Ok(HashMap::new());
        }
        let response = self
            .raw_response(format!("UID FETCH {} (X-GM-LABELS)", uid_set(uids)))
            .await?;
        Ok(parse_labels_response(&response))
    }

    async fn fetch_messages(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, MailError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let stream = self
            .session
            .uid_fetch(uid_set(uids), "(RFC822)")
            .await
            .map_err(|e| MailError::Protocol(e.to_string()))?;
        let fetches: Vec<_> = stream
            .try_collect()
            .await
            .map_err(|e| MailError::Protocol(e.to_string()))?;

        Ok(fetches
            .into_iter()
            .filter_map(|fetch| {
                let uid = fetch.uid?;
                let rfc822 = fetch.body().map(<[u8]>::to_vec)?;
                Some(FetchedMessage { uid, rfc822 })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_lines_with_attributes() {
        let folder =
            parse_list_line(r#"* LIST (\HasNoChildren \Sent) "/" "[Gmail]/Sent Mail""#).unwrap();
        assert_eq!(folder.name, "[Gmail]/Sent Mail");
        assert!(folder.attributes.contains(&"\\Sent".to_string()));
    }

    #[test]
    fn parses_thread_id_fetch_response() {
        let response = concat!(
            "* 487 FETCH (X-GM-THRID 1835242092809915053 UID 600)\r\n",
            "* 488 FETCH (X-GM-THRID 1835242092809915053 UID 601)\r\n",
            "* 489 FETCH (X-GM-THRID 99 UID 602)\r\n",
            "a4 OK Success\r\n",
        );
        let pairs = parse_thread_id_response(response);
        assert_eq!(
            pairs,
            vec![
                (600, 1835242092809915053),
                (601, 1835242092809915053),
                (602, 99)
            ]
        );
    }

    #[test]
    fn parses_labels_with_quoted_and_bare_tokens() {
        let response = concat!(
            r#"* 12 FETCH (X-GM-LABELS (\Inbox "\\Sent" "project x") UID 600)"#,
            "\r\n",
            "a5 OK Success\r\n",
        );
        let labels = parse_labels_response(response);
        let for_600 = &labels[&600];
        assert!(for_600.contains(&"\\Inbox".to_string()));
        assert!(for_600.contains(&"\\Sent".to_string()));
        assert!(for_600.contains(&"project x".to_string()));
    }

    #[test]
    fn uid_set_joins_with_commas() {
        assert_eq!(uid_set(&[600, 601, 700]), "600,601,700");
    }
}
