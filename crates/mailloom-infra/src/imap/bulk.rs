//! Bulk thread fetching.
//!
//! Returns up to `target_thread_count` recent unique Gmail threads from a
//! chosen source folder within a max-age window, in three phases:
//!
//! 1. **Source scan**: UID search in the source folder, newest first.
//! 2. **Thread discovery**: batched `X-GM-THRID` fetches (one round trip per
//!    batch) until enough unique thread ids are known. New thread ids found
//!    past the target are not taken, so the result never exceeds it.
//! 3. **Full retrieval**: for each thread, search its members in the
//!    all-mail folder and fetch them in one batch. Per-thread failures are
//!    logged and skipped; the call still returns the threads that worked.
//!
//! All I/O runs sequentially on one session. Cross-task concurrency per user
//! is bounded by the semaphore in [`super::limits`].

#[cfg(test)]
use std::collections::HashMap;
use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use mail_parser::{Address, HeaderValue, Message, MessageParser};
use uuid::Uuid;

use mailloom_types::config::EngineConfig;
use mailloom_types::error::MailError;
use mailloom_types::mail::{FetchTiming, MailMessage, MailThread, MessageKind};

use super::body::extract_body_formats;
use super::contextual::create_contextual_id;
use super::folders::FolderResolver;
use super::limits::user_slot;
use super::session::{GmailSession, ImapCredentials, ImapSession};

/// UIDs per `X-GM-THRID` discovery round trip.
pub const THRID_BATCH_SIZE: usize = 10;

/// Fetch recent unique threads over an already-open session.
pub async fn fetch_recent_threads_bulk<S: ImapSession>(
    session: &mut S,
    target_thread_count: usize,
    max_age_months: u32,
    source_folder_attribute: &str,
) -> Result<(Vec<MailThread>, FetchTiming), MailError> {
    let started = Instant::now();
    let mut timing = FetchTiming::default();

    let folders = session.list_folders().await?;
    let resolver = FolderResolver::new(&folders);
    let source_folder = resolver.resolve(source_folder_attribute)?;
    let all_mail_folder = resolver.resolve("\\All")?;

    // Phase 1: scan the source folder for recent UIDs, newest first.
    let scan_started = Instant::now();
    session.examine(&source_folder).await?;
    let cutoff = Utc::now().date_naive() - chrono::Days::new(u64::from(max_age_months) * 30);
    let mut source_uids = session.uid_search_since(cutoff).await?;
    source_uids.reverse();
    timing.source_scan = scan_started.elapsed();
    tracing::info!(
        folder = source_folder.as_str(),
        count = source_uids.len(),
        max_age_months,
        "found recent messages in source folder"
    );

    if source_uids.is_empty() {
        timing.total = started.elapsed();
        return Ok((Vec::new(), timing));
    }

    // Phase 2: dynamic X-GM-THRID batching until the target is reached.
    let discovery_started = Instant::now();
    let mut thread_order: Vec<u64> = Vec::new();
    let mut scanned = 0usize;
    for batch in source_uids.chunks(THRID_BATCH_SIZE) {
        if thread_order.len() >= target_thread_count {
            break;
        }
        scanned += batch.len();
        let pairs = match session.fetch_thread_ids(batch).await {
            Ok(pairs) => pairs,
            Err(error) => {
                tracing::warn!(%error, "failed to batch fetch thread ids");
                continue;
            }
        };
        for (_, thread_id) in pairs {
            if thread_order.contains(&thread_id) {
                continue;
            }
            // The cap also applies inside a batch, so the result never
            // exceeds the target.
            if thread_order.len() >= target_thread_count {
                continue;
            }
            thread_order.push(thread_id);
        }
    }
    timing.discovery = discovery_started.elapsed();
    tracing::info!(
        threads = thread_order.len(),
        scanned,
        of = source_uids.len(),
        target = target_thread_count,
        "thread discovery complete"
    );

    // Phase 3: full thread retrieval from the all-mail folder.
    let fetch_started = Instant::now();
    session.examine(&all_mail_folder).await?;

    let mut threads = Vec::new();
    let mut processed: HashSet<u64> = HashSet::new();
    for thread_id in thread_order {
        if !processed.insert(thread_id) {
            tracing::debug!(thread_id, "skipping duplicate thread");
            continue;
        }
        match fetch_one_thread(session, thread_id, &all_mail_folder).await {
            Ok(Some(thread)) => {
                tracing::debug!(thread_id, messages = thread.message_count, "processed thread");
                threads.push(thread);
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(thread_id, %error, "error processing thread, skipping");
            }
        }
    }
    timing.fetch = fetch_started.elapsed();
    timing.total = started.elapsed();

    tracing::info!(
        threads = threads.len(),
        target = target_thread_count,
        source_scan_ms = timing.source_scan.as_millis() as u64,
        discovery_ms = timing.discovery.as_millis() as u64,
        fetch_ms = timing.fetch.as_millis() as u64,
        total_ms = timing.total.as_millis() as u64,
        "bulk thread fetch complete"
    );

    Ok((threads, timing))
}

/// Acquire the user's concurrency slot, open a session, fetch, and clean up.
pub async fn fetch_recent_threads_for_user(
    credentials: &ImapCredentials,
    user_id: Uuid,
    config: &EngineConfig,
    target_thread_count: usize,
    max_age_months: u32,
    source_folder_attribute: &str,
) -> Result<(Vec<MailThread>, FetchTiming), MailError> {
    let slot = user_slot(user_id, config.imap_max_concurrency_per_user);
    let _permit = slot
        .acquire_owned()
        .await
        .map_err(|_| MailError::Connection("concurrency slot closed".to_string()))?;

    let mut session = GmailSession::connect(credentials).await?;
    let result = fetch_recent_threads_bulk(
        &mut session,
        target_thread_count,
        max_age_months,
        source_folder_attribute,
    )
    .await;
    session.logout().await;
    result
}

/// Fetch and assemble one thread. `Ok(None)` when the thread has no usable
/// members (all drafts, or no members at all).
async fn fetch_one_thread<S: ImapSession>(
    session: &mut S,
    thread_id: u64,
    all_mail_folder: &str,
) -> Result<Option<MailThread>, MailError> {
    let member_uids = session.uid_search_thread(thread_id).await?;
    if member_uids.is_empty() {
        tracing::warn!(thread_id, "no messages found for thread");
        return Ok(None);
    }

    let labels_by_uid = session.fetch_labels(&member_uids).await?;
    let fetched = session.fetch_messages(&member_uids).await?;

    let mut messages = Vec::new();
    for raw in fetched {
        let Some(parsed) = MessageParser::default().parse(&raw.rfc822) else {
            tracing::warn!(uid = raw.uid, "unparseable message, skipping");
            continue;
        };

        // Drafts carry no Message-ID and are skipped.
        let Some(message_id) = parsed
            .message_id()
            .map(str::to_string)
            .filter(|id| !id.is_empty())
        else {
            continue;
        };

        let labels = labels_by_uid.get(&raw.uid).cloned().unwrap_or_default();
        let kind = if labels.iter().any(|label| label == "\\Sent") {
            MessageKind::Sent
        } else {
            MessageKind::Received
        };

        messages.push(MailMessage {
            uid: create_contextual_id(all_mail_folder, raw.uid),
            message_id,
            from: address_text(parsed.from()),
            to: address_text(parsed.to()),
            cc: address_text(parsed.cc()),
            bcc: address_text(parsed.bcc()),
            subject: parsed.subject().unwrap_or_default().to_string(),
            date: date_text(&parsed),
            body: extract_body_formats(&parsed),
            labels,
            references: header_text(&parsed, "References"),
            in_reply_to: header_text(&parsed, "In-Reply-To")
                .trim_matches(&['<', '>'][..])
                .to_string(),
            kind,
        });
    }

    Ok(MailThread::from_messages(messages, thread_id.to_string()))
}

// ---------------------------------------------------------------------------
// Header helpers
// ---------------------------------------------------------------------------

/// Render an address header back to `Name <addr>` / comma-separated form.
fn address_text(address: Option<&Address<'_>>) -> String {
    let Some(address) = address else {
        return String::new();
    };
    let rendered: Vec<String> = match address {
        Address::List(list) => list.iter().filter_map(render_addr).collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(render_addr)
            .collect(),
    };
    rendered.join(", ")
}

fn render_addr(addr: &mail_parser::Addr<'_>) -> Option<String> {
    match (&addr.name, &addr.address) {
        (Some(name), Some(address)) => Some(format!("{name} <{address}>")),
        (None, Some(address)) => Some(address.to_string()),
        _ => None,
    }
}

fn date_text(message: &Message<'_>) -> String {
    match message.header("Date") {
        Some(HeaderValue::DateTime(date)) => date.to_rfc3339(),
        Some(HeaderValue::Text(text)) => text.to_string(),
        _ => message
            .date()
            .map(|date| date.to_rfc3339())
            .unwrap_or_default(),
    }
}

fn header_text(message: &Message<'_>, name: &str) -> String {
    match message.header(name) {
        Some(HeaderValue::Text(text)) => text.to_string(),
        Some(HeaderValue::TextList(list)) => list.join(" "),
        _ => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::folders::Folder;
    use crate::imap::session::FetchedMessage;
    use chrono::NaiveDate;

    /// Scripted in-memory session. UID `n` belongs to thread `n % distinct`.
    struct FakeSession {
        folders: Vec<Folder>,
        source_uids: Vec<u32>,
        /// uid -> thread id in the source folder.
        thread_of: HashMap<u32, u64>,
        /// thread id -> member uids in the all-mail folder.
        members: HashMap<u64, Vec<u32>>,
        /// uid -> raw message bytes.
        bodies: HashMap<u32, Vec<u8>>,
        /// uid -> labels.
        labels: HashMap<u32, Vec<String>>,
        thread_id_batches: usize,
        examined: Vec<String>,
    }

    impl FakeSession {
        fn gmail_folders() -> Vec<Folder> {
            vec![
                Folder {
                    name: "INBOX".to_string(),
                    attributes: vec![],
                },
                Folder {
                    name: "[Gmail]/Sent Mail".to_string(),
                    attributes: vec!["\\Sent".to_string()],
                },
                Folder {
                    name: "[Gmail]/All Mail".to_string(),
                    attributes: vec!["\\All".to_string()],
                },
            ]
        }

        /// 25 source UIDs spread over `distinct` thread ids, one message per
        /// member UID.
        fn with_threads(distinct: u64) -> Self {
            let source_uids: Vec<u32> = (1..=25).collect();
            let mut thread_of = HashMap::new();
            let mut members: HashMap<u64, Vec<u32>> = HashMap::new();
            let mut bodies = HashMap::new();
            let mut labels = HashMap::new();

            for &uid in &source_uids {
                let thread_id = 1000 + u64::from(uid) % distinct;
                thread_of.insert(uid, thread_id);
                members.entry(thread_id).or_default().push(uid);
                bodies.insert(uid, raw_message(&format!("m{uid}@example.com"), uid));
                labels.insert(uid, vec!["\\Sent".to_string()]);
            }

            Self {
                folders: Self::gmail_folders(),
                source_uids,
                thread_of,
                members,
                bodies,
                labels,
                thread_id_batches: 0,
                examined: Vec::new(),
            }
        }
    }

    fn raw_message(message_id: &str, uid: u32) -> Vec<u8> {
        // Minutes encode the uid so later uids sort later.
        format!(
            "From: Ada <ada@example.com>\r\n\
             To: bob@example.com\r\n\
             Subject: thread mail {uid}\r\n\
             Date: Tue, 15 Jul 2025 08:{:02}:00 +0000\r\n\
             Message-ID: <{message_id}>\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             \r\n\
             Body of message {uid}\r\n",
            uid % 60
        )
        .into_bytes()
    }

    fn draft_message() -> Vec<u8> {
        b"From: ada@example.com\r\nTo: bob@example.com\r\nSubject: draft\r\n\
          Date: Tue, 15 Jul 2025 09:00:00 +0000\r\n\r\nUnsent draft\r\n"
            .to_vec()
    }

    impl ImapSession for FakeSession {
        async fn list_folders(&mut self) -> Result<Vec<Folder>, MailError> {
            Ok(self.folders.clone())
        }

        async fn examine(&mut self, folder: &str) -> Result<(), MailError> {
            self.examined.push(folder.to_string());
            Ok(())
        }

        async fn uid_search_since(&mut self, _cutoff: NaiveDate) -> Result<Vec<u32>, MailError> {
            Ok(self.source_uids.clone())
        }

        async fn uid_search_thread(&mut self, thread_id: u64) -> Result<Vec<u32>, MailError> {
            Ok(self.members.get(&thread_id).cloned().unwrap_or_default())
        }

        async fn fetch_thread_ids(&mut self, uids: &[u32]) -> Result<Vec<(u32, u64)>, MailError> {
            self.thread_id_batches += 1;
            Ok(uids
                .iter()
                .filter_map(|uid| self.thread_of.get(uid).map(|t| (*uid, *t)))
                .collect())
        }

        async fn fetch_labels(
            &mut self,
            uids: &[u32],
        ) -> Result<HashMap<u32, Vec<String>>, MailError> {
            Ok(uids
                .iter()
                .filter_map(|uid| self.labels.get(uid).map(|l| (*uid, l.clone())))
                .collect())
        }

        async fn fetch_messages(&mut self, uids: &[u32]) -> Result<Vec<FetchedMessage>, MailError> {
            Ok(uids
                .iter()
                .filter_map(|uid| {
                    self.bodies.get(uid).map(|body| FetchedMessage {
                        uid: *uid,
                        rfc822: body.clone(),
                    })
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn discovery_early_terminates_and_caps_at_target() {
        // 25 source UIDs over 8 distinct threads, target 5.
        let mut session = FakeSession::with_threads(8);
        let (threads, timing) = fetch_recent_threads_bulk(&mut session, 5, 6, "\\Sent")
            .await
            .unwrap();

        assert_eq!(threads.len(), 5);
        // The first batch of 10 UIDs already covers 8 distinct threads.
        assert_eq!(session.thread_id_batches, 1);
        // Source folder first, all-mail for retrieval.
        assert_eq!(
            session.examined,
            vec!["[Gmail]/Sent Mail", "[Gmail]/All Mail"]
        );

        // Unique thread ids.
        let ids: HashSet<&String> = threads.iter().map(|t| &t.thread_id).collect();
        assert_eq!(ids.len(), threads.len());

        // Every message has a contextual uid, a message id, three body
        // shapes, and the messages sort chronologically.
        for thread in &threads {
            for pair in thread.messages.windows(2) {
                assert!(pair[0].parsed_date().unwrap() <= pair[1].parsed_date().unwrap());
            }
            for message in &thread.messages {
                assert!(message.uid.contains(':'));
                assert!(!message.message_id.is_empty());
                assert!(!message.body.cleaned.is_empty());
                assert_eq!(message.kind, MessageKind::Sent);
            }
        }

        assert!(timing.total >= timing.discovery);
    }

    #[tokio::test]
    async fn all_threads_returned_when_below_target() {
        let mut session = FakeSession::with_threads(3);
        let (threads, _) = fetch_recent_threads_bulk(&mut session, 50, 6, "\\Sent")
            .await
            .unwrap();
        assert_eq!(threads.len(), 3);
        // All 25 UIDs were scanned looking for more threads.
        assert_eq!(session.thread_id_batches, 3);
    }

    #[tokio::test]
    async fn drafts_without_message_id_are_skipped() {
        let mut session = FakeSession::with_threads(2);
        // Splice a draft into thread 1000's members.
        session.members.get_mut(&1000).unwrap().push(99);
        session.bodies.insert(99, draft_message());
        session.labels.insert(99, vec![]);

        let (threads, _) = fetch_recent_threads_bulk(&mut session, 10, 6, "\\Sent")
            .await
            .unwrap();
        let thread = threads.iter().find(|t| t.thread_id == "1000").unwrap();
        assert!(thread.messages.iter().all(|m| !m.message_id.is_empty()));
    }

    #[tokio::test]
    async fn unresolvable_folder_aborts() {
        let mut session = FakeSession::with_threads(2);
        // No \All folder and no fallback name.
        session.folders = vec![Folder {
            name: "INBOX".to_string(),
            attributes: vec![],
        }];
        session.folders.push(Folder {
            name: "[Gmail]/Sent Mail".to_string(),
            attributes: vec!["\\Sent".to_string()],
        });

        let result = fetch_recent_threads_bulk(&mut session, 5, 6, "\\Sent").await;
        assert!(matches!(result, Err(MailError::FolderNotFound(_))));
    }

    #[tokio::test]
    async fn received_messages_are_classified_by_missing_sent_label() {
        let mut session = FakeSession::with_threads(1);
        for labels in session.labels.values_mut() {
            *labels = vec!["\\Inbox".to_string()];
        }
        let (threads, _) = fetch_recent_threads_bulk(&mut session, 1, 6, "\\Sent")
            .await
            .unwrap();
        assert!(
            threads[0]
                .messages
                .iter()
                .all(|m| m.kind == MessageKind::Received)
        );
    }

    #[tokio::test]
    async fn empty_source_folder_returns_no_threads() {
        let mut session = FakeSession::with_threads(2);
        session.source_uids.clear();
        let (threads, timing) = fetch_recent_threads_bulk(&mut session, 5, 6, "\\Sent")
            .await
            .unwrap();
        assert!(threads.is_empty());
        assert!(timing.total >= timing.source_scan);
    }

    #[tokio::test]
    async fn per_thread_failures_keep_partial_results() {
        let mut session = FakeSession::with_threads(4);
        // Thread 1001 has members but none fetchable: yields no thread, the
        // rest still return.
        session.members.insert(1001, vec![777]);

        let (threads, _) = fetch_recent_threads_bulk(&mut session, 10, 6, "\\Sent")
            .await
            .unwrap();
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|t| t.thread_id != "1001"));
    }
}
