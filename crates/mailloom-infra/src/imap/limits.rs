//! Per-user IMAP concurrency limits.
//!
//! IMAP servers rate-limit per account, so concurrent sessions for one user
//! are bounded by a semaphore. The semaphore map is process-wide, lazily
//! initialized, safe for concurrent initialization, and lives for the life
//! of the process.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::Semaphore;
use uuid::Uuid;

static USER_SLOTS: OnceLock<DashMap<Uuid, Arc<Semaphore>>> = OnceLock::new();

/// The concurrency semaphore for one user.
///
/// The first caller for a user fixes the slot count; `limit` is clamped to
/// at least 1.
pub fn user_slot(user_id: Uuid, limit: usize) -> Arc<Semaphore> {
    let slots = USER_SLOTS.get_or_init(DashMap::new);
    slots
        .entry(user_id)
        .or_insert_with(|| Arc::new(Semaphore::new(limit.max(1))))
        .clone()
}
