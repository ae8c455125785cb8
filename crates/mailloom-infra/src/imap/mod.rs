//! IMAP bulk thread retrieval: session abstraction, folder resolution,
//! body extraction, per-user concurrency limits, and the bulk fetcher.

pub mod body;
pub mod bulk;
pub mod contextual;
pub mod folders;
pub mod limits;
pub mod session;
