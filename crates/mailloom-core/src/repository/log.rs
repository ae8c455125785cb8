//! Run log trait.

use mailloom_types::error::RepositoryError;
use mailloom_types::log::LogEntry;

/// Append-only sink for workflow and step log entries.
///
/// Runners emit exactly one entry per run/step on every exit path, so
/// partial executions stay observable.
pub trait RunLog: Send + Sync {
    fn append(
        &self,
        entry: &LogEntry,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
