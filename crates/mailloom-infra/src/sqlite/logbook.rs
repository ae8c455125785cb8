//! SQLite run log implementation.
//!
//! Entries are append-only: the full [`LogEntry`] is serialized into the
//! `details` column with the identifying fields promoted for querying.

use chrono::Utc;
use mailloom_core::repository::log::RunLog;
use mailloom_types::error::RepositoryError;
use mailloom_types::log::LogEntry;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of [`RunLog`].
pub struct SqliteRunLog {
    pool: DatabasePool,
}

impl SqliteRunLog {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Entries for one workflow instance, oldest first.
    pub async fn list_for_instance(
        &self,
        workflow_instance_uuid: &Uuid,
    ) -> Result<Vec<LogEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT details FROM log_entries WHERE workflow_instance_uuid = ? ORDER BY start_time ASC",
        )
        .bind(workflow_instance_uuid.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                let details: String = row
                    .try_get("details")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                serde_json::from_str(&details)
                    .map_err(|e| RepositoryError::Query(format!("invalid log entry JSON: {e}")))
            })
            .collect()
    }
}

impl RunLog for SqliteRunLog {
    async fn append(&self, entry: &LogEntry) -> Result<(), RepositoryError> {
        let details = serde_json::to_string(entry)
            .map_err(|e| RepositoryError::Query(format!("serialize log entry: {e}")))?;

        sqlx::query(
            r#"INSERT INTO log_entries
               (uuid, user_id, kind, workflow_uuid, workflow_instance_uuid,
                step_uuid, step_instance_uuid, details, start_time, end_time, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.uuid.to_string())
        .bind(entry.user_id.to_string())
        .bind(entry.kind.as_str())
        .bind(entry.workflow_uuid.map(|u| u.to_string()))
        .bind(entry.workflow_instance_uuid.map(|u| u.to_string()))
        .bind(entry.step_uuid.map(|u| u.to_string()))
        .bind(entry.step_instance_uuid.map(|u| u.to_string()))
        .bind(&details)
        .bind(entry.start_time.to_rfc3339())
        .bind(entry.end_time.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }
}
