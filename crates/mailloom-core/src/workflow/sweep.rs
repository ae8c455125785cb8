//! Startup sweep for instances interrupted by a process restart.
//!
//! In-flight instances are not durable across restarts: anything still in
//! `running` status at startup was interrupted mid-run and is rewritten to
//! `failed` (reason "interrupted"), along with its non-terminal step
//! instances.

use chrono::Utc;

use mailloom_types::error::RepositoryError;
use mailloom_types::workflow::{InstanceStatus, StepStatus};

use crate::repository::workflow::WorkflowStore;

/// Reason recorded on instances swept at startup.
pub const INTERRUPTED_REASON: &str = "interrupted";

/// Transition every non-terminal instance to `failed`. Returns the number of
/// instances swept.
pub async fn sweep_interrupted<S: WorkflowStore>(store: &S) -> Result<usize, RepositoryError> {
    let running = store.list_running_instances().await?;
    let count = running.len();

    for mut instance in running {
        tracing::warn!(
            instance = %instance.uuid,
            "sweeping interrupted workflow instance"
        );
        instance.status = InstanceStatus::Failed;
        instance.error_message = Some(INTERRUPTED_REASON.to_string());
        for step_instance in &mut instance.step_instances {
            if step_instance.finished_at.is_none() {
                step_instance.status = StepStatus::Failed;
                step_instance.error_message = Some(INTERRUPTED_REASON.to_string());
                step_instance.finished_at = Some(Utc::now());
            }
        }
        instance.updated_at = Utc::now();
        store.update_instance(&instance).await?;
    }

    if count > 0 {
        tracing::info!(count, "startup sweep marked interrupted instances failed");
    }
    Ok(count)
}
