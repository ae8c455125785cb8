//! Workflow store trait definition.
//!
//! Defines the storage interface for workflow definitions, shared step
//! definitions, triggers, execution instances, and step outputs. The
//! infrastructure layer (mailloom-infra) implements this trait with SQLite
//! persistence.
//!
//! Multi-step mutations of one entity (the step-list primitives) must be
//! atomic at the store level. Instances are persisted as whole documents:
//! `update_instance` replaces the instance row including its embedded step
//! instances.

use mailloom_types::error::RepositoryError;
use mailloom_types::workflow::{
    StepDefinition, StepOutputData, TriggerDefinition, WorkflowDefinition, WorkflowDetails,
    WorkflowInstance,
};
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Covers four entity families:
/// - **Workflows:** definition CRUD plus the two atomic step-list primitives.
/// - **Steps:** shared step definitions, deletable only when unreferenced.
/// - **Triggers:** 1:1 with a workflow, replaced as a whole.
/// - **Instances & outputs:** execution state, updated as whole documents.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowStore: Send + Sync {
    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    /// Upsert a workflow definition.
    fn save_workflow(
        &self,
        workflow: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a workflow owned by `user_id`.
    fn get_workflow(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List all workflows owned by `user_id`, ordered by name.
    fn list_workflows(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Delete a workflow; cascades to its trigger and instances.
    /// Returns `true` if it existed.
    fn delete_workflow(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Atomically append `step_uuid` to the workflow's step list if not
    /// already present. Idempotent under duplicate suppression.
    fn append_workflow_step(
        &self,
        workflow_uuid: &Uuid,
        step_uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomically remove the first occurrence of `step_uuid` from the
    /// workflow's step list. Removing a non-present UUID is a no-op.
    fn remove_workflow_step(
        &self,
        workflow_uuid: &Uuid,
        step_uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Fully hydrate a workflow: definition + trigger + step definitions in
    /// step order.
    fn get_workflow_details(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDetails>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    /// Upsert a step definition.
    fn save_step(
        &self,
        step: &StepDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a step definition owned by `user_id`.
    fn get_step(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StepDefinition>, RepositoryError>> + Send;

    /// Delete a step definition. Fails with [`RepositoryError::Conflict`]
    /// while any workflow still references it. Returns `true` if it existed.
    fn delete_step(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Triggers
    // -----------------------------------------------------------------------

    /// Replace the trigger as a whole (upsert by UUID).
    fn save_trigger(
        &self,
        trigger: &TriggerDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a trigger owned by `user_id`.
    fn get_trigger(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<TriggerDefinition>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Instances & outputs
    // -----------------------------------------------------------------------

    /// Create a new workflow instance record.
    fn create_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an instance owned by `user_id`.
    fn get_instance(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// Replace the instance document (status, error, step instances).
    fn update_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Instances still in `Running` status, across all users
    /// (startup sweep).
    fn list_running_instances(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// Persist an immutable step output row.
    fn create_step_output(
        &self,
        output: &StepOutputData,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a step output owned by `user_id`.
    fn get_step_output(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<StepOutputData>, RepositoryError>> + Send;
}
