//! SQLite workflow store implementation.
//!
//! Implements `WorkflowStore` from `mailloom-core` using sqlx with split
//! read/write pools. Every entity is serialized whole into a `details` JSON
//! column next to its promoted columns. The step-list primitives mutate the
//! JSON steps array inside a writer transaction, which the single-connection
//! writer pool serializes against all other writes.

use chrono::Utc;
use mailloom_core::repository::workflow::WorkflowStore;
use mailloom_types::error::RepositoryError;
use mailloom_types::workflow::{
    StepDefinition, StepOutputData, TriggerDefinition, WorkflowDefinition, WorkflowDetails,
    WorkflowInstance,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowStore`.
pub struct SqliteWorkflowStore {
    pool: DatabasePool,
}

impl SqliteWorkflowStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(details: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(details)
        .map_err(|e| RepositoryError::Query(format!("invalid details JSON: {e}")))
}

fn details_column(row: &sqlx::sqlite::SqliteRow) -> Result<String, RepositoryError> {
    row.try_get("details")
        .map_err(|e| RepositoryError::Query(e.to_string()))
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

// ---------------------------------------------------------------------------
// WorkflowStore impl
// ---------------------------------------------------------------------------

impl WorkflowStore for SqliteWorkflowStore {
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let details = to_json(workflow)?;
        sqlx::query(
            r#"INSERT INTO workflows (uuid, user_id, name, details, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(uuid) DO UPDATE SET
                 name = excluded.name,
                 details = excluded.details,
                 updated_at = excluded.updated_at"#,
        )
        .bind(workflow.uuid.to_string())
        .bind(workflow.user_id.to_string())
        .bind(&workflow.name)
        .bind(&details)
        .bind(workflow.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_workflow(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT details FROM workflows WHERE uuid = ? AND user_id = ?")
            .bind(uuid.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.map(|r| from_json(&details_column(&r)?)).transpose()
    }

    async fn list_workflows(
        &self,
        user_id: &Uuid,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT details FROM workflows WHERE user_id = ? ORDER BY name ASC")
            .bind(user_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter()
            .map(|r| from_json(&details_column(r)?))
            .collect()
    }

    async fn delete_workflow(&self, uuid: &Uuid, user_id: &Uuid) -> Result<bool, RepositoryError> {
        // Cascade to the owned trigger and instances in one transaction.
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let deleted = sqlx::query("DELETE FROM workflows WHERE uuid = ? AND user_id = ?")
            .bind(uuid.to_string())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?
            .rows_affected()
            > 0;

        if deleted {
            sqlx::query("DELETE FROM triggers WHERE workflow_uuid = ?")
                .bind(uuid.to_string())
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
            sqlx::query("DELETE FROM workflow_instances WHERE workflow_definition_uuid = ?")
                .bind(uuid.to_string())
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(deleted)
    }

    async fn append_workflow_step(
        &self,
        workflow_uuid: &Uuid,
        step_uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let row = sqlx::query("SELECT details FROM workflows WHERE uuid = ? AND user_id = ?")
            .bind(workflow_uuid.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?
            .ok_or(RepositoryError::NotFound)?;

        let mut workflow: WorkflowDefinition = from_json(&details_column(&row)?)?;
        if !workflow.steps.contains(step_uuid) {
            workflow.steps.push(*step_uuid);
            workflow.updated_at = Utc::now();
            let details = to_json(&workflow)?;
            sqlx::query("UPDATE workflows SET details = ?, updated_at = ? WHERE uuid = ?")
                .bind(&details)
                .bind(workflow.updated_at.to_rfc3339())
                .bind(workflow_uuid.to_string())
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn remove_workflow_step(
        &self,
        workflow_uuid: &Uuid,
        step_uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let row = sqlx::query("SELECT details FROM workflows WHERE uuid = ? AND user_id = ?")
            .bind(workflow_uuid.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?
            .ok_or(RepositoryError::NotFound)?;

        let mut workflow: WorkflowDefinition = from_json(&details_column(&row)?)?;
        if let Some(position) = workflow.steps.iter().position(|s| s == step_uuid) {
            workflow.steps.remove(position);
            workflow.updated_at = Utc::now();
            let details = to_json(&workflow)?;
            sqlx::query("UPDATE workflows SET details = ?, updated_at = ? WHERE uuid = ?")
                .bind(&details)
                .bind(workflow.updated_at.to_rfc3339())
                .bind(workflow_uuid.to_string())
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_workflow_details(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<WorkflowDetails>, RepositoryError> {
        let Some(workflow) = self.get_workflow(uuid, user_id).await? else {
            return Ok(None);
        };

        let trigger = match workflow.trigger_uuid {
            Some(trigger_uuid) => self.get_trigger(&trigger_uuid, user_id).await?,
            None => None,
        };

        let mut steps = Vec::with_capacity(workflow.steps.len());
        for step_uuid in &workflow.steps {
            if let Some(step) = self.get_step(step_uuid, user_id).await? {
                steps.push(step);
            }
        }

        Ok(Some(WorkflowDetails {
            workflow,
            trigger,
            steps,
        }))
    }

    async fn save_step(&self, step: &StepDefinition) -> Result<(), RepositoryError> {
        let details = to_json(step)?;
        sqlx::query(
            r#"INSERT INTO steps (uuid, user_id, name, type, details, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(uuid) DO UPDATE SET
                 name = excluded.name,
                 type = excluded.type,
                 details = excluded.details,
                 updated_at = excluded.updated_at"#,
        )
        .bind(step.uuid.to_string())
        .bind(step.user_id.to_string())
        .bind(&step.name)
        .bind(step.kind().as_str())
        .bind(&details)
        .bind(step.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_step(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<StepDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT details FROM steps WHERE uuid = ? AND user_id = ?")
            .bind(uuid.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.map(|r| from_json(&details_column(&r)?)).transpose()
    }

    async fn delete_step(&self, uuid: &Uuid, user_id: &Uuid) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        // A step stays deletable only while no workflow references it.
        let references: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM workflows, json_each(json_extract(workflows.details, '$.steps'))
               WHERE json_each.value = ?"#,
        )
        .bind(uuid.to_string())
        .fetch_one(&mut *tx)
        .await
        .map_err(query_err)?;

        if references.0 > 0 {
            return Err(RepositoryError::Conflict(format!(
                "step {uuid} is referenced by {} workflow(s)",
                references.0
            )));
        }

        let deleted = sqlx::query("DELETE FROM steps WHERE uuid = ? AND user_id = ?")
            .bind(uuid.to_string())
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?
            .rows_affected()
            > 0;

        tx.commit().await.map_err(query_err)?;
        Ok(deleted)
    }

    async fn save_trigger(&self, trigger: &TriggerDefinition) -> Result<(), RepositoryError> {
        let details = to_json(trigger)?;
        sqlx::query(
            r#"INSERT INTO triggers (uuid, user_id, workflow_uuid, details, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(uuid) DO UPDATE SET
                 workflow_uuid = excluded.workflow_uuid,
                 details = excluded.details,
                 updated_at = excluded.updated_at"#,
        )
        .bind(trigger.uuid.to_string())
        .bind(trigger.user_id.to_string())
        .bind(trigger.workflow_uuid.to_string())
        .bind(&details)
        .bind(trigger.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_trigger(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<TriggerDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT details FROM triggers WHERE uuid = ? AND user_id = ?")
            .bind(uuid.to_string())
            .bind(user_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.map(|r| from_json(&details_column(&r)?)).transpose()
    }

    async fn create_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let details = to_json(instance)?;
        sqlx::query(
            r#"INSERT INTO workflow_instances
               (uuid, user_id, workflow_definition_uuid, status, details, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(instance.uuid.to_string())
        .bind(instance.user_id.to_string())
        .bind(instance.workflow_definition_uuid.to_string())
        .bind(instance.status.as_str())
        .bind(&details)
        .bind(instance.created_at.to_rfc3339())
        .bind(instance.updated_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_instance(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row =
            sqlx::query("SELECT details FROM workflow_instances WHERE uuid = ? AND user_id = ?")
                .bind(uuid.to_string())
                .bind(user_id.to_string())
                .fetch_optional(&self.pool.reader)
                .await
                .map_err(query_err)?;
        row.map(|r| from_json(&details_column(&r)?)).transpose()
    }

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        let details = to_json(instance)?;
        let result = sqlx::query(
            "UPDATE workflow_instances SET status = ?, details = ?, updated_at = ? WHERE uuid = ?",
        )
        .bind(instance.status.as_str())
        .bind(&details)
        .bind(instance.updated_at.to_rfc3339())
        .bind(instance.uuid.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_running_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT details FROM workflow_instances WHERE status = 'running' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        rows.iter()
            .map(|r| from_json(&details_column(r)?))
            .collect()
    }

    async fn create_step_output(&self, output: &StepOutputData) -> Result<(), RepositoryError> {
        // Outputs are immutable: insert-only, duplicates ignored so a
        // re-persisted instance never rewrites an observable row.
        sqlx::query(
            r#"INSERT OR IGNORE INTO step_outputs (uuid, user_id, markdown_representation, created_at)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(output.uuid.to_string())
        .bind(output.user_id.to_string())
        .bind(&output.markdown_representation)
        .bind(output.created_at.to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get_step_output(
        &self,
        uuid: &Uuid,
        user_id: &Uuid,
    ) -> Result<Option<StepOutputData>, RepositoryError> {
        let row = sqlx::query(
            "SELECT uuid, user_id, markdown_representation, created_at FROM step_outputs WHERE uuid = ? AND user_id = ?",
        )
        .bind(uuid.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|r| {
            let uuid_str: String = r.try_get("uuid").map_err(query_err)?;
            let user_str: String = r.try_get("user_id").map_err(query_err)?;
            let markdown: String = r.try_get("markdown_representation").map_err(query_err)?;
            let created_str: String = r.try_get("created_at").map_err(query_err)?;
            Ok(StepOutputData {
                uuid: uuid_str
                    .parse()
                    .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))?,
                user_id: user_str
                    .parse()
                    .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))?,
                markdown_representation: markdown,
                created_at: chrono::DateTime::parse_from_rfc3339(&created_str)
                    .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))?
                    .with_timezone(&Utc),
            })
        })
        .transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mailloom_types::workflow::{InstanceStatus, StepSpec};

    async fn test_store() -> SqliteWorkflowStore {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open_in_dir(dir.path()).await.unwrap();
        std::mem::forget(dir);
        SqliteWorkflowStore::new(pool)
    }

    fn sample_step(user_id: Uuid) -> StepDefinition {
        StepDefinition::new(
            user_id,
            "summarize",
            StepSpec::Llm {
                model: "google/gemini-2.5-pro".to_string(),
                system_prompt: "Summarize <<trigger_output>>".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn workflow_roundtrip_and_upsert() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let mut workflow = WorkflowDefinition::new(user_id, "digest", "daily digest");

        store.save_workflow(&workflow).await.unwrap();
        let loaded = store.get_workflow(&workflow.uuid, &user_id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "digest");
        assert!(loaded.is_active);

        workflow.name = "weekly-digest".to_string();
        store.save_workflow(&workflow).await.unwrap();
        let loaded = store.get_workflow(&workflow.uuid, &user_id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "weekly-digest");
    }

    #[tokio::test]
    async fn workflow_is_scoped_to_owner() {
        let store = test_store().await;
        let workflow = WorkflowDefinition::new(Uuid::now_v7(), "private", "");
        store.save_workflow(&workflow).await.unwrap();

        let other_user = Uuid::now_v7();
        assert!(
            store
                .get_workflow(&workflow.uuid, &other_user)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn append_step_is_idempotent() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let workflow = WorkflowDefinition::new(user_id, "flow", "");
        store.save_workflow(&workflow).await.unwrap();
        let step_uuid = Uuid::now_v7();

        store
            .append_workflow_step(&workflow.uuid, &step_uuid, &user_id)
            .await
            .unwrap();
        store
            .append_workflow_step(&workflow.uuid, &step_uuid, &user_id)
            .await
            .unwrap();

        let loaded = store.get_workflow(&workflow.uuid, &user_id).await.unwrap().unwrap();
        assert_eq!(loaded.steps, vec![step_uuid]);
    }

    #[tokio::test]
    async fn remove_step_removes_first_occurrence_and_tolerates_absence() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let workflow = WorkflowDefinition::new(user_id, "flow", "");
        store.save_workflow(&workflow).await.unwrap();

        let first = Uuid::now_v7();
        let second = Uuid::now_v7();
        store.append_workflow_step(&workflow.uuid, &first, &user_id).await.unwrap();
        store.append_workflow_step(&workflow.uuid, &second, &user_id).await.unwrap();

        store.remove_workflow_step(&workflow.uuid, &first, &user_id).await.unwrap();
        // Removing a non-present UUID is a no-op.
        store.remove_workflow_step(&workflow.uuid, &first, &user_id).await.unwrap();

        let loaded = store.get_workflow(&workflow.uuid, &user_id).await.unwrap().unwrap();
        assert_eq!(loaded.steps, vec![second]);
    }

    #[tokio::test]
    async fn step_roundtrip_preserves_spec() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let step = sample_step(user_id);
        store.save_step(&step).await.unwrap();

        let loaded = store.get_step(&step.uuid, &user_id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "summarize");
        match loaded.spec {
            StepSpec::Llm { model, .. } => assert_eq!(model, "google/gemini-2.5-pro"),
            other => panic!("expected llm spec, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn referenced_step_cannot_be_deleted() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let step = sample_step(user_id);
        store.save_step(&step).await.unwrap();

        let workflow = WorkflowDefinition::new(user_id, "flow", "");
        store.save_workflow(&workflow).await.unwrap();
        store
            .append_workflow_step(&workflow.uuid, &step.uuid, &user_id)
            .await
            .unwrap();

        let result = store.delete_step(&step.uuid, &user_id).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));

        store
            .remove_workflow_step(&workflow.uuid, &step.uuid, &user_id)
            .await
            .unwrap();
        assert!(store.delete_step(&step.uuid, &user_id).await.unwrap());
    }

    #[tokio::test]
    async fn trigger_is_replaced_as_a_whole() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let workflow = WorkflowDefinition::new(user_id, "flow", "");
        let mut trigger = TriggerDefinition {
            uuid: Uuid::now_v7(),
            user_id,
            workflow_uuid: workflow.uuid,
            filter_rules: Default::default(),
            initial_data_description: "incoming email as markdown".to_string(),
            trigger_prompt: None,
            trigger_model: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.save_trigger(&trigger).await.unwrap();

        trigger.trigger_prompt = Some("Only urgent email".to_string());
        store.save_trigger(&trigger).await.unwrap();

        let loaded = store.get_trigger(&trigger.uuid, &user_id).await.unwrap().unwrap();
        assert_eq!(loaded.trigger_prompt.as_deref(), Some("Only urgent email"));
    }

    #[tokio::test]
    async fn delete_workflow_cascades_to_trigger_and_instances() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let mut workflow = WorkflowDefinition::new(user_id, "flow", "");
        let trigger = TriggerDefinition {
            uuid: Uuid::now_v7(),
            user_id,
            workflow_uuid: workflow.uuid,
            filter_rules: Default::default(),
            initial_data_description: "email".to_string(),
            trigger_prompt: None,
            trigger_model: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        workflow.trigger_uuid = Some(trigger.uuid);
        store.save_workflow(&workflow).await.unwrap();
        store.save_trigger(&trigger).await.unwrap();

        let instance = WorkflowInstance::start(user_id, workflow.uuid, None);
        store.create_instance(&instance).await.unwrap();

        assert!(store.delete_workflow(&workflow.uuid, &user_id).await.unwrap());
        assert!(store.get_trigger(&trigger.uuid, &user_id).await.unwrap().is_none());
        assert!(store.get_instance(&instance.uuid, &user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn instance_document_update_roundtrip() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let mut instance = WorkflowInstance::start(
            user_id,
            Uuid::now_v7(),
            Some(StepOutputData::new(user_id, "world")),
        );
        store.create_instance(&instance).await.unwrap();

        instance.status = InstanceStatus::Completed;
        instance.updated_at = Utc::now();
        store.update_instance(&instance).await.unwrap();

        let loaded = store.get_instance(&instance.uuid, &user_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, InstanceStatus::Completed);
        assert_eq!(
            loaded.trigger_output.unwrap().markdown_representation,
            "world"
        );
    }

    #[tokio::test]
    async fn running_instances_listing_feeds_the_sweep() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();

        let running = WorkflowInstance::start(user_id, Uuid::now_v7(), None);
        store.create_instance(&running).await.unwrap();

        let mut done = WorkflowInstance::start(user_id, Uuid::now_v7(), None);
        done.status = InstanceStatus::Completed;
        store.create_instance(&done).await.unwrap();

        let listed = store.list_running_instances().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].uuid, running.uuid);
    }

    #[tokio::test]
    async fn step_outputs_are_immutable_rows() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let output = StepOutputData::new(user_id, "original");
        store.create_step_output(&output).await.unwrap();

        // A second insert with the same UUID never rewrites the row.
        let mut clone = output.clone();
        clone.markdown_representation = "mutated".to_string();
        store.create_step_output(&clone).await.unwrap();

        let loaded = store.get_step_output(&output.uuid, &user_id).await.unwrap().unwrap();
        assert_eq!(loaded.markdown_representation, "original");
    }

    #[tokio::test]
    async fn workflow_details_hydrates_in_step_order() {
        let store = test_store().await;
        let user_id = Uuid::now_v7();
        let first = sample_step(user_id);
        let mut second = sample_step(user_id);
        second.uuid = Uuid::now_v7();
        second.name = "reply".to_string();
        store.save_step(&first).await.unwrap();
        store.save_step(&second).await.unwrap();

        let workflow = WorkflowDefinition::new(user_id, "flow", "");
        store.save_workflow(&workflow).await.unwrap();
        store.append_workflow_step(&workflow.uuid, &second.uuid, &user_id).await.unwrap();
        store.append_workflow_step(&workflow.uuid, &first.uuid, &user_id).await.unwrap();

        let details = store
            .get_workflow_details(&workflow.uuid, &user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(details.steps.len(), 2);
        assert_eq!(details.steps[0].uuid, second.uuid);
        assert_eq!(details.steps[1].uuid, first.uuid);
    }
}
