//! PostgreSQL-backed implementation of every store trait. Behind the
//! `postgres` feature, grounded on the teacher's `PostgresProcessStore`:
//! one `sqlx::PgPool`, whole-row upserts via `ON CONFLICT`, JSONB columns
//! for the nested config/state shapes rather than a column per field.

use crate::store::{
    ConfigStore, MemoryBackend, MemoryMessage, SignalDispatcher, TaskRepository, WorkflowRepository,
};
use crate::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::collections::BTreeMap;

/// Postgres-backed store for every trait task-core needs. One pool, one
/// schema — see `migrations/` for the DDL.
pub struct PostgresStore {
    pool: sqlx::PgPool,
}

impl PostgresStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run task-core migrations")?;
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for PostgresStore {
    async fn upsert(&self, state: &TaskState) -> Result<()> {
        let data = serde_json::to_value(state)?;
        sqlx::query(
            r#"
            INSERT INTO task_states (task_exec_id, parent_task_exec_id, task_id, status, data)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (task_exec_id) DO UPDATE SET
                status = EXCLUDED.status,
                data = EXCLUDED.data
            "#,
        )
        .bind(state.task_exec_id)
        .bind(state.parent_state_id)
        .bind(&state.task_id)
        .bind(status_str(state.status))
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, task_exec_id: TaskExecId) -> Result<Option<TaskState>> {
        let row = sqlx::query("SELECT data FROM task_states WHERE task_exec_id = $1")
            .bind(task_exec_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(r.get("data"))).transpose()
    }

    async fn get_child_by_task_id(
        &self,
        parent_id: TaskExecId,
        task_id: &str,
    ) -> Result<Option<TaskState>> {
        let row = sqlx::query(
            "SELECT data FROM task_states WHERE parent_task_exec_id = $1 AND task_id = $2",
        )
        .bind(parent_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| decode(r.get("data"))).transpose()
    }

    async fn list_children(&self, parent_id: TaskExecId) -> Result<Vec<TaskState>> {
        let rows = sqlx::query("SELECT data FROM task_states WHERE parent_task_exec_id = $1")
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|r| decode(r.get("data"))).collect()
    }

    async fn list_children_outputs(
        &self,
        parent_id: TaskExecId,
    ) -> Result<BTreeMap<TaskId, serde_json::Value>> {
        let children = self.list_children(parent_id).await?;
        Ok(children
            .into_iter()
            .filter_map(|s| s.output.map(|o| (s.task_id, o)))
            .collect())
    }

    async fn get_progress_info(&self, parent_id: TaskExecId) -> Result<ProgressInfo> {
        let children = self.list_children(parent_id).await?;
        let mut info = ProgressInfo {
            total_children: children.len(),
            ..Default::default()
        };
        for state in &children {
            *info.status_counts.entry(state.status).or_insert(0) += 1;
            match state.status {
                Status::Success => info.completed_count += 1,
                Status::Failed | Status::Canceled | Status::TimedOut => info.failed_count += 1,
                Status::Running | Status::Waiting => info.running_count += 1,
                Status::Pending => info.pending_count += 1,
            }
        }
        info.completion_rate = crate::progress::completion_rate(&info);
        info.failure_rate = crate::progress::failure_rate(&info);
        Ok(info)
    }

    async fn with_transaction<'a>(&'a self, body: crate::store::TransactionBody<'a>) -> Result<()> {
        body().await
    }
}

#[async_trait]
impl WorkflowRepository for PostgresStore {
    async fn get_state(&self, exec_id: WorkflowExecId) -> Result<Option<WorkflowState>> {
        let row = sqlx::query("SELECT data FROM workflow_states WHERE workflow_exec_id = $1")
            .bind(exec_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(r.get("data"))).transpose()
    }

    async fn upsert_state(&self, state: &WorkflowState) -> Result<()> {
        let data = serde_json::to_value(state)?;
        sqlx::query(
            r#"
            INSERT INTO workflow_states (workflow_exec_id, status, data)
            VALUES ($1, $2, $3)
            ON CONFLICT (workflow_exec_id) DO UPDATE SET
                status = EXCLUDED.status,
                data = EXCLUDED.data
            "#,
        )
        .bind(state.workflow_exec_id)
        .bind(status_str(state.status))
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for PostgresStore {
    async fn save(&self, key: TaskExecId, cfg: &TaskConfig) -> Result<()> {
        let data = serde_json::to_value(cfg)?;
        sqlx::query(
            r#"
            INSERT INTO task_configs (task_exec_id, data)
            VALUES ($1, $2)
            ON CONFLICT (task_exec_id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(key)
        .bind(&data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, key: TaskExecId) -> Result<Option<TaskConfig>> {
        let row = sqlx::query("SELECT data FROM task_configs WHERE task_exec_id = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| decode(r.get("data"))).transpose()
    }

    async fn delete(&self, key: TaskExecId) -> Result<()> {
        sqlx::query("DELETE FROM task_configs WHERE task_exec_id = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM task_metadata WHERE task_exec_id = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_metadata(&self, key: TaskExecId, bytes: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_metadata (task_exec_id, data)
            VALUES ($1, $2)
            ON CONFLICT (task_exec_id) DO UPDATE SET data = EXCLUDED.data
            "#,
        )
        .bind(key)
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_metadata(&self, key: TaskExecId) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT data FROM task_metadata WHERE task_exec_id = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("data")))
    }
}

#[async_trait]
impl MemoryBackend for PostgresStore {
    async fn read(&self, memory_ref: &str, key: &str) -> Result<Vec<MemoryMessage>> {
        let rows = sqlx::query(
            "SELECT role, content FROM memory_messages WHERE memory_ref = $1 AND key = $2 ORDER BY seq",
        )
        .bind(memory_ref)
        .bind(key)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                let role_str: String = r.get("role");
                let role: MessageRole = serde_json::from_value(serde_json::Value::String(role_str))
                    .context("invalid stored message role")?;
                Ok(MemoryMessage {
                    role,
                    content: r.get("content"),
                })
            })
            .collect()
    }

    async fn append(&self, memory_ref: &str, key: &str, message: MemoryMessage) -> Result<()> {
        let role_str = serde_json::to_value(message.role)?
            .as_str()
            .context("serialized role was not a string")?
            .to_string();
        sqlx::query(
            "INSERT INTO memory_messages (memory_ref, key, role, content) VALUES ($1, $2, $3, $4)",
        )
        .bind(memory_ref)
        .bind(key)
        .bind(role_str)
        .bind(&message.content)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self, memory_ref: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM memory_messages WHERE memory_ref = $1 AND key = $2")
            .bind(memory_ref)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, memory_ref: &str, key: &str) -> Result<()> {
        self.clear(memory_ref, key).await
    }

    async fn health(&self, memory_ref: &str) -> Result<serde_json::Value> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT key) AS keys FROM memory_messages WHERE memory_ref = $1",
        )
        .bind(memory_ref)
        .fetch_one(&self.pool)
        .await?;
        let keys: i64 = row.get("keys");
        Ok(serde_json::json!({ "status": "ok", "keys": keys }))
    }

    async fn stats(&self, memory_ref: &str, key: &str) -> Result<serde_json::Value> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS message_count FROM memory_messages WHERE memory_ref = $1 AND key = $2",
        )
        .bind(memory_ref)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.get("message_count");
        Ok(serde_json::json!({ "message_count": count }))
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).context("failed to decode stored JSONB payload")
}

fn status_str(s: Status) -> &'static str {
    match s {
        Status::Pending => "pending",
        Status::Running => "running",
        Status::Waiting => "waiting",
        Status::Success => "success",
        Status::Failed => "failed",
        Status::Canceled => "canceled",
        Status::TimedOut => "timed_out",
    }
}

/// A `SignalDispatcher` that inserts into a `signal_outbox` table for an
/// outer transactional-outbox process to drain — the Postgres-backed
/// counterpart to [`crate::store_memory::NoopSignalDispatcher`].
pub struct PostgresSignalDispatcher {
    pool: sqlx::PgPool,
}

impl PostgresSignalDispatcher {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SignalDispatcher for PostgresSignalDispatcher {
    async fn dispatch(
        &self,
        name: &str,
        payload: &serde_json::Value,
        correlation_id: &str,
        project_name: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signal_outbox (name, payload, correlation_id, project_name)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(name)
        .bind(payload)
        .bind(correlation_id)
        .bind(project_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// `TaskExecutor` is consumed-only and external — no Postgres
// implementation ships here; embedders supply their own.
