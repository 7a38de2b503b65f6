//! State Factory. Mints a fresh `TaskExecId`, derives `Component`/
//! `ExecutionType` from the task type, and persists both the state row and
//! the *normalized* config as a single transaction body routed through
//! `TaskRepository::with_transaction`.

use crate::store::{ConfigStore, TaskRepository, TransactionBody};
use crate::types::*;
use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

pub struct StateFactory {
    task_repo: Arc<dyn TaskRepository>,
    config_store: Arc<dyn ConfigStore>,
}

impl StateFactory {
    pub fn new(task_repo: Arc<dyn TaskRepository>, config_store: Arc<dyn ConfigStore>) -> Self {
        Self {
            task_repo,
            config_store,
        }
    }

    /// Exposes the underlying repository's transaction hook so callers that
    /// need to group several factory/config writes together (child
    /// expansion, say) can do so without reaching past the factory.
    pub async fn with_transaction<'a>(&'a self, body: TransactionBody<'a>) -> Result<()> {
        self.task_repo.with_transaction(body).await
    }

    fn component_and_type(task_type: TaskType) -> (Component, ExecutionType) {
        if task_type.is_leaf() {
            match task_type {
                TaskType::Wait => (Component::Task, ExecutionType::Wait),
                _ => (Component::Task, ExecutionType::Basic),
            }
        } else {
            (Component::Task, ExecutionType::Parent)
        }
    }

    /// Create a fresh `TaskState` (status `pending`) for `cfg`, persist it,
    /// and save the normalized config under the minted `TaskExecId`.
    #[tracing::instrument(skip(self, cfg, workflow), fields(task_id = %cfg.id))]
    pub async fn create(
        &self,
        cfg: &TaskConfig,
        workflow: &WorkflowState,
        parent_state_id: Option<TaskExecId>,
        now: i64,
    ) -> Result<TaskState> {
        let task_exec_id = Uuid::now_v7();
        let (component, execution_type) = Self::component_and_type(cfg.task_type);

        let collection_state = if cfg.task_type == TaskType::Collection {
            Some(CollectionState {
                items: Vec::new(),
                filter: cfg.filter.clone(),
                mode: cfg.mode,
                batch: cfg.batch,
                item_var: cfg.item_var_name().to_string(),
                index_var: cfg.index_var_name().to_string(),
                processed_count: 0,
                completed_count: 0,
                failed_count: 0,
                skipped_count: 0,
                item_results: Vec::new(),
            })
        } else {
            None
        };

        let state = TaskState {
            task_id: cfg.id.clone(),
            task_exec_id,
            workflow_id: workflow.workflow_id.clone(),
            workflow_exec_id: workflow.workflow_exec_id,
            parent_state_id,
            component,
            execution_type,
            status: Status::Pending,
            input: Some(with_to_json(cfg)),
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
            collection_state,
        };

        let task_repo = self.task_repo.clone();
        let config_store = self.config_store.clone();
        let state_for_tx = state.clone();
        let cfg_for_tx = cfg.clone();
        self.task_repo
            .with_transaction(Box::new(move || {
                Box::pin(async move {
                    task_repo.upsert(&state_for_tx).await?;
                    config_store.save(task_exec_id, &cfg_for_tx).await?;
                    Ok(())
                })
            }))
            .await?;
        tracing::debug!(task_exec_id = %task_exec_id, "task state created");
        Ok(state)
    }
}

fn with_to_json(cfg: &TaskConfig) -> serde_json::Value {
    serde_json::Value::Object(cfg.with.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}
