//! In-memory reference implementation of every store trait, grounded on
//! the teacher's `MemoryStore` (`RwLock<Inner>` over plain `HashMap`s).
//! Always available — used by the crate's own tests and any embedder that
//! doesn't need Postgres durability.

use crate::store::{
    ConfigStore, MemoryBackend, MemoryMessage, SignalDispatcher, TaskExecutor, TaskRepository,
    WorkflowRepository, ExecuteInput,
};
use crate::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

struct Inner {
    tasks: HashMap<TaskExecId, TaskState>,
    children_index: HashMap<TaskExecId, Vec<TaskExecId>>,
    workflows: HashMap<WorkflowExecId, WorkflowState>,
    configs: HashMap<TaskExecId, TaskConfig>,
    metadata: HashMap<TaskExecId, Vec<u8>>,
    memory: HashMap<(String, String), Vec<MemoryMessage>>,
}

/// In-memory `TaskRepository` + `WorkflowRepository` + `ConfigStore` +
/// `MemoryBackend` for tests and non-durable embedders.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                tasks: HashMap::new(),
                children_index: HashMap::new(),
                workflows: HashMap::new(),
                configs: HashMap::new(),
                metadata: HashMap::new(),
                memory: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn upsert(&self, state: &TaskState) -> Result<()> {
        let mut w = self.inner.write().await;
        if let Some(parent) = state.parent_state_id {
            let siblings = w.children_index.entry(parent).or_default();
            if !siblings.contains(&state.task_exec_id) {
                siblings.push(state.task_exec_id);
            }
        }
        w.tasks.insert(state.task_exec_id, state.clone());
        Ok(())
    }

    async fn get(&self, task_exec_id: TaskExecId) -> Result<Option<TaskState>> {
        let r = self.inner.read().await;
        Ok(r.tasks.get(&task_exec_id).cloned())
    }

    async fn get_child_by_task_id(
        &self,
        parent_id: TaskExecId,
        task_id: &str,
    ) -> Result<Option<TaskState>> {
        let r = self.inner.read().await;
        let Some(children) = r.children_index.get(&parent_id) else {
            return Ok(None);
        };
        Ok(children
            .iter()
            .filter_map(|id| r.tasks.get(id))
            .find(|s| s.task_id == task_id)
            .cloned())
    }

    async fn list_children(&self, parent_id: TaskExecId) -> Result<Vec<TaskState>> {
        let r = self.inner.read().await;
        Ok(r.children_index
            .get(&parent_id)
            .map(|ids| ids.iter().filter_map(|id| r.tasks.get(id)).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_children_outputs(
        &self,
        parent_id: TaskExecId,
    ) -> Result<BTreeMap<TaskId, serde_json::Value>> {
        let r = self.inner.read().await;
        let Some(children) = r.children_index.get(&parent_id) else {
            return Ok(BTreeMap::new());
        };
        Ok(children
            .iter()
            .filter_map(|id| r.tasks.get(id))
            .filter_map(|s| s.output.clone().map(|o| (s.task_id.clone(), o)))
            .collect())
    }

    async fn get_progress_info(&self, parent_id: TaskExecId) -> Result<ProgressInfo> {
        let r = self.inner.read().await;
        let Some(children) = r.children_index.get(&parent_id) else {
            return Ok(ProgressInfo::default());
        };
        let mut info = ProgressInfo::default();
        info.total_children = children.len();
        for id in children {
            let Some(state) = r.tasks.get(id) else { continue };
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
impl WorkflowRepository for MemoryStore {
    async fn get_state(&self, exec_id: WorkflowExecId) -> Result<Option<WorkflowState>> {
        let r = self.inner.read().await;
        Ok(r.workflows.get(&exec_id).cloned())
    }

    async fn upsert_state(&self, state: &WorkflowState) -> Result<()> {
        let mut w = self.inner.write().await;
        w.workflows.insert(state.workflow_exec_id, state.clone());
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn save(&self, key: TaskExecId, cfg: &TaskConfig) -> Result<()> {
        let mut w = self.inner.write().await;
        w.configs.insert(key, cfg.clone());
        Ok(())
    }

    async fn get(&self, key: TaskExecId) -> Result<Option<TaskConfig>> {
        let r = self.inner.read().await;
        Ok(r.configs.get(&key).cloned())
    }

    async fn delete(&self, key: TaskExecId) -> Result<()> {
        let mut w = self.inner.write().await;
        w.configs.remove(&key);
        w.metadata.remove(&key);
        Ok(())
    }

    async fn save_metadata(&self, key: TaskExecId, bytes: &[u8]) -> Result<()> {
        let mut w = self.inner.write().await;
        w.metadata.insert(key, bytes.to_vec());
        Ok(())
    }

    async fn get_metadata(&self, key: TaskExecId) -> Result<Option<Vec<u8>>> {
        let r = self.inner.read().await;
        Ok(r.metadata.get(&key).cloned())
    }
}

#[async_trait]
impl MemoryBackend for MemoryStore {
    async fn read(&self, memory_ref: &str, key: &str) -> Result<Vec<MemoryMessage>> {
        let r = self.inner.read().await;
        Ok(r.memory
            .get(&(memory_ref.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, memory_ref: &str, key: &str, message: MemoryMessage) -> Result<()> {
        let mut w = self.inner.write().await;
        w.memory
            .entry((memory_ref.to_string(), key.to_string()))
            .or_default()
            .push(message);
        Ok(())
    }

    async fn clear(&self, memory_ref: &str, key: &str) -> Result<()> {
        let mut w = self.inner.write().await;
        w.memory
            .insert((memory_ref.to_string(), key.to_string()), Vec::new());
        Ok(())
    }

    async fn delete(&self, memory_ref: &str, key: &str) -> Result<()> {
        let mut w = self.inner.write().await;
        w.memory.remove(&(memory_ref.to_string(), key.to_string()));
        Ok(())
    }

    async fn health(&self, memory_ref: &str) -> Result<serde_json::Value> {
        let r = self.inner.read().await;
        let keys = r.memory.keys().filter(|(m, _)| m == memory_ref).count();
        Ok(serde_json::json!({ "status": "ok", "keys": keys }))
    }

    async fn stats(&self, memory_ref: &str, key: &str) -> Result<serde_json::Value> {
        let r = self.inner.read().await;
        let messages = r.memory.get(&(memory_ref.to_string(), key.to_string()));
        Ok(serde_json::json!({
            "message_count": messages.map(|m| m.len()).unwrap_or(0),
        }))
    }
}

/// A no-op `SignalDispatcher` for tests: records nothing, always succeeds.
/// Real embedders wire in their own pub/sub transport.
#[derive(Default)]
pub struct NoopSignalDispatcher;

#[async_trait]
impl SignalDispatcher for NoopSignalDispatcher {
    async fn dispatch(
        &self,
        _name: &str,
        _payload: &serde_json::Value,
        _correlation_id: &str,
        _project_name: &str,
    ) -> Result<()> {
        Ok(())
    }
}

/// An echoing `TaskExecutor` for tests: returns `cfg.with` as the output,
/// standing in for the external LLM/agent/tool runtime.
#[derive(Default)]
pub struct EchoTaskExecutor;

#[async_trait]
impl TaskExecutor for EchoTaskExecutor {
    async fn execute(&self, input: ExecuteInput<'_>) -> Result<serde_json::Value> {
        if input.cfg.with.is_empty() {
            return Err(anyhow!("echo executor requires a non-empty `with` block"));
        }
        Ok(serde_json::Value::Object(
            input.cfg.with.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ))
    }
}
