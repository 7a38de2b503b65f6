//! External interfaces consumed by the core. The core never talks to a
//! database, an LLM, or a pub/sub bus directly — it only talks through
//! these traits, the same way the teacher's VM and engine operate
//! exclusively through `ProcessStore`, leaving the backend pluggable
//! (in-memory for tests, Postgres for production — see [`crate::store_memory`]
//! and [`crate::store_postgres`]).

use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// A transaction body passed to [`TaskRepository::with_transaction`]: a
/// once-callable closure producing the future that performs the writes.
pub type TransactionBody<'a> =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> + Send + 'a>;

/// Persistence for `TaskState` rows, keyed by `TaskExecId`.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn upsert(&self, state: &TaskState) -> Result<()>;
    async fn get(&self, task_exec_id: TaskExecId) -> Result<Option<TaskState>>;
    async fn get_child_by_task_id(
        &self,
        parent_id: TaskExecId,
        task_id: &str,
    ) -> Result<Option<TaskState>>;
    async fn list_children(&self, parent_id: TaskExecId) -> Result<Vec<TaskState>>;
    async fn list_children_outputs(
        &self,
        parent_id: TaskExecId,
    ) -> Result<BTreeMap<TaskId, serde_json::Value>>;
    async fn get_progress_info(&self, parent_id: TaskExecId) -> Result<ProgressInfo>;

    /// Runs `body` as a single logical unit spanning every write it makes.
    /// Backends with a native transaction primitive (a SQL `BEGIN`/`COMMIT`,
    /// say) should open one around the call; backends without one (this
    /// crate's in-memory store) just run `body` directly.
    async fn with_transaction<'a>(&'a self, body: TransactionBody<'a>) -> Result<()>;
}

/// Persistence for `WorkflowState` rows, keyed by `WorkflowExecId`.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get_state(&self, exec_id: WorkflowExecId) -> Result<Option<WorkflowState>>;
    async fn upsert_state(&self, state: &WorkflowState) -> Result<()>;
}

/// The write-once, read-many config blob store.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn save(&self, key: TaskExecId, cfg: &TaskConfig) -> Result<()>;
    async fn get(&self, key: TaskExecId) -> Result<Option<TaskConfig>>;
    async fn delete(&self, key: TaskExecId) -> Result<()>;
    async fn save_metadata(&self, key: TaskExecId, bytes: &[u8]) -> Result<()>;
    async fn get_metadata(&self, key: TaskExecId) -> Result<Option<Vec<u8>>>;
}

/// The external LLM/agent/tool executor (consumed only; its own implementation lives outside this crate).
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, input: ExecuteInput<'_>) -> Result<serde_json::Value>;
}

#[derive(Clone, Copy)]
pub struct ExecuteInput<'a> {
    pub cfg: &'a TaskConfig,
    pub workflow_state: &'a WorkflowState,
    pub workflow_config: &'a WorkflowConfig,
    pub project_config: &'a ProjectConfig,
}

/// Signal transport (consumed only; its own implementation lives outside this crate).
#[async_trait]
pub trait SignalDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        name: &str,
        payload: &serde_json::Value,
        correlation_id: &str,
        project_name: &str,
    ) -> Result<()>;
}

/// A memory message, as read back from / appended to a `MemoryBackend`
/// (referenced by a memory task's `MemoryRef`). Something has to own the
/// messages a memory task reads/writes.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct MemoryMessage {
    pub role: MessageRole,
    pub content: String,
}

/// External conversational-memory store, addressed by `(memory_ref, key)`.
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn read(&self, memory_ref: &str, key: &str) -> Result<Vec<MemoryMessage>>;
    async fn append(&self, memory_ref: &str, key: &str, message: MemoryMessage) -> Result<()>;
    async fn clear(&self, memory_ref: &str, key: &str) -> Result<()>;
    async fn delete(&self, memory_ref: &str, key: &str) -> Result<()>;
    async fn health(&self, memory_ref: &str) -> Result<serde_json::Value>;
    async fn stats(&self, memory_ref: &str, key: &str) -> Result<serde_json::Value>;
}
