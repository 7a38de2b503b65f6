//! The declarative/runtime data model: `TaskConfig` and `TaskState`,
//! plus the enums and small value types shared across every component.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stable identifier of a task within a workflow config (`a`, `a[0]`, `a[1]`, ...).
pub type TaskId = String;

/// Opaque 128-bit identifier minted per task state.
pub type TaskExecId = Uuid;

/// Identifier of a workflow definition.
pub type WorkflowId = String;

/// Identifier of a running workflow execution.
pub type WorkflowExecId = Uuid;

/// The declarative shape of one node in a workflow graph.
///
/// All string-valued fields are potentially templated; which fields are
/// rendered eagerly vs. lazily is defined per-type by the normalizer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    #[serde(default)]
    pub with: BTreeMap<String, Json>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub on_success: Option<Transition>,
    #[serde(default)]
    pub on_error: Option<Transition>,
    /// Output transform: rendered by the template engine once all required
    /// inputs (sibling outputs, for parents) are available.
    #[serde(default)]
    pub outputs: Option<BTreeMap<String, Json>>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub routes: BTreeMap<String, RouteTarget>,
    #[serde(default)]
    pub signal: Option<SignalSpec>,
    #[serde(default)]
    pub wait_for: Option<String>,
    #[serde(default)]
    pub processor: Option<Box<TaskConfig>>,
    /// Human-readable duration string (e.g. "2m", "30s"), templated.
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
    #[serde(default)]
    pub items: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub item_var: Option<String>,
    #[serde(default)]
    pub index_var: Option<String>,
    #[serde(default)]
    pub mode: CollectionMode,
    #[serde(default)]
    pub batch: Option<u32>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub memory: Option<MemoryConfig>,
}

impl TaskConfig {
    pub fn item_var_name(&self) -> &str {
        self.item_var.as_deref().unwrap_or("item")
    }

    pub fn index_var_name(&self) -> &str {
        self.index_var.as_deref().unwrap_or("index")
    }

    pub fn is_parent(&self) -> bool {
        matches!(
            self.task_type,
            TaskType::Parallel | TaskType::Collection | TaskType::Composite
        )
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Basic,
    Router,
    Signal,
    Wait,
    Memory,
    Aggregate,
    Parallel,
    Collection,
    Composite,
}

impl TaskType {
    pub fn is_leaf(self) -> bool {
        !matches!(
            self,
            TaskType::Parallel | TaskType::Collection | TaskType::Composite
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub next: Option<String>,
    #[serde(default)]
    pub with: BTreeMap<String, Json>,
}

/// A router target is either a plain lookup-by-id or an embedded child config.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RouteTarget {
    Id(String),
    Embedded(Box<TaskConfig>),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SignalSpec {
    pub id: String,
    #[serde(default)]
    pub payload: Option<Json>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMode {
    #[default]
    Parallel,
    Sequential,
}

/// Both snake_case and camelCase spellings of each strategy normalize to
/// the same variant via `#[serde(alias = ..)]`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    #[serde(alias = "waitAll")]
    WaitAll,
    #[serde(alias = "bestEffort")]
    BestEffort,
    #[serde(alias = "failFast")]
    FailFast,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MemoryConfig {
    pub operation: MemoryOperation,
    pub memory_ref: Option<String>,
    pub key_template: Option<String>,
    #[serde(default)]
    pub payload: Option<Json>,
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub health: Option<Json>,
    #[serde(default)]
    pub stats: Option<Json>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOperation {
    Read,
    Write,
    Append,
    Delete,
    Flush,
    Health,
    Clear,
    Stats,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

// ─── Runtime state ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Task,
    Agent,
    Tool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionType {
    Basic,
    Wait,
    Parent,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Waiting,
    Success,
    Failed,
    Canceled,
    TimedOut,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Success | Status::Failed | Status::Canceled | Status::TimedOut
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<Json>,
}

/// Per-item result captured in a collection parent's summary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ItemResult {
    pub index: usize,
    pub status: Status,
    pub item: Json,
    #[serde(default)]
    pub output: Option<Json>,
    #[serde(default)]
    pub error: Option<TaskError>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CollectionState {
    pub items: Vec<Json>,
    pub filter: Option<String>,
    pub mode: CollectionMode,
    pub batch: Option<u32>,
    pub item_var: String,
    pub index_var: String,
    pub processed_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub item_results: Vec<ItemResult>,
}

/// Runtime instance of a `TaskConfig`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TaskState {
    pub task_id: TaskId,
    pub task_exec_id: TaskExecId,
    pub workflow_id: WorkflowId,
    pub workflow_exec_id: WorkflowExecId,
    pub parent_state_id: Option<TaskExecId>,
    pub component: Component,
    pub execution_type: ExecutionType,
    pub status: Status,
    #[serde(default)]
    pub input: Option<Json>,
    #[serde(default)]
    pub output: Option<Json>,
    #[serde(default)]
    pub error: Option<TaskError>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub collection_state: Option<CollectionState>,
}

impl TaskState {
    /// Output is non-nil iff status is success.
    pub fn set_success(&mut self, output: Json, now: i64) {
        self.status = Status::Success;
        self.output = Some(output);
        self.error = None;
        self.updated_at = now;
    }

    pub fn set_failed(&mut self, error: TaskError, now: i64) {
        self.status = Status::Failed;
        self.output = None;
        self.error = Some(error);
        self.updated_at = now;
    }
}

// ─── Workflow-side types consumed for context building ────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub workflow_exec_id: WorkflowExecId,
    pub status: Status,
    #[serde(default)]
    pub input: Json,
    #[serde(default)]
    pub output: Option<Json>,
    #[serde(default)]
    pub error: Option<TaskError>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkflowConfig {
    pub id: WorkflowId,
    pub tasks: BTreeMap<TaskId, TaskConfig>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Aggregate progress snapshot returned by `TaskRepository::get_progress_info`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ProgressInfo {
    pub total_children: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub running_count: usize,
    pub pending_count: usize,
    pub status_counts: BTreeMap<Status, usize>,
    pub completion_rate: f64,
    pub failure_rate: f64,
}
