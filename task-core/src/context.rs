//! Normalization Context Builder. Pure: assembles the
//! variable bag from already-fetched inputs. Callers (normalizers, leaf
//! executors, the subtask driver) are responsible for fetching whatever
//! store-backed pieces (sibling outputs, parent state) the context needs.

use crate::types::*;
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;

/// One entry of the `tasks` variable: a completed sibling's visible surface.
#[derive(Clone, Debug, Default)]
pub struct SiblingView {
    pub status: Status,
    pub output: Option<Json>,
    pub error: Option<TaskError>,
}

impl SiblingView {
    fn to_json(&self) -> Json {
        json!({
            "status": status_str(self.status),
            "output": self.output.clone().unwrap_or(Json::Null),
            "error": self.error.as_ref().map(|e| json!({
                "code": e.code,
                "message": e.message,
                "data": e.data.clone().unwrap_or(Json::Null),
            })).unwrap_or(Json::Null),
        })
    }
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

/// Extra bindings only present during child expansion/execution.
#[derive(Clone, Debug, Default)]
pub struct ChildBindings {
    pub item: Option<Json>,
    pub index: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct ParentView {
    pub task_id: TaskId,
    pub status: Status,
    pub input: Option<Json>,
}

/// Inputs the builder needs beyond `(WorkflowState, WorkflowConfig, TaskConfig)`.
#[derive(Clone, Debug, Default)]
pub struct ContextInputs<'a> {
    pub completed_siblings: BTreeMap<TaskId, SiblingView>,
    pub sibling_configs: BTreeMap<TaskId, &'a TaskConfig>,
    pub parent: Option<ParentView>,
    pub child: ChildBindings,
    pub signal: Option<Json>,
    pub current_input: Option<Json>,
}

pub struct NormalizationContext {
    pub variables: Json,
    pub task_configs: BTreeMap<TaskId, TaskConfig>,
    pub merged_env: BTreeMap<String, String>,
    pub current_input: Json,
}

/// Env merging is *defaulting*: the outer (workflow) scope fills in missing
/// keys; task-level keys win. On error (none modeled here, kept for parity
/// with callers wrapping this in a `Result`) falls back to task-only env.
pub fn merge_env(
    workflow_env: &BTreeMap<String, String>,
    task_env: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = workflow_env.clone();
    for (k, v) in task_env {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

pub fn build(
    workflow_state: &WorkflowState,
    workflow_config: &WorkflowConfig,
    task_cfg: &TaskConfig,
    inputs: ContextInputs<'_>,
) -> NormalizationContext {
    let merged_env = merge_env(&workflow_state.env, &task_cfg.env);

    let current_input = inputs
        .current_input
        .clone()
        .unwrap_or_else(|| with_to_json(&task_cfg.with));

    let mut tasks_obj = Map::new();
    for (id, view) in &inputs.completed_siblings {
        tasks_obj.insert(id.clone(), view.to_json());
    }

    let env_obj: Map<String, Json> = merged_env
        .iter()
        .map(|(k, v)| (k.clone(), Json::String(v.clone())))
        .collect();

    let mut root = Map::new();
    root.insert(
        "workflow".to_string(),
        json!({
            "id": workflow_state.workflow_id,
            "exec_id": workflow_state.workflow_exec_id.to_string(),
            "status": status_str(workflow_state.status),
            "input": workflow_state.input.clone(),
            "output": workflow_state.output.clone().unwrap_or(Json::Null),
            "error": workflow_state.error.as_ref().map(|e| json!({
                "code": e.code, "message": e.message,
            })).unwrap_or(Json::Null),
        }),
    );
    root.insert("tasks".to_string(), Json::Object(tasks_obj));
    root.insert("task".to_string(), json!({ "id": task_cfg.id }));
    root.insert("input".to_string(), current_input.clone());
    root.insert("with".to_string(), current_input.clone());
    root.insert("env".to_string(), Json::Object(env_obj));
    root.insert(
        "project".to_string(),
        Json::Object(workflow_config_project_stub()),
    );
    root.insert("payload".to_string(), Json::Null);
    root.insert("headers".to_string(), Json::Null);
    root.insert("query".to_string(), Json::Null);
    root.insert("signal".to_string(), inputs.signal.clone().unwrap_or(Json::Null));
    root.insert("processor".to_string(), Json::Null);
    root.insert(
        "current".to_string(),
        inputs.child.item.clone().unwrap_or(Json::Null),
    );

    if let Some(item) = &inputs.child.item {
        root.insert(task_cfg.item_var_name().to_string(), item.clone());
    }
    if let Some(index) = inputs.child.index {
        root.insert(task_cfg.index_var_name().to_string(), json!(index));
    }

    if let Some(parent) = &inputs.parent {
        root.insert(
            "parent".to_string(),
            json!({
                "id": parent.task_id,
                "status": status_str(parent.status),
                "input": parent.input.clone().unwrap_or(Json::Null),
            }),
        );
    }

    let mut task_configs = BTreeMap::new();
    for (id, cfg) in &workflow_config.tasks {
        task_configs.insert(id.clone(), cfg.clone());
    }
    for (id, cfg) in inputs.sibling_configs {
        task_configs.insert(id, cfg.clone());
    }

    NormalizationContext {
        variables: Json::Object(root),
        task_configs,
        merged_env,
        current_input,
    }
}

fn with_to_json(with: &BTreeMap<String, Json>) -> Json {
    Json::Object(with.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn workflow_config_project_stub() -> Map<String, Json> {
    Map::new()
}
