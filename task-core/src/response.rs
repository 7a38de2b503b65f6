//! Response Handler & Transition Resolver. Consumes a
//! `ResponseInput`, renders any declared `Outputs` transform, resolves
//! `OnSuccess`/`OnError` into concrete next-task configs, and — for parents —
//! drives the progress rollup and the collection item summary.

use crate::error::{CoreError, ParentExecutionFailed};
use crate::expr::{template, Evaluator};
use crate::progress::{self, Overall};
use crate::types::*;
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;

/// Published response shape for `ExecuteBasic`/.../`GetParallelResponse`
/// etc.
#[derive(Clone, Debug)]
pub struct MainTaskResponse {
    pub state: TaskState,
    pub on_success: Option<TaskConfig>,
    pub on_error: Option<TaskConfig>,
    pub next_task: Option<TaskConfig>,
}

/// `GetCollectionResponse`'s richer wrapper.
#[derive(Clone, Debug)]
pub struct CollectionResponse {
    pub main: MainTaskResponse,
    pub item_count: usize,
    pub skipped_count: usize,
}

pub struct ResponseInput<'a> {
    pub cfg: &'a TaskConfig,
    pub state: TaskState,
    pub workflow_config: &'a WorkflowConfig,
    pub next_task_override: Option<TaskConfig>,
}

/// Render `cfg.outputs` (if declared) against `vars` and overwrite
/// `state.output` with the result. Only called on a status=success, non-
/// deferred path; parents call this later via [`apply_deferred_output`].
pub fn apply_output_transform(
    evaluator: &Evaluator,
    cfg: &TaskConfig,
    state: &mut TaskState,
    vars: &Json,
    now: i64,
) -> Result<(), CoreError> {
    let Some(outputs) = &cfg.outputs else {
        return Ok(());
    };
    if state.status != Status::Success {
        return Ok(());
    }
    let mut rendered = serde_json::Map::new();
    for (k, v) in outputs {
        rendered.insert(k.clone(), template::render_value_recursive(evaluator, v, vars)?);
    }
    state.output = Some(Json::Object(rendered));
    state.updated_at = now;
    Ok(())
}

/// Resolve `transition.next` (templated) to a concrete `TaskConfig`, deep
/// copying any `With` override on top of the target's own `with`.
pub fn resolve_transition(
    evaluator: &Evaluator,
    transition: &Transition,
    workflow_config: &WorkflowConfig,
    vars: &Json,
) -> Result<Option<TaskConfig>, CoreError> {
    let Some(next_tmpl) = &transition.next else {
        return Ok(None);
    };
    let next_id = template::render_text(evaluator, next_tmpl, vars)?;
    let next_id = next_id.trim();
    if next_id.is_empty() {
        return Ok(None);
    }
    let Some(target) = workflow_config.tasks.get(next_id) else {
        return Ok(None);
    };
    let mut target = target.clone();
    for (k, v) in &transition.with {
        target.with.insert(k.clone(), v.clone());
    }
    Ok(Some(target))
}

/// Build the response for a leaf task (basic/router/signal/wait/memory/
/// aggregate) that has just finished executing (or failed).
pub fn build_leaf_response(
    evaluator: &Evaluator,
    input: ResponseInput<'_>,
    vars: &Json,
    now: i64,
) -> Result<MainTaskResponse, CoreError> {
    let ResponseInput {
        cfg,
        mut state,
        workflow_config,
        next_task_override,
    } = input;

    apply_output_transform(evaluator, cfg, &mut state, vars, now)?;

    let on_success = match &cfg.on_success {
        Some(t) => resolve_transition(evaluator, t, workflow_config, vars)?,
        None => None,
    };
    let on_error = match &cfg.on_error {
        Some(t) => resolve_transition(evaluator, t, workflow_config, vars)?,
        None => None,
    };

    // A router's chosen route always wins over OnSuccess/OnError.
    let next_task = if let Some(ov) = next_task_override {
        Some(ov)
    } else {
        match state.status {
            Status::Success => on_success.clone(),
            Status::Failed => on_error.clone(),
            _ => None,
        }
    };

    Ok(MainTaskResponse {
        state,
        on_success,
        on_error,
        next_task,
    })
}

/// Build the response for a parent whose rollup (and deferred output
/// transform) has already run via [`apply_deferred_output`] — resolves
/// `OnSuccess`/`OnError` against the finalized state without re-rendering
/// `Outputs` a second time.
pub fn build_finalized_response(
    evaluator: &Evaluator,
    cfg: &TaskConfig,
    state: TaskState,
    workflow_config: &WorkflowConfig,
    vars: &Json,
) -> Result<MainTaskResponse, CoreError> {
    let on_success = match &cfg.on_success {
        Some(t) => resolve_transition(evaluator, t, workflow_config, vars)?,
        None => None,
    };
    let on_error = match &cfg.on_error {
        Some(t) => resolve_transition(evaluator, t, workflow_config, vars)?,
        None => None,
    };
    let next_task = match state.status {
        Status::Success => on_success.clone(),
        Status::Failed => on_error.clone(),
        _ => None,
    };
    Ok(MainTaskResponse {
        state,
        on_success,
        on_error,
        next_task,
    })
}

/// Apply the output transform only after rollup, and only on the no-error
/// path.
pub fn apply_deferred_output(
    evaluator: &Evaluator,
    cfg: &TaskConfig,
    state: &mut TaskState,
    vars: &Json,
    now: i64,
) -> Result<(), CoreError> {
    if state.status != Status::Success {
        return Ok(());
    }
    apply_output_transform(evaluator, cfg, state, vars, now)
}

/// Roll up a parallel/composite parent from its children's progress info.
pub fn rollup_parent(
    parent_id: TaskExecId,
    progress: &ProgressInfo,
    strategy: Strategy,
    continue_on_error: bool,
    is_collection: bool,
) -> Result<Overall, CoreError> {
    progress::evaluate(parent_id, progress, strategy, continue_on_error, is_collection)
}

/// Build the failure message/error for a parent whose rollup came back
/// `Failed`, attributing each failed child by id.
pub fn parent_execution_failed(failed_children: Vec<(TaskId, TaskError)>) -> ParentExecutionFailed {
    ParentExecutionFailed {
        failed_children: failed_children
            .into_iter()
            .map(|(id, err)| (id, format!("{}: {}", err.code, err.message)))
            .collect(),
    }
}

/// Build the `{results, summary}` payload for a collection parent:
/// per-item `{index, status, item, output?, error?}`.
pub fn collection_summary(item_results: &[ItemResult]) -> Json {
    let results: Vec<Json> = item_results
        .iter()
        .map(|r| {
            json!({
                "index": r.index,
                "status": status_str(r.status),
                "item": r.item,
                "output": r.output.clone().unwrap_or(Json::Null),
                "error": r.error.as_ref().map(|e| json!({"code": e.code, "message": e.message})).unwrap_or(Json::Null),
            })
        })
        .collect();
    let succeeded = item_results.iter().filter(|r| r.status == Status::Success).count();
    let failed = item_results.iter().filter(|r| r.status == Status::Failed).count();
    json!({
        "results": results,
        "summary": {
            "total": item_results.len(),
            "succeeded": succeeded,
            "failed": failed,
        }
    })
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

/// Aggregate per-child outputs into the `tasks.<id>.output` map consumed by
/// [`crate::context`] — used when building the vars for deferred output
/// transforms on a parent.
pub fn sibling_outputs_to_tasks_var(outputs: &BTreeMap<TaskId, Json>) -> Json {
    let mut map = serde_json::Map::new();
    for (id, out) in outputs {
        map.insert(id.clone(), json!({ "output": out }));
    }
    Json::Object(map)
}
