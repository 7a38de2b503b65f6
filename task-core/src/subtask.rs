//! Subtask Driver. Drives exactly one child of a composite/parallel/
//! collection parent through to completion: waits for any prior (ordered)
//! siblings to become visible, refreshes the workflow state, builds
//! sibling-aware context, fetches the child's preallocated `TaskState`
//! (minted during expansion) with backoff, dispatches to the right
//! per-type executor, and reconciles the result back onto that
//! preallocated row.

use crate::context::{ContextInputs, ParentView, SiblingView};
use crate::error::{CoreError, CoreResult, RetryableError};
use crate::exec::LeafDeps;
use crate::response::MainTaskResponse;
use crate::types::*;

pub struct SubtaskInput<'a> {
    pub parent_task_exec_id: TaskExecId,
    pub parent_cfg: &'a TaskConfig,
    pub child_task_id: TaskId,
    pub workflow_config: &'a WorkflowConfig,
    pub project: &'a ProjectConfig,
}

/// `ExecuteSubtask`'s published response: the underlying leaf
/// response plus this child's ordinal position among its siblings, used by
/// the collection/parallel/composite response handlers to build their
/// summaries without re-deriving ordinals from the parent config.
pub struct SubtaskResponse {
    pub main: MainTaskResponse,
    pub ordinal: usize,
    pub sibling_count: usize,
}

/// Prior siblings (by ordinal position in `parent_cfg.tasks`) that must be
/// terminal *and* output-visible before `child_task_id` may run. Only
/// composite parents impose this — parallel and collection children are
/// mutually independent.
fn prior_sibling_ids(parent_cfg: &TaskConfig, child_task_id: &str) -> Vec<TaskId> {
    if parent_cfg.task_type != TaskType::Composite {
        return Vec::new();
    }
    let Some(position) = parent_cfg.tasks.iter().position(|t| t.id == child_task_id) else {
        return Vec::new();
    };
    parent_cfg.tasks[..position].iter().map(|t| t.id.clone()).collect()
}

/// A collection child's synthetic id is `{parent.id}[{index}]` (minted in
/// the expansion engine's post-processing pipeline); parse the index back out.
fn collection_index(child_task_id: &str) -> Option<usize> {
    let open = child_task_id.rfind('[')?;
    let close = child_task_id.rfind(']')?;
    if close != child_task_id.len() - 1 || close <= open + 1 {
        return None;
    }
    child_task_id[open + 1..close].parse().ok()
}

fn ordinal_of(parent_cfg: &TaskConfig, parent_state: &TaskState, child_task_id: &str) -> (usize, usize) {
    if parent_cfg.task_type == TaskType::Collection {
        if let Some(cs) = &parent_state.collection_state {
            let total = cs.item_results.len().max(1);
            let ordinal = collection_index(child_task_id).unwrap_or(0);
            return (ordinal, total);
        }
    }
    let count = parent_cfg.tasks.len().max(1);
    let ordinal = parent_cfg
        .tasks
        .iter()
        .position(|t| t.id == child_task_id)
        .unwrap_or(0);
    (ordinal, count)
}

/// Poll `prior_ids` every `sibling_poll_interval` until every one of them
/// has reached a terminal status *and*, for those that succeeded, has a
/// visible output. Gives up after `sibling_wait_deadline`
/// with a `RetryableError::SiblingOutputNotVisible`, so the outer runtime
/// backs off and re-invokes rather than treating this as terminal.
async fn wait_for_prior_siblings(
    deps: &LeafDeps,
    parent_task_exec_id: TaskExecId,
    prior_ids: &[TaskId],
) -> CoreResult<()> {
    if prior_ids.is_empty() {
        return Ok(());
    }
    let deadline = tokio::time::Instant::now() + deps.config.sibling_wait_deadline;
    loop {
        let mut all_visible = true;
        let mut first_pending: Option<TaskId> = None;
        for id in prior_ids {
            let Some(state) = deps
                .task_repo
                .get_child_by_task_id(parent_task_exec_id, id)
                .await
                .map_err(CoreError::Infrastructure)?
            else {
                all_visible = false;
                first_pending = Some(id.clone());
                break;
            };
            let terminal = matches!(
                state.status,
                Status::Success | Status::Failed | Status::Canceled | Status::TimedOut
            );
            let output_visible = state.status != Status::Success || state.output.is_some();
            if !terminal || !output_visible {
                all_visible = false;
                first_pending = Some(id.clone());
                break;
            }
        }
        if all_visible {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(CoreError::Retryable(RetryableError::SiblingOutputNotVisible {
                task_id: first_pending.unwrap_or_default(),
            }));
        }
        tokio::time::sleep(deps.config.sibling_poll_interval).await;
    }
}

/// Fetch the child's preallocated `TaskState` (created during expansion),
/// retrying with exponential backoff to absorb the cross-transaction
/// visibility gap between "parent expanded" and "child row readable".
async fn fetch_preallocated_child(
    deps: &LeafDeps,
    parent_task_exec_id: TaskExecId,
    child_task_id: &str,
) -> CoreResult<TaskState> {
    let mut backoff = deps.config.child_fetch_base_backoff;
    for attempt in 0..deps.config.child_fetch_max_attempts {
        if let Some(state) = deps
            .task_repo
            .get_child_by_task_id(parent_task_exec_id, child_task_id)
            .await
            .map_err(CoreError::Infrastructure)?
        {
            return Ok(state);
        }
        if attempt + 1 == deps.config.child_fetch_max_attempts {
            break;
        }
        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }
    Err(CoreError::Retryable(RetryableError::ChildStateNotFound {
        task_id: child_task_id.to_string(),
    }))
}

/// Drive `input.child_task_id` to completion.
#[tracing::instrument(skip_all, fields(parent = %input.parent_task_exec_id, child = %input.child_task_id))]
pub async fn drive(
    deps: &LeafDeps,
    input: SubtaskInput<'_>,
    now: i64,
) -> CoreResult<SubtaskResponse> {
    let SubtaskInput {
        parent_task_exec_id,
        parent_cfg,
        child_task_id,
        workflow_config,
        project,
    } = input;

    let prior_ids = prior_sibling_ids(parent_cfg, &child_task_id);
    wait_for_prior_siblings(deps, parent_task_exec_id, &prior_ids).await?;

    let parent_state = deps
        .task_repo
        .get(parent_task_exec_id)
        .await
        .map_err(CoreError::Infrastructure)?
        .ok_or(CoreError::Retryable(RetryableError::TaskNotFound(
            parent_task_exec_id.to_string(),
        )))?;

    let workflow = deps
        .workflow_repo
        .get_state(parent_state.workflow_exec_id)
        .await
        .map_err(CoreError::Infrastructure)?
        .ok_or(CoreError::Retryable(RetryableError::TaskNotFound(
            parent_state.workflow_exec_id.to_string(),
        )))?;

    let preallocated = fetch_preallocated_child(deps, parent_task_exec_id, &child_task_id).await?;
    let child_cfg = deps
        .config_store
        .get(preallocated.task_exec_id)
        .await
        .map_err(CoreError::Infrastructure)?
        .ok_or(CoreError::Retryable(RetryableError::ChildStateNotFound {
            task_id: child_task_id.clone(),
        }))?;

    let mut completed_siblings = std::collections::BTreeMap::new();
    for id in &prior_ids {
        if let Some(s) = deps
            .task_repo
            .get_child_by_task_id(parent_task_exec_id, id)
            .await
            .map_err(CoreError::Infrastructure)?
        {
            completed_siblings.insert(
                id.clone(),
                SiblingView {
                    status: s.status,
                    output: s.output,
                    error: s.error,
                },
            );
        }
    }

    let ctx_inputs = ContextInputs {
        completed_siblings,
        parent: Some(ParentView {
            task_id: parent_cfg.id.clone(),
            status: parent_state.status,
            input: parent_state.input.clone(),
        }),
        ..Default::default()
    };

    let main = dispatch_leaf(deps, &child_cfg, &workflow, workflow_config, project, ctx_inputs, now).await?;

    // Reconcile: the dispatched executor minted its own execution-scoped
    // state; the preallocated row (referenced by sibling waiters and the
    // progress aggregator) is what stays canonical, so copy the outcome
    // onto it rather than leaving two rows for one logical child.
    let mut reconciled = main.state.clone();
    reconciled.task_exec_id = preallocated.task_exec_id;
    reconciled.parent_state_id = preallocated.parent_state_id;
    deps.task_repo.upsert(&reconciled).await.map_err(CoreError::Infrastructure)?;

    if parent_cfg.task_type == TaskType::Collection {
        record_item_result(deps, parent_task_exec_id, &child_task_id, &reconciled, now).await?;
    }

    let (ordinal, sibling_count) = ordinal_of(parent_cfg, &parent_state, &child_task_id);
    Ok(SubtaskResponse {
        main: MainTaskResponse {
            state: reconciled,
            ..main
        },
        ordinal,
        sibling_count,
    })
}

/// Write this child's outcome into its slot of the parent's
/// `collection_state.item_results` and recompute the roll-up counters from
/// the vector (idempotent under activity replay — no double counting,
/// `processed_count` stays monotonic). Best-effort: under truly concurrent
/// parallel-mode children this read-modify-write can race; a production
/// store would do this update transactionally.
async fn record_item_result(
    deps: &LeafDeps,
    parent_task_exec_id: TaskExecId,
    child_task_id: &str,
    reconciled: &TaskState,
    now: i64,
) -> CoreResult<()> {
    let Some(index) = collection_index(child_task_id) else {
        return Ok(());
    };
    let Some(mut parent_state) = deps
        .task_repo
        .get(parent_task_exec_id)
        .await
        .map_err(CoreError::Infrastructure)?
    else {
        return Ok(());
    };
    let Some(cs) = &mut parent_state.collection_state else {
        return Ok(());
    };
    let Some(entry) = cs.item_results.get_mut(index) else {
        return Ok(());
    };
    entry.status = reconciled.status;
    entry.output = reconciled.output.clone();
    entry.error = reconciled.error.clone();

    cs.processed_count = cs.item_results.iter().filter(|r| r.status.is_terminal()).count();
    cs.completed_count = cs
        .item_results
        .iter()
        .filter(|r| r.status == Status::Success)
        .count();
    cs.failed_count = cs
        .item_results
        .iter()
        .filter(|r| matches!(r.status, Status::Failed | Status::Canceled | Status::TimedOut))
        .count();

    parent_state.updated_at = now;
    deps.task_repo.upsert(&parent_state).await.map_err(CoreError::Infrastructure)?;
    Ok(())
}

async fn dispatch_leaf(
    deps: &LeafDeps,
    cfg: &TaskConfig,
    workflow: &WorkflowState,
    workflow_config: &WorkflowConfig,
    project: &ProjectConfig,
    ctx_inputs: ContextInputs<'_>,
    now: i64,
) -> CoreResult<MainTaskResponse> {
    match cfg.task_type {
        TaskType::Basic => crate::exec::basic::execute(deps, cfg, workflow, workflow_config, project, ctx_inputs, now).await,
        TaskType::Router => crate::exec::router::execute(deps, cfg, workflow, workflow_config, ctx_inputs, now).await,
        TaskType::Signal => crate::exec::signal::execute(deps, cfg, workflow, workflow_config, project, ctx_inputs, now).await,
        TaskType::Wait => crate::exec::wait::execute(deps, cfg, workflow, workflow_config, ctx_inputs, now).await,
        TaskType::Memory => crate::exec::memory::execute(deps, cfg, workflow, workflow_config, ctx_inputs, now).await,
        TaskType::Aggregate => crate::exec::aggregate::execute(deps, cfg, workflow, workflow_config, ctx_inputs, now).await,
        TaskType::Parallel | TaskType::Collection | TaskType::Composite => {
            Err(CoreError::Validation(crate::error::ValidationError::UnsupportedTaskType {
                expected: "a leaf task type".to_string(),
                actual: format!("{:?}", cfg.task_type),
            }))
        }
    }
}
