//! Basic leaf executor: delegates to the external
//! [`TaskExecutor`](crate::store::TaskExecutor).

use super::LeafDeps;
use crate::context::{self, ContextInputs};
use crate::error::CoreResult;
use crate::normalize;
use crate::response::{self, MainTaskResponse, ResponseInput};
use crate::store::ExecuteInput;
use crate::types::*;
use std::time::Instant;

/// Attaches a usage collector to the execution for telemetry; finalises on
/// every exit path via `Drop`, mirroring the teacher's span-scoped metrics.
struct UsageGuard {
    task_id: TaskId,
    started: Instant,
}

impl UsageGuard {
    fn start(task_id: TaskId) -> Self {
        Self {
            task_id,
            started: Instant::now(),
        }
    }
}

impl Drop for UsageGuard {
    fn drop(&mut self) {
        tracing::debug!(
            task_id = %self.task_id,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "basic task usage finalized"
        );
    }
}

#[tracing::instrument(skip_all, fields(task_id = %raw_cfg.id))]
pub async fn execute(
    deps: &LeafDeps,
    raw_cfg: &TaskConfig,
    workflow: &WorkflowState,
    workflow_config: &WorkflowConfig,
    project: &ProjectConfig,
    ctx_inputs: ContextInputs<'_>,
    now: i64,
) -> CoreResult<MainTaskResponse> {
    let _usage = UsageGuard::start(raw_cfg.id.clone());

    let base_vars = context::build(workflow, workflow_config, raw_cfg, ctx_inputs.clone()).variables;
    let cfg = normalize::normalize(TaskType::Basic, raw_cfg, &deps.evaluator, &base_vars)?;

    let factory = deps.state_factory();
    let mut state = factory.create(&cfg, workflow, None, now).await?;
    state.status = Status::Running;
    deps.task_repo.upsert(&state).await?;

    let ctx = context::build(workflow, workflow_config, &cfg, ctx_inputs);

    let exec_result = deps
        .task_executor
        .execute(ExecuteInput {
            cfg: &cfg,
            workflow_state: workflow,
            workflow_config,
            project_config: project,
        })
        .await;

    match exec_result {
        Ok(output) => state.set_success(output, now),
        Err(e) => state.set_failed(
            TaskError {
                code: "EXECUTION_FAILED".to_string(),
                message: e.to_string(),
                data: None,
            },
            now,
        ),
    }
    deps.task_repo.upsert(&state).await?;

    let response = response::build_leaf_response(
        &deps.evaluator,
        ResponseInput {
            cfg: &cfg,
            state,
            workflow_config,
            next_task_override: None,
        },
        &ctx.variables,
        now,
    )?;
    Ok(response)
}

/// Shared by all leaf executors: surfaces a business (execution) failure by
/// writing `TaskState.error` and returning `Ok` — only infrastructure
/// failures should ever escape as a [`CoreError`].
pub fn business_error(code: &str, message: impl Into<String>) -> TaskError {
    TaskError {
        code: code.to_string(),
        message: message.into(),
        data: None,
    }
}
