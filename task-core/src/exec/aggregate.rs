//! Aggregate leaf executor: no external call, just a
//! template-only output transform over whatever sibling outputs the caller
//! has already bound into context, bounded by a hard 30s budget so a
//! runaway expression can't wedge the workflow.

use super::LeafDeps;
use crate::context::{self, ContextInputs};
use crate::error::{CoreError, CoreResult};
use crate::normalize;
use crate::response::{self, MainTaskResponse, ResponseInput};
use crate::types::*;
use std::time::Duration;

const AGGREGATE_BUDGET: Duration = Duration::from_secs(30);

#[tracing::instrument(skip_all, fields(task_id = %raw_cfg.id))]
pub async fn execute(
    deps: &LeafDeps,
    raw_cfg: &TaskConfig,
    workflow: &WorkflowState,
    workflow_config: &WorkflowConfig,
    ctx_inputs: ContextInputs<'_>,
    now: i64,
) -> CoreResult<MainTaskResponse> {
    let base_vars = context::build(workflow, workflow_config, raw_cfg, ctx_inputs.clone()).variables;
    let cfg = normalize::normalize(TaskType::Aggregate, raw_cfg, &deps.evaluator, &base_vars)?;

    let factory = deps.state_factory();
    let mut state = factory.create(&cfg, workflow, None, now).await?;

    let ctx = context::build(workflow, workflow_config, &cfg, ctx_inputs);

    // Stage a success state, run the transform against it, then decide
    // whether it actually sticks — `apply_output_transform` only writes
    // when `status == Success`, so this doubles as the happy-path write.
    state.status = Status::Success;
    let outcome = tokio::time::timeout(
        AGGREGATE_BUDGET,
        run_transform(&deps.evaluator, &cfg, &mut state, &ctx.variables, now),
    )
    .await;

    match outcome {
        Ok(Ok(())) => {
            if state.output.is_none() {
                state.output = Some(serde_json::json!({}));
            }
            state.updated_at = now;
        }
        Ok(Err(e)) => state.set_failed(
            TaskError {
                code: "AGGREGATE_TRANSFORM_FAILED".to_string(),
                message: e.to_string(),
                data: None,
            },
            now,
        ),
        Err(_) => return Err(CoreError::AggregateTimeout),
    }
    deps.task_repo.upsert(&state).await?;

    response::build_leaf_response(
        &deps.evaluator,
        ResponseInput {
            cfg: &cfg,
            state,
            workflow_config,
            next_task_override: None,
        },
        &ctx.variables,
        now,
    )
}

/// `async` purely so it composes under `tokio::time::timeout`; the work
/// itself — rendering `Outputs` against already-bound context — is
/// synchronous.
async fn run_transform(
    evaluator: &crate::expr::Evaluator,
    cfg: &TaskConfig,
    state: &mut TaskState,
    vars: &serde_json::Value,
    now: i64,
) -> Result<(), CoreError> {
    response::apply_output_transform(evaluator, cfg, state, vars, now)
}
