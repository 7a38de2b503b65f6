//! Signal leaf executor: dispatches `Signal.ID` via the
//! external [`SignalDispatcher`](crate::store::SignalDispatcher).

use super::LeafDeps;
use crate::context::{self, ContextInputs};
use crate::error::CoreResult;
use crate::normalize;
use crate::response::{self, MainTaskResponse, ResponseInput};
use crate::types::*;
use serde_json::json;

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
    let base_vars = context::build(workflow, workflow_config, raw_cfg, ctx_inputs.clone()).variables;
    let cfg = normalize::normalize(TaskType::Signal, raw_cfg, &deps.evaluator, &base_vars)?;

    let factory = deps.state_factory();
    let mut state = factory.create(&cfg, workflow, None, now).await?;

    let signal = cfg.signal.as_ref().expect("validated by normalizer");
    let payload = signal.payload.clone().unwrap_or_else(|| json!({}));
    let correlation_id = workflow.workflow_exec_id.to_string();

    let dispatch_result = deps
        .signal_dispatcher
        .dispatch(&signal.id, &payload, &correlation_id, &project.name)
        .await;

    match dispatch_result {
        Ok(()) => {
            state.set_success(
                json!({ "signal_dispatched": true, "signal_id": signal.id }),
                now,
            );
        }
        Err(e) => {
            state.set_failed(
                TaskError {
                    code: "SIGNAL_DISPATCH_FAILED".to_string(),
                    message: e.to_string(),
                    data: None,
                },
                now,
            );
        }
    }
    deps.task_repo.upsert(&state).await?;

    let ctx = context::build(workflow, workflow_config, &cfg, ctx_inputs);
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
