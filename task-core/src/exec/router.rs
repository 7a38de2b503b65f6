//! Router leaf executor: evaluates `Condition`, resolves the chosen route,
//! and hands the target config to the response handler as a
//! `NextTaskOverride` — bypassing `OnSuccess`/`OnError` entirely.

use super::LeafDeps;
use crate::context::{self, ContextInputs};
use crate::error::{CoreError, CoreResult, ExpressionError, ValidationError};
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
    ctx_inputs: ContextInputs<'_>,
    now: i64,
) -> CoreResult<MainTaskResponse> {
    let base_vars = context::build(workflow, workflow_config, raw_cfg, ctx_inputs.clone()).variables;
    let cfg = normalize::normalize(TaskType::Router, raw_cfg, &deps.evaluator, &base_vars)?;

    let factory = deps.state_factory();
    let mut state = factory.create(&cfg, workflow, None, now).await?;

    let ctx = context::build(workflow, workflow_config, &cfg, ctx_inputs);

    // `Condition` stays templated through normalization; the router
    // evaluates it now against the fully assembled context.
    let condition_expr = cfg
        .condition
        .as_deref()
        .ok_or(ValidationError::MissingRequired { field: "condition" })?;

    let condition_value = deps
        .evaluator
        .evaluate_value(condition_expr, &ctx.variables)
        .map_err(CoreError::Expression)?;

    if condition_value.is_null() {
        return Err(CoreError::Expression(ExpressionError::ConditionNil));
    }
    let route_key = match &condition_value {
        serde_json::Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if route_key.is_empty() {
        return Err(CoreError::Expression(ExpressionError::ConditionEmpty));
    }

    let target = cfg
        .routes
        .get(&route_key)
        .ok_or_else(|| ValidationError::RouteNotFound { key: route_key.clone() })?;

    let next_cfg = match target {
        RouteTarget::Id(id) => workflow_config
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| ValidationError::RouteNotFound { key: id.clone() })?,
        RouteTarget::Embedded(embedded) => (**embedded).clone(),
    };

    let output = json!({
        "condition": condition_expr,
        "route_taken": route_key,
        "router_type": "conditional",
    });
    state.set_success(output, now);
    deps.task_repo.upsert(&state).await?;

    tracing::debug!(route = %route_key, "router selected route");

    let response = response::build_leaf_response(
        &deps.evaluator,
        ResponseInput {
            cfg: &cfg,
            state,
            workflow_config,
            next_task_override: Some(next_cfg),
        },
        &ctx.variables,
        now,
    )?;
    Ok(response)
}
