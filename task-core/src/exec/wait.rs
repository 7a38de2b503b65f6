//! Wait leaf executor — signal/wait coordination is folded in here and in
//! [`super::signal`]). Does not block: returns immediately with
//! `Status::Waiting` so the outer durable runtime can register a timer and
//! a signal subscription. `WaitFor` stays templated until now.

use super::LeafDeps;
use crate::context::{self, ChildBindings, ContextInputs};
use crate::duration::parse_positive_duration;
use crate::error::{CoreError, CoreResult, ValidationError};
use crate::expr::template;
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
    let cfg = normalize::normalize(TaskType::Wait, raw_cfg, &deps.evaluator, &base_vars)?;

    let factory = deps.state_factory();
    let mut state = factory.create(&cfg, workflow, None, now).await?;

    let ctx = context::build(workflow, workflow_config, &cfg, ctx_inputs);

    let wait_for_tmpl = cfg.wait_for.as_deref().expect("validated by normalizer");
    let signal_name = template::render_text(&deps.evaluator, wait_for_tmpl, &ctx.variables)?;

    let timeout_raw = cfg.timeout.as_deref().expect("validated by normalizer");
    let timeout_rendered = template::render_text(&deps.evaluator, timeout_raw, &ctx.variables)?;
    let timeout = parse_positive_duration(&timeout_rendered)?;

    state.status = Status::Waiting;
    state.output = Some(json!({
        "wait_status": "waiting",
        "signal_name": signal_name,
        "has_processor": cfg.processor.is_some(),
        "timeout_seconds": timeout.as_secs(),
    }));
    state.updated_at = now;
    deps.task_repo.upsert(&state).await?;

    tracing::debug!(signal = %signal_name, timeout_s = timeout.as_secs(), "wait task registered");

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

/// `NormalizeWaitProcessor` activity: on
/// signal arrival, normalize the wait task's processor with `signal` bound,
/// defaulting `cwd`/`file_path` from the parent wait task's own values.
pub fn normalize_processor(
    evaluator: &crate::expr::Evaluator,
    parent_wait: &TaskConfig,
    signal: serde_json::Value,
    workflow: &WorkflowState,
    workflow_config: &WorkflowConfig,
) -> CoreResult<TaskConfig> {
    let mut processor = parent_wait
        .processor
        .clone()
        .ok_or_else(|| CoreError::Validation(ValidationError::MissingRequired { field: "processor" }))?;

    if processor.cwd.is_none() {
        processor.cwd = parent_wait.cwd.clone();
    }
    if processor.file_path.is_none() {
        processor.file_path = parent_wait.file_path.clone();
    }

    let ctx = context::build(
        workflow,
        workflow_config,
        &processor,
        ContextInputs {
            signal: Some(signal),
            child: ChildBindings::default(),
            ..Default::default()
        },
    );
    let normalized = normalize::normalize(processor.task_type, &processor, evaluator, &ctx.variables)?;
    Ok(normalized)
}

/// `EvaluateCondition` activity: evaluate a wait predicate against
/// the bound signal/processor-output context.
pub fn evaluate_wait_predicate(
    evaluator: &crate::expr::Evaluator,
    expression: &str,
    signal: serde_json::Value,
    processor_output: Option<serde_json::Value>,
) -> CoreResult<bool> {
    let mut map = serde_json::Map::new();
    map.insert("signal".to_string(), signal);
    map.insert("processor".to_string(), processor_output.unwrap_or(serde_json::Value::Null));
    evaluator
        .evaluate(expression, &serde_json::Value::Object(map))
        .map_err(CoreError::Expression)
}
