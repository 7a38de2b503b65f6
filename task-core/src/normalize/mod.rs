//! Config Normalizer. One normalizer per task type,
//! produced by [`for_type`]; each mutates a cloned [`TaskConfig`] in place.

mod basic;
mod memory;
mod parent;
mod router;
mod signal;
mod wait;

use crate::error::{CoreError, ValidationError};
use crate::expr::template;
use crate::expr::Evaluator;
use crate::types::*;
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Per-type validation, run after the common template pass.
pub trait Normalizer {
    fn task_type(&self) -> TaskType;
    fn validate(&self, cfg: &TaskConfig) -> Result<(), ValidationError>;
    /// Type-specific eager rendering beyond the common pass (e.g. signal
    /// renders its payload eagerly; everyone else leaves it for now).
    fn render_eager(&self, _cfg: &mut TaskConfig, _evaluator: &Evaluator, _vars: &Json) -> Result<(), CoreError> {
        Ok(())
    }
}

pub fn for_type(task_type: TaskType) -> Box<dyn Normalizer> {
    match task_type {
        TaskType::Basic => Box::new(basic::BasicNormalizer),
        TaskType::Router => Box::new(router::RouterNormalizer),
        TaskType::Signal => Box::new(signal::SignalNormalizer),
        TaskType::Wait => Box::new(wait::WaitNormalizer),
        TaskType::Memory => Box::new(memory::MemoryNormalizer),
        TaskType::Aggregate => Box::new(basic::AggregateNormalizer),
        TaskType::Parallel | TaskType::Collection | TaskType::Composite => {
            Box::new(parent::ParentNormalizer)
        }
    }
}

/// Render every templatable field of `cfg` in place *except* `Condition`,
/// `Items`, `Filter`, and `WaitFor`, which stay templated until the leaf
/// executor runs.
pub fn render_common(cfg: &mut TaskConfig, evaluator: &Evaluator, vars: &Json) -> Result<(), CoreError> {
    let mut rendered_with = BTreeMap::new();
    for (k, v) in &cfg.with {
        rendered_with.insert(k.clone(), template::render_value_recursive(evaluator, v, vars)?);
    }
    cfg.with = rendered_with;

    let mut rendered_env = BTreeMap::new();
    for (k, v) in &cfg.env {
        rendered_env.insert(k.clone(), template::render_text(evaluator, v, vars)?);
    }
    cfg.env = rendered_env;

    if let Some(cwd) = &cfg.cwd {
        cfg.cwd = Some(template::render_text(evaluator, cwd, vars)?);
    }
    if let Some(file_path) = &cfg.file_path {
        cfg.file_path = Some(template::render_text(evaluator, file_path, vars)?);
    }
    Ok(())
}

/// Normalize `cfg` for `expected_type`: validate the type matches, render the
/// common fields, then run per-type rendering and validation.
pub fn normalize(
    expected_type: TaskType,
    cfg: &TaskConfig,
    evaluator: &Evaluator,
    vars: &Json,
) -> Result<TaskConfig, CoreError> {
    if cfg.task_type != expected_type {
        return Err(CoreError::Validation(ValidationError::UnsupportedTaskType {
            expected: format!("{expected_type:?}"),
            actual: format!("{:?}", cfg.task_type),
        }));
    }
    let mut cloned = cfg.clone();
    render_common(&mut cloned, evaluator, vars)?;
    let normalizer = for_type(expected_type);
    normalizer.render_eager(&mut cloned, evaluator, vars)?;
    normalizer.validate(&cloned)?;
    Ok(cloned)
}
