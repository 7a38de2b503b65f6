//! Signal normalizer: requires `Signal.ID`; signals template
//! eagerly, unlike every other leaf type.

use super::Normalizer;
use crate::error::{CoreError, ValidationError};
use crate::expr::template;
use crate::expr::Evaluator;
use crate::types::{TaskConfig, TaskType};
use serde_json::Value as Json;

pub struct SignalNormalizer;

impl Normalizer for SignalNormalizer {
    fn task_type(&self) -> TaskType {
        TaskType::Signal
    }

    fn render_eager(
        &self,
        cfg: &mut TaskConfig,
        evaluator: &Evaluator,
        vars: &Json,
    ) -> Result<(), CoreError> {
        if let Some(signal) = &mut cfg.signal {
            signal.id = template::render_text(evaluator, &signal.id, vars)?;
            if let Some(payload) = &signal.payload {
                signal.payload = Some(template::render_value_recursive(evaluator, payload, vars)?);
            }
        }
        Ok(())
    }

    fn validate(&self, cfg: &TaskConfig) -> Result<(), ValidationError> {
        match &cfg.signal {
            Some(s) if !s.id.trim().is_empty() => Ok(()),
            _ => Err(ValidationError::MissingRequired { field: "signal.id" }),
        }
    }
}
