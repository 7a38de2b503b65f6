//! Router normalizer: requires non-empty `Condition` and `Routes`.

use super::Normalizer;
use crate::error::ValidationError;
use crate::types::{TaskConfig, TaskType};

pub struct RouterNormalizer;

impl Normalizer for RouterNormalizer {
    fn task_type(&self) -> TaskType {
        TaskType::Router
    }

    fn validate(&self, cfg: &TaskConfig) -> Result<(), ValidationError> {
        match &cfg.condition {
            Some(c) if !c.trim().is_empty() => {}
            _ => {
                return Err(ValidationError::MissingRequired {
                    field: "condition",
                })
            }
        }
        if cfg.routes.is_empty() {
            return Err(ValidationError::MissingRequired { field: "routes" });
        }
        Ok(())
    }
}
