//! Normalizer shared by the three parent types (parallel/collection/
//! composite). Structural validation (non-zero children, etc.) is an
//! expansion-time concern, not a normalization-time one.

use super::Normalizer;
use crate::error::ValidationError;
use crate::types::{TaskConfig, TaskType};

pub struct ParentNormalizer;

impl Normalizer for ParentNormalizer {
    fn task_type(&self) -> TaskType {
        // Parent normalization does not distinguish sub-kind; the expansion
        // engine re-validates the concrete type against `cfg.task_type`.
        TaskType::Composite
    }

    fn validate(&self, cfg: &TaskConfig) -> Result<(), ValidationError> {
        if !cfg.is_parent() {
            return Err(ValidationError::UnsupportedTaskType {
                expected: "parallel|collection|composite".to_string(),
                actual: format!("{:?}", cfg.task_type),
            });
        }
        Ok(())
    }
}
