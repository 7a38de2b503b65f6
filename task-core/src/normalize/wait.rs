//! Wait normalizer: requires non-empty `WaitFor` and a positive
//! parsed `Timeout`. `WaitFor` itself stays templated — only its presence is
//! checked here; the leaf executor evaluates it.

use super::Normalizer;
use crate::duration::parse_positive_duration;
use crate::error::ValidationError;
use crate::types::{TaskConfig, TaskType};

pub struct WaitNormalizer;

impl Normalizer for WaitNormalizer {
    fn task_type(&self) -> TaskType {
        TaskType::Wait
    }

    fn validate(&self, cfg: &TaskConfig) -> Result<(), ValidationError> {
        match &cfg.wait_for {
            Some(w) if !w.trim().is_empty() => {}
            _ => return Err(ValidationError::MissingRequired { field: "wait_for" }),
        }
        let timeout = cfg
            .timeout
            .as_deref()
            .ok_or(ValidationError::MissingRequired { field: "timeout" })?;
        parse_positive_duration(timeout)?;
        Ok(())
    }
}
