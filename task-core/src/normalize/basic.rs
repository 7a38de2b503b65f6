//! Normalizers with no extra per-type constraints: basic and aggregate.

use super::Normalizer;
use crate::error::ValidationError;
use crate::types::{TaskConfig, TaskType};

pub struct BasicNormalizer;

impl Normalizer for BasicNormalizer {
    fn task_type(&self) -> TaskType {
        TaskType::Basic
    }

    fn validate(&self, _cfg: &TaskConfig) -> Result<(), ValidationError> {
        Ok(())
    }
}

pub struct AggregateNormalizer;

impl Normalizer for AggregateNormalizer {
    fn task_type(&self) -> TaskType {
        TaskType::Aggregate
    }

    fn validate(&self, _cfg: &TaskConfig) -> Result<(), ValidationError> {
        Ok(())
    }
}
