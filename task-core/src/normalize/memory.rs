//! Memory normalizer: requires `KeyTemplate`.

use super::Normalizer;
use crate::error::ValidationError;
use crate::types::{TaskConfig, TaskType};

pub struct MemoryNormalizer;

impl Normalizer for MemoryNormalizer {
    fn task_type(&self) -> TaskType {
        TaskType::Memory
    }

    fn validate(&self, cfg: &TaskConfig) -> Result<(), ValidationError> {
        let key_template = cfg
            .memory
            .as_ref()
            .and_then(|m| m.key_template.as_deref());
        match key_template {
            Some(k) if !k.trim().is_empty() => Ok(()),
            _ => Err(ValidationError::MissingRequired {
                field: "memory.key_template",
            }),
        }
    }
}
