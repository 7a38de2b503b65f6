//! Composite expander: emits `childConfigs = parent.Tasks`.
//!
//! Composite children run in strict declared order, and each one's
//! template context must be able to see its predecessors' outputs under
//! `.tasks.<id>.output` — that context
//! doesn't exist yet at expansion time, before any sibling has run. Unlike
//! the parallel expander, this one does not render `with`/`env`/`cwd`/
//! `file_path` here: only env *keys* are defaulted from the parent so a
//! child without an explicit override inherits it; every templatable field
//! (including env values) stays templated and is rendered by the subtask
//! driver per-child, once the prior siblings it may reference are visible.

use super::{ExpansionMetadata, ExpansionResult};
use crate::error::CoreError;
use crate::expr::Evaluator;
use crate::types::TaskConfig;
use serde_json::Value as Json;
use std::collections::BTreeMap;

pub fn expand(
    parent: &TaskConfig,
    _evaluator: &Evaluator,
    _vars: &Json,
) -> Result<ExpansionResult, CoreError> {
    let child_configs = default_env_keys(&parent.tasks, &parent.env);
    Ok(ExpansionResult {
        child_configs,
        metadata: ExpansionMetadata {
            strategy: parent.strategy,
            max_workers: Some(1),
            item_count: None,
            skipped_count: None,
            items: None,
        },
    })
}

/// Default each child's env *keys* from the parent's env (structural
/// defaulting only, no template rendering) and leave every other
/// templatable field as declared for the subtask driver to resolve.
fn default_env_keys(children: &[TaskConfig], parent_env: &BTreeMap<String, String>) -> Vec<TaskConfig> {
    children
        .iter()
        .map(|child| {
            let mut cloned = child.clone();
            let mut merged = parent_env.clone();
            for (k, v) in &cloned.env {
                merged.insert(k.clone(), v.clone());
            }
            cloned.env = merged;
            cloned
        })
        .collect()
}
