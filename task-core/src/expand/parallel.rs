//! Parallel expander: emits `childConfigs = parent.Tasks`; no
//! sibling ordering guarantee (only the `Tasks` order used for bookkeeping).

use super::{render_children_for_visibility, ExpansionMetadata, ExpansionResult};
use crate::error::CoreError;
use crate::expr::Evaluator;
use crate::types::TaskConfig;
use serde_json::Value as Json;

pub fn expand(
    parent: &TaskConfig,
    evaluator: &Evaluator,
    vars: &Json,
) -> Result<ExpansionResult, CoreError> {
    let child_configs = render_children_for_visibility(&parent.tasks, &parent.env, evaluator, vars)?;
    Ok(ExpansionResult {
        child_configs,
        metadata: ExpansionMetadata {
            strategy: parent.strategy,
            max_workers: parent.batch,
            item_count: None,
            skipped_count: None,
            items: None,
        },
    })
}
