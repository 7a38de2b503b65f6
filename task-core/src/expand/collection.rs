//! Collection expander: evaluates `Items`, applies `Filter` per
//! element with `ItemVar`/`IndexVar` bound, and produces one child config per
//! retained item by templating the per-item task template (`parent.tasks[0]`)
//! with the item bound.

use super::{ExpansionMetadata, ExpansionResult};
use crate::context::merge_env;
use crate::error::{CoreError, ValidationError};
use crate::expr::{template, Evaluator};
use crate::types::TaskConfig;
use serde_json::{json, Value as Json};

pub fn expand(
    parent: &TaskConfig,
    evaluator: &Evaluator,
    vars: &Json,
) -> Result<ExpansionResult, CoreError> {
    let items_tmpl = parent
        .items
        .as_deref()
        .ok_or(ValidationError::MissingRequired { field: "items" })?;
    let items_json = template::render_json(evaluator, items_tmpl, vars)?;
    let items = items_json
        .as_array()
        .cloned()
        .ok_or(ValidationError::ItemsNotArray)?;

    // The per-item task definition: the collection's single declared child.
    let template_cfg = parent
        .tasks
        .first()
        .ok_or(ValidationError::MissingRequired { field: "tasks" })?;

    let item_var = parent.item_var_name().to_string();
    let index_var = parent.index_var_name().to_string();

    let mut retained = Vec::new();
    let mut retained_items = Vec::new();
    let mut skipped_count = 0usize;

    for (index, item) in items.iter().enumerate() {
        let mut item_vars = vars.clone();
        if let Json::Object(map) = &mut item_vars {
            map.insert(item_var.clone(), item.clone());
            map.insert(index_var.clone(), json!(index));
            map.insert("current".to_string(), item.clone());
        }

        let keep = match &parent.filter {
            Some(filter_expr) => evaluator.evaluate(filter_expr, &item_vars)?,
            None => true,
        };
        if !keep {
            skipped_count += 1;
            continue;
        }

        let mut child = template_cfg.clone();
        child.env = merge_env(&parent.env, &child.env);
        crate::normalize::render_common(&mut child, evaluator, &item_vars)?;
        retained.push(child);
        retained_items.push(item.clone());
    }

    Ok(ExpansionResult {
        metadata: ExpansionMetadata {
            strategy: parent.strategy,
            max_workers: parent.batch,
            item_count: Some(retained.len()),
            skipped_count: Some(skipped_count),
            items: Some(retained_items),
        },
        child_configs: retained,
    })
}
