//! Child Expansion Engine. Three expanders (composite/parallel/collection)
//! share one post-processing pipeline: mint synthetic child task ids,
//! persist the parent's full config and each child config, and create
//! pending `TaskState` rows for every child.

pub mod collection;
pub mod composite;
pub mod parallel;

use crate::context::merge_env;
use crate::error::{CoreError, ValidationError};
use crate::factory::StateFactory;
use crate::store::ConfigStore;
use crate::types::*;
use std::sync::Arc;

/// What an expander produces before post-processing: a list of child
/// `TaskConfig`s (already template-rendered where needed) and
/// bookkeeping metadata for the parent.
pub struct ExpansionResult {
    pub child_configs: Vec<TaskConfig>,
    pub metadata: ExpansionMetadata,
}

#[derive(Clone, Debug, Default)]
pub struct ExpansionMetadata {
    pub strategy: Strategy,
    pub max_workers: Option<u32>,
    /// Set only for collection parents.
    pub item_count: Option<usize>,
    pub skipped_count: Option<usize>,
    /// The retained (post-filter) items, in order — set only for collection
    /// parents, used to seed `TaskState.collection_state`.
    pub items: Option<Vec<serde_json::Value>>,
}

/// The final, persisted outcome of expanding a parent: the parent's own
/// `TaskState` (already `pending`, created earlier by the state factory)
/// plus every child's freshly minted `TaskState`.
pub struct ExpansionOutcome {
    pub metadata: ExpansionMetadata,
    pub children: Vec<TaskState>,
}

/// Renders each embedded child config's common fields against `vars`,
/// letting the child default its `env` from the parent's merged env. Used
/// by the parallel expander, whose children run concurrently with no
/// sibling-ordering guarantee, so there is no later sibling context for
/// them to observe — rendering at expansion time is equivalent to
/// rendering at execution time. The composite expander does *not* use
/// this: its children are strictly ordered and must defer rendering to
/// subtask-execution time instead (see `composite::expand`).
pub(crate) fn render_children_for_visibility(
    children: &[TaskConfig],
    parent_env: &std::collections::BTreeMap<String, String>,
    evaluator: &crate::expr::Evaluator,
    vars: &serde_json::Value,
) -> Result<Vec<TaskConfig>, CoreError> {
    let mut out = Vec::with_capacity(children.len());
    for child in children {
        let mut cloned = child.clone();
        cloned.env = merge_env(parent_env, &cloned.env);
        crate::normalize::render_common(&mut cloned, evaluator, vars)?;
        out.push(cloned);
    }
    Ok(out)
}

/// Run the expander for `parent_cfg.task_type`, then the shared
/// post-processing pipeline: mint ids, persist configs/metadata, create
/// child states.
pub async fn expand_and_persist(
    parent_cfg: &TaskConfig,
    parent_state: &TaskState,
    evaluator: &crate::expr::Evaluator,
    vars: &serde_json::Value,
    factory: &StateFactory,
    config_store: &Arc<dyn ConfigStore>,
    workflow: &WorkflowState,
    now: i64,
) -> Result<ExpansionOutcome, CoreError> {
    let result = match parent_cfg.task_type {
        TaskType::Composite => composite::expand(parent_cfg, evaluator, vars)?,
        TaskType::Parallel => parallel::expand(parent_cfg, evaluator, vars)?,
        TaskType::Collection => collection::expand(parent_cfg, evaluator, vars)?,
        other => {
            return Err(CoreError::Validation(ValidationError::UnsupportedTaskType {
                expected: "parallel|collection|composite".to_string(),
                actual: format!("{other:?}"),
            }))
        }
    };

    let vacuous = result.child_configs.is_empty();
    let collection_empty_ok = parent_cfg.task_type == TaskType::Collection;
    if vacuous && !collection_empty_ok {
        return Err(CoreError::Validation(ValidationError::MissingRequired {
            field: "tasks",
        }));
    }

    // Mint synthetic child task ids: collection children are suffixed
    // `parent.id[index]`; parallel/composite children keep their own id.
    let mut minted = Vec::with_capacity(result.child_configs.len());
    for (idx, mut child) in result.child_configs.into_iter().enumerate() {
        if parent_cfg.task_type == TaskType::Collection {
            child.id = format!("{}[{}]", parent_cfg.id, idx);
        }
        minted.push(child);
    }

    // Persist the parent's full (normalized) config under its own exec id so
    // sibling ordering and the response handler can find it again, and save
    // expansion metadata alongside it — as one transaction body, so a
    // half-written parent (config saved, metadata missing, or vice versa)
    // is never observable.
    let metadata_bytes = serde_json::to_vec(&ExpansionMetadataRecord {
        strategy: result.metadata.strategy,
        max_workers: result.metadata.max_workers,
        item_count: result.metadata.item_count,
        skipped_count: result.metadata.skipped_count,
        child_task_ids: minted.iter().map(|c| c.id.clone()).collect(),
    })
    .map_err(anyhow::Error::from)?;
    let config_store_tx = config_store.clone();
    let parent_cfg_tx = parent_cfg.clone();
    let parent_task_exec_id = parent_state.task_exec_id;
    factory
        .with_transaction(Box::new(move || {
            Box::pin(async move {
                config_store_tx.save(parent_task_exec_id, &parent_cfg_tx).await?;
                config_store_tx
                    .save_metadata(parent_task_exec_id, &metadata_bytes)
                    .await?;
                Ok(())
            })
        }))
        .await?;

    // Create pending child states, each pointing at the parent.
    let mut children = Vec::with_capacity(minted.len());
    for child_cfg in &minted {
        let child_state = factory
            .create(child_cfg, workflow, Some(parent_state.task_exec_id), now)
            .await?;
        children.push(child_state);
    }

    tracing::debug!(
        parent = %parent_state.task_exec_id,
        children = children.len(),
        "expanded parent into child tasks"
    );

    Ok(ExpansionOutcome {
        metadata: result.metadata,
        children,
    })
}

#[derive(serde::Serialize, serde::Deserialize)]
struct ExpansionMetadataRecord {
    strategy: Strategy,
    max_workers: Option<u32>,
    item_count: Option<usize>,
    skipped_count: Option<usize>,
    child_task_ids: Vec<TaskId>,
}
