//! Activity facade. Everything an embedding durable-runtime process calls
//! is a method here — one thin wrapper per Activity contract, each
//! delegating to the module that actually owns the logic. This is
//! the crate's single public entry point; callers shouldn't need to reach
//! into `exec`/`expand`/`normalize` directly.

use crate::context::{self, ContextInputs};
use crate::error::{CoreError, CoreResult};
use crate::exec::LeafDeps;
use crate::expand;
use crate::factory::StateFactory;
use crate::normalize;
use crate::progress::{self, Overall};
use crate::response::{self, CollectionResponse, MainTaskResponse};
use crate::subtask::{self, SubtaskInput, SubtaskResponse};
use crate::types::*;
use std::sync::Arc;

/// Owns the shared dependency bundle and exposes every Activity as a method.
/// Cheap to clone — `LeafDeps` is all `Arc`s.
#[derive(Clone)]
pub struct Activities {
    deps: LeafDeps,
}

impl Activities {
    pub fn new(deps: LeafDeps) -> Self {
        Self { deps }
    }

    fn factory(&self) -> StateFactory {
        self.deps.state_factory()
    }

    // ── Leaf execution ──

    pub async fn execute_basic(
        &self,
        cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        project: &ProjectConfig,
        now: i64,
    ) -> CoreResult<MainTaskResponse> {
        crate::exec::basic::execute(&self.deps, cfg, workflow, workflow_config, project, ContextInputs::default(), now).await
    }

    pub async fn execute_router(
        &self,
        cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        now: i64,
    ) -> CoreResult<MainTaskResponse> {
        crate::exec::router::execute(&self.deps, cfg, workflow, workflow_config, ContextInputs::default(), now).await
    }

    pub async fn execute_signal(
        &self,
        cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        project: &ProjectConfig,
        now: i64,
    ) -> CoreResult<MainTaskResponse> {
        crate::exec::signal::execute(&self.deps, cfg, workflow, workflow_config, project, ContextInputs::default(), now).await
    }

    pub async fn execute_wait(
        &self,
        cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        now: i64,
    ) -> CoreResult<MainTaskResponse> {
        crate::exec::wait::execute(&self.deps, cfg, workflow, workflow_config, ContextInputs::default(), now).await
    }

    pub async fn execute_memory(
        &self,
        cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        now: i64,
    ) -> CoreResult<MainTaskResponse> {
        crate::exec::memory::execute(&self.deps, cfg, workflow, workflow_config, ContextInputs::default(), now).await
    }

    pub async fn execute_aggregate(
        &self,
        cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        now: i64,
    ) -> CoreResult<MainTaskResponse> {
        crate::exec::aggregate::execute(&self.deps, cfg, workflow, workflow_config, ContextInputs::default(), now).await
    }

    /// Drives one child of a parent through to completion.
    pub async fn execute_subtask<'a>(
        &self,
        input: SubtaskInput<'a>,
        now: i64,
    ) -> CoreResult<SubtaskResponse> {
        subtask::drive(&self.deps, input, now).await
    }

    // ── Wait signal-resume helpers (C10) ──

    pub fn normalize_wait_processor(
        &self,
        parent_wait: &TaskConfig,
        signal: serde_json::Value,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
    ) -> CoreResult<TaskConfig> {
        crate::exec::wait::normalize_processor(
            &self.deps.evaluator,
            parent_wait,
            signal,
            workflow,
            workflow_config,
        )
    }

    pub fn evaluate_condition(
        &self,
        expression: &str,
        signal: serde_json::Value,
        processor_output: Option<serde_json::Value>,
    ) -> CoreResult<bool> {
        crate::exec::wait::evaluate_wait_predicate(&self.deps.evaluator, expression, signal, processor_output)
    }

    // ── Parent state creation + child expansion ──

    async fn create_parent_state(
        &self,
        cfg: &TaskConfig,
        workflow: &WorkflowState,
        parent_state_id: Option<TaskExecId>,
        now: i64,
    ) -> CoreResult<TaskState> {
        self.factory()
            .create(cfg, workflow, parent_state_id, now)
            .await
            .map_err(CoreError::Infrastructure)
    }

    async fn create_and_expand(
        &self,
        expected_type: TaskType,
        raw_cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        now: i64,
    ) -> CoreResult<(TaskState, expand::ExpansionOutcome)> {
        let base_vars = context::build(workflow, workflow_config, raw_cfg, ContextInputs::default()).variables;
        let cfg = normalize::normalize(expected_type, raw_cfg, &self.deps.evaluator, &base_vars)?;
        let mut parent_state = self.create_parent_state(&cfg, workflow, None, now).await?;
        let outcome = expand::expand_and_persist(
            &cfg,
            &parent_state,
            &self.deps.evaluator,
            &base_vars,
            &self.factory(),
            &self.deps.config_store,
            workflow,
            now,
        )
        .await?;

        // Seed `collection_state` (items, skipped count, one placeholder
        // `ItemResult` per retained item) from the expansion's metadata —
        // the subtask driver fills each placeholder in as its child
        // completes.
        if expected_type == TaskType::Collection {
            if let Some(items) = &outcome.metadata.items {
                if let Some(cs) = &mut parent_state.collection_state {
                    cs.items = items.clone();
                    cs.skipped_count = outcome.metadata.skipped_count.unwrap_or(0);
                    cs.item_results = items
                        .iter()
                        .enumerate()
                        .map(|(index, item)| ItemResult {
                            index,
                            status: Status::Pending,
                            item: item.clone(),
                            output: None,
                            error: None,
                        })
                        .collect();
                }
                parent_state.updated_at = now;
                self.deps
                    .task_repo
                    .upsert(&parent_state)
                    .await
                    .map_err(CoreError::Infrastructure)?;
            }
        }

        Ok((parent_state, outcome))
    }

    pub async fn create_composite_state(
        &self,
        raw_cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        now: i64,
    ) -> CoreResult<(TaskState, expand::ExpansionOutcome)> {
        self.create_and_expand(TaskType::Composite, raw_cfg, workflow, workflow_config, now)
            .await
    }

    pub async fn create_parallel_state(
        &self,
        raw_cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        now: i64,
    ) -> CoreResult<(TaskState, expand::ExpansionOutcome)> {
        self.create_and_expand(TaskType::Parallel, raw_cfg, workflow, workflow_config, now)
            .await
    }

    pub async fn create_collection_state(
        &self,
        raw_cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        now: i64,
    ) -> CoreResult<(TaskState, expand::ExpansionOutcome)> {
        self.create_and_expand(TaskType::Collection, raw_cfg, workflow, workflow_config, now)
            .await
    }

    // ── Progress + parent rollup ──

    pub async fn get_progress(&self, parent_id: TaskExecId) -> CoreResult<ProgressInfo> {
        self.deps
            .task_repo
            .get_progress_info(parent_id)
            .await
            .map_err(CoreError::Infrastructure)
    }

    /// Roll up a parent from its children's current progress, apply the
    /// deferred output transform on the no-error path, and persist the
    /// resulting status — returning `Overall::InProgress` (caller should
    /// retry later) if the children aren't all terminal yet.
    pub async fn update_parent_status(
        &self,
        parent_cfg: &TaskConfig,
        parent_state: &mut TaskState,
        vars: &serde_json::Value,
        now: i64,
    ) -> CoreResult<Overall> {
        let progress = self.get_progress(parent_state.task_exec_id).await?;
        let is_collection = parent_cfg.task_type == TaskType::Collection;
        let overall = response::rollup_parent(
            parent_state.task_exec_id,
            &progress,
            parent_cfg.strategy,
            parent_cfg.continue_on_error,
            is_collection,
        )?;

        match overall {
            Overall::InProgress => return Ok(overall),
            Overall::Success => {
                parent_state.status = Status::Success;
                parent_state.error = None;
            }
            Overall::Failed => {
                let children = self
                    .deps
                    .task_repo
                    .list_children(parent_state.task_exec_id)
                    .await
                    .map_err(CoreError::Infrastructure)?;
                let failed_children: Vec<(TaskId, TaskError)> = children
                    .into_iter()
                    .filter(|c| c.status == Status::Failed)
                    .filter_map(|c| c.error.clone().map(|e| (c.task_id, e)))
                    .collect();
                if !parent_cfg.continue_on_error || !is_collection {
                    return Err(CoreError::ParentExecutionFailed(response::parent_execution_failed(
                        failed_children.clone(),
                    )));
                }
                parent_state.status = Status::Failed;
                parent_state.error = failed_children.into_iter().next().map(|(_, e)| e);
            }
        }

        if is_collection {
            if let Some(collection) = &parent_state.collection_state {
                // `item_results` is kept current by the subtask driver as each
                // child completes; no need to re-read
                // children here.
                parent_state.output = Some(response::collection_summary(&collection.item_results));
            }
        }

        response::apply_deferred_output(&self.deps.evaluator, parent_cfg, parent_state, vars, now)?;
        parent_state.updated_at = now;
        self.deps
            .task_repo
            .upsert(parent_state)
            .await
            .map_err(CoreError::Infrastructure)?;
        Ok(overall)
    }

    pub async fn get_collection_response(
        &self,
        parent_cfg: &TaskConfig,
        parent_state: TaskState,
        workflow_config: &WorkflowConfig,
        vars: &serde_json::Value,
    ) -> CoreResult<CollectionResponse> {
        let collection = parent_state
            .collection_state
            .clone()
            .ok_or_else(|| CoreError::Validation(crate::error::ValidationError::MissingRequired {
                field: "collection_state",
            }))?;
        let skipped_count = collection.skipped_count;
        let item_count = collection.items.len();
        let main = response::build_finalized_response(&self.deps.evaluator, parent_cfg, parent_state, workflow_config, vars)?;
        Ok(CollectionResponse {
            main,
            item_count,
            skipped_count,
        })
    }

    pub async fn get_parallel_response(
        &self,
        parent_cfg: &TaskConfig,
        parent_state: TaskState,
        workflow_config: &WorkflowConfig,
        vars: &serde_json::Value,
    ) -> CoreResult<MainTaskResponse> {
        response::build_finalized_response(&self.deps.evaluator, parent_cfg, parent_state, workflow_config, vars)
    }

    pub async fn get_composite_response(
        &self,
        parent_cfg: &TaskConfig,
        parent_state: TaskState,
        workflow_config: &WorkflowConfig,
        vars: &serde_json::Value,
    ) -> CoreResult<MainTaskResponse> {
        self.get_parallel_response(parent_cfg, parent_state, workflow_config, vars).await
    }

    // ── Config loading ──

    pub async fn load_task_config(&self, task_exec_id: TaskExecId) -> CoreResult<Option<TaskConfig>> {
        self.deps
            .config_store
            .get(task_exec_id)
            .await
            .map_err(CoreError::Infrastructure)
    }

    pub async fn load_batch_configs(&self, task_exec_ids: &[TaskExecId]) -> CoreResult<Vec<Option<TaskConfig>>> {
        let mut out = Vec::with_capacity(task_exec_ids.len());
        for id in task_exec_ids {
            out.push(self.load_task_config(*id).await?);
        }
        Ok(out)
    }

    pub async fn load_composite_configs(&self, parent_task_exec_id: TaskExecId) -> CoreResult<Vec<TaskConfig>> {
        self.load_children_configs(parent_task_exec_id).await
    }

    pub async fn load_collection_configs(&self, parent_task_exec_id: TaskExecId) -> CoreResult<Vec<TaskConfig>> {
        self.load_children_configs(parent_task_exec_id).await
    }

    async fn load_children_configs(&self, parent_task_exec_id: TaskExecId) -> CoreResult<Vec<TaskConfig>> {
        let children = self
            .deps
            .task_repo
            .list_children(parent_task_exec_id)
            .await
            .map_err(CoreError::Infrastructure)?;
        let mut out = Vec::with_capacity(children.len());
        for child in children {
            if let Some(cfg) = self.load_task_config(child.task_exec_id).await? {
                out.push(cfg);
            }
        }
        Ok(out)
    }

    /// `Dispatch`: run the right leaf/parent-creation path for
    /// `cfg.task_type`, the single entry point a workflow step invokes
    /// without needing to know which Activity applies.
    pub async fn dispatch(
        &self,
        cfg: &TaskConfig,
        workflow: &WorkflowState,
        workflow_config: &WorkflowConfig,
        project: &ProjectConfig,
        now: i64,
    ) -> CoreResult<DispatchOutcome> {
        match cfg.task_type {
            TaskType::Basic => Ok(DispatchOutcome::Leaf(
                self.execute_basic(cfg, workflow, workflow_config, project, now).await?,
            )),
            TaskType::Router => Ok(DispatchOutcome::Leaf(
                self.execute_router(cfg, workflow, workflow_config, now).await?,
            )),
            TaskType::Signal => Ok(DispatchOutcome::Leaf(
                self.execute_signal(cfg, workflow, workflow_config, project, now).await?,
            )),
            TaskType::Wait => Ok(DispatchOutcome::Leaf(
                self.execute_wait(cfg, workflow, workflow_config, now).await?,
            )),
            TaskType::Memory => Ok(DispatchOutcome::Leaf(
                self.execute_memory(cfg, workflow, workflow_config, now).await?,
            )),
            TaskType::Aggregate => Ok(DispatchOutcome::Leaf(
                self.execute_aggregate(cfg, workflow, workflow_config, now).await?,
            )),
            TaskType::Composite => Ok(DispatchOutcome::Expanded(
                self.create_composite_state(cfg, workflow, workflow_config, now).await?,
            )),
            TaskType::Parallel => Ok(DispatchOutcome::Expanded(
                self.create_parallel_state(cfg, workflow, workflow_config, now).await?,
            )),
            TaskType::Collection => Ok(DispatchOutcome::Expanded(
                self.create_collection_state(cfg, workflow, workflow_config, now).await?,
            )),
        }
    }
}

pub enum DispatchOutcome {
    Leaf(MainTaskResponse),
    Expanded((TaskState, expand::ExpansionOutcome)),
}

/// Build an `Activities` facade over the in-memory reference backend —
/// convenient for embedders and tests that don't need Postgres.
pub fn in_memory(config: crate::config::CoreConfig) -> Activities {
    let store = Arc::new(crate::store_memory::MemoryStore::new());
    Activities::new(LeafDeps {
        task_repo: store.clone(),
        workflow_repo: store.clone(),
        config_store: store.clone(),
        task_executor: Arc::new(crate::store_memory::EchoTaskExecutor),
        signal_dispatcher: Arc::new(crate::store_memory::NoopSignalDispatcher),
        memory_backend: store,
        evaluator: Arc::new(crate::expr::Evaluator::new(config.expression_cost_ceiling)),
        config: Arc::new(config),
    })
}
