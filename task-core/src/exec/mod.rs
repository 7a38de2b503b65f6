//! Leaf Executors. Every leaf type shares the shape
//! `validate → load workflow → normalise → create state → execute → build
//! response via the type-specific path → return`.

pub mod aggregate;
pub mod basic;
pub mod memory;
pub mod router;
pub mod signal;
pub mod wait;

use crate::config::CoreConfig;
use crate::expr::Evaluator;
use crate::factory::StateFactory;
use crate::store::{
    ConfigStore, MemoryBackend, SignalDispatcher, TaskExecutor, TaskRepository, WorkflowRepository,
};
use std::sync::Arc;

/// Shared dependencies every leaf executor needs. Cheap to clone (all `Arc`).
#[derive(Clone)]
pub struct LeafDeps {
    pub task_repo: Arc<dyn TaskRepository>,
    pub workflow_repo: Arc<dyn WorkflowRepository>,
    pub config_store: Arc<dyn ConfigStore>,
    pub task_executor: Arc<dyn TaskExecutor>,
    pub signal_dispatcher: Arc<dyn SignalDispatcher>,
    pub memory_backend: Arc<dyn MemoryBackend>,
    pub evaluator: Arc<Evaluator>,
    pub config: Arc<CoreConfig>,
}

impl LeafDeps {
    pub fn state_factory(&self) -> StateFactory {
        StateFactory::new(self.task_repo.clone(), self.config_store.clone())
    }
}
