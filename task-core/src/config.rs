//! Ambient configuration. Constructed programmatically by the embedding
//! durable-runtime process — this crate does no file/env parsing of its own;
//! config loading is the embedding process's concern.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Expression cost ceiling. Default 1000 units.
    pub expression_cost_ceiling: u64,
    /// Poll interval while waiting for prior siblings to reach a terminal
    /// state. Default 200ms.
    pub sibling_poll_interval: Duration,
    /// Overall deadline for the prior-sibling wait loop. Default 30s.
    pub sibling_wait_deadline: Duration,
    /// Hard wall-clock budget for aggregate task execution. 30s.
    pub aggregate_timeout: Duration,
    /// Retry policy for fetching a preallocated child state.
    pub child_fetch_max_attempts: u32,
    pub child_fetch_base_backoff: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            expression_cost_ceiling: crate::expr::DEFAULT_COST_CEILING,
            sibling_poll_interval: Duration::from_millis(200),
            sibling_wait_deadline: Duration::from_secs(30),
            aggregate_timeout: Duration::from_secs(30),
            child_fetch_max_attempts: 5,
            child_fetch_base_backoff: Duration::from_millis(50),
        }
    }
}
