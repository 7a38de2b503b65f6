//! Error taxonomy. Kept separate from business failures: a
//! [`CoreError`] is what an *activity* returns to the outer runtime (and
//! therefore what drives retry); a failed task's own `TaskState.error` is
//! plain data (`TaskError`, see [`crate::types`]), never this type.

use crate::types::TaskId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported task type: normalizer for {expected:?} received {actual:?}")]
    UnsupportedTaskType { expected: String, actual: String },
    #[error("missing required field: {field}")]
    MissingRequired { field: &'static str },
    #[error("route target for key {key:?} has an invalid shape")]
    InvalidRouteType { key: String },
    #[error("condition resolved to route key {key:?}, which has no entry in `routes`")]
    RouteNotFound { key: String },
    #[error("`items` did not evaluate to an array")]
    ItemsNotArray,
    #[error("invalid message role: {role}")]
    InvalidMessageRole { role: String },
    #[error("invalid memory payload format")]
    InvalidPayloadFormat,
    #[error("invalid timeout format: {raw}")]
    InvalidTimeoutFormat { raw: String },
    #[error("timeout must be a positive duration, got {raw}")]
    NonPositiveTimeout { raw: String },
}

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("failed to compile expression `{expr}`: {reason}")]
    CompileError { expr: String, reason: String },
    #[error("expression cost {cost} exceeded ceiling {limit}")]
    CostExceeded { cost: u64, limit: u64 },
    #[error("expression type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },
    #[error("router condition evaluated to an empty string")]
    ConditionEmpty,
    #[error("router condition evaluated to nil")]
    ConditionNil,
}

/// Errors that the outer runtime should back off and re-invoke the activity
/// for, rather than treat as a terminal failure.
#[derive(Debug, Error)]
pub enum RetryableError {
    #[error("progress for parent {parent} is not yet visible")]
    ProgressNotVisible { parent: String },
    #[error("child state for task {task_id} not found yet")]
    ChildStateNotFound { task_id: TaskId },
    #[error("sibling {task_id} output not yet visible")]
    SiblingOutputNotVisible { task_id: TaskId },
    #[error("task state for exec id {0} not found")]
    TaskNotFound(String),
}

#[derive(Debug, Error)]
pub struct ParentExecutionFailed {
    pub failed_children: Vec<(TaskId, String)>,
}

impl std::fmt::Display for ParentExecutionFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parent execution failed: ")?;
        for (i, (task_id, msg)) in self.failed_children.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "task[{task_id}]: {msg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error(transparent)]
    Retryable(#[from] RetryableError),
    #[error(transparent)]
    ParentExecutionFailed(#[from] ParentExecutionFailed),
    #[error("aggregate task exceeded its 30s execution budget")]
    AggregateTimeout,
    #[error("operation canceled")]
    Canceled,
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl CoreError {
    /// Whether the outer runtime's retry policy should re-invoke the
    /// activity for this error (infrastructure failures and visibility-retryable ones).
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Retryable(_) | CoreError::Infrastructure(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
