//! Progress Aggregator. Reads child states through
//! [`TaskRepository::get_progress_info`] and computes the parent's overall
//! status under its configured [`Strategy`].

use crate::error::{CoreError, RetryableError};
use crate::types::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overall {
    Success,
    Failed,
    /// Not every child is terminal yet; the parent stays as-is.
    InProgress,
}

/// Compute the overall parent status from `progress` under `strategy`,
/// applying the `continue_on_error` overlay for collections.
///
/// Returns `Err(RetryableError::ProgressNotVisible)` per the visibility
/// guard: if there are children but none have reached a terminal state yet,
/// the caller should back off and retry — the store may not have surfaced
/// the terminal writes yet (cross-transaction commit race).
pub fn evaluate(
    parent_id: TaskExecId,
    progress: &ProgressInfo,
    strategy: Strategy,
    continue_on_error: bool,
    is_collection: bool,
) -> Result<Overall, CoreError> {
    if progress.total_children == 0 {
        return Ok(Overall::Success);
    }
    if progress.completed_count + progress.failed_count == 0 {
        return Err(CoreError::Retryable(RetryableError::ProgressNotVisible {
            parent: parent_id.to_string(),
        }));
    }

    let all_terminal = progress.running_count == 0 && progress.pending_count == 0;
    let any_failed = progress.failed_count > 0;
    let all_failed = progress.failed_count == progress.total_children;
    let any_succeeded = progress.completed_count > 0;
    let all_succeeded = progress.completed_count == progress.total_children;

    if is_collection && continue_on_error {
        if !all_terminal {
            return Ok(Overall::InProgress);
        }
        return Ok(if all_failed {
            Overall::Failed
        } else {
            Overall::Success
        });
    }

    match strategy {
        Strategy::FailFast => {
            // Fails as soon as one child fails, even with others still running.
            if any_failed {
                return Ok(Overall::Failed);
            }
            if !all_terminal {
                return Ok(Overall::InProgress);
            }
            Ok(Overall::Success)
        }
        Strategy::WaitAll => {
            if !all_terminal {
                return Ok(Overall::InProgress);
            }
            Ok(if all_succeeded {
                Overall::Success
            } else {
                Overall::Failed
            })
        }
        Strategy::BestEffort => {
            if !all_terminal {
                return Ok(Overall::InProgress);
            }
            Ok(if any_succeeded {
                Overall::Success
            } else if all_failed {
                Overall::Failed
            } else {
                // Neither succeeded nor wholly failed (e.g. all canceled) —
                // best_effort only requires *a* success; absent one, and
                // absent a full failure, treat as failed for determinism.
                Overall::Failed
            })
        }
    }
}

pub fn completion_rate(p: &ProgressInfo) -> f64 {
    if p.total_children == 0 {
        1.0
    } else {
        p.completed_count as f64 / p.total_children as f64
    }
}

pub fn failure_rate(p: &ProgressInfo) -> f64 {
    if p.total_children == 0 {
        0.0
    } else {
        p.failed_count as f64 / p.total_children as f64
    }
}
