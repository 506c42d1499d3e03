//! Conductor-owned status transitions.
//!
//! Every status change goes through this module. Callers persist the task
//! afterwards; nothing here touches disk.

use chrono::{DateTime, Utc};

use crate::core::retry::RetryPolicy;
use crate::core::types::{FailureCause, Outcome, Transition};
use crate::error::{ConfigurationError, InvalidTransition, ProtocolViolation};
use crate::task::{Task, TaskStatus};

/// Edges of the status graph.
///
/// `awaiting_external_input` only leaves through [`resolve_external`], which
/// the run loop never calls.
pub fn is_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::{AwaitingExternalInput, Blocked, Completed, Failed, Pending};
    matches!(
        (from, to),
        (Pending, Completed | Failed | Blocked | AwaitingExternalInput)
            | (Blocked, Pending)
            | (AwaitingExternalInput, Completed | Failed)
    )
}

fn set_status(task: &mut Task, to: TaskStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
    if !is_allowed(task.status, to) {
        return Err(InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to,
        });
    }
    task.status = to;
    task.updated_at = now;
    Ok(())
}

fn require_pending(task: &Task, to: TaskStatus) -> Result<(), InvalidTransition> {
    if task.status != TaskStatus::Pending {
        return Err(InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to,
        });
    }
    Ok(())
}

/// Apply a dispatch outcome to a pending task.
///
/// Any other starting status is an [`InvalidTransition`]; in particular a task
/// awaiting external input is left for [`resolve_external`].
pub fn apply_outcome(
    task: &mut Task,
    outcome: &Outcome,
    policy: &RetryPolicy,
    now: DateTime<Utc>,
) -> Result<Transition, InvalidTransition> {
    match outcome {
        Outcome::Success => {
            require_pending(task, TaskStatus::Completed)?;
            set_status(task, TaskStatus::Completed, now)?;
            Ok(Transition::Completed)
        }
        Outcome::Deferred => {
            set_status(task, TaskStatus::AwaitingExternalInput, now)?;
            Ok(Transition::Deferred)
        }
        Outcome::Failure { reason } => {
            if policy.allows_retry(task.retry_count) {
                require_pending(task, TaskStatus::Pending)?;
                task.retry_count += 1;
                task.updated_at = now;
                return Ok(Transition::Retry {
                    retry_count: task.retry_count,
                    reason: reason.clone(),
                });
            }
            require_pending(task, TaskStatus::Failed)?;
            set_status(task, TaskStatus::Failed, now)?;
            Ok(Transition::Failed(FailureCause::ExhaustedRetries {
                retries: task.retry_count,
                reason: reason.clone(),
            }))
        }
    }
}

/// Fail a task whose declared files break the ownership protocol.
pub fn reject_protocol(
    task: &mut Task,
    violation: ProtocolViolation,
    now: DateTime<Utc>,
) -> Result<Transition, InvalidTransition> {
    require_pending(task, TaskStatus::Failed)?;
    set_status(task, TaskStatus::Failed, now)?;
    Ok(Transition::Failed(FailureCause::Protocol(violation)))
}

/// Fail a task that could not be dispatched because of misconfiguration.
pub fn reject_configuration(
    task: &mut Task,
    error: ConfigurationError,
    now: DateTime<Utc>,
) -> Result<Transition, InvalidTransition> {
    require_pending(task, TaskStatus::Failed)?;
    set_status(task, TaskStatus::Failed, now)?;
    Ok(Transition::Failed(FailureCause::Configuration(error)))
}

/// Park a pending task behind a helper task it spawned.
pub fn block_on(
    task: &mut Task,
    helper_id: &str,
    now: DateTime<Utc>,
) -> Result<(), InvalidTransition> {
    set_status(task, TaskStatus::Blocked, now)?;
    task.blocked_by = Some(helper_id.to_string());
    Ok(())
}

/// Return blocked tasks to `pending` once their `blocked_by` task completed.
///
/// Returns the ids that changed, sorted.
pub fn unblock_ready(tasks: &mut [Task], now: DateTime<Utc>) -> Vec<String> {
    let completed: Vec<String> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .map(|t| t.id.clone())
        .collect();

    let mut unblocked = Vec::new();
    for task in tasks.iter_mut() {
        if task.status != TaskStatus::Blocked {
            continue;
        }
        let ready = task
            .blocked_by
            .as_ref()
            .is_some_and(|helper| completed.contains(helper));
        if ready && set_status(task, TaskStatus::Pending, now).is_ok() {
            unblocked.push(task.id.clone());
        }
    }
    unblocked.sort();
    unblocked
}

/// External actor's verdict on a task waiting for outside input.
pub fn resolve_external(
    task: &mut Task,
    succeeded: bool,
    now: DateTime<Utc>,
) -> Result<(), InvalidTransition> {
    let to = if succeeded {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };
    if task.status != TaskStatus::AwaitingExternalInput {
        return Err(InvalidTransition {
            task_id: task.id.clone(),
            from: task.status,
            to,
        });
    }
    set_status(task, to, now)
}
