//! Deterministic selection of the next task to dispatch.

use std::collections::HashMap;

use crate::task::{Task, TaskStatus};

/// True if `task` is pending and every dependency is `completed`.
///
/// Dependencies that name no known task are unsatisfied, not errors: they may
/// be declared before the task they point at exists.
pub fn is_eligible(task: &Task, statuses: &HashMap<&str, TaskStatus>) -> bool {
    task.status == TaskStatus::Pending
        && task
            .depends_on
            .iter()
            .all(|dep| statuses.get(dep.as_str()) == Some(&TaskStatus::Completed))
}

/// All eligible tasks, ordered by `(priority, id)`.
pub fn eligible_tasks(tasks: &[Task]) -> Vec<&Task> {
    let statuses = status_index(tasks);
    let mut eligible: Vec<&Task> = tasks
        .iter()
        .filter(|task| is_eligible(task, &statuses))
        .collect();
    eligible.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    eligible
}

/// Pick the eligible task with the lowest priority, ties broken by smallest id.
///
/// Returns `None` when nothing is eligible. Callers tell "done" from "stuck"
/// with [`has_pending`].
pub fn next_task(tasks: &[Task]) -> Option<&Task> {
    let statuses = status_index(tasks);
    tasks
        .iter()
        .filter(|task| is_eligible(task, &statuses))
        .min_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)))
}

pub fn has_pending(tasks: &[Task]) -> bool {
    tasks.iter().any(|task| task.status == TaskStatus::Pending)
}

pub(crate) fn status_index(tasks: &[Task]) -> HashMap<&str, TaskStatus> {
    tasks
        .iter()
        .map(|task| (task.id.as_str(), task.status))
        .collect()
}
