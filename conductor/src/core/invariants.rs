//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::task::{Task, TaskStatus};

/// Check a single record:
/// - id is non-empty and `[A-Za-z0-9._-]` only (it names a file)
/// - no self-dependency
/// - `blocked` tasks name the task they wait on, and not themselves
pub fn validate_task(task: &Task) -> Vec<String> {
    let mut errors = Vec::new();
    if let Err(err) = validate_id(&task.id) {
        errors.push(err);
    }
    if task.assignee.trim().is_empty() {
        errors.push(format!("{}: assignee must not be empty", task.id));
    }
    if task.depends_on.contains(&task.id) {
        errors.push(format!("{}: depends_on contains its own id", task.id));
    }
    match (&task.blocked_by, task.status) {
        (Some(helper), _) if helper == &task.id => {
            errors.push(format!("{}: blocked_by names itself", task.id));
        }
        (None, TaskStatus::Blocked) => {
            errors.push(format!("{}: blocked task is missing blocked_by", task.id));
        }
        _ => {}
    }
    errors
}

/// Check a whole task set: per-record invariants plus unique ids.
pub fn validate_task_set(tasks: &[Task]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate id '{}'", task.id));
        }
        errors.extend(validate_task(task));
    }
    errors
}

/// Validate that an id is safe to use as a record file name.
pub fn validate_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("id must not be empty".to_string());
    }
    if id.starts_with('.') {
        return Err(format!("id must not start with '.' (got '{id}')"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(format!("id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    Ok(())
}
