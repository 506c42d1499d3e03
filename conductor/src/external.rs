//! Writes made from outside the run loop: new tasks, help requests and
//! verdicts on handed-off work.
//!
//! These go through the same store and state machine as the loop, so a
//! concurrent run sees them as stale saves and reloads.

use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::state_machine::{block_on, resolve_external};
use crate::io::task_store::TaskStore;
use crate::task::{DEFAULT_PRIORITY, Task, TaskStatus, generate_task_id};

/// Fields for a new task.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Explicit id; a fresh one is generated when `None`.
    pub id: Option<String>,
    pub description: String,
    pub assignee: String,
    pub files: Vec<String>,
    pub depends_on: BTreeSet<String>,
    pub priority: i64,
}

impl NewTask {
    pub fn new(description: impl Into<String>, assignee: impl Into<String>) -> Self {
        Self {
            id: None,
            description: description.into(),
            assignee: assignee.into(),
            files: Vec::new(),
            depends_on: BTreeSet::new(),
            priority: DEFAULT_PRIORITY,
        }
    }
}

/// Create a pending task.
#[instrument(skip_all, fields(assignee = %new.assignee))]
pub fn add_task<S: TaskStore>(store: &S, new: NewTask) -> Result<Task> {
    let id = new.id.unwrap_or_else(generate_task_id);
    let mut task = Task::with_id(id, new.description, new.assignee);
    task.files = new.files;
    task.depends_on = new.depends_on;
    task.priority = new.priority;
    store.insert(&mut task)?;
    info!(task_id = %task.id, "added task");
    Ok(task)
}

/// A request from an agent working on a task for help from another agent.
#[derive(Debug, Clone)]
pub struct HelpRequest {
    /// Agent that should do the helper task.
    pub helper: String,
    pub question: String,
    pub files: Vec<String>,
}

/// Spawn a helper task and block the original on it.
///
/// The helper inherits the original's priority. The original returns to
/// `pending` once the helper completes. Fails with [`crate::error::StaleTask`]
/// if the original changed since it was read here, in which case no helper
/// is created.
#[instrument(skip_all, fields(task_id = %original_id, helper = %request.helper))]
pub fn request_help<S: TaskStore>(
    store: &S,
    original_id: &str,
    request: HelpRequest,
) -> Result<Task> {
    let mut original = store
        .load(original_id)?
        .ok_or_else(|| anyhow!("task {original_id} not found"))?;
    if original.status != TaskStatus::Pending {
        return Err(anyhow!(
            "task {original_id} is {}; only pending tasks can request help",
            original.status
        ));
    }
    let before = original.clone();

    let mut helper = Task::new(
        format!(
            "[help request from {} on {}] {}\n\nOriginal task: {}",
            original.assignee, original.id, request.question, original.description
        ),
        request.helper,
    );
    helper.files = request.files;
    helper.priority = original.priority;

    block_on(&mut original, &helper.id, Utc::now())?;
    store.save(&mut original)?;
    if let Err(err) = store.insert(&mut helper) {
        warn!(helper_id = %helper.id, err = %format!("{err:#}"), "helper insert failed, unblocking original");
        let mut restored = before;
        restored.revision = original.revision;
        store
            .save(&mut restored)
            .context("restore original after failed help request")?;
        return Err(err);
    }
    info!(helper_id = %helper.id, "blocked on helper task");
    Ok(helper)
}

/// Record the external verdict for a task awaiting outside input.
#[instrument(skip_all, fields(task_id = %id, succeeded))]
pub fn resolve_task<S: TaskStore>(store: &S, id: &str, succeeded: bool) -> Result<Task> {
    let mut task = store
        .load(id)?
        .ok_or_else(|| anyhow!("task {id} not found"))?;
    resolve_external(&mut task, succeeded, Utc::now())?;
    store.save(&mut task)?;
    info!(status = %task.status, "resolved task");
    Ok(task)
}
