use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Priority used when a record omits one. Lower values run first.
pub const DEFAULT_PRIORITY: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Blocked,
    AwaitingExternalInput,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Blocked => "blocked",
            TaskStatus::AwaitingExternalInput => "awaiting_external_input",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` records are frozen.
    pub fn is_final(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub assignee: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub revision: u64,
}

impl Task {
    /// Create a pending task with a fresh id.
    pub fn new(description: impl Into<String>, assignee: impl Into<String>) -> Self {
        Self::with_id(generate_task_id(), description, assignee)
    }

    pub fn with_id(
        id: impl Into<String>,
        description: impl Into<String>,
        assignee: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            assignee: assignee.into(),
            files: Vec::new(),
            status: TaskStatus::Pending,
            depends_on: BTreeSet::new(),
            priority: DEFAULT_PRIORITY,
            retry_count: 0,
            blocked_by: None,
            updated_at: Utc::now(),
            revision: 0,
        }
    }
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

/// Generate a unique, time-ordered task id (`task-<ULID>`).
///
/// Ids never derive from another task's id, so concurrent help requests
/// cannot collide.
pub fn generate_task_id() -> String {
    format!("task-{}", Ulid::new())
}

/// Count tasks per status, in a stable order for reporting.
pub fn status_counts(tasks: &[Task]) -> Vec<(TaskStatus, usize)> {
    [
        TaskStatus::Pending,
        TaskStatus::Blocked,
        TaskStatus::AwaitingExternalInput,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ]
    .into_iter()
    .map(|status| {
        let count = tasks.iter().filter(|t| t.status == status).count();
        (status, count)
    })
    .collect()
}
