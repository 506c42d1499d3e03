//! Domain error taxonomy.
//!
//! I/O plumbing uses `anyhow` with context. These typed errors mark the
//! conditions the run loop and CLI classify via `downcast_ref`.

use thiserror::Error;

use crate::task::TaskStatus;

/// Fatal misconfiguration: the run cannot proceed until an operator fixes it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no agent registered for assignee '{assignee}' (task {task_id})")]
    UnregisteredAgent { task_id: String, assignee: String },

    #[error("malformed task record {path}: {reason}")]
    MalformedTask { path: String, reason: String },

    #[error("invalid task set: {}", .0.join("; "))]
    InvalidTaskSet(Vec<String>),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// An assignee declared a path it does not own.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "protocol violation: task {task_id} assigned to '{assignee}' may not modify '{path}' (rule '{rule}' requires {required})"
)]
pub struct ProtocolViolation {
    pub task_id: String,
    pub assignee: String,
    pub path: String,
    /// Prefix of the matching ownership rule, or `<default>`.
    pub rule: String,
    /// Human-readable description of who may write under the rule.
    pub required: String,
}

/// Optimistic save conflict: the record changed on disk since it was loaded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("task {task_id} changed on disk (expected revision {expected}, found {found:?})")]
pub struct StaleTask {
    pub task_id: String,
    pub expected: u64,
    /// `None` when the record disappeared.
    pub found: Option<u64>,
}

/// The state machine refused a status change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("task {task_id}: illegal transition {from} -> {to}")]
pub struct InvalidTransition {
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violation_names_path_owner_and_assignee() {
        let err = ProtocolViolation {
            task_id: "t1".to_string(),
            assignee: "gemini".to_string(),
            path: "grok/x.txt".to_string(),
            rule: "grok".to_string(),
            required: "one of [grok-fast]".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("grok/x.txt"));
        assert!(msg.contains("gemini"));
        assert!(msg.contains("grok-fast"));
    }

    #[test]
    fn invalid_task_set_joins_messages() {
        let err = ConfigurationError::InvalidTaskSet(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(err.to_string(), "invalid task set: a; b");
    }
}
