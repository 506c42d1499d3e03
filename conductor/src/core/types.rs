//! Shared deterministic types for conductor core logic.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::fmt;

use crate::error::{ConfigurationError, ProtocolViolation};

/// What an agent reported for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Recoverable failure; `reason` is for logs only.
    Failure { reason: Option<String> },
    /// Handed to an external actor; the task waits for outside input.
    Deferred,
}

/// Why a task ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Protocol(ProtocolViolation),
    Configuration(ConfigurationError),
    ExhaustedRetries {
        retries: u32,
        reason: Option<String>,
    },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Protocol(violation) => violation.fmt(f),
            FailureCause::Configuration(err) => err.fmt(f),
            FailureCause::ExhaustedRetries { retries, reason } => {
                write!(f, "failed after {retries} retries")?;
                if let Some(reason) = reason {
                    write!(f, ": {reason}")?;
                }
                Ok(())
            }
        }
    }
}

/// The status change applied for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Completed,
    /// Failure under budget: still pending, `retry_count` now equals the field.
    Retry {
        retry_count: u32,
        reason: Option<String>,
    },
    Failed(FailureCause),
    /// Now `awaiting_external_input`.
    Deferred,
}

impl Transition {
    /// True if the run must stop after this transition.
    pub fn halts(&self) -> bool {
        matches!(self, Transition::Failed(_) | Transition::Deferred)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Transition::Completed => "completed",
            Transition::Retry { .. } => "retry",
            Transition::Failed(FailureCause::Protocol(_)) => "protocol_violation",
            Transition::Failed(FailureCause::Configuration(_)) => "configuration_error",
            Transition::Failed(FailureCause::ExhaustedRetries { .. }) => "exhausted_retries",
            Transition::Deferred => "deferred",
        }
    }
}
