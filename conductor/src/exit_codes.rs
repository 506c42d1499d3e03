//! Stable exit codes for conductor CLI commands.

/// Command succeeded, or `run` finished with no pending tasks.
pub const OK: i32 = 0;
/// Invalid layout, config or task records, or any other error.
pub const INVALID: i32 = 1;
/// `next` found no eligible task and nothing is pending.
pub const NO_ELIGIBLE: i32 = 2;
/// Pending tasks remain but none can ever become eligible as things stand.
pub const STUCK: i32 = 3;
/// `run` halted on a failed task (protocol, configuration, exhausted retries).
pub const HALTED: i32 = 4;
/// `run` stopped because a task now awaits external input.
pub const DEFERRED: i32 = 5;
/// `run` hit `max_steps`.
pub const STEP_LIMIT: i32 = 6;
