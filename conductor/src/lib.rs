//! Deterministic orchestrator for a team of AI agents sharing one codebase.
//!
//! Tasks live as JSON records on disk. A single-threaded loop picks the next
//! eligible task, checks the assignee may write the files it declares, hands
//! it to the agent registered under that name and records the outcome. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (selection, ownership protocol,
//!   status transitions, stuck diagnosis). No I/O.
//! - **[`io`]**: Side-effecting operations (task store, proposal merge, git,
//!   subprocesses, config).
//!
//! [`agents`] defines the executor and handoff capabilities. [`run`] and
//! [`external`] coordinate core logic with I/O to implement CLI commands.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod external;
pub mod io;
pub mod logging;
pub mod run;
pub mod task;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
