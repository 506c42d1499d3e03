//! Deterministic, pure logic shared by the conductor core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! task sets and return deterministic outputs suitable for tests.

pub mod diagnosis;
pub mod invariants;
pub mod protocol;
pub mod resolver;
pub mod retry;
pub mod state_machine;
pub mod types;
