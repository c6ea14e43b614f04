//! Deterministic, pure logic shared by the agent.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod invariants;
pub mod merge;
pub mod router;
pub mod rules;
pub mod state;
pub mod structured;
pub mod types;
