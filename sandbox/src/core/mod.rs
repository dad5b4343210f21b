//! Deterministic, pure logic shared by the validation stages.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod diff;
pub mod forbidden;
pub mod invariants;
pub mod signature;
pub mod types;
