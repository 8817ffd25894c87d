//! Deterministic, pure logic shared by the coordinator and the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod keys;
pub mod rewrite;
pub mod types;
