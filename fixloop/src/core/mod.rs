//! Deterministic, pure logic shared by the fix loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod budget;
pub mod classifier;
pub mod types;
