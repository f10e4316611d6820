//! Deterministic, pure logic shared by the integrity harness.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod recovery;
pub mod schedule;
pub mod types;
