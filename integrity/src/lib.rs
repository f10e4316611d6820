//! Crash-consistent pattern write/verify harness for storage targets.
//!
//! The harness repeatedly writes a known bit pattern to a file or block device
//! and later verifies it, so silent corruption shows up as a verify mismatch.
//! Two durable markers (a write-ahead marker and the last committed pattern)
//! let a restarted process decide whether to redo a write, resume with a
//! verify, or refuse to continue.
//!
//! - **[`core`]**: Pure, deterministic logic (scheduling, recovery decisions).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, markers, fio processes, journal).
//!
//! Orchestration modules ([`protocol`], [`recovery`], [`looping`]) coordinate
//! core logic with I/O to implement the CLI.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod protocol;
pub mod recovery;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
