//! Stable exit codes for `fio-integrity`.
//!
//! The loop never exits on success, so anything other than `OK` tells the
//! supervisor to restart the process and let recovery take over.

/// `--init` recovery completed, or a bounded loop finished.
pub const OK: i32 = 0;
/// Untyped failure (marker I/O, journal I/O, transport errors).
pub const FAILURE: i32 = 1;
/// Config file missing, malformed, or invalid.
pub const CONFIGURATION: i32 = 2;
/// Markers and target cannot be explained; operator must inspect.
pub const INCONSISTENT_STATE: i32 = 3;
/// The IO executor failed for a reason other than a content mismatch.
pub const EXECUTOR_FAILURE: i32 = 4;
/// Read-back data did not match the committed pattern.
pub const VERIFY_MISMATCH: i32 = 5;
/// WAL marker found at startup with `io_crash_on_wal_detection` set.
pub const POLICY_HALT: i32 = 6;
