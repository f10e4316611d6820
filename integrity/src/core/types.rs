//! Shared deterministic types for integrity core logic.
//!
//! These types define stable contracts between the scheduler, the recovery
//! decision table and the orchestration layer. They carry no I/O.

use serde::{Deserialize, Serialize};

/// Whether the harness may write to the target at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoMode {
    /// Alternate write and verify iterations according to `io_write_step`.
    #[serde(rename = "write")]
    Write,
    /// Never write; every iteration verifies the last committed pattern.
    #[serde(rename = "verify-only", alias = "verify_only", alias = "verify")]
    VerifyOnly,
}

/// The two mutually exclusive kinds of loop step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IterationKind {
    Write,
    Verify,
}

/// How a write iteration picks its pattern from the configured list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternRotation {
    /// The k-th write iteration writes `patterns[k % n]`.
    #[default]
    RoundRobin,
    /// Historical `(i % n) - 1` indexing, wrapped to the end of the list.
    Legacy,
}

/// Operation requested from the IO executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IoOp {
    Write,
    Verify,
}

impl IoOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Write => "write",
            Self::Verify => "verify",
        }
    }
}

impl std::fmt::Display for IoOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an executor run that reached the tool.
///
/// Transport failures (spawn, wait) are reported as `Err` by the executor and
/// never appear here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoOutcome {
    /// The tool completed and, for verify, every block matched.
    Success,
    /// Read-back content differed from the expected pattern.
    Mismatch { detail: String },
    /// The tool ran but reported an error unrelated to content.
    Failed {
        exit_code: Option<i32>,
        detail: String,
    },
}

/// Durable marker state plus target existence, as observed at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupState {
    /// Content of the WAL marker, if present.
    pub wal: Option<String>,
    /// Content of the last-written-pattern marker, if present.
    pub last_written: Option<String>,
    pub target_exists: bool,
}

/// What the recovery controller must do before the loop may start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryPlan {
    /// Nothing on disk; the loop starts with its first write.
    FreshStart,
    /// Re-run the interrupted write of this pattern.
    RedoWrite { pattern: String },
    /// Verify the committed pattern once before the loop starts.
    ResumeVerify { pattern: String },
}
