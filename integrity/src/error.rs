//! Fatal error taxonomy.
//!
//! Nothing in this crate retries. Every variant is terminal for the process;
//! orchestration code raises these inside `anyhow` chains and `main` maps the
//! first one it finds to an exit code.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::IoOp;
use crate::exit_codes;

#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Config file missing, unparsable, or failing validation.
    #[error("configuration error in {}: {reason}", path.display())]
    Configuration { path: PathBuf, reason: String },

    /// Markers and target describe a state the harness cannot explain.
    #[error("inconsistent state: {0}")]
    RecoveryInconsistentState(Inconsistency),

    /// The executor reported a non-content failure.
    #[error("{op} of pattern {pattern} failed (exit code {exit_code:?}): {detail}")]
    ExecutorFailure {
        op: IoOp,
        pattern: String,
        exit_code: Option<i32>,
        detail: String,
    },

    /// Read-back content did not match the committed pattern.
    #[error("verify mismatch for pattern {pattern} on {}: {detail}", target.display())]
    VerifyMismatch {
        pattern: String,
        target: PathBuf,
        detail: String,
    },

    /// WAL marker found at startup with `io_crash_on_wal_detection` enabled.
    #[error(
        "WAL marker for pattern {pattern} found at startup and io_crash_on_wal_detection is set"
    )]
    PolicyHalt { pattern: String },
}

/// Marker/target combinations that must never be auto-healed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Inconsistency {
    #[error("WAL marker (pattern {wal_pattern}) present without a last-written-pattern marker")]
    WalWithoutCommit { wal_pattern: String },

    #[error("WAL marker is present but empty")]
    EmptyWalMarker,

    #[error("target {} exists but no marker explains its content", target.display())]
    UnexplainedTarget { target: PathBuf },

    #[error("WAL marker (pattern {pattern}) present, refusing to verify")]
    WalPresentDuringVerify { pattern: String },

    #[error("last-written-pattern marker is missing or empty, nothing to verify")]
    NothingToVerify,
}

impl IntegrityError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration { .. } => exit_codes::CONFIGURATION,
            Self::RecoveryInconsistentState(_) => exit_codes::INCONSISTENT_STATE,
            Self::ExecutorFailure { .. } => exit_codes::EXECUTOR_FAILURE,
            Self::VerifyMismatch { .. } => exit_codes::VERIFY_MISMATCH,
            Self::PolicyHalt { .. } => exit_codes::POLICY_HALT,
        }
    }
}

impl From<Inconsistency> for IntegrityError {
    fn from(value: Inconsistency) -> Self {
        Self::RecoveryInconsistentState(value)
    }
}

/// Find the first typed error in an `anyhow` chain.
pub fn find_integrity_error(err: &anyhow::Error) -> Option<&IntegrityError> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<IntegrityError>())
}

/// Exit code for a fatal error; untyped failures (marker I/O etc.) map to `FAILURE`.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    find_integrity_error(err)
        .map(IntegrityError::exit_code)
        .unwrap_or(exit_codes::FAILURE)
}
