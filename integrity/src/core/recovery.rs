//! Startup recovery decision table.
//!
//! | WAL | last-written | target | plan                                   |
//! |-----|--------------|--------|----------------------------------------|
//! | yes | any          | any    | halt if policy says so                 |
//! | yes | yes          | any    | redo the write of the WAL pattern      |
//! | yes | no           | any    | inconsistent                           |
//! | no  | yes          | any    | verify the committed pattern           |
//! | no  | no           | yes    | inconsistent (unexplained target)      |
//! | no  | no           | no     | fresh start                            |
//!
//! The policy check runs before every other WAL row so that a halt never
//! depends on the last-written marker.

use std::path::Path;

use crate::core::types::{RecoveryPlan, StartupState};
use crate::error::{Inconsistency, IntegrityError};

pub fn plan_recovery(
    state: &StartupState,
    crash_on_wal_detection: bool,
    target: &Path,
) -> Result<RecoveryPlan, IntegrityError> {
    if let Some(wal_pattern) = &state.wal {
        if crash_on_wal_detection {
            return Err(IntegrityError::PolicyHalt {
                pattern: wal_pattern.clone(),
            });
        }
        if state.last_written.is_none() {
            return Err(Inconsistency::WalWithoutCommit {
                wal_pattern: wal_pattern.clone(),
            }
            .into());
        }
        if wal_pattern.is_empty() {
            return Err(Inconsistency::EmptyWalMarker.into());
        }
        return Ok(RecoveryPlan::RedoWrite {
            pattern: wal_pattern.clone(),
        });
    }

    match &state.last_written {
        Some(pattern) if pattern.is_empty() => Err(Inconsistency::NothingToVerify.into()),
        Some(pattern) => Ok(RecoveryPlan::ResumeVerify {
            pattern: pattern.clone(),
        }),
        None if state.target_exists => Err(Inconsistency::UnexplainedTarget {
            target: target.to_path_buf(),
        }
        .into()),
        None => Ok(RecoveryPlan::FreshStart),
    }
}
