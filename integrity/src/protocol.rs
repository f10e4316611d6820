//! Write/verify protocol: the ordered marker writes around each executor call.
//!
//! Write(P):
//! 1. WAL marker := P
//! 2. executor write of P
//! 3. last-written marker := P
//! 4. remove WAL marker (commit point)
//!
//! A crash anywhere before step 4 leaves the WAL marker behind, and recovery
//! redoes the same write. The steps must stay in this order.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{debug, info};

use crate::core::types::{IoOp, IoOutcome};
use crate::error::{Inconsistency, IntegrityError};
use crate::io::config::IoConfig;
use crate::io::executor::{IoExecutor, IoRequest};
use crate::io::journal::Journal;
use crate::io::markers::MarkerStore;

/// Durably write `pattern` to the target and commit it as the last-written pattern.
pub fn write_pattern<E: IoExecutor>(
    executor: &E,
    journal: &Journal,
    cfg: &IoConfig,
    pattern: &str,
) -> Result<()> {
    let markers = MarkerStore::new(&cfg.paths());

    let attempt = (|| -> Result<()> {
        markers
            .write_wal(pattern)
            .context("persist WAL marker before write")?;
        journal.info(
            "write.begin",
            format!("writing pattern {pattern}"),
            json!({ "pattern": pattern, "target": cfg.paths().target_path, "size": cfg.io_file_size }),
        );

        let request = IoRequest::write(cfg, pattern);
        let outcome = run_executor(executor, &request)?;
        if outcome != IoOutcome::Success {
            return Err(executor_failure(IoOp::Write, pattern, outcome).into());
        }

        markers
            .write_last_written(pattern)
            .context("persist last-written marker after write")?;
        markers.clear_wal().context("remove WAL marker")?;
        Ok(())
    })();

    match attempt {
        Ok(()) => {
            info!(pattern, "write committed");
            journal.info(
                "write.commit",
                format!("write complete, pattern {pattern}"),
                json!({ "pattern": pattern }),
            );
            Ok(())
        }
        Err(err) => {
            journal.fatal(&err, Some(pattern), Some(cfg));
            Err(err)
        }
    }
}

/// Verify the last committed pattern. Returns the verified pattern.
///
/// Never touches the markers.
pub fn verify_last_written<E: IoExecutor>(
    executor: &E,
    journal: &Journal,
    cfg: &IoConfig,
) -> Result<String> {
    let markers = MarkerStore::new(&cfg.paths());
    let mut pattern: Option<String> = None;

    let attempt = (|| -> Result<String> {
        if let Some(in_flight) = markers.read_wal()? {
            return Err(IntegrityError::from(Inconsistency::WalPresentDuringVerify {
                pattern: in_flight,
            })
            .into());
        }
        let committed = match markers.read_last_written()? {
            Some(p) if !p.is_empty() => p,
            _ => return Err(IntegrityError::from(Inconsistency::NothingToVerify).into()),
        };
        pattern = Some(committed.clone());
        journal.info(
            "verify.begin",
            format!("found last written pattern {committed}, verifying"),
            json!({ "pattern": committed, "target": cfg.paths().target_path }),
        );

        let request = IoRequest::verify(cfg, &committed);
        match run_executor(executor, &request)? {
            IoOutcome::Success => Ok(committed),
            IoOutcome::Mismatch { detail } => Err(IntegrityError::VerifyMismatch {
                pattern: committed,
                target: request.target,
                detail,
            }
            .into()),
            failed @ IoOutcome::Failed { .. } => {
                Err(executor_failure(IoOp::Verify, &committed, failed).into())
            }
        }
    })();

    match attempt {
        Ok(verified) => {
            debug!(pattern = %verified, "verify passed");
            journal.info(
                "verify.pass",
                format!("verify complete, pattern {verified}"),
                json!({ "pattern": verified }),
            );
            Ok(verified)
        }
        Err(err) => {
            journal.fatal(&err, pattern.as_deref(), Some(cfg));
            Err(err)
        }
    }
}

/// Transport failures are executor failures too; the protocol never retries them.
fn run_executor<E: IoExecutor>(executor: &E, request: &IoRequest) -> Result<IoOutcome> {
    executor.execute(request).map_err(|err| {
        IntegrityError::ExecutorFailure {
            op: request.op,
            pattern: request.pattern.clone(),
            exit_code: None,
            detail: format!("{err:#}"),
        }
        .into()
    })
}

fn executor_failure(op: IoOp, pattern: &str, outcome: IoOutcome) -> IntegrityError {
    let (exit_code, detail) = match outcome {
        IoOutcome::Failed { exit_code, detail } => (exit_code, detail),
        IoOutcome::Mismatch { detail } => (None, detail),
        IoOutcome::Success => (None, String::new()),
    };
    IntegrityError::ExecutorFailure {
        op,
        pattern: pattern.to_string(),
        exit_code,
        detail,
    }
}
