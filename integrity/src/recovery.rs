//! Startup recovery: inspect markers and target, then redo, resume, or refuse.
//!
//! Runs exactly once per process, before the loop. Every refusal is decided
//! before anything on disk is touched.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use crate::core::recovery::plan_recovery;
use crate::core::types::RecoveryPlan;
use crate::io::config::ConfigSource;
use crate::io::executor::IoExecutor;
use crate::io::journal::Journal;
use crate::io::markers::MarkerStore;
use crate::protocol::{verify_last_written, write_pattern};

/// Bring the target and markers into a state the loop can start from.
///
/// Returns the plan that was carried out.
pub fn run_recovery<E: IoExecutor>(
    source: &ConfigSource,
    executor: &E,
    journal: &Journal,
) -> Result<RecoveryPlan> {
    let cfg = match source.load() {
        Ok(cfg) => cfg,
        Err(err) => {
            let err = anyhow::Error::new(err);
            journal.fatal(&err, None, None);
            return Err(err);
        }
    };
    let paths = cfg.paths();
    let markers = MarkerStore::new(&paths);

    let inspected = (|| -> Result<RecoveryPlan> {
        let snapshot = markers.snapshot().context("read markers")?;
        let target_exists = paths
            .target_path
            .try_exists()
            .with_context(|| format!("stat {}", paths.target_path.display()))?;
        journal.info(
            "recovery.start",
            "inspecting markers",
            json!({
                "wal": snapshot.wal,
                "last_written": snapshot.last_written,
                "target_exists": target_exists,
                "target": paths.target_path,
            }),
        );
        let state = snapshot.with_target(target_exists);
        Ok(plan_recovery(
            &state,
            cfg.io_crash_on_wal_detection,
            &paths.target_path,
        )?)
    })();

    let plan = match inspected {
        Ok(plan) => plan,
        Err(err) => {
            journal.fatal(&err, None, Some(&cfg));
            return Err(err);
        }
    };
    info!(?plan, "recovery plan");

    match &plan {
        RecoveryPlan::FreshStart => {
            journal.info(
                "recovery.fresh_start",
                "no last written pattern, WAL or data file found, assuming first run",
                json!({}),
            );
        }
        RecoveryPlan::RedoWrite { pattern } => {
            journal.warning(
                "recovery.redo_write",
                format!("WAL marker found, previous run stopped mid-write, rewriting {pattern}"),
                json!({ "pattern": pattern }),
            );
            write_pattern(executor, journal, &cfg, pattern).context("redo interrupted write")?;
        }
        RecoveryPlan::ResumeVerify { pattern } => {
            journal.info(
                "recovery.resume_verify",
                format!("resuming with a verify of {pattern}"),
                json!({ "pattern": pattern }),
            );
            verify_last_written(executor, journal, &cfg).context("verify committed pattern")?;
        }
    }

    journal.info("recovery.complete", "recovery complete", json!({}));
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::IoOutcome;
    use crate::error::{Inconsistency, IntegrityError, find_integrity_error};
    use crate::io::config::IoConfig;
    use crate::test_support::{Bench, ScriptedExecutor, SimulatedExecutor};

    #[test]
    fn fresh_start_does_nothing() {
        let bench = Bench::new().expect("bench");
        let executor = ScriptedExecutor::new(Vec::new());
        let (journal, buffer) = Journal::in_memory();

        let plan = run_recovery(&bench.source(), &executor, &journal).expect("recover");
        assert_eq!(plan, RecoveryPlan::FreshStart);
        assert!(executor.requests().is_empty());
        assert_eq!(
            buffer.events(),
            vec!["recovery.start", "recovery.fresh_start", "recovery.complete"]
        );
    }

    #[test]
    fn redo_uses_wal_pattern_and_commits_it() {
        let bench = Bench::new().expect("bench");
        bench.markers().write_last_written("0xAA").expect("seed");
        bench.markers().write_wal("0xBB").expect("wal");
        let executor = SimulatedExecutor::new();
        let (journal, _buffer) = Journal::in_memory();

        let plan = run_recovery(&bench.source(), &executor, &journal).expect("recover");
        assert_eq!(
            plan,
            RecoveryPlan::RedoWrite {
                pattern: "0xBB".to_string()
            }
        );
        let markers = bench.markers().snapshot().expect("snapshot");
        assert_eq!(markers.wal, None);
        assert_eq!(markers.last_written.as_deref(), Some("0xBB"));
        assert!(executor.target_holds(&bench.target_path(), "0xBB").expect("read"));
    }

    #[test]
    fn policy_halt_touches_nothing() {
        let bench = Bench::new().expect("bench");
        bench
            .write_config(&IoConfig {
                io_crash_on_wal_detection: true,
                ..bench.config()
            })
            .expect("config");
        bench.markers().write_last_written("0xAA").expect("seed");
        bench.markers().write_wal("0xBB").expect("wal");
        let executor = ScriptedExecutor::new(Vec::new());
        let (journal, buffer) = Journal::in_memory();

        let err = run_recovery(&bench.source(), &executor, &journal).unwrap_err();
        assert!(matches!(
            find_integrity_error(&err),
            Some(IntegrityError::PolicyHalt { .. })
        ));
        assert!(executor.requests().is_empty());
        assert!(!bench.target_path().exists());
        let markers = bench.markers().snapshot().expect("snapshot");
        assert_eq!(markers.wal.as_deref(), Some("0xBB"));
        assert_eq!(markers.last_written.as_deref(), Some("0xAA"));
        assert_eq!(buffer.events().last().map(String::as_str), Some("fatal"));
    }

    #[test]
    fn unexplained_target_is_rejected_without_mutation() {
        let bench = Bench::new().expect("bench");
        bench.create_target(b"leftover").expect("target");
        let executor = ScriptedExecutor::new(Vec::new());
        let (journal, _buffer) = Journal::in_memory();

        let err = run_recovery(&bench.source(), &executor, &journal).unwrap_err();
        assert!(matches!(
            find_integrity_error(&err),
            Some(IntegrityError::RecoveryInconsistentState(
                Inconsistency::UnexplainedTarget { .. }
            ))
        ));
        assert!(executor.requests().is_empty());
        assert_eq!(std::fs::read(bench.target_path()).expect("read"), b"leftover");
        assert_eq!(
            bench.markers().snapshot().expect("snapshot"),
            Default::default()
        );
    }

    #[test]
    fn wal_without_commit_is_rejected() {
        let bench = Bench::new().expect("bench");
        bench.markers().write_wal("0xAA").expect("wal");
        let executor = ScriptedExecutor::new(Vec::new());
        let (journal, _buffer) = Journal::in_memory();

        let err = run_recovery(&bench.source(), &executor, &journal).unwrap_err();
        assert!(matches!(
            find_integrity_error(&err),
            Some(IntegrityError::RecoveryInconsistentState(
                Inconsistency::WalWithoutCommit { .. }
            ))
        ));
        assert!(executor.requests().is_empty());
    }

    #[test]
    fn committed_pattern_is_verified_once() {
        let bench = Bench::new().expect("bench");
        bench.markers().write_last_written("0xAA").expect("seed");
        let executor = ScriptedExecutor::new(vec![Ok(IoOutcome::Success)]);
        let (journal, _buffer) = Journal::in_memory();

        let plan = run_recovery(&bench.source(), &executor, &journal).expect("recover");
        assert_eq!(
            plan,
            RecoveryPlan::ResumeVerify {
                pattern: "0xAA".to_string()
            }
        );
        assert_eq!(executor.requests().len(), 1);
    }

    #[test]
    fn failed_resume_verify_is_fatal() {
        let bench = Bench::new().expect("bench");
        bench.markers().write_last_written("0xAA").expect("seed");
        let executor = ScriptedExecutor::new(vec![Ok(IoOutcome::Mismatch {
            detail: "bad pattern".to_string(),
        })]);
        let (journal, _buffer) = Journal::in_memory();

        let err = run_recovery(&bench.source(), &executor, &journal).unwrap_err();
        assert!(matches!(
            find_integrity_error(&err),
            Some(IntegrityError::VerifyMismatch { .. })
        ));
    }

    #[test]
    fn missing_config_is_a_configuration_error() {
        let bench = Bench::new().expect("bench");
        std::fs::remove_file(bench.config_path()).expect("remove config");
        let executor = ScriptedExecutor::new(Vec::new());
        let (journal, buffer) = Journal::in_memory();

        let err = run_recovery(&bench.source(), &executor, &journal).unwrap_err();
        assert!(matches!(
            find_integrity_error(&err),
            Some(IntegrityError::Configuration { .. })
        ));
        assert_eq!(buffer.events(), vec!["fatal"]);
    }
}
