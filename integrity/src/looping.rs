//! Steady-state write/verify loop.

use std::thread;

use anyhow::{Result, anyhow};
use serde_json::json;
use tracing::{debug, info};

use crate::core::schedule::{iteration_kind, select_pattern};
use crate::core::types::IterationKind;
use crate::io::config::ConfigSource;
use crate::io::executor::IoExecutor;
use crate::io::journal::Journal;
use crate::protocol::{verify_last_written, write_pattern};

/// Optional bound on the loop. Production runs use the default (unbounded).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_iterations: Option<u64>,
}

/// What a single iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub iter: u64,
    pub kind: IterationKind,
    /// Pattern written, or pattern verified.
    pub pattern: String,
}

/// Summary of a bounded loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u64,
}

/// Run write/verify iterations until a fatal error or the iteration limit.
///
/// Configuration is reloaded at the start of every iteration. Write
/// iterations continue immediately; verify iterations sleep for
/// `iteration_sleep` afterwards.
pub fn run_loop<E: IoExecutor, F: FnMut(&IterationReport)>(
    source: &ConfigSource,
    executor: &E,
    journal: &Journal,
    limits: LoopLimits,
    mut on_iteration: F,
) -> Result<LoopOutcome> {
    let mut iter: u64 = 0;
    loop {
        if limits.max_iterations.is_some_and(|max| iter >= max) {
            debug!(iterations = iter, "iteration limit reached");
            return Ok(LoopOutcome { iterations: iter });
        }

        let cfg = match source.load() {
            Ok(cfg) => cfg,
            Err(err) => {
                let err = anyhow::Error::new(err);
                journal.fatal(&err, None, None);
                return Err(err);
            }
        };

        let kind = iteration_kind(iter, cfg.io_mode, cfg.io_write_step);
        journal.info(
            "iteration.start",
            format!("iteration {iter}"),
            json!({ "iteration": iter, "kind": kind, "mode": cfg.io_mode }),
        );

        match kind {
            IterationKind::Write => {
                let pattern = select_pattern(
                    &cfg.io_patterns,
                    iter,
                    cfg.io_write_step,
                    cfg.io_pattern_rotation,
                )
                .ok_or_else(|| anyhow!("io_patterns is empty"))?
                .to_string();
                info!(iter, pattern = %pattern, "write iteration");
                write_pattern(executor, journal, &cfg, &pattern)?;
                iter += 1;
                on_iteration(&IterationReport {
                    iter: iter - 1,
                    kind,
                    pattern,
                });
            }
            IterationKind::Verify => {
                info!(iter, "verify iteration");
                let pattern = verify_last_written(executor, journal, &cfg)?;
                iter += 1;
                on_iteration(&IterationReport {
                    iter: iter - 1,
                    kind,
                    pattern,
                });
                thread::sleep(cfg.iteration_sleep());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IoMode, IoOutcome, PatternRotation};
    use crate::error::{IntegrityError, find_integrity_error};
    use crate::io::config::IoConfig;
    use crate::test_support::{Bench, ScriptedExecutor, SimulatedExecutor};
    use std::time::{Duration, Instant};

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|p| p.to_string()).collect()
    }

    fn collect(
        bench: &Bench,
        executor: &SimulatedExecutor,
        max: u64,
    ) -> Result<Vec<IterationReport>> {
        let (journal, _buffer) = Journal::in_memory();
        let mut reports = Vec::new();
        run_loop(
            &bench.source(),
            executor,
            &journal,
            LoopLimits {
                max_iterations: Some(max),
            },
            |report| reports.push(report.clone()),
        )?;
        Ok(reports)
    }

    #[test]
    fn fresh_start_alternates_write_and_verify() {
        let bench = Bench::new().expect("bench");
        bench
            .write_config(&IoConfig {
                io_patterns: patterns(&["0xAA", "0xBB"]),
                io_write_step: 2,
                ..bench.config()
            })
            .expect("config");
        let executor = SimulatedExecutor::new();

        let reports = collect(&bench, &executor, 4).expect("loop");
        let summary: Vec<(u64, IterationKind, &str)> = reports
            .iter()
            .map(|r| (r.iter, r.kind, r.pattern.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, IterationKind::Write, "0xAA"),
                (1, IterationKind::Verify, "0xAA"),
                (2, IterationKind::Write, "0xBB"),
                (3, IterationKind::Verify, "0xBB"),
            ]
        );
        assert_eq!(
            bench.markers().read_last_written().expect("read").as_deref(),
            Some("0xBB")
        );
    }

    #[test]
    fn legacy_rotation_is_preserved_when_selected() {
        let bench = Bench::new().expect("bench");
        bench
            .write_config(&IoConfig {
                io_patterns: patterns(&["0xAA", "0xBB"]),
                io_write_step: 2,
                io_pattern_rotation: PatternRotation::Legacy,
                ..bench.config()
            })
            .expect("config");
        let executor = SimulatedExecutor::new();

        let reports = collect(&bench, &executor, 3).expect("loop");
        let written: Vec<&str> = reports
            .iter()
            .filter(|r| r.kind == IterationKind::Write)
            .map(|r| r.pattern.as_str())
            .collect();
        assert_eq!(written, vec!["0xBB", "0xBB"]);
    }

    #[test]
    fn verify_only_mode_never_writes() {
        let bench = Bench::new().expect("bench");
        bench
            .write_config(&IoConfig {
                io_mode: IoMode::VerifyOnly,
                ..bench.config()
            })
            .expect("config");
        bench.markers().write_last_written("0xAA").expect("seed");
        let executor = ScriptedExecutor::new(Vec::new());
        let (journal, _buffer) = Journal::in_memory();

        let outcome = run_loop(
            &bench.source(),
            &executor,
            &journal,
            LoopLimits {
                max_iterations: Some(3),
            },
            |_| {},
        )
        .expect("loop");
        assert_eq!(outcome.iterations, 3);
        assert!(
            executor
                .requests()
                .iter()
                .all(|r| r.op == crate::core::types::IoOp::Verify)
        );
    }

    #[test]
    fn config_is_reloaded_every_iteration() {
        let bench = Bench::new().expect("bench");
        let executor = SimulatedExecutor::new();
        let (journal, _buffer) = Journal::in_memory();
        let source = bench.source();
        let mut reports = Vec::new();

        run_loop(
            &source,
            &executor,
            &journal,
            LoopLimits {
                max_iterations: Some(2),
            },
            |report| {
                reports.push(report.clone());
                if report.iter == 0 {
                    bench
                        .write_config(&IoConfig {
                            io_mode: IoMode::VerifyOnly,
                            ..bench.config()
                        })
                        .expect("rewrite config");
                }
            },
        )
        .expect("loop");

        assert_eq!(reports[0].kind, IterationKind::Write);
        assert_eq!(reports[1].kind, IterationKind::Verify);
    }

    #[test]
    fn verify_mismatch_stops_the_loop() {
        let bench = Bench::new().expect("bench");
        let executor = ScriptedExecutor::new(vec![
            Ok(IoOutcome::Success),
            Ok(IoOutcome::Mismatch {
                detail: "verify: bad pattern".to_string(),
            }),
        ]);
        let (journal, buffer) = Journal::in_memory();

        let err = run_loop(
            &bench.source(),
            &executor,
            &journal,
            LoopLimits {
                max_iterations: Some(10),
            },
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(
            find_integrity_error(&err),
            Some(IntegrityError::VerifyMismatch { .. })
        ));
        assert_eq!(executor.requests().len(), 2);
        assert_eq!(buffer.events().last().map(String::as_str), Some("fatal"));
    }

    #[test]
    fn broken_config_mid_run_is_fatal() {
        let bench = Bench::new().expect("bench");
        let executor = SimulatedExecutor::new();
        let (journal, _buffer) = Journal::in_memory();

        let err = run_loop(
            &bench.source(),
            &executor,
            &journal,
            LoopLimits {
                max_iterations: Some(5),
            },
            |_| {
                std::fs::write(bench.config_path(), "{ not json").expect("corrupt config");
            },
        )
        .unwrap_err();
        assert!(matches!(
            find_integrity_error(&err),
            Some(IntegrityError::Configuration { .. })
        ));
    }

    #[test]
    fn write_iterations_do_not_sleep() {
        let bench = Bench::new().expect("bench");
        bench
            .write_config(&IoConfig {
                io_write_step: 1,
                iteration_sleep: 2.0,
                ..bench.config()
            })
            .expect("config");
        let executor = ScriptedExecutor::new(Vec::new());
        let (journal, _buffer) = Journal::in_memory();

        let started = Instant::now();
        let outcome = run_loop(
            &bench.source(),
            &executor,
            &journal,
            LoopLimits {
                max_iterations: Some(3),
            },
            |report| assert_eq!(report.kind, IterationKind::Write),
        )
        .expect("loop");
        assert_eq!(outcome.iterations, 3);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn verify_iterations_sleep_after_each_pass() {
        let bench = Bench::new().expect("bench");
        bench
            .write_config(&IoConfig {
                io_mode: IoMode::VerifyOnly,
                iteration_sleep: 0.2,
                ..bench.config()
            })
            .expect("config");
        bench.markers().write_last_written("0xAA").expect("seed");
        let executor = ScriptedExecutor::new(Vec::new());
        let (journal, _buffer) = Journal::in_memory();

        let started = Instant::now();
        run_loop(
            &bench.source(),
            &executor,
            &journal,
            LoopLimits {
                max_iterations: Some(3),
            },
            |report| assert_eq!(report.kind, IterationKind::Verify),
        )
        .expect("loop");
        assert!(started.elapsed() >= Duration::from_millis(600));
    }

    #[test]
    fn oversized_sleep_is_a_configuration_error() {
        let bench = Bench::new().expect("bench");
        let mut raw = serde_json::to_value(bench.config()).expect("serialize");
        raw["iteration_sleep"] = serde_json::json!(1e30);
        std::fs::write(bench.config_path(), raw.to_string()).expect("write config");
        let executor = SimulatedExecutor::new();
        let (journal, buffer) = Journal::in_memory();

        let err = run_loop(
            &bench.source(),
            &executor,
            &journal,
            LoopLimits {
                max_iterations: Some(2),
            },
            |_| {},
        )
        .unwrap_err();
        assert!(matches!(
            find_integrity_error(&err),
            Some(IntegrityError::Configuration { .. })
        ));
        assert!(executor.requests().is_empty());
        assert_eq!(buffer.events().last().map(String::as_str), Some("fatal"));
    }
}
