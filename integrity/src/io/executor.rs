//! IO executor abstraction for pattern writes and verifies.
//!
//! The [`IoExecutor`] trait decouples the write/verify protocol from the tool
//! that touches the target (currently `fio`). Tests use simulated executors
//! that operate on small files without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{IoOp, IoOutcome};
use crate::io::config::IoConfig;
use crate::io::process::{CommandOutput, run_command};

/// Typed invocation descriptor for one executor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoRequest {
    pub op: IoOp,
    pub pattern: String,
    pub target: PathBuf,
    /// Size hint, only meaningful for writes.
    pub size: Option<String>,
    pub block_size: String,
    pub io_depth: u32,
    pub io_engine: String,
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
    /// Where to keep the stdout/stderr of the last run.
    pub log_path: Option<PathBuf>,
}

impl IoRequest {
    pub fn write(cfg: &IoConfig, pattern: &str) -> Self {
        Self {
            size: Some(cfg.io_file_size.clone()),
            ..Self::base(cfg, IoOp::Write, pattern)
        }
    }

    pub fn verify(cfg: &IoConfig, pattern: &str) -> Self {
        Self::base(cfg, IoOp::Verify, pattern)
    }

    fn base(cfg: &IoConfig, op: IoOp, pattern: &str) -> Self {
        let paths = cfg.paths();
        Self {
            op,
            pattern: pattern.to_string(),
            target: paths.target_path,
            size: None,
            block_size: cfg.io_block_size.clone(),
            io_depth: cfg.io_depth,
            io_engine: cfg.io_engine.clone(),
            timeout: cfg.io_timeout(),
            output_limit_bytes: cfg.io_output_limit_bytes,
            log_path: Some(paths.executor_log_path),
        }
    }
}

/// Abstraction over write/verify backends.
pub trait IoExecutor {
    /// Run one write or verify. `Err` means the tool could not be run at all.
    fn execute(&self, request: &IoRequest) -> Result<IoOutcome>;
}

/// Executor that spawns `fio` with pattern verification.
#[derive(Debug, Clone)]
pub struct FioExecutor {
    binary: PathBuf,
}

impl FioExecutor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FioExecutor {
    fn default() -> Self {
        Self::new("fio")
    }
}

impl IoExecutor for FioExecutor {
    #[instrument(skip_all, fields(op = %request.op, pattern = %request.pattern, target = %request.target.display()))]
    fn execute(&self, request: &IoRequest) -> Result<IoOutcome> {
        info!("starting fio");
        let mut cmd = Command::new(&self.binary);
        cmd.args(fio_args(request));

        let output = run_command(cmd, request.timeout, request.output_limit_bytes)
            .with_context(|| format!("run {} {}", self.binary.display(), request.op))?;

        if let Some(log_path) = &request.log_path {
            if let Err(err) = write_executor_log(log_path, request, &output) {
                warn!(err = %format!("{err:#}"), log = %log_path.display(), "failed to write fio log");
            }
        }

        let outcome = classify(request.op, &output);
        match &outcome {
            IoOutcome::Success => debug!("fio completed successfully"),
            IoOutcome::Mismatch { .. } => warn!("fio reported a pattern mismatch"),
            IoOutcome::Failed { exit_code, .. } => warn!(?exit_code, "fio failed"),
        }
        Ok(outcome)
    }
}

/// Argument vector for a fio run; no shell is involved.
pub fn fio_args(request: &IoRequest) -> Vec<String> {
    let mut args = vec![
        "--name=integrity".to_string(),
        format!("--filename={}", request.target.display()),
    ];
    match request.op {
        IoOp::Write => {
            if let Some(size) = &request.size {
                args.push(format!("--size={size}"));
            }
            args.push("--rw=write".to_string());
        }
        IoOp::Verify => args.push("--rw=read".to_string()),
    }
    args.extend([
        format!("--bs={}", request.block_size),
        format!("--ioengine={}", request.io_engine),
        format!("--iodepth={}", request.io_depth),
        "--verify=pattern".to_string(),
        format!(
            "--do_verify={}",
            if request.op == IoOp::Verify { 1 } else { 0 }
        ),
        format!("--verify_pattern={}", request.pattern),
        "--overwrite=1".to_string(),
    ]);
    args
}

// fio reports pattern failures as "verify: bad pattern ..." / "bad magic header"
// and exits with EILSEQ (84) on the failing job.
static MISMATCH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)verify: bad (pattern|magic header)|verify type mismatch|\berr=\s*84\b")
        .unwrap()
});

fn reports_mismatch(text: &str) -> bool {
    MISMATCH_RE.is_match(text)
}

/// Map a finished fio run to an outcome.
pub fn classify(op: IoOp, output: &CommandOutput) -> IoOutcome {
    if output.timed_out {
        return IoOutcome::Failed {
            exit_code: output.status.code(),
            detail: "fio timed out".to_string(),
        };
    }
    if output.status.success() {
        return IoOutcome::Success;
    }
    let stdout = output.stdout_lossy();
    let stderr = output.stderr_lossy();
    let detail = summarize(&stderr, &stdout);
    if op == IoOp::Verify && (reports_mismatch(&stderr) || reports_mismatch(&stdout)) {
        return IoOutcome::Mismatch { detail };
    }
    IoOutcome::Failed {
        exit_code: output.status.code(),
        detail,
    }
}

fn summarize(stderr: &str, stdout: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = source
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}

fn write_executor_log(path: &Path, request: &IoRequest, output: &CommandOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create executor log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str(&format!(
        "=== fio {} pattern={} exit={:?} ===\n",
        request.op,
        request.pattern,
        output.status.code()
    ));
    buf.push_str("=== stdout ===\n");
    buf.push_str(&output.stdout_lossy());
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&output.stderr_lossy());
    buf.push_str(&output.truncated_notice("fio"));
    if output.timed_out {
        buf.push_str("\n[fio timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write executor log {}", path.display()))
}
