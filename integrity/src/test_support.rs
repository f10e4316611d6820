//! Test-only helpers: file-backed and scripted executors, and a scratch bench.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{IoOp, IoOutcome};
use crate::io::config::{ConfigOverrides, ConfigSource, IoConfig, write_config};
use crate::io::executor::{IoExecutor, IoRequest};
use crate::io::journal::Destination;
use crate::io::markers::MarkerStore;

/// Bytes written per simulated write, independent of the size hint.
pub const SIMULATED_TARGET_BYTES: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Executor that fills the target with the repeated pattern and checks it on verify.
#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    requests: Mutex<Vec<IoRequest>>,
    crash_after_io: AtomicUsize,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next write reach the target and then fail, like a process
    /// killed between the executor write and the marker commit.
    pub fn crash_next_write(&self) {
        self.crash_after_io.fetch_add(1, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<IoRequest> {
        lock(&self.requests).clone()
    }

    /// Whether `target` holds exactly the simulated image of `pattern`.
    pub fn target_holds(&self, target: &Path, pattern: &str) -> Result<bool> {
        let data = fs::read(target).with_context(|| format!("read {}", target.display()))?;
        Ok(data == image(pattern))
    }
}

fn image(pattern: &str) -> Vec<u8> {
    pattern
        .as_bytes()
        .iter()
        .copied()
        .cycle()
        .take(SIMULATED_TARGET_BYTES)
        .collect()
}

impl IoExecutor for SimulatedExecutor {
    fn execute(&self, request: &IoRequest) -> Result<IoOutcome> {
        lock(&self.requests).push(request.clone());
        match request.op {
            IoOp::Write => {
                if let Some(parent) = request.target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&request.target, image(&request.pattern))?;
                let crash = self
                    .crash_after_io
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if crash {
                    return Err(anyhow!("simulated crash after write"));
                }
                Ok(IoOutcome::Success)
            }
            IoOp::Verify => match fs::read(&request.target) {
                Ok(data) if data == image(&request.pattern) => Ok(IoOutcome::Success),
                Ok(_) => Ok(IoOutcome::Mismatch {
                    detail: format!("verify: bad pattern, expected {}", request.pattern),
                }),
                Err(err) => Ok(IoOutcome::Failed {
                    exit_code: Some(1),
                    detail: err.to_string(),
                }),
            },
        }
    }
}

/// Executor that replays queued results and records every request.
///
/// `Err(message)` entries become transport failures. Once the queue is
/// exhausted every call succeeds.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    queue: Mutex<VecDeque<Result<IoOutcome, String>>>,
    requests: Mutex<Vec<IoRequest>>,
}

impl ScriptedExecutor {
    pub fn new(outcomes: Vec<Result<IoOutcome, String>>) -> Self {
        Self {
            queue: Mutex::new(outcomes.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<IoRequest> {
        lock(&self.requests).clone()
    }
}

impl IoExecutor for ScriptedExecutor {
    fn execute(&self, request: &IoRequest) -> Result<IoOutcome> {
        lock(&self.requests).push(request.clone());
        match lock(&self.queue).pop_front() {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(IoOutcome::Success),
        }
    }
}

/// Scratch directory with a config file, a data dir and a transaction-log dir.
pub struct Bench {
    temp: TempDir,
    config: IoConfig,
}

impl Bench {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create bench tempdir")?;
        let config = IoConfig {
            io_data_path: temp.path().join("data"),
            io_transaction_log_dir: temp.path().join("trn"),
            iteration_sleep: 0.0,
            io_file_size: "4k".to_string(),
            log_destinations: vec![Destination::TransactionLog],
            ..IoConfig::default()
        };
        fs::create_dir_all(&config.io_data_path).context("create data dir")?;
        let bench = Self { temp, config };
        bench.write_config(&bench.config)?;
        Ok(bench)
    }

    pub fn config_path(&self) -> PathBuf {
        self.temp.path().join("config").join("config.json")
    }

    /// Baseline config written by [`Bench::new`].
    pub fn config(&self) -> IoConfig {
        self.config.clone()
    }

    pub fn write_config(&self, cfg: &IoConfig) -> Result<()> {
        write_config(&self.config_path(), cfg)
    }

    pub fn source(&self) -> ConfigSource {
        ConfigSource::new(self.config_path(), ConfigOverrides::default())
    }

    pub fn markers(&self) -> MarkerStore {
        MarkerStore::new(&self.config.paths())
    }

    pub fn target_path(&self) -> PathBuf {
        self.config.paths().target_path
    }

    pub fn transaction_log_path(&self) -> PathBuf {
        self.config.paths().transaction_log_path
    }

    pub fn create_target(&self, contents: &[u8]) -> Result<()> {
        let target = self.target_path();
        fs::write(&target, contents).with_context(|| format!("write {}", target.display()))
    }

    /// Flip one byte in the middle of the target.
    pub fn corrupt_target(&self) -> Result<()> {
        let target = self.target_path();
        let mut data = fs::read(&target).with_context(|| format!("read {}", target.display()))?;
        let mid = data.len() / 2;
        let byte = data
            .get_mut(mid)
            .ok_or_else(|| anyhow!("target {} is empty", target.display()))?;
        *byte ^= 0xFF;
        fs::write(&target, data).with_context(|| format!("write {}", target.display()))
    }
}
