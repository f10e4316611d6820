//! Harness configuration, reloaded from disk on every iteration.
//!
//! The historical deployment format is JSON (`config.json`); a `.toml`
//! extension selects TOML instead. Missing fields take defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{IoMode, PatternRotation};
use crate::error::IntegrityError;
use crate::io::journal::Destination;

pub const DEFAULT_CONFIG_PATH: &str = "/mnt/config/config.json";
pub const DEFAULT_DATA_PATH: &str = "/mnt/data";
pub const DEFAULT_TRANSACTION_LOG_DIR: &str = "/mnt/trn";
pub const DEFAULT_PATTERN: &str = "0x0123456789abcdef";

pub const WAL_MARKER_NAME: &str = "wal";
pub const LAST_WRITTEN_MARKER_NAME: &str = "io_last_written_pattern";
pub const TRANSACTION_LOG_NAME: &str = "transaction.log";
pub const EXECUTOR_LOG_NAME: &str = "fio.log";

/// Immutable snapshot of the harness configuration for one iteration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IoConfig {
    pub io_mode: IoMode,
    /// Ordered pattern tokens, opaque to the harness.
    pub io_patterns: Vec<String>,
    pub io_data_path: PathBuf,
    pub io_file_name: String,
    /// Every `io_write_step`-th iteration is a write iteration.
    pub io_write_step: u64,
    /// Seconds to sleep after each verify iteration.
    pub iteration_sleep: f64,
    /// Size hint handed to the executor on write (`5Gi`, `512M`, ...).
    pub io_file_size: String,
    /// Directory holding the markers and the transaction log.
    pub io_transaction_log_dir: PathBuf,
    /// Refuse to auto-redo an interrupted write found at startup.
    pub io_crash_on_wal_detection: bool,

    pub io_block_size: String,
    pub io_depth: u32,
    pub io_engine: String,
    /// Executor wall-clock limit; absent waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub io_timeout_secs: Option<u64>,
    /// Truncate captured executor stdout/stderr beyond this many bytes.
    pub io_output_limit_bytes: usize,
    pub io_pattern_rotation: PatternRotation,
    pub log_destinations: Vec<Destination>,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            io_mode: IoMode::Write,
            io_patterns: vec![DEFAULT_PATTERN.to_string()],
            io_data_path: PathBuf::from(DEFAULT_DATA_PATH),
            io_file_name: "file1".to_string(),
            io_write_step: 2,
            iteration_sleep: 1.0,
            io_file_size: "5Gi".to_string(),
            io_transaction_log_dir: PathBuf::from(DEFAULT_TRANSACTION_LOG_DIR),
            io_crash_on_wal_detection: false,
            io_block_size: "128k".to_string(),
            io_depth: 4,
            io_engine: "libaio".to_string(),
            io_timeout_secs: None,
            io_output_limit_bytes: 100_000,
            io_pattern_rotation: PatternRotation::RoundRobin,
            log_destinations: vec![Destination::Console, Destination::TransactionLog],
        }
    }
}

impl IoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.io_patterns.is_empty() {
            return Err(anyhow!("io_patterns must be a non-empty array"));
        }
        if self.io_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(anyhow!("io_patterns must not contain empty patterns"));
        }
        if self.io_write_step == 0 {
            return Err(anyhow!("io_write_step must be >= 1"));
        }
        if Duration::try_from_secs_f64(self.iteration_sleep).is_err() {
            return Err(anyhow!(
                "iteration_sleep must be a non-negative number of seconds that fits a duration"
            ));
        }
        if self.io_file_size.trim().is_empty() {
            return Err(anyhow!("io_file_size must not be empty"));
        }
        if self.io_file_name.trim().is_empty() {
            return Err(anyhow!("io_file_name must not be empty"));
        }
        if self.io_depth == 0 {
            return Err(anyhow!("io_depth must be >= 1"));
        }
        if self.io_output_limit_bytes == 0 {
            return Err(anyhow!("io_output_limit_bytes must be > 0"));
        }
        if self.log_destinations.is_empty() {
            return Err(anyhow!("log_destinations must be a non-empty array"));
        }
        Ok(())
    }

    pub fn iteration_sleep(&self) -> Duration {
        Duration::from_secs_f64(self.iteration_sleep)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_secs.map(Duration::from_secs)
    }

    pub fn paths(&self) -> IntegrityPaths {
        IntegrityPaths::new(&self.io_data_path, &self.io_file_name, &self.io_transaction_log_dir)
    }
}

/// All paths derived from a config snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityPaths {
    pub target_path: PathBuf,
    pub transaction_log_dir: PathBuf,
    pub wal_path: PathBuf,
    pub last_written_path: PathBuf,
    pub transaction_log_path: PathBuf,
    pub executor_log_path: PathBuf,
}

impl IntegrityPaths {
    pub fn new(data_path: &Path, file_name: &str, transaction_log_dir: &Path) -> Self {
        Self {
            target_path: data_path.join(file_name),
            transaction_log_dir: transaction_log_dir.to_path_buf(),
            wal_path: transaction_log_dir.join(WAL_MARKER_NAME),
            last_written_path: transaction_log_dir.join(LAST_WRITTEN_MARKER_NAME),
            transaction_log_path: transaction_log_dir.join(TRANSACTION_LOG_NAME),
            executor_log_path: transaction_log_dir.join(EXECUTOR_LOG_NAME),
        }
    }
}

/// Deployment-level overrides (CLI flags / environment) applied on every load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub data_path: Option<PathBuf>,
    pub transaction_log_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    pub fn apply(&self, cfg: &mut IoConfig) {
        if let Some(data_path) = &self.data_path {
            cfg.io_data_path = data_path.clone();
        }
        if let Some(dir) = &self.transaction_log_dir {
            cfg.io_transaction_log_dir = dir.clone();
        }
    }
}

/// Where a fresh [`IoConfig`] comes from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub overrides: ConfigOverrides,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>, overrides: ConfigOverrides) -> Self {
        Self {
            path: path.into(),
            overrides,
        }
    }

    /// Load, override and validate. Every failure is a configuration error.
    pub fn load(&self) -> Result<IoConfig, IntegrityError> {
        let loaded = load_config(&self.path).and_then(|mut cfg| {
            self.overrides.apply(&mut cfg);
            cfg.validate()?;
            Ok(cfg)
        });
        loaded.map_err(|err| IntegrityError::Configuration {
            path: self.path.clone(),
            reason: format!("{err:#}"),
        })
    }
}

/// Parse a config file. A missing file is an error.
pub fn load_config(path: &Path) -> Result<IoConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: IoConfig = if is_toml(path) {
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    } else {
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?
    };
    debug!(
        path = %path.display(),
        mode = ?cfg.io_mode,
        patterns = cfg.io_patterns.len(),
        write_step = cfg.io_write_step,
        "config loaded"
    );
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &IoConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = if is_toml(path) {
        toml::to_string_pretty(cfg).context("serialize config toml")?
    } else {
        serde_json::to_string_pretty(cfg).context("serialize config json")?
    };
    buf.push('\n');
    write_atomic(path, &buf)
}

fn is_toml(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "toml")
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
