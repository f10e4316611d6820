//! Operator-facing journal of recovery decisions, writes, verifies and fatal errors.
//!
//! A [`Journal`] is built once at startup from the configured destinations and
//! passed by reference into the controllers. It is separate from `tracing`,
//! which only carries developer diagnostics.
//!
//! Journal I/O failures are reported through `tracing` and never change the
//! outcome of the operation being journaled.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::io::config::IoConfig;

/// Configurable journal destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Human-readable lines on stdout.
    Console,
    /// Append-only JSON Lines file in the transaction-log directory.
    TransactionLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// One journaled event, as stored in the transaction log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub ts: String,
    pub level: Level,
    pub event: String,
    pub message: String,
    #[serde(default)]
    pub fields: Value,
}

/// Shared buffer behind an in-memory journal.
#[derive(Debug, Clone, Default)]
pub struct JournalBuffer(Arc<Mutex<Vec<JournalRecord>>>);

impl JournalBuffer {
    pub fn records(&self) -> Vec<JournalRecord> {
        match self.0.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.event).collect()
    }
}

enum Sink {
    Console,
    TransactionLog { path: PathBuf, file: Mutex<File> },
    Memory(JournalBuffer),
}

impl Sink {
    fn emit(&self, record: &JournalRecord) -> Result<()> {
        match self {
            Self::Console => {
                println!("{}", console_line(record));
                Ok(())
            }
            Self::TransactionLog { path, file } => {
                let mut line = serde_json::to_string(record).context("serialize journal record")?;
                line.push('\n');
                let mut file = file
                    .lock()
                    .map_err(|_| anyhow::anyhow!("transaction log lock poisoned"))?;
                file.write_all(line.as_bytes())
                    .and_then(|()| file.sync_data())
                    .with_context(|| format!("append {}", path.display()))
            }
            Self::Memory(buffer) => {
                match buffer.0.lock() {
                    Ok(mut records) => records.push(record.clone()),
                    Err(poisoned) => poisoned.into_inner().push(record.clone()),
                }
                Ok(())
            }
        }
    }
}

pub struct Journal {
    sinks: Vec<Sink>,
}

impl Journal {
    /// Resolve the configured destinations into sinks.
    pub fn open(destinations: &[Destination], transaction_log_path: &Path) -> Result<Self> {
        let mut sinks = Vec::with_capacity(destinations.len());
        for destination in destinations {
            let sink = match destination {
                Destination::Console => Sink::Console,
                Destination::TransactionLog => open_transaction_log(transaction_log_path)?,
            };
            sinks.push(sink);
        }
        Ok(Self { sinks })
    }

    pub fn from_config(cfg: &IoConfig) -> Result<Self> {
        Self::open(&cfg.log_destinations, &cfg.paths().transaction_log_path)
    }

    /// Journal that only records into memory.
    pub fn in_memory() -> (Self, JournalBuffer) {
        let buffer = JournalBuffer::default();
        let journal = Self {
            sinks: vec![Sink::Memory(buffer.clone())],
        };
        (journal, buffer)
    }

    pub fn record(&self, level: Level, event: &str, message: impl Into<String>, fields: Value) {
        let record = JournalRecord {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level,
            event: event.to_string(),
            message: message.into(),
            fields,
        };
        for sink in &self.sinks {
            if let Err(err) = sink.emit(&record) {
                warn!(err = %format!("{err:#}"), event, "failed to journal event");
            }
        }
    }

    pub fn info(&self, event: &str, message: impl Into<String>, fields: Value) {
        self.record(Level::Info, event, message, fields);
    }

    pub fn warning(&self, event: &str, message: impl Into<String>, fields: Value) {
        self.record(Level::Warning, event, message, fields);
    }

    /// Journal a fatal error with whatever context is at hand.
    pub fn fatal(&self, err: &anyhow::Error, pattern: Option<&str>, cfg: Option<&IoConfig>) {
        let config = cfg
            .and_then(|cfg| serde_json::to_value(cfg).ok())
            .unwrap_or(Value::Null);
        self.record(
            Level::Critical,
            "fatal",
            format!("{err:#}"),
            json!({ "pattern": pattern, "config": config }),
        );
    }
}

fn open_transaction_log(path: &Path) -> Result<Sink> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create transaction log dir {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open transaction log {}", path.display()))?;
    Ok(Sink::TransactionLog {
        path: path.to_path_buf(),
        file: Mutex::new(file),
    })
}

fn console_line(record: &JournalRecord) -> String {
    let ts = chrono::DateTime::parse_from_rfc3339(&record.ts)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| record.ts.clone());
    let mut line = format!("{ts} {:<8} {}", record.level.label(), record.message);
    if let Value::Object(fields) = &record.fields {
        for (key, value) in fields {
            match value {
                Value::Null | Value::Object(_) => {}
                Value::String(s) => line.push_str(&format!(" {key}={s}")),
                other => line.push_str(&format!(" {key}={other}")),
            }
        }
    }
    line
}

/// Read back a transaction log (JSON Lines).
pub fn read_transaction_log(path: &Path) -> Result<Vec<JournalRecord>> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line).with_context(|| format!("parse record in {}", path.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_journal_records_events_in_order() {
        let (journal, buffer) = Journal::in_memory();
        journal.info("write.begin", "writing", json!({ "pattern": "0xAA" }));
        journal.warning("recovery.redo_write", "redo", Value::Null);
        assert_eq!(buffer.events(), vec!["write.begin", "recovery.redo_write"]);
        assert_eq!(buffer.records()[1].level, Level::Warning);
    }

    #[test]
    fn transaction_log_appends_across_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("trn").join("transaction.log");

        let journal = Journal::open(&[Destination::TransactionLog], &path).expect("open");
        journal.info("iteration.start", "first", json!({ "iteration": 0 }));
        drop(journal);

        let journal = Journal::open(&[Destination::TransactionLog], &path).expect("reopen");
        journal.info("iteration.start", "second", json!({ "iteration": 1 }));

        let records = read_transaction_log(&path).expect("read");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "first");
        assert_eq!(records[1].fields["iteration"], 1);
    }

    #[test]
    fn fatal_carries_pattern_and_config_snapshot() {
        let (journal, buffer) = Journal::in_memory();
        let cfg = IoConfig::default();
        journal.fatal(&anyhow::anyhow!("boom"), Some("0xAA"), Some(&cfg));

        let record = &buffer.records()[0];
        assert_eq!(record.level, Level::Critical);
        assert_eq!(record.event, "fatal");
        assert_eq!(record.fields["pattern"], "0xAA");
        assert_eq!(record.fields["config"]["io_write_step"], 2);
    }

    #[test]
    fn console_line_is_human_readable() {
        let record = JournalRecord {
            ts: "2024-05-01T10:20:30.000Z".to_string(),
            level: Level::Info,
            event: "verify.pass".to_string(),
            message: "verify complete".to_string(),
            fields: json!({ "pattern": "0xAA", "config": { "x": 1 } }),
        };
        assert_eq!(
            console_line(&record),
            "2024-05-01 10:20:30 INFO     verify complete pattern=0xAA"
        );
    }
}
