//! Durable plain-text markers: the write-ahead marker and the last committed pattern.
//!
//! Each marker is a single-value file whose entire content is a pattern token.
//! Writes go through a synced temp file and a rename, followed by a sync of
//! the directory, so a marker is either absent or holds a complete value.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::StartupState;
use crate::io::config::IntegrityPaths;

/// Current content of both markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerSnapshot {
    pub wal: Option<String>,
    pub last_written: Option<String>,
}

impl MarkerSnapshot {
    pub fn with_target(self, target_exists: bool) -> StartupState {
        StartupState {
            wal: self.wal,
            last_written: self.last_written,
            target_exists,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
    wal_path: PathBuf,
    last_written_path: PathBuf,
}

impl MarkerStore {
    pub fn new(paths: &IntegrityPaths) -> Self {
        Self {
            dir: paths.transaction_log_dir.clone(),
            wal_path: paths.wal_path.clone(),
            last_written_path: paths.last_written_path.clone(),
        }
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    pub fn last_written_path(&self) -> &Path {
        &self.last_written_path
    }

    pub fn read_wal(&self) -> Result<Option<String>> {
        read_marker(&self.wal_path)
    }

    pub fn write_wal(&self, pattern: &str) -> Result<()> {
        debug!(path = %self.wal_path.display(), pattern, "writing WAL marker");
        write_durable(&self.dir, &self.wal_path, pattern)
    }

    /// Remove the WAL marker. Absence is not an error.
    pub fn clear_wal(&self) -> Result<()> {
        debug!(path = %self.wal_path.display(), "clearing WAL marker");
        match fs::remove_file(&self.wal_path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("remove {}", self.wal_path.display()));
            }
        }
        sync_dir(&self.dir)
    }

    pub fn read_last_written(&self) -> Result<Option<String>> {
        read_marker(&self.last_written_path)
    }

    pub fn write_last_written(&self, pattern: &str) -> Result<()> {
        debug!(path = %self.last_written_path.display(), pattern, "writing last-written marker");
        write_durable(&self.dir, &self.last_written_path, pattern)
    }

    pub fn snapshot(&self) -> Result<MarkerSnapshot> {
        Ok(MarkerSnapshot {
            wal: self.read_wal()?,
            last_written: self.read_last_written()?,
        })
    }
}

fn read_marker(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read marker {}", path.display())),
    }
}

fn write_durable(dir: &Path, path: &Path, contents: &str) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("create temp marker {}", tmp_path.display()))?;
        file.write_all(contents.as_bytes())
            .with_context(|| format!("write temp marker {}", tmp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("sync temp marker {}", tmp_path.display()))?;
    }
    fs::rename(&tmp_path, path).with_context(|| format!("replace marker {}", path.display()))?;
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .with_context(|| format!("sync directory {}", dir.display()))
}

// Directory handles cannot be synced on this platform; the rename is as durable as it gets.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
