//! File-backed state store.
//!
//! The last-run record is a single plain-text file replaced atomically
//! (write to a temp file in the same directory, sync, rename).  The
//! execution log is a plain-text file opened in append mode for every
//! entry, with appends serialized through a `tokio::sync::Mutex`.  Nothing
//! rotates the log; `read_log_tail` streams it so reading recent history
//! stays bounded by the tail size.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{format_instant, parse_instant, LastRun, LogEntry, StateStore, StoreError};

pub struct FileStateStore {
    last_run_path: PathBuf,
    log_path: PathBuf,
    log_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(last_run_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            last_run_path: last_run_path.into(),
            log_path: log_path.into(),
            log_lock: Mutex::new(()),
        }
    }

    pub fn last_run_path(&self) -> &Path {
        &self.last_run_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

/// Directory containing `path`, treating a bare file name as the current
/// directory.
fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

async fn write_and_rename(tmp: &Path, target: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(tmp).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(tmp, target).await
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn record_run(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let target = &self.last_run_path;
        let write_err = |source| StoreError::Write {
            path: target.clone(),
            source,
        };

        let dir = parent_dir(target);
        fs::create_dir_all(dir).await.map_err(write_err)?;

        // Unique per write so concurrent writers never share a temp file.
        let stem = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "last-run".to_string());
        let tmp = dir.join(format!(".{stem}.{}.tmp", Uuid::new_v4().simple()));

        if let Err(e) = write_and_rename(&tmp, target, format_instant(&at).as_bytes()).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        debug!(path = %target.display(), at = %format_instant(&at), "last run recorded");
        Ok(())
    }

    async fn last_run(&self) -> LastRun {
        let path = &self.last_run_path;
        match fs::read_to_string(path).await {
            Ok(raw) => match parse_instant(&raw) {
                Some(at) => LastRun::At(at),
                None => {
                    warn!(path = %path.display(), contents = %raw.trim(), "last run record is not a valid instant");
                    LastRun::Never
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no last run record yet");
                LastRun::Never
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read last run record");
                LastRun::Never
            }
        }
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        let path = &self.log_path;
        let write_err = |source| StoreError::Write {
            path: path.clone(),
            source,
        };

        let mut line = entry.message.clone();
        line.push('\n');

        let _guard = self.log_lock.lock().await;
        fs::create_dir_all(parent_dir(path)).await.map_err(write_err)?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(write_err)?;
        file.write_all(line.as_bytes()).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;

        Ok(())
    }

    async fn read_log(&self) -> Result<Vec<LogEntry>, StoreError> {
        let path = &self.log_path;
        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };

        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            match LogEntry::parse_line(line) {
                Some(entry) => entries.push(entry),
                None if line.trim().is_empty() => {}
                None => debug!(path = %path.display(), line = lineno + 1, "skipping unrecognized log line"),
            }
        }
        Ok(entries)
    }

    async fn read_log_tail(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let path = &self.log_path;
        let read_err = |source| StoreError::Read {
            path: path.clone(),
            source,
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let file = match fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_err(e)),
        };

        let mut tail = VecDeque::with_capacity(limit.min(256));
        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await.map_err(read_err)? {
            if let Some(entry) = LogEntry::parse_line(&line) {
                if tail.len() == limit {
                    tail.pop_front();
                }
                tail.push_back(entry);
            }
        }
        Ok(tail.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
