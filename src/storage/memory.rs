//! In-memory state store for tests and embedding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{LastRun, LogEntry, StateStore, StoreError};

#[derive(Debug, Default)]
struct Inner {
    last_run: Option<DateTime<Utc>>,
    log: Vec<LogEntry>,
}

/// Keeps the last-run record and log in process memory.
///
/// Writes can be made to fail with [`MemoryStateStore::set_fail_writes`] to
/// exercise persistence-failure paths.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When `true`, `record_run` and `append_log` return
    /// [`StoreError::Unavailable`] without changing state.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn record_run(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().last_run = Some(at);
        Ok(())
    }

    async fn last_run(&self) -> LastRun {
        self.lock().last_run.map_or(LastRun::Never, LastRun::At)
    }

    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError> {
        self.check_writable()?;
        self.lock().log.push(entry.clone());
        Ok(())
    }

    async fn read_log(&self) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self.lock().log.clone())
    }
}
