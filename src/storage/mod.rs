//! Persisted run state -- the last-run record and the append-only execution log.
//!
//! [`StateStore`] is the seam shared by the task runner (writer) and the
//! status reporter (reader).  [`FileStateStore`] is the production backend;
//! [`MemoryStateStore`] backs tests.

pub mod file;
pub mod memory;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

pub use self::file::FileStateStore;
pub use self::memory::MemoryStateStore;

/// Prefix of every execution log line.
const LOG_PREFIX: &str = "Task executed at ";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by state store writes (and log reads).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backend refused the operation.
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Instants
// ---------------------------------------------------------------------------

/// Current UTC time truncated to millisecond precision, so that an instant
/// survives a format/parse cycle unchanged.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Render an instant as ISO-8601 with millisecond precision and a `Z` suffix.
pub fn format_instant(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an instant written by [`format_instant`] (any RFC 3339 is accepted).
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn serialize_instant<S: Serializer>(
    at: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_instant(at))
}

// ---------------------------------------------------------------------------
// LastRun
// ---------------------------------------------------------------------------

/// Read-side view of the last-run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastRun {
    /// No run recorded, or the record could not be read.
    Never,
    At(DateTime<Utc>),
}

impl LastRun {
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            LastRun::Never => None,
            LastRun::At(at) => Some(*at),
        }
    }
}

impl fmt::Display for LastRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastRun::Never => f.write_str("Never"),
            LastRun::At(at) => f.write_str(&format_instant(at)),
        }
    }
}

impl Serialize for LastRun {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// One line of the execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    #[serde(serialize_with = "serialize_instant")]
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    /// Entry for a run whose action completed.
    pub fn executed(at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at,
            message: format!("{LOG_PREFIX}{}", format_instant(&at)),
        }
    }

    /// Entry for a run whose action failed.  The cause is flattened onto a
    /// single line.
    pub fn failed(at: DateTime<Utc>, cause: &str) -> Self {
        let cause = cause.replace(['\r', '\n'], " ");
        Self {
            timestamp: at,
            message: format!("{LOG_PREFIX}{} (failed: {cause})", format_instant(&at)),
        }
    }

    /// Parse a log line back into an entry.  Returns `None` for lines that
    /// were not written by this crate.
    pub fn parse_line(line: &str) -> Option<Self> {
        let rest = line.strip_prefix(LOG_PREFIX)?;
        let stamp = rest.split_whitespace().next()?;
        Some(Self {
            timestamp: parse_instant(stamp)?,
            message: line.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// StateStore
// ---------------------------------------------------------------------------

/// Storage for the last-run instant and the execution log.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Replace the last-run record.  Readers observe either the previous
    /// value or the new one, never a partial write.
    async fn record_run(&self, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// The last-run record, or [`LastRun::Never`] if it is missing or
    /// unreadable.  Read failures are logged, not returned.
    async fn last_run(&self) -> LastRun;

    /// Append one entry to the execution log.
    async fn append_log(&self, entry: &LogEntry) -> Result<(), StoreError>;

    /// All log entries in append order.
    async fn read_log(&self) -> Result<Vec<LogEntry>, StoreError>;

    /// The newest `limit` log entries, oldest first.
    async fn read_log_tail(&self, limit: usize) -> Result<Vec<LogEntry>, StoreError> {
        let mut entries = self.read_log().await?;
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_instant_uses_millis_and_z() {
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap();
        assert_eq!(format_instant(&at), "2026-10-14T12:00:00.000Z");
    }

    #[test]
    fn test_now_millis_survives_formatting() {
        let at = now_millis();
        assert_eq!(parse_instant(&format_instant(&at)), Some(at));
    }

    #[test]
    fn test_parse_instant_rejects_garbage() {
        assert_eq!(parse_instant(""), None);
        assert_eq!(parse_instant("yesterday"), None);
        assert_eq!(parse_instant("2026-10-14T12:0"), None);
    }

    #[test]
    fn test_last_run_serializes_as_string() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(serde_json::to_string(&LastRun::Never).unwrap(), "\"Never\"");
        assert_eq!(
            serde_json::to_string(&LastRun::At(at)).unwrap(),
            "\"2026-01-02T03:04:05.000Z\""
        );
    }

    #[test]
    fn test_log_entry_line_format() {
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 13, 0, 0).unwrap();
        let entry = LogEntry::executed(at);
        assert_eq!(entry.message, "Task executed at 2026-10-14T13:00:00.000Z");
        assert_eq!(LogEntry::parse_line(&entry.message), Some(entry));
    }

    #[test]
    fn test_failed_entry_stays_on_one_line() {
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 13, 0, 0).unwrap();
        let entry = LogEntry::failed(at, "disk\nfull");
        assert!(!entry.message.contains('\n'));
        assert!(entry.message.ends_with("(failed: disk full)"));

        let parsed = LogEntry::parse_line(&entry.message).unwrap();
        assert_eq!(parsed.timestamp, at);
    }

    #[test]
    fn test_parse_line_ignores_foreign_lines() {
        assert!(LogEntry::parse_line("something else").is_none());
        assert!(LogEntry::parse_line("Task executed at soon").is_none());
    }
}
