//! The maintenance task and the bookkeeping around each run.

pub mod runner;

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::storage::serialize_instant;

pub use self::runner::TaskRunner;

/// Failure reported by a [`MaintenanceTask`].
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The unit of work performed on every run.
#[async_trait]
pub trait MaintenanceTask: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &str;

    /// Perform the work for the run stamped `at`.
    async fn execute(&self, at: DateTime<Utc>) -> Result<(), TaskError>;
}

/// Default task: the run's bookkeeping (log entry plus last-run record) is
/// the whole job.
#[derive(Debug, Default, Clone, Copy)]
pub struct Heartbeat;

#[async_trait]
impl MaintenanceTask for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn execute(&self, at: DateTime<Utc>) -> Result<(), TaskError> {
        tracing::debug!(%at, "heartbeat");
        Ok(())
    }
}

/// Which entry point started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduled,
    Manual,
    Cli,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Scheduled => "scheduled",
            Trigger::Manual => "manual",
            Trigger::Cli => "cli",
        })
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskResult {
    pub success: bool,
    #[serde(serialize_with = "serialize_instant")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TaskResult {
    pub fn succeeded(timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            timestamp,
            detail: None,
        }
    }

    pub fn failed(timestamp: DateTime<Utc>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            timestamp,
            detail: Some(detail.into()),
        }
    }
}

/// What [`TaskRunner::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run went ahead; see the result for success or failure.
    Finished(TaskResult),
    /// Another run held the guard.  Nothing was executed or written.
    Busy,
}

impl RunOutcome {
    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            RunOutcome::Finished(r) => Some(r),
            RunOutcome::Busy => None,
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
