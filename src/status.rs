//! Liveness snapshot derived from the last-run record.

use std::sync::Arc;

use serde::Serialize;

use crate::storage::{LastRun, StateStore};

pub const SERVER_RUNNING: &str = "Server is running";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub status: &'static str,
    #[serde(rename = "lastJobRun")]
    pub last_job_run: LastRun,
}

pub struct StatusReporter {
    store: Arc<dyn StateStore>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: SERVER_RUNNING,
            last_job_run: self.store.last_run().await,
        }
    }
}
