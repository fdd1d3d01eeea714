use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use super::{panic_message, Heartbeat, MaintenanceTask, RunOutcome, TaskError, TaskResult, Trigger};
use crate::storage::{format_instant, now_millis, LogEntry, StateStore};

/// Clears the running flag when dropped, including during a panic unwind.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs the maintenance task at most once at a time and records every run.
///
/// Both the scheduler and the trigger gateway call [`TaskRunner::run`]; the
/// guard lives here so neither caller has to coordinate with the other.
pub struct TaskRunner {
    store: Arc<dyn StateStore>,
    task: Arc<dyn MaintenanceTask>,
    running: AtomicBool,
}

impl TaskRunner {
    pub fn new(store: Arc<dyn StateStore>, task: Arc<dyn MaintenanceTask>) -> Self {
        Self {
            store,
            task,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_heartbeat(store: Arc<dyn StateStore>) -> Self {
        Self::new(store, Arc::new(Heartbeat))
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Whether a run currently holds the guard.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    /// Execute one run.
    ///
    /// Returns [`RunOutcome::Busy`] immediately if another run is in
    /// progress.  Otherwise executes the task, appends one log entry and
    /// records the run instant, whether or not the task succeeded.  Every
    /// failure along the way ends up in [`TaskResult::detail`].
    pub async fn run(&self, trigger: Trigger) -> RunOutcome {
        let Some(_guard) = self.try_acquire() else {
            warn!(%trigger, task = self.task.name(), "run already in progress, rejecting");
            return RunOutcome::Busy;
        };

        let at = now_millis();
        let stamp = format_instant(&at);
        info!(%trigger, task = self.task.name(), at = %stamp, "running task");

        let mut failures = Vec::new();

        // A panicking task is an ordinary failure: it still gets a log line
        // and a last-run record.
        let executed = AssertUnwindSafe(self.task.execute(at))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(TaskError::Failed(format!(
                    "task panicked: {}",
                    panic_message(payload)
                )))
            });

        let entry = match executed {
            Ok(()) => LogEntry::executed(at),
            Err(e) => {
                warn!(%trigger, task = self.task.name(), error = %e, "task failed");
                let cause = e.to_string();
                failures.push(format!("task failed: {cause}"));
                LogEntry::failed(at, &cause)
            }
        };

        if let Err(e) = self.store.append_log(&entry).await {
            error!(%trigger, error = %e, "failed to append execution log");
            failures.push(e.to_string());
        }

        if let Err(e) = self.store.record_run(at).await {
            error!(%trigger, error = %e, "failed to record last run");
            failures.push(e.to_string());
        }

        let result = if failures.is_empty() {
            info!(%trigger, at = %stamp, "task completed");
            TaskResult::succeeded(at)
        } else {
            TaskResult::failed(at, failures.join("; "))
        };

        RunOutcome::Finished(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LastRun, MemoryStateStore};
    use anyhow::Context;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FailingTask;

    #[async_trait]
    impl MaintenanceTask for FailingTask {
        fn name(&self) -> &str {
            "failing"
        }

        async fn execute(&self, _at: DateTime<Utc>) -> Result<(), TaskError> {
            Err(TaskError::Failed("upstream unavailable".to_string()))
        }
    }

    /// Blocks inside `execute` until released.
    #[derive(Default)]
    struct GatedTask {
        release: Notify,
    }

    #[async_trait]
    impl MaintenanceTask for GatedTask {
        fn name(&self) -> &str {
            "gated"
        }

        async fn execute(&self, _at: DateTime<Utc>) -> Result<(), TaskError> {
            self.release.notified().await;
            Ok(())
        }
    }

    fn finished(outcome: RunOutcome) -> TaskResult {
        match outcome {
            RunOutcome::Finished(r) => r,
            RunOutcome::Busy => panic!("expected a finished run"),
        }
    }

    #[tokio::test]
    async fn test_successful_run_logs_and_records() {
        let store = Arc::new(MemoryStateStore::new());
        let runner = TaskRunner::with_heartbeat(store.clone());

        let result = finished(runner.run(Trigger::Manual).await);
        assert!(result.success);
        assert!(result.detail.is_none());

        assert_eq!(store.last_run().await, LastRun::At(result.timestamp));
        let log = store.read_log().await.unwrap();
        assert_eq!(log, vec![LogEntry::executed(result.timestamp)]);
    }

    #[tokio::test]
    async fn test_repeated_runs_accumulate() {
        let store = Arc::new(MemoryStateStore::new());
        let runner = TaskRunner::with_heartbeat(store.clone());

        let mut last = None;
        for _ in 0..5 {
            last = Some(finished(runner.run(Trigger::Scheduled).await));
        }

        assert_eq!(store.read_log().await.unwrap().len(), 5);
        assert_eq!(store.last_run().await, LastRun::At(last.unwrap().timestamp));
    }

    #[tokio::test]
    async fn test_failed_task_still_records_run() {
        let store = Arc::new(MemoryStateStore::new());
        let runner = TaskRunner::new(store.clone(), Arc::new(FailingTask));

        let result = finished(runner.run(Trigger::Scheduled).await);
        assert!(!result.success);
        assert!(result.detail.as_deref().unwrap().contains("upstream unavailable"));

        assert_eq!(store.last_run().await, LastRun::At(result.timestamp));
        let log = store.read_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].message.contains("(failed: upstream unavailable)"));
    }

    #[tokio::test]
    async fn test_write_failures_surface_in_detail() {
        let store = Arc::new(MemoryStateStore::new());
        store.set_fail_writes(true);
        let runner = TaskRunner::with_heartbeat(store.clone());

        let result = finished(runner.run(Trigger::Manual).await);
        assert!(!result.success);
        let detail = result.detail.unwrap();
        assert!(detail.contains("state store unavailable"), "{detail}");

        // The runner stays usable once the store recovers.
        store.set_fail_writes(false);
        assert!(finished(runner.run(Trigger::Manual).await).success);
    }

    struct PanickingTask;

    #[async_trait]
    impl MaintenanceTask for PanickingTask {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn execute(&self, _at: DateTime<Utc>) -> Result<(), TaskError> {
            panic!("task blew up");
        }
    }

    #[tokio::test]
    async fn test_panicking_task_is_recorded_as_failure() {
        let store = Arc::new(MemoryStateStore::new());
        let runner = TaskRunner::new(store.clone(), Arc::new(PanickingTask));

        let result = finished(runner.run(Trigger::Manual).await);
        assert!(!result.success);
        let detail = result.detail.as_deref().unwrap();
        assert!(detail.contains("task panicked: task blew up"), "{detail}");
        assert!(!runner.is_running());

        assert_eq!(store.last_run().await, LastRun::At(result.timestamp));
        let log = store.read_log().await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].timestamp, result.timestamp);
        assert!(log[0].message.contains("(failed: task panicked: task blew up)"));

        // The guard is free again.
        assert!(!finished(runner.run(Trigger::Manual).await).success);
        assert_eq!(store.read_log().await.unwrap().len(), 2);
    }

    /// Fails through an `anyhow` chain.
    struct MisconfiguredTask;

    #[async_trait]
    impl MaintenanceTask for MisconfiguredTask {
        fn name(&self) -> &str {
            "misconfigured"
        }

        async fn execute(&self, _at: DateTime<Utc>) -> Result<(), TaskError> {
            let _days: u32 = "thirty"
                .parse()
                .context("invalid retention setting")?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_anyhow_error_from_task_is_reported() {
        let store = Arc::new(MemoryStateStore::new());
        let runner = TaskRunner::new(store.clone(), Arc::new(MisconfiguredTask));

        let result = finished(runner.run(Trigger::Cli).await);
        assert!(!result.success);
        assert_eq!(
            result.detail.as_deref(),
            Some("task failed: invalid retention setting")
        );
        assert!(store.read_log().await.unwrap()[0]
            .message
            .ends_with("(failed: invalid retention setting)"));
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected_as_busy() {
        let store = Arc::new(MemoryStateStore::new());
        let task = Arc::new(GatedTask::default());
        let runner = Arc::new(TaskRunner::new(store.clone(), task.clone()));

        let first = tokio::spawn({
            let runner = runner.clone();
            async move { runner.run(Trigger::Scheduled).await }
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while !runner.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("first run never started");

        assert_eq!(runner.run(Trigger::Manual).await, RunOutcome::Busy);
        assert!(store.read_log().await.unwrap().is_empty());

        task.release.notify_one();
        let result = finished(first.await.unwrap());
        assert!(result.success);
        assert!(!runner.is_running());
        assert_eq!(store.read_log().await.unwrap().len(), 1);
    }
}
