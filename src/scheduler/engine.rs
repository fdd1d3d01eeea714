use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::scheduler::JobSchedule;
use crate::storage::format_instant;
use crate::task::{RunOutcome, TaskRunner, Trigger};

/// Handle to a running scheduler loop.
///
/// Call [`SchedulerHandle::stop`] to shut the loop down and wait for it.
/// Dropping the handle also stops the loop, without waiting.
pub struct SchedulerHandle {
    shutdown_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
    firings: Arc<AtomicU64>,
}

impl SchedulerHandle {
    /// Number of times the schedule has fired so far.
    pub fn firings(&self) -> u64 {
        self.firings.load(Ordering::SeqCst)
    }

    /// Stop the loop and wait for it to exit.  Runs already in flight keep
    /// going to completion.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.join.await {
            error!(error = %e, "scheduler loop terminated abnormally");
        }
    }
}

/// Arm `schedule` on the current runtime.  Each boundary invokes
/// `runner.run(Trigger::Scheduled)` in its own task.
pub fn start(schedule: JobSchedule, runner: Arc<TaskRunner>) -> SchedulerHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let firings = Arc::new(AtomicU64::new(0));
    let join = tokio::spawn(run_scheduler_loop(
        schedule,
        runner,
        shutdown_rx,
        firings.clone(),
    ));

    SchedulerHandle {
        shutdown_tx,
        join,
        firings,
    }
}

async fn run_scheduler_loop(
    schedule: JobSchedule,
    runner: Arc<TaskRunner>,
    mut shutdown_rx: oneshot::Receiver<()>,
    firings: Arc<AtomicU64>,
) {
    info!(schedule = %schedule, "scheduler started");

    let mut cursor = Utc::now();

    loop {
        let Some(next) = schedule.next_after(&cursor) else {
            warn!(schedule = %schedule, "schedule has no upcoming fire times, idling until shutdown");
            let _ = (&mut shutdown_rx).await;
            break;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(next = %format_instant(&next), wait_secs = wait.as_secs(), "next firing armed");

        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let now = Utc::now();
        if now - next > chrono::Duration::seconds(1) {
            warn!(
                boundary = %format_instant(&next),
                "scheduler woke late, skipping any boundaries missed since"
            );
        }
        cursor = advance_cursor(next, now);
        firings.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(fire(runner.clone()));
    }

    info!("scheduler stopped");
}

/// Search point for the boundary after `fired`.  Never earlier than the
/// boundary just fired, so an early wake-up cannot repeat it; never earlier
/// than `now`, so a suspend or forward clock jump fires once instead of
/// replaying every missed boundary.
fn advance_cursor(fired: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    fired.max(now)
}

/// One firing.  The run gets its own task so a panic inside it is contained
/// and reported here instead of unwinding the scheduler loop.
async fn fire(runner: Arc<TaskRunner>) {
    let run = tokio::spawn(async move { runner.run(Trigger::Scheduled).await });

    match run.await {
        Ok(RunOutcome::Finished(result)) if result.success => {
            info!(at = %format_instant(&result.timestamp), "scheduled task completed successfully");
        }
        Ok(RunOutcome::Finished(result)) => {
            warn!(
                at = %format_instant(&result.timestamp),
                detail = result.detail.as_deref().unwrap_or(""),
                "scheduled task finished with errors"
            );
        }
        Ok(RunOutcome::Busy) => {
            warn!("scheduled firing skipped, a run was already in progress");
        }
        Err(e) => {
            error!(error = %e, "scheduled task panicked");
        }
    }
}
