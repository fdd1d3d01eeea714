//! taskbeat -- one maintenance task on a cron schedule, with an
//! authenticated manual trigger and a status endpoint.
//!
//! The scheduler and the trigger gateway both drive the same
//! [`task::TaskRunner`], which records every run in a [`storage::StateStore`]
//! that the [`status::StatusReporter`] reads back.

pub mod api;
pub mod config;
pub mod gateway;
pub mod scheduler;
pub mod status;
pub mod storage;
pub mod task;
pub mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::AppConfig;
use crate::storage::{FileStateStore, StateStore};
use crate::task::TaskRunner;

/// File-backed store at the configured paths.
pub fn open_store(config: &AppConfig) -> Arc<dyn StateStore> {
    Arc::new(FileStateStore::new(
        config.storage.last_run_path.clone(),
        config.storage.log_path.clone(),
    ))
}

/// Start the daemon: scheduler plus HTTP listener, until Ctrl-C / SIGTERM.
pub async fn serve(config: AppConfig) -> Result<()> {
    // 1. Storage and runner
    let store = open_store(&config);
    tracing::info!(
        last_run = %config.storage.last_run_path.display(),
        log = %config.storage.log_path.display(),
        "using file state store"
    );
    let runner = Arc::new(TaskRunner::with_heartbeat(store));

    // 2. Scheduler
    let schedule = scheduler::JobSchedule::parse(&config.job.schedule)
        .context("invalid job schedule")?;
    let scheduler = scheduler::start(schedule, runner.clone());

    // 3. API server
    let addr = config.server.socket_addr()?;
    let state = api::state::AppState::new(runner, config.job.secret_token.clone());
    let app = api::router(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            scheduler.stop().await;
            return Err(e).with_context(|| format!("failed to bind {addr}"));
        }
    };
    tracing::info!(%addr, "taskbeat listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.stop().await;
    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
