use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use taskbeat::config::{AppConfig, Resolved};
use taskbeat::scheduler::JobSchedule;
use taskbeat::status::StatusReporter;
use taskbeat::storage::StateStore;
use taskbeat::task::{RunOutcome, TaskRunner, Trigger};

#[derive(Parser)]
#[command(
    name = "taskbeat",
    about = "Runs one maintenance task on a cron schedule, with an authenticated manual trigger",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $TASKBEAT_CONFIG, then /etc/taskbeat/taskbeat.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (scheduler + HTTP trigger/status server)
    Serve {
        /// Bind address (IP only; see --port)
        #[arg(long)]
        bind: Option<String>,

        /// Listen port (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the task once now and print the result
    RunOnce,

    /// Print the current status snapshot
    Status,

    /// Show recent execution log entries
    History {
        /// Number of most recent entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Inspect the configured schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Preview when the task will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let Resolved {
        mut config,
        notices,
    } = AppConfig::resolve(cli.config.as_deref())?;
    taskbeat::telemetry::init(&config.logging);
    for notice in &notices {
        notice.emit();
    }

    match cli.command {
        Commands::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            tracing::info!(
                bind = %config.server.bind,
                port = config.server.port,
                schedule = %config.job.schedule,
                "Starting taskbeat daemon"
            );
            taskbeat::serve(config).await?;
        }
        Commands::RunOnce => {
            let runner = TaskRunner::with_heartbeat(taskbeat::open_store(&config));
            match runner.run(Trigger::Cli).await {
                RunOutcome::Finished(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    if !result.success {
                        bail!(
                            "task reported a failure: {}",
                            result.detail.unwrap_or_default()
                        );
                    }
                }
                RunOutcome::Busy => bail!("a run is already in progress"),
            }
        }
        Commands::Status => {
            let reporter = StatusReporter::new(taskbeat::open_store(&config));
            let snapshot = reporter.snapshot().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::History { limit } => {
            let store = taskbeat::open_store(&config);
            let entries = store.read_log_tail(limit).await?;
            if entries.is_empty() {
                println!("No runs logged yet.");
            }
            for entry in &entries {
                println!("{}", entry.message);
            }
        }
        Commands::Schedule { action } => match action {
            ScheduleAction::DryRun { hours } => {
                let schedule = JobSchedule::parse(&config.job.schedule)?;
                let preview = schedule.preview(&chrono::Utc::now(), hours);
                if preview.is_empty() {
                    println!("No runs scheduled in next {} hours.", hours);
                } else {
                    println!("Upcoming runs ({}, next {} hours):", schedule, hours);
                    for time in preview {
                        println!("{}", taskbeat::storage::format_instant(&time));
                    }
                }
            }
        },
    }

    Ok(())
}
