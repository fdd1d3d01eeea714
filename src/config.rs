//! TOML configuration with environment overrides.
//!
//! Sources, lowest precedence first: compiled-in defaults, a TOML file
//! (`--config`, `$TASKBEAT_CONFIG` or `/etc/taskbeat/taskbeat.toml`), then
//! the `PORT` and `JOB_SECRET_TOKEN` environment variables.  Command-line
//! flags are applied on top by the binary.
//!
//! Resolution runs before logging is configured, so it reports through
//! [`ConfigNotice`]s that the caller emits afterwards.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::scheduler::DEFAULT_SCHEDULE;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "TASKBEAT_CONFIG";
/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "PORT";
/// Environment variable holding the manual-trigger secret.
pub const SECRET_ENV: &str = "JOB_SECRET_TOKEN";

const SYSTEM_CONFIG_PATH: &str = "/etc/taskbeat/taskbeat.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Parse the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Resolve the effective configuration from the process environment.
    ///
    /// An explicit `path` must load.  Without one, `$TASKBEAT_CONFIG` and then
    /// `/etc/taskbeat/taskbeat.toml` are tried, falling back to defaults.
    /// `PORT` and `JOB_SECRET_TOKEN` are applied last.
    pub fn resolve(path: Option<&Path>) -> Result<Resolved> {
        Self::resolve_with(
            path,
            |key| std::env::var(key).ok(),
            Path::new(SYSTEM_CONFIG_PATH),
        )
    }

    /// [`AppConfig::resolve`] over an arbitrary variable lookup and system
    /// config location.
    pub fn resolve_with(
        path: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
        system_path: &Path,
    ) -> Result<Resolved> {
        let mut notices = Vec::new();

        let mut config = match path {
            Some(path) => {
                let config = Self::load(path)?;
                notices.push(ConfigNotice::Loaded(path.to_path_buf()));
                config
            }
            None => Self::discover(lookup(CONFIG_ENV).map(PathBuf::from), system_path, &mut notices),
        };
        config.apply_env_from(lookup, &mut notices);

        Ok(Resolved { config, notices })
    }

    fn discover(
        env_path: Option<PathBuf>,
        system_path: &Path,
        notices: &mut Vec<ConfigNotice>,
    ) -> Self {
        let candidates = env_path
            .into_iter()
            .chain(system_path.exists().then(|| system_path.to_path_buf()));

        for candidate in candidates {
            match Self::load(&candidate) {
                Ok(config) => {
                    notices.push(ConfigNotice::Loaded(candidate));
                    return config;
                }
                Err(e) => notices.push(ConfigNotice::Unloadable {
                    path: candidate,
                    error: format!("{e:#}"),
                }),
            }
        }

        notices.push(ConfigNotice::Defaults);
        Self::default()
    }

    /// Apply `PORT` and `JOB_SECRET_TOKEN` overrides from `lookup`.
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
        notices: &mut Vec<ConfigNotice>,
    ) {
        if let Some(raw) = lookup(PORT_ENV) {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(e) => notices.push(ConfigNotice::InvalidPort {
                    value: raw,
                    error: e.to_string(),
                }),
            }
        }

        if let Some(secret) = lookup(SECRET_ENV) {
            // An empty variable means "no secret", same as unset.
            self.job.secret_token = Some(secret).filter(|s| !s.is_empty());
        }
    }
}

/// Effective configuration plus what happened while resolving it.
#[derive(Debug)]
pub struct Resolved {
    pub config: AppConfig,
    pub notices: Vec<ConfigNotice>,
}

/// Something worth logging about config resolution.  Collected before the
/// subscriber exists, since the logging section itself comes from the config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigNotice {
    Loaded(PathBuf),
    Unloadable { path: PathBuf, error: String },
    Defaults,
    InvalidPort { value: String, error: String },
}

impl ConfigNotice {
    pub fn emit(&self) {
        match self {
            ConfigNotice::Loaded(path) => info!(path = %path.display(), "loaded configuration"),
            ConfigNotice::Unloadable { path, error } => warn!(
                path = %path.display(),
                %error,
                "config file could not be loaded, trying fallback"
            ),
            ConfigNotice::Defaults => debug!("no config file found, using compiled-in defaults"),
            ConfigNotice::InvalidPort { value, error } => {
                warn!(%value, %error, "ignoring invalid PORT")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface address to bind.
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: {}", self.bind))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Cron expression, five or six fields.
    pub schedule: String,
    /// Shared secret required by the manual trigger.  `None` or empty
    /// disables the check.
    pub secret_token: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            schedule: DEFAULT_SCHEDULE.to_string(),
            secret_token: None,
        }
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("schedule", &self.schedule)
            .field("secret_token", &self.secret_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Plain-text file holding the last-run instant.
    pub last_run_path: PathBuf,
    /// Append-only execution log.
    pub log_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            last_run_path: PathBuf::from("data/last-run.txt"),
            log_path: PathBuf::from("data/logs/daily-task.log"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Text,
    Json,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
