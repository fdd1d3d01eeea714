use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronSchedule;
use thiserror::Error;

/// Top of every hour.
pub const DEFAULT_SCHEDULE: &str = "0 * * * *";

/// Longest preview window, in hours (ten years).
const MAX_PREVIEW_HOURS: u64 = 24 * 365 * 10;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("cron expression '{expr}' has {count} fields, expected 5, 6 or 7")]
    FieldCount { expr: String, count: usize },

    #[error("invalid cron expression '{expr}': {source}")]
    Invalid {
        expr: String,
        #[source]
        source: cron::error::Error,
    },
}

/// A parsed cron schedule.
///
/// Accepts the classic five fields (`minute hour day-of-month month
/// day-of-week`) as well as the six/seven-field forms with leading seconds
/// and trailing year.
#[derive(Debug, Clone)]
pub struct JobSchedule {
    expr: String,
    schedule: CronSchedule,
}

impl JobSchedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => format!("0 {}", fields.join(" ")),
            6 | 7 => fields.join(" "),
            count => {
                return Err(ScheduleError::FieldCount {
                    expr: expr.to_string(),
                    count,
                })
            }
        };

        let schedule = CronSchedule::from_str(&normalized).map_err(|source| ScheduleError::Invalid {
            expr: expr.to_string(),
            source,
        })?;

        Ok(Self {
            expr: expr.trim().to_string(),
            schedule,
        })
    }

    /// The expression as configured.
    pub fn expression(&self) -> &str {
        &self.expr
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(after).next()
    }

    /// Fire times in `(from, from + hours]`, in order.  The window is capped
    /// at ten years.
    pub fn preview(&self, from: &DateTime<Utc>, hours: u64) -> Vec<DateTime<Utc>> {
        let end = *from + Duration::hours(hours.min(MAX_PREVIEW_HOURS) as i64);
        self.schedule
            .after(from)
            .take_while(|t| *t <= end)
            .collect()
    }
}

impl fmt::Display for JobSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}
