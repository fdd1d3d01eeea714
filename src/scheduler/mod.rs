//! Recurring wall-clock scheduling of the maintenance task.

pub mod cron;
pub mod engine;

pub use self::cron::{JobSchedule, ScheduleError, DEFAULT_SCHEDULE};
pub use self::engine::{start, SchedulerHandle};
