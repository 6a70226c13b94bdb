//! Jobs and recurring cron jobs.

pub mod model;
pub mod schedule;
pub mod service;

pub use model::{CronJob, Job, JobStatus};
pub use schedule::CronSchedule;
pub use service::JobService;
