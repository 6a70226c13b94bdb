//! Turns due cron jobs into pending jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::WorkerError;
use crate::jobs::{CronJob, CronSchedule, JobService};
use crate::store::Database;
use crate::worker::PeriodicCheck;

pub const CRON_INTERVAL: Duration = Duration::from_secs(60);

pub struct CronWorker {
    db: Arc<dyn Database>,
    jobs: Arc<JobService>,
}

impl CronWorker {
    pub fn new(db: Arc<dyn Database>, jobs: Arc<JobService>) -> Self {
        Self { db, jobs }
    }

    /// Fire every enabled cron job whose next fire time has passed.
    ///
    /// Returns how many jobs were created.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize, WorkerError> {
        let cron_jobs = self.db.list_enabled_cron_jobs().await?;
        let mut fired = 0;
        for cron_job in &cron_jobs {
            match self.fire_if_due(cron_job, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        cron_job_id = %cron_job.id,
                        error = %e,
                        "Cron job trigger failed"
                    )
                }
            }
        }
        Ok(fired)
    }

    async fn fire_if_due(
        &self,
        cron_job: &CronJob,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkerError> {
        let schedule = match CronSchedule::parse(&cron_job.schedule) {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::warn!(
                    cron_job_id = %cron_job.id,
                    error = %e,
                    "Skipping cron job with invalid schedule"
                );
                return Ok(false);
            }
        };

        let last_run = cron_job.last_run_at.unwrap_or(cron_job.created_at);
        if !schedule.is_due(last_run, now) {
            return Ok(false);
        }

        // Job first, then the marker: a crash in between re-fires rather than skips.
        let job = self.jobs.create_job(&cron_job.to_job_request()).await?;
        self.db.set_last_run_at(cron_job.id, now).await?;
        tracing::info!(cron_job_id = %cron_job.id, job_id = %job.id, "Cron job triggered");
        Ok(true)
    }
}

#[async_trait]
impl PeriodicCheck for CronWorker {
    fn name(&self) -> &str {
        "cron"
    }

    async fn interval(&self) -> Duration {
        CRON_INTERVAL
    }

    async fn run_check(&self) -> Result<(), WorkerError> {
        self.run_once(Utc::now()).await.map(|_| ())
    }
}
