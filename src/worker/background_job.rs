//! Materializes pending jobs into sessions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::WorkerError;
use crate::jobs::{Job, JobStatus};
use crate::session::SessionService;
use crate::session::model::CreateSessionRequest;
use crate::store::Database;
use crate::worker::{PeriodicCheck, TaskPool};

pub const BACKGROUND_JOB_INTERVAL: Duration = Duration::from_secs(10);

pub struct BackgroundJobWorker {
    db: Arc<dyn Database>,
    sessions: Arc<SessionService>,
    pool: TaskPool,
    profile_id: String,
}

impl BackgroundJobWorker {
    pub fn new(
        db: Arc<dyn Database>,
        sessions: Arc<SessionService>,
        pool: TaskPool,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            sessions,
            pool,
            profile_id: profile_id.into(),
        }
    }

    /// Claim and process up to `max_concurrent_background_workers` pending jobs.
    pub async fn run_once(&self) -> Result<(), WorkerError> {
        let settings = self.db.get_settings(&self.profile_id).await?;
        let limit = settings.max_concurrent_background_workers.max(1);
        let pending = self.db.list_pending_jobs(limit).await?;
        if pending.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = pending.len(), "Processing pending jobs");

        let tasks: Vec<_> = pending.iter().map(|job| self.process(job.id)).collect();
        self.pool.run_all(tasks).await;
        Ok(())
    }

    async fn process(&self, job_id: Uuid) {
        match self.db.claim_job(job_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(job_id = %job_id, "Job already claimed");
                return;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to claim job");
                return;
            }
        }

        let job = match self.db.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id = %job_id, "Claimed job disappeared");
                return;
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to load claimed job");
                self.finish(job_id, JobStatus::Failed, &[]).await;
                return;
            }
        };

        let (status, created) = self.create_sessions(&job).await;
        self.finish(job.id, status, &created).await;
    }

    /// Create the job's sessions one after another, stopping at the first failure.
    async fn create_sessions(&self, job: &Job) -> (JobStatus, Vec<String>) {
        tracing::info!(job_id = %job.id, sessions = job.session_count, "Creating sessions for job");
        let request = CreateSessionRequest {
            name: (!job.name.is_empty()).then(|| job.name.clone()),
            prompt: job.prompt.clone(),
            repo: job.repo.clone(),
            branch: job.branch.clone(),
            profile_id: Some(job.profile_id.clone()),
            require_plan_approval: job.require_plan_approval,
            automation_mode: job.automation_mode,
        };

        let mut created = Vec::with_capacity(job.session_count as usize);
        for index in 0..job.session_count {
            match self.sessions.create_session(&request).await {
                Ok(session) => created.push(session.id),
                Err(e) => {
                    tracing::warn!(
                        job_id = %job.id,
                        index,
                        error_class = e.class(),
                        "Session creation failed, stopping job"
                    );
                    return (JobStatus::Failed, created);
                }
            }
        }
        (JobStatus::Succeeded, created)
    }

    async fn finish(&self, job_id: Uuid, status: JobStatus, session_ids: &[String]) {
        match self.db.complete_job(job_id, status, session_ids).await {
            Ok(true) => tracing::info!(
                job_id = %job_id,
                status = %status,
                sessions_created = session_ids.len(),
                "Job finished"
            ),
            Ok(false) => tracing::warn!(job_id = %job_id, "Job was no longer running"),
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to record job result"),
        }
    }
}

#[async_trait]
impl PeriodicCheck for BackgroundJobWorker {
    fn name(&self) -> &str {
        "background_job"
    }

    async fn interval(&self) -> Duration {
        BACKGROUND_JOB_INTERVAL
    }

    async fn run_check(&self) -> Result<(), WorkerError> {
        self.run_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobService;
    use crate::jobs::model::CreateJobRequest;
    use crate::ratelimit::RateLimiter;
    use crate::remote::RemoteSessionClient;
    use crate::remote::client::DEFAULT_BASE_URL;
    use crate::session::SessionState;
    use crate::store::LibSqlBackend;

    async fn setup() -> (Arc<dyn Database>, JobService, BackgroundJobWorker) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        // No API key: sessions are recorded locally only.
        let sessions = Arc::new(SessionService::new(
            db.clone(),
            Arc::new(RemoteSessionClient::new(DEFAULT_BASE_URL).unwrap()),
            Vec::new(),
            Arc::new(RateLimiter::default()),
        ));
        let worker = BackgroundJobWorker::new(db.clone(), sessions, TaskPool::new(2), "default");
        (db.clone(), JobService::new(db), worker)
    }

    fn request(count: u32) -> CreateJobRequest {
        CreateJobRequest {
            name: Some("refactor".into()),
            repo: "o/r".into(),
            branch: "main".into(),
            prompt: "split the parser module".into(),
            session_count: count,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn pending_job_creates_all_sessions() {
        let (db, jobs, worker) = setup().await;
        let job = jobs.create_job(&request(3)).await.unwrap();

        worker.run_once().await.unwrap();

        let done = jobs.get_job(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert_eq!(done.session_ids.len(), 3);
        for id in &done.session_ids {
            let session = db.get_session(id).await.unwrap().unwrap();
            assert_eq!(session.state, SessionState::Queued);
            assert_eq!(session.title, "refactor");
        }
    }

    #[tokio::test]
    async fn terminal_jobs_are_not_reprocessed() {
        let (db, jobs, worker) = setup().await;
        let job = jobs.create_job(&request(2)).await.unwrap();

        worker.run_once().await.unwrap();
        worker.run_once().await.unwrap();

        let done = jobs.get_job(job.id).await.unwrap();
        assert_eq!(done.session_ids.len(), 2);
        let all = db
            .list_sessions(&Default::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn batch_is_capped_by_settings() {
        let (db, jobs, worker) = setup().await;
        let mut settings = db.get_settings("default").await.unwrap();
        settings.max_concurrent_background_workers = 1;
        db.put_settings("default", &settings).await.unwrap();

        jobs.create_job(&request(1)).await.unwrap();
        jobs.create_job(&request(1)).await.unwrap();

        worker.run_once().await.unwrap();
        assert_eq!(db.list_pending_jobs(10).await.unwrap().len(), 1);

        worker.run_once().await.unwrap();
        assert!(db.list_pending_jobs(10).await.unwrap().is_empty());
    }
}
