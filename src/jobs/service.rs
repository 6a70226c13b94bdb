//! Job creation and lookup.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::jobs::model::{CreateJobRequest, Job, JobStatus};
use crate::settings::DEFAULT_PROFILE_ID;
use crate::store::Database;
use crate::validation;

pub struct JobService {
    db: Arc<dyn Database>,
}

impl JobService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Validate and persist a new job in `PENDING`.
    pub async fn create_job(&self, request: &CreateJobRequest) -> Result<Job, ServiceError> {
        let name = request.name.clone().unwrap_or_default();
        validation::validate_name(&name)?;
        validation::validate_repo(&request.repo)?;
        validation::validate_branch(&request.branch)?;
        validation::validate_prompt(&request.prompt)?;
        validation::validate_session_count(request.session_count)?;

        let job = Job {
            id: Uuid::new_v4(),
            name,
            repo: request.repo.clone(),
            branch: request.branch.clone(),
            prompt: request.prompt.clone(),
            session_count: request.session_count,
            auto_approval: request.auto_approval,
            automation_mode: request.automation_mode,
            require_plan_approval: request.require_plan_approval,
            cron_job_id: request.cron_job_id,
            background: request.background,
            profile_id: request
                .profile_id
                .clone()
                .unwrap_or_else(|| DEFAULT_PROFILE_ID.to_string()),
            status: JobStatus::Pending,
            session_ids: Vec::new(),
            created_at: Utc::now(),
        };
        self.db.insert_job(&job).await?;
        tracing::debug!(job_id = %job.id, sessions = job.session_count, "Job created");
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Job, ServiceError> {
        self.db
            .get_job(id)
            .await?
            .ok_or_else(|| ServiceError::JobNotFound { id: id.to_string() })
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, ServiceError> {
        Ok(self.db.list_jobs().await?)
    }
}
