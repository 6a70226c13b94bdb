//! Approves plans waiting for approval.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::session::model::SessionFilter;
use crate::session::{SessionService, SessionState};
use crate::store::Database;
use crate::worker::PeriodicCheck;
use crate::worker::polling::settings_or_default;

pub struct AutoApprovalWorker {
    db: Arc<dyn Database>,
    sessions: Arc<SessionService>,
    profile_id: String,
}

impl AutoApprovalWorker {
    pub fn new(
        db: Arc<dyn Database>,
        sessions: Arc<SessionService>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            sessions,
            profile_id: profile_id.into(),
        }
    }

    /// Approve every eligible session in `AWAITING_PLAN_APPROVAL`.
    ///
    /// Returns how many were approved by this pass.
    pub async fn run_once(&self) -> Result<usize, WorkerError> {
        let settings = self.db.get_settings(&self.profile_id).await?;
        if !settings.auto_approval_enabled {
            tracing::debug!("Auto approval disabled");
            return Ok(0);
        }

        let filter = SessionFilter {
            profile_id: Some(self.profile_id.clone()),
            ..SessionFilter::in_state(SessionState::AwaitingPlanApproval)
        };
        let waiting = self.db.list_sessions(&filter).await?;
        if waiting.is_empty() {
            return Ok(0);
        }

        let eligible = if settings.auto_approval_all_sessions {
            None
        } else {
            Some(self.auto_approval_job_sessions().await?)
        };

        let mut approved = 0;
        for session in &waiting {
            if eligible.as_ref().is_some_and(|ids| !ids.contains(&session.id)) {
                continue;
            }
            match self.sessions.approve_plan(&session.id).await {
                Ok(true) => {
                    approved += 1;
                    tracing::info!(session_id = %session.id, "Plan auto-approved");
                }
                Ok(false) => {
                    tracing::debug!(session_id = %session.id, "Plan no longer awaiting approval")
                }
                Err(e) => tracing::warn!(
                    session_id = %session.id,
                    error_class = e.class(),
                    "Auto-approval failed"
                ),
            }
        }
        Ok(approved)
    }

    /// Sessions spawned by jobs that opted into auto approval.
    async fn auto_approval_job_sessions(&self) -> Result<HashSet<String>, WorkerError> {
        let jobs = self.db.list_jobs().await?;
        Ok(jobs
            .into_iter()
            .filter(|job| job.auto_approval && job.profile_id == self.profile_id)
            .flat_map(|job| job.session_ids)
            .collect())
    }
}

#[async_trait]
impl PeriodicCheck for AutoApprovalWorker {
    fn name(&self) -> &str {
        "auto_approval"
    }

    async fn interval(&self) -> Duration {
        settings_or_default(self.db.as_ref(), &self.profile_id)
            .await
            .auto_approval_interval()
    }

    async fn run_check(&self) -> Result<(), WorkerError> {
        self.run_once().await.map(|_| ())
    }
}
