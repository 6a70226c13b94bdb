//! Deletes session branches nobody has pushed to in a while.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::WorkerError;
use crate::github::{Branch, GitHubApi, split_repo};
use crate::store::Database;
use crate::worker::PeriodicCheck;
use crate::worker::polling::settings_or_default;

const ENABLED_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const DISABLED_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct StaleBranchWorker {
    db: Arc<dyn Database>,
    github: Option<Arc<dyn GitHubApi>>,
    branch_prefix: String,
    profile_id: String,
}

impl StaleBranchWorker {
    pub fn new(
        db: Arc<dyn Database>,
        github: Option<Arc<dyn GitHubApi>>,
        branch_prefix: impl Into<String>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            github,
            branch_prefix: branch_prefix.into(),
            profile_id: profile_id.into(),
        }
    }

    /// One pass over every repository jobs have targeted. Returns branches deleted.
    pub async fn run_once(&self) -> Result<usize, WorkerError> {
        let settings = self.db.get_settings(&self.profile_id).await?;
        if !settings.auto_delete_stale_branches {
            tracing::debug!("Stale branch cleanup disabled");
            return Ok(0);
        }
        let Some(github) = &self.github else {
            tracing::info!("Stale branch cleanup skipped: no GitHub token configured");
            return Ok(0);
        };

        let cutoff = Utc::now()
            - chrono::Duration::days(i64::from(settings.auto_delete_stale_branches_after_days));
        let mut deleted = 0;
        for full_name in self.db.list_job_repos().await? {
            let Some((owner, repo)) = split_repo(&full_name) else {
                tracing::warn!(repo = %full_name, "Skipping malformed repository name");
                continue;
            };
            match self.clean_repo(github.as_ref(), owner, repo, cutoff).await {
                Ok(n) => deleted += n,
                Err(e) => tracing::warn!(repo = %full_name, error = %e, "Branch cleanup failed"),
            }
        }
        if deleted > 0 {
            tracing::info!(deleted, "Stale branches deleted");
        }
        Ok(deleted)
    }

    async fn clean_repo(
        &self,
        github: &dyn GitHubApi,
        owner: &str,
        repo: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, WorkerError> {
        let branches = github.list_branches(owner, repo).await?;
        let mut deleted = 0;
        for branch in branches.iter().filter(|b| self.is_session_branch(b)) {
            let last_commit = match github.get_commit_date(owner, repo, &branch.commit.sha).await {
                Ok(Some(date)) => date,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        branch = %branch.name,
                        error = %e,
                        "Could not read branch head commit"
                    );
                    continue;
                }
            };
            if last_commit >= cutoff {
                continue;
            }
            match github.delete_branch(owner, repo, &branch.name).await {
                Ok(()) => {
                    deleted += 1;
                    tracing::info!(owner, repo, branch = %branch.name, "Deleted stale branch");
                }
                Err(e) => {
                    tracing::warn!(branch = %branch.name, error = %e, "Failed to delete branch")
                }
            }
        }
        Ok(deleted)
    }

    fn is_session_branch(&self, branch: &Branch) -> bool {
        !self.branch_prefix.is_empty() && branch.name.starts_with(&self.branch_prefix)
    }
}

#[async_trait]
impl PeriodicCheck for StaleBranchWorker {
    fn name(&self) -> &str {
        "stale_branch"
    }

    async fn interval(&self) -> Duration {
        if settings_or_default(self.db.as_ref(), &self.profile_id)
            .await
            .auto_delete_stale_branches
        {
            ENABLED_INTERVAL
        } else {
            DISABLED_INTERVAL
        }
    }

    async fn run_check(&self) -> Result<(), WorkerError> {
        self.run_once().await.map(|_| ())
    }
}
