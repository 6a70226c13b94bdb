//! Watches session pull requests: reports failing checks, merges green ones,
//! closes stale conflicted and empty ones, and updates branches that fell behind.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{GitHubError, WorkerError};
use crate::github::{
    CheckRun, CombinedStatus, GitHubApi, IssueComment, MergeRequest, PullRequest,
    PullRequestFile, PullRequestRef,
};
use crate::session::model::SessionFilter;
use crate::settings::Settings;
use crate::store::Database;
use crate::worker::PeriodicCheck;
use crate::worker::polling::settings_or_default;

pub const CHECK_RUNS_PER_PAGE: u32 = 100;
pub const MAX_CHECK_RUN_PAGES: u32 = 50;

/// First line of every failing-checks comment we post.
pub const FAILURE_COMMENT_PREFIX: &str = "Some checks are failing on this pull request:";

/// First line of the comment posted when a PR deletes test files.
pub const TEST_DELETION_COMMENT_PREFIX: &str =
    "Deleting existing tests is not allowed. Please restore these files:";

/// Mention appended to comments so the session agent picks them up.
pub const AGENT_MENTION: &str = "@jules";

/// Everything known about a head commit's checks.
#[derive(Debug, Clone, Default)]
pub struct CheckSummary {
    pub check_runs: Vec<CheckRun>,
    pub combined: CombinedStatus,
}

impl CheckSummary {
    /// Names of failing check runs and legacy contexts, deduplicated, in order.
    ///
    /// A failure is reported as soon as it completes, even while other
    /// checks are still running.
    pub fn failing_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.check_runs
            .iter()
            .filter(|run| run.is_failure())
            .map(|run| run.name.clone())
            .chain(
                self.combined
                    .statuses
                    .iter()
                    .filter(|s| s.state == "failure")
                    .map(|s| s.context.clone()),
            )
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// Every check run and every legacy context has passed.
    ///
    /// With nothing reported at all, only an explicit combined `success` counts.
    pub fn all_green(&self) -> bool {
        if self.check_runs.is_empty() && self.combined.statuses.is_empty() {
            return self.combined.state == "success";
        }
        self.check_runs.iter().all(CheckRun::is_green)
            && self.combined.statuses.iter().all(|s| s.state == "success")
    }
}

/// Walk every page of check runs for `sha`.
///
/// Stops on an empty page, once `total_count` runs are collected, or at the page cap.
pub async fn collect_check_runs(
    github: &dyn GitHubApi,
    owner: &str,
    repo: &str,
    sha: &str,
) -> Result<Vec<CheckRun>, GitHubError> {
    let mut runs = Vec::new();
    for page in 1..=MAX_CHECK_RUN_PAGES {
        let batch = github
            .list_check_runs_for_ref(owner, repo, sha, page, CHECK_RUNS_PER_PAGE)
            .await?;
        if batch.check_runs.is_empty() {
            break;
        }
        runs.extend(batch.check_runs);
        if runs.len() as u64 >= batch.total_count {
            break;
        }
    }
    Ok(runs)
}

pub fn failure_comment_body(failing: &[String]) -> String {
    let mut body = String::from(FAILURE_COMMENT_PREFIX);
    body.push('\n');
    for name in failing {
        body.push_str("\n- ");
        body.push_str(name);
    }
    body.push_str("\n\n");
    body.push_str(AGENT_MENTION);
    body
}

/// Whether `comment` was posted by this bot.
///
/// Without a known login, our own comments are recognised by their prefix.
pub fn is_own_comment(comment: &IssueComment, bot_login: Option<&str>) -> bool {
    if let Some(login) = bot_login.filter(|l| !l.is_empty()) {
        if comment.user.login == login {
            return true;
        }
    }
    comment.body.starts_with(FAILURE_COMMENT_PREFIX)
        || comment.body.starts_with(TEST_DELETION_COMMENT_PREFIX)
}

/// Squash commit message: the PR body without bot footers and trailers.
pub fn clean_commit_message(body: Option<&str>) -> String {
    let Some(body) = body else {
        return String::new();
    };
    let mut kept: Vec<&str> = body
        .lines()
        .filter(|line| {
            let lower = line.trim().to_ascii_lowercase();
            !lower.starts_with("co-authored-by:")
                && !lower.contains("created automatically by jules")
        })
        .collect();
    // Footer separators left dangling once the footer is gone.
    while kept
        .last()
        .is_some_and(|line| matches!(line.trim(), "" | "---"))
    {
        kept.pop();
    }
    kept.join("\n").trim().to_string()
}

pub fn looks_like_test_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    let file = lower.rsplit('/').next().unwrap_or(&lower);
    lower.starts_with("test/")
        || lower.starts_with("tests/")
        || lower.contains("/test/")
        || lower.contains("/tests/")
        || lower.contains("__tests__/")
        || file.starts_with("test_")
        || file.contains("_test.")
        || file.contains(".test.")
        || file.contains(".spec.")
}

/// Test files the pull request removes.
pub fn deleted_test_files(files: &[PullRequestFile]) -> Vec<String> {
    files
        .iter()
        .filter(|f| f.status == "removed" && looks_like_test_file(&f.filename))
        .map(|f| f.filename.clone())
        .collect()
}

pub fn test_deletion_comment_body(deleted: &[String]) -> String {
    let mut body = String::from(TEST_DELETION_COMMENT_PREFIX);
    body.push('\n');
    for path in deleted {
        body.push_str("\n- ");
        body.push_str(path);
    }
    body.push_str("\n\n");
    body.push_str(AGENT_MENTION);
    body
}

/// Idempotency key recorded once a PR has been merged.
pub fn merge_action_key(pr: &PullRequestRef, settings: &Settings) -> String {
    format!(
        "MERGED_PR_{}_{}@{}/{}",
        pr.number, settings.auto_merge_method, pr.owner, pr.repo
    )
}

pub struct PrMonitorWorker {
    db: Arc<dyn Database>,
    github: Option<Arc<dyn GitHubApi>>,
    profile_id: String,
}

impl PrMonitorWorker {
    pub fn new(
        db: Arc<dyn Database>,
        github: Option<Arc<dyn GitHubApi>>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            github,
            profile_id: profile_id.into(),
        }
    }

    /// One pass over every recent session with a pull request.
    pub async fn run_once(&self) -> Result<(), WorkerError> {
        let Some(github) = &self.github else {
            tracing::info!("PR monitor skipped: no GitHub token configured");
            return Ok(());
        };
        let settings = self.db.get_settings(&self.profile_id).await?;
        let now = Utc::now();

        let bot_login = match github.current_user_login().await {
            Ok(login) => Some(login),
            Err(e) => {
                tracing::debug!(error = %e, "Could not resolve bot login");
                None
            }
        };

        let filter = SessionFilter {
            profile_id: Some(self.profile_id.clone()),
            ..SessionFilter::default().created_after(now - settings.session_cache_max_age())
        };
        let sessions = self.db.list_sessions(&filter).await?;

        let mut seen = HashSet::new();
        for session in &sessions {
            let Some(url) = session.pr_url() else {
                continue;
            };
            let pr_ref = match PullRequestRef::parse(url) {
                Ok(pr_ref) => pr_ref,
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id,
                        error = %e,
                        "Skipping unparseable PR URL"
                    );
                    continue;
                }
            };
            if !seen.insert(pr_ref.clone()) {
                continue;
            }
            if let Err(e) = self
                .check_pull_request(github.as_ref(), &pr_ref, &settings, bot_login.as_deref(), now)
                .await
            {
                tracing::warn!(
                    session_id = %session.id,
                    pr = %pr_ref,
                    error = %e,
                    "PR check failed"
                );
            }
        }
        Ok(())
    }

    async fn check_pull_request(
        &self,
        github: &dyn GitHubApi,
        pr_ref: &PullRequestRef,
        settings: &Settings,
        bot_login: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), WorkerError> {
        let pr = github.get_pull_request(pr_ref).await?;
        if !pr.is_open() {
            tracing::debug!(pr = %pr_ref, "Pull request not open");
            return Ok(());
        }

        if pr.has_no_changes() {
            github.close_pull_request(pr_ref).await?;
            tracing::info!(pr = %pr_ref, "Closed pull request with no changed files");
            return Ok(());
        }

        // Checks on an outdated head are rerun once the branch is updated.
        if pr.is_behind() {
            github.update_branch(pr_ref).await?;
            tracing::info!(pr = %pr_ref, "Updated branch that was behind its base");
            return Ok(());
        }

        // Any status error aborts before an action is taken.
        let check_runs =
            collect_check_runs(github, &pr_ref.owner, &pr_ref.repo, &pr.head.sha).await?;
        let combined = github
            .get_combined_status(&pr_ref.owner, &pr_ref.repo, &pr.head.sha)
            .await?;
        let checks = CheckSummary {
            check_runs,
            combined,
        };

        if pr.mergeable == Some(false)
            && self.close_if_stale(github, pr_ref, &pr, settings, now).await?
        {
            return Ok(());
        }

        let failing = checks.failing_names();
        if !failing.is_empty() {
            if settings.check_failing_actions_enabled {
                self.report_failures(github, pr_ref, &failing, bot_login).await?;
            }
            return Ok(());
        }

        if !checks.all_green() {
            tracing::debug!(pr = %pr_ref, "Checks still pending");
            return Ok(());
        }

        let files = github.list_pull_request_files(pr_ref).await?;
        let deleted = deleted_test_files(&files);
        if !deleted.is_empty() {
            return self.warn_test_deletion(github, pr_ref, &deleted).await;
        }

        if pr.draft {
            github.mark_ready_for_review(pr_ref, &pr.node_id).await?;
            tracing::info!(pr = %pr_ref, "Draft marked ready for review");
            return Ok(());
        }

        if settings.auto_merge_enabled && pr.mergeable == Some(true) {
            self.merge(github, pr_ref, &pr, settings).await?;
        }
        Ok(())
    }

    async fn close_if_stale(
        &self,
        github: &dyn GitHubApi,
        pr_ref: &PullRequestRef,
        pr: &PullRequest,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkerError> {
        if !settings.auto_close_stale_conflicted_prs {
            return Ok(false);
        }
        let stale_after =
            chrono::Duration::days(i64::from(settings.stale_conflicted_prs_duration_days));
        if now - pr.updated_at <= stale_after {
            return Ok(false);
        }
        github
            .create_comment(pr_ref, &settings.auto_close_on_conflict_message)
            .await?;
        github.close_pull_request(pr_ref).await?;
        tracing::info!(pr = %pr_ref, "Closed stale conflicted pull request");
        Ok(true)
    }

    async fn report_failures(
        &self,
        github: &dyn GitHubApi,
        pr_ref: &PullRequestRef,
        failing: &[String],
        bot_login: Option<&str>,
    ) -> Result<(), WorkerError> {
        if self.last_comment_is_ours(github, pr_ref, bot_login).await? {
            tracing::debug!(pr = %pr_ref, "Failures already reported");
            return Ok(());
        }
        github
            .create_comment(pr_ref, &failure_comment_body(failing))
            .await?;
        tracing::info!(pr = %pr_ref, failing = failing.len(), "Reported failing checks");
        Ok(())
    }

    async fn warn_test_deletion(
        &self,
        github: &dyn GitHubApi,
        pr_ref: &PullRequestRef,
        deleted: &[String],
    ) -> Result<(), WorkerError> {
        let comments = github.list_comments(pr_ref).await?;
        if comments
            .iter()
            .any(|c| c.body.starts_with(TEST_DELETION_COMMENT_PREFIX))
        {
            return Ok(());
        }
        github
            .create_comment(pr_ref, &test_deletion_comment_body(deleted))
            .await?;
        tracing::warn!(
            pr = %pr_ref,
            deleted = deleted.len(),
            "Pull request deletes tests, merge withheld"
        );
        Ok(())
    }

    async fn last_comment_is_ours(
        &self,
        github: &dyn GitHubApi,
        pr_ref: &PullRequestRef,
        bot_login: Option<&str>,
    ) -> Result<bool, GitHubError> {
        let comments = github.list_comments(pr_ref).await?;
        Ok(comments
            .last()
            .is_some_and(|c| is_own_comment(c, bot_login)))
    }

    async fn merge(
        &self,
        github: &dyn GitHubApi,
        pr_ref: &PullRequestRef,
        pr: &PullRequest,
        settings: &Settings,
    ) -> Result<(), WorkerError> {
        let key = merge_action_key(pr_ref, settings);
        if self.db.has_action(&key).await? {
            tracing::debug!(pr = %pr_ref, "Merge already recorded");
            return Ok(());
        }

        let request = MergeRequest {
            method: settings.auto_merge_method,
            commit_title: format!("{} (#{})", pr.title, pr_ref.number),
            commit_message: clean_commit_message(pr.body.as_deref()),
            sha: pr.head.sha.clone(),
        };
        github.merge_pull_request(pr_ref, &request).await?;
        self.db.record_action(&key).await?;
        tracing::info!(
            pr = %pr_ref,
            method = %settings.auto_merge_method,
            "Pull request auto-merged"
        );

        if let Err(e) = github
            .create_comment(pr_ref, &settings.auto_merge_message)
            .await
        {
            tracing::warn!(pr = %pr_ref, error = %e, "Failed to post merge comment");
        }
        Ok(())
    }
}

#[async_trait]
impl PeriodicCheck for PrMonitorWorker {
    fn name(&self) -> &str {
        "pr_monitor"
    }

    async fn interval(&self) -> Duration {
        settings_or_default(self.db.as_ref(), &self.profile_id)
            .await
            .pr_status_poll_interval()
    }

    async fn run_check(&self) -> Result<(), WorkerError> {
        self.run_once().await
    }
}
