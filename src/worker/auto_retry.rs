//! Re-prompts failed sessions and sessions whose pull request has failing checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{RATE_LIMITED_CLASS, ServiceError, WorkerError};
use crate::github::{CombinedStatus, GitHubApi, PullRequestRef};
use crate::session::model::SessionFilter;
use crate::session::{Session, SessionService, SessionState};
use crate::settings::Settings;
use crate::store::Database;
use crate::worker::polling::settings_or_default;
use crate::worker::throttle::should_interact;
use crate::worker::{LOOKBACK_DAYS, PeriodicCheck};

/// Retry ceiling for sessions that failed because the remote throttled us.
pub const RATE_LIMITED_MAX_ATTEMPTS: u32 = 50;

/// How many retries `session` may receive in total.
pub fn retry_cap(session: &Session, settings: &Settings) -> u32 {
    if session.last_error.as_deref() == Some(RATE_LIMITED_CLASS) {
        RATE_LIMITED_MAX_ATTEMPTS
    } else {
        settings.auto_retry_max_attempts
    }
}

/// Contexts failing in a legacy combined status, or `None` if it is not failing.
pub fn failing_contexts(status: &CombinedStatus) -> Option<Vec<String>> {
    if !matches!(status.state.as_str(), "failure" | "error") {
        return None;
    }
    let failing: Vec<String> = status
        .statuses
        .iter()
        .filter(|s| matches!(s.state.as_str(), "failure" | "error"))
        .map(|s| s.context.clone())
        .collect();
    (!failing.is_empty()).then_some(failing)
}

/// Retry message listing the failing check contexts.
pub fn failing_checks_message(base: &str, contexts: &[String]) -> String {
    let mut text = format!("{base}\n\nThe following checks are failing on the pull request:");
    for context in contexts {
        text.push_str("\n- ");
        text.push_str(context);
    }
    text
}

pub struct AutoRetryWorker {
    db: Arc<dyn Database>,
    sessions: Arc<SessionService>,
    github: Option<Arc<dyn GitHubApi>>,
    profile_id: String,
}

impl AutoRetryWorker {
    pub fn new(
        db: Arc<dyn Database>,
        sessions: Arc<SessionService>,
        github: Option<Arc<dyn GitHubApi>>,
        profile_id: impl Into<String>,
    ) -> Self {
        Self {
            db,
            sessions,
            github,
            profile_id: profile_id.into(),
        }
    }

    /// One pass. Returns how many retry messages were sent.
    pub async fn run_once(&self) -> Result<usize, WorkerError> {
        let settings = self.db.get_settings(&self.profile_id).await?;
        if !settings.auto_retry_enabled {
            tracing::debug!("Auto retry disabled");
            return Ok(0);
        }
        if !self.sessions.has_credential() {
            tracing::info!("Auto retry skipped: no remote API key configured");
            return Ok(0);
        }

        let now = Utc::now();
        let since = now - chrono::Duration::days(LOOKBACK_DAYS);
        let mut sent = 0;

        let failed = self.recent(SessionState::Failed, since).await?;
        for session in &failed {
            match self.retry_failed(session, &settings, now).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    session_id = %session.id,
                    error = %e,
                    "Failed-session retry failed"
                ),
            }
        }

        if let Some(github) = &self.github {
            let completed = self.recent(SessionState::Completed, since).await?;
            for session in completed.iter().filter(|s| s.pr_url().is_some()) {
                match self
                    .retry_failing_checks(github.as_ref(), session, &settings, now)
                    .await
                {
                    Ok(true) => sent += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(
                        session_id = %session.id,
                        error = %e,
                        "Failing-checks retry failed"
                    ),
                }
            }
        }
        Ok(sent)
    }

    async fn recent(
        &self,
        state: SessionState,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>, WorkerError> {
        let filter = SessionFilter {
            profile_id: Some(self.profile_id.clone()),
            ..SessionFilter::in_state(state).created_after(since)
        };
        Ok(self.db.list_sessions(&filter).await?)
    }

    async fn retry_failed(
        &self,
        session: &Session,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkerError> {
        let cap = retry_cap(session, settings);
        if session.retry_count >= cap {
            tracing::debug!(
                session_id = %session.id,
                retries = session.retry_count,
                cap,
                "Retry cap reached"
            );
            return Ok(false);
        }
        if !should_interact(session, settings, now) {
            tracing::debug!(session_id = %session.id, "Auto retry throttled");
            return Ok(false);
        }

        match self
            .sessions
            .send_message(&session.id, &settings.auto_retry_message)
            .await
        {
            Ok(()) => {
                self.db
                    .record_retry(&session.id, Utc::now().timestamp_millis())
                    .await?;
                tracing::info!(
                    session_id = %session.id,
                    attempt = session.retry_count + 1,
                    "Retry message sent"
                );
                Ok(true)
            }
            // Debounced locally: nothing reached the remote, try again next pass.
            Err(ServiceError::RateLimited(_)) => Ok(false),
            Err(e) => {
                self.db
                    .set_session_error(&session.id, Some(e.class()))
                    .await?;
                tracing::warn!(
                    session_id = %session.id,
                    error_class = e.class(),
                    "Retry message failed"
                );
                Ok(false)
            }
        }
    }

    /// Ask a completed session to fix the legacy status contexts failing on its PR.
    async fn retry_failing_checks(
        &self,
        github: &dyn GitHubApi,
        session: &Session,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<bool, WorkerError> {
        let Some(url) = session.pr_url() else {
            return Ok(false);
        };
        let pr_ref = PullRequestRef::parse(url)?;
        if !should_interact(session, settings, now) {
            return Ok(false);
        }

        let pr = github.get_pull_request(&pr_ref).await?;
        if !pr.is_open() {
            return Ok(false);
        }
        let status = github
            .get_combined_status(&pr_ref.owner, &pr_ref.repo, &pr.head.sha)
            .await?;
        let Some(contexts) = failing_contexts(&status) else {
            return Ok(false);
        };

        let text = failing_checks_message(&settings.auto_retry_message, &contexts);
        self.sessions.send_message(&session.id, &text).await?;
        tracing::info!(
            session_id = %session.id,
            pr = %pr_ref,
            failing = contexts.len(),
            "Asked session to fix failing checks"
        );
        Ok(true)
    }
}

#[async_trait]
impl PeriodicCheck for AutoRetryWorker {
    fn name(&self) -> &str {
        "auto_retry"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::CommitStatus;
    use crate::worker::testing::session;

    fn status(state: &str, contexts: &[(&str, &str)]) -> CombinedStatus {
        CombinedStatus {
            state: state.into(),
            statuses: contexts
                .iter()
                .map(|(context, state)| CommitStatus {
                    context: context.to_string(),
                    state: state.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn rate_limited_sessions_get_a_higher_cap() {
        let settings = Settings::default();
        let mut s = session("s1", SessionState::Failed);
        assert_eq!(retry_cap(&s, &settings), 3);

        s.last_error = Some(RATE_LIMITED_CLASS.to_string());
        assert_eq!(retry_cap(&s, &settings), RATE_LIMITED_MAX_ATTEMPTS);

        s.last_error = Some("remote_error".to_string());
        assert_eq!(retry_cap(&s, &settings), 3);
    }

    #[test]
    fn only_failing_combined_status_yields_contexts() {
        assert!(failing_contexts(&status("success", &[("ci", "success")])).is_none());
        assert!(failing_contexts(&status("pending", &[("ci", "pending")])).is_none());

        let failing = failing_contexts(&status(
            "failure",
            &[("lint", "success"), ("ci/test", "failure"), ("deploy", "error")],
        ))
        .unwrap();
        assert_eq!(failing, vec!["ci/test", "deploy"]);
    }

    #[test]
    fn message_lists_contexts() {
        let text = failing_checks_message("Try again.", &["ci/test".into(), "lint".into()]);
        assert_eq!(
            text,
            "Try again.\n\nThe following checks are failing on the pull request:\n- ci/test\n- lint"
        );
    }
}
