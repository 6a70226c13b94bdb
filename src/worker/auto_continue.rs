//! Nudges sessions that finished without opening a pull request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{ServiceError, WorkerError};
use crate::remote::{MessageRole, RemoteSession};
use crate::session::model::SessionFilter;
use crate::session::{Session, SessionService, SessionState};
use crate::settings::Settings;
use crate::store::Database;
use crate::worker::polling::settings_or_default;
use crate::worker::throttle::should_interact;
use crate::worker::{LOOKBACK_DAYS, PeriodicCheck};

/// What to do with a completed session after looking at its remote transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueDecision {
    Send,
    /// The remote already has a PR or has moved on.
    NotStalled,
    /// Our last message is still the newest one.
    AwaitingReply,
    /// The canned message has been sent as often as allowed.
    CeilingReached,
}

/// Decide whether `remote` needs another canned message.
pub fn decide(remote: &RemoteSession, settings: &Settings) -> ContinueDecision {
    if remote.pr_url().is_some() || remote.parsed_state() != Some(SessionState::Completed) {
        return ContinueDecision::NotStalled;
    }
    let message = settings.auto_continue_message.trim();
    if remote
        .last_message()
        .is_some_and(|m| m.role == MessageRole::Human && m.text.trim() == message)
    {
        return ContinueDecision::AwaitingReply;
    }
    if remote.count_human_messages(message) >= settings.auto_continue_max_repeats as usize {
        return ContinueDecision::CeilingReached;
    }
    ContinueDecision::Send
}

pub struct AutoContinueWorker {
    db: Arc<dyn Database>,
    sessions: Arc<SessionService>,
    profile_id: String,
}

impl AutoContinueWorker {
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

    /// One pass. Returns how many sessions were nudged.
    pub async fn run_once(&self) -> Result<usize, WorkerError> {
        let settings = self.db.get_settings(&self.profile_id).await?;
        if !settings.auto_continue_enabled {
            tracing::debug!("Auto continue disabled");
            return Ok(0);
        }
        if !self.sessions.has_credential() {
            tracing::info!("Auto continue skipped: no remote API key configured");
            return Ok(0);
        }

        let now = Utc::now();
        let candidates = self.candidates(&settings, now).await?;

        let mut sent = 0;
        for session in &candidates {
            match self.nudge(session, &settings, now).await {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    session_id = %session.id,
                    error_class = e.class(),
                    "Auto continue failed"
                ),
            }
        }
        Ok(sent)
    }

    /// Completed sessions without a PR, created within the lookback window.
    async fn candidates(
        &self,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, WorkerError> {
        let since = now - chrono::Duration::days(LOOKBACK_DAYS);
        let filter = SessionFilter {
            profile_id: Some(self.profile_id.clone()),
            ..SessionFilter::in_state(SessionState::Completed).created_after(since)
        };
        let mut sessions = self.db.list_sessions(&filter).await?;

        if !settings.auto_continue_all_sessions {
            let job_sessions: std::collections::HashSet<String> = self
                .db
                .list_jobs()
                .await?
                .into_iter()
                .filter(|job| job.created_at >= since)
                .flat_map(|job| job.session_ids)
                .collect();
            sessions.retain(|s| job_sessions.contains(&s.id));
        }

        sessions.retain(|s| s.pr_url().is_none());
        Ok(sessions)
    }

    async fn nudge(
        &self,
        session: &Session,
        settings: &Settings,
        now: DateTime<Utc>,
    ) -> Result<bool, ServiceError> {
        if !should_interact(session, settings, now) {
            tracing::debug!(session_id = %session.id, "Auto continue throttled");
            return Ok(false);
        }

        let remote = self.sessions.fetch_remote(&session.id).await?;
        match decide(&remote, settings) {
            ContinueDecision::Send => {}
            ContinueDecision::CeilingReached => {
                tracing::info!(
                    session_id = %session.id,
                    max_repeats = settings.auto_continue_max_repeats,
                    "Auto continue ceiling reached"
                );
                return Ok(false);
            }
            other => {
                tracing::debug!(
                    session_id = %session.id,
                    decision = ?other,
                    "Auto continue skipped"
                );
                return Ok(false);
            }
        }

        self.sessions
            .send_message(&session.id, &settings.auto_continue_message)
            .await?;
        tracing::info!(session_id = %session.id, "Auto continue message sent");
        Ok(true)
    }
}

#[async_trait]
impl PeriodicCheck for AutoContinueWorker {
    fn name(&self) -> &str {
        "auto_continue"
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
