//! Keeps local session records in step with the remote.
//!
//! Refresh cadence depends on how likely the session is to change: active
//! sessions every minute, sessions waiting on a human less often, settled
//! sessions rarely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::WorkerError;
use crate::session::model::{RefreshTier, SessionFilter, SessionRefresh};
use crate::session::{Session, SessionService, SessionState};
use crate::settings::Settings;
use crate::store::Database;
use crate::worker::PeriodicCheck;

pub const SESSION_CACHE_INTERVAL: Duration = Duration::from_secs(60);

/// Minimum age of the cached copy before a session in `state` is refreshed.
pub fn refresh_interval(state: SessionState, settings: &Settings) -> Duration {
    let secs = match state.refresh_tier() {
        RefreshTier::Active => settings.session_cache_in_progress_interval,
        RefreshTier::Awaiting => settings.session_cache_pending_approval_interval,
        RefreshTier::Settled => settings.session_cache_completed_no_pr_interval,
    };
    Duration::from_secs(secs)
}

/// Whether the cached copy of `session` is old enough to refresh at `now`.
pub fn is_stale(session: &Session, settings: &Settings, now: DateTime<Utc>) -> bool {
    let age_ms = now.timestamp_millis().saturating_sub(session.last_updated);
    let interval_ms = refresh_interval(session.state, settings).as_millis() as i64;
    age_ms > interval_ms
}

pub struct SessionCacheWorker {
    db: Arc<dyn Database>,
    sessions: Arc<SessionService>,
    profile_id: String,
}

impl SessionCacheWorker {
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

    /// One pass. Returns how many sessions were updated.
    pub async fn run_once(&self) -> Result<usize, WorkerError> {
        if !self.sessions.has_credential() {
            tracing::info!("Session cache skipped: no remote API key configured");
            return Ok(0);
        }
        let settings = self.db.get_settings(&self.profile_id).await?;
        let now = Utc::now();

        let filter = SessionFilter {
            profile_id: Some(self.profile_id.clone()),
            ..SessionFilter::default().created_after(now - settings.session_cache_max_age())
        };
        let sessions = self.db.list_sessions(&filter).await?;

        let mut updated = 0;
        for session in sessions.iter().filter(|s| is_stale(s, &settings, now)) {
            match self.refresh(session, now).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    session_id = %session.id,
                    error = %e,
                    "Session refresh failed"
                ),
            }
        }
        if updated > 0 {
            tracing::debug!(updated, "Session cache refreshed");
        }
        Ok(updated)
    }

    async fn refresh(&self, session: &Session, now: DateTime<Utc>) -> Result<bool, WorkerError> {
        let remote = self.sessions.fetch_remote(&session.id).await?;
        let Some(state) = remote.parsed_state() else {
            // Stamp the row anyway so it is not refetched on every pass.
            let touch = SessionRefresh {
                state: session.state,
                update_time: session.update_time,
                pr_url: None,
                refreshed_at_ms: now.timestamp_millis(),
            };
            self.db
                .refresh_session(&session.id, session.state, &touch)
                .await?;
            tracing::debug!(session_id = %session.id, "Remote state not tracked, kept local state");
            return Ok(false);
        };

        let refresh = SessionRefresh {
            state,
            update_time: remote.update_time.unwrap_or(session.update_time),
            pr_url: remote.pr_url().map(str::to_string),
            refreshed_at_ms: now.timestamp_millis(),
        };
        let applied = self
            .db
            .refresh_session(&session.id, session.state, &refresh)
            .await?;
        if !applied {
            tracing::debug!(session_id = %session.id, "Session changed during refresh");
        } else if state != session.state {
            tracing::info!(
                session_id = %session.id,
                from = %session.state,
                to = %state,
                "Session state updated"
            );
        }
        Ok(applied)
    }
}

#[async_trait]
impl PeriodicCheck for SessionCacheWorker {
    fn name(&self) -> &str {
        "session_cache"
    }

    async fn interval(&self) -> Duration {
        SESSION_CACHE_INTERVAL
    }

    async fn run_check(&self) -> Result<(), WorkerError> {
        self.run_once().await.map(|_| ())
    }
}
