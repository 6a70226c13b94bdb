//! Session operations used by the workers.
//!
//! Remote-backed calls go through [`RemoteSessionApi`]; local state lives in
//! the [`Database`]. Prompts and messages pass through this layer but are
//! never logged or copied into errors.

use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use tracing::debug;
use uuid::Uuid;

use crate::error::{RemoteError, ServiceError};
use crate::ratelimit::RateLimiter;
use crate::remote::{RemoteSession, RemoteSessionApi, RemoteSessionRequest};
use crate::session::model::{
    CreateSessionRequest, Session, SessionFilter, SessionOutputs, SessionState,
};
use crate::settings::DEFAULT_PROFILE_ID;
use crate::store::Database;
use crate::validation;

pub struct SessionService {
    db: Arc<dyn Database>,
    remote: Arc<dyn RemoteSessionApi>,
    api_keys: Vec<SecretString>,
    limiter: Arc<RateLimiter>,
}

impl SessionService {
    pub fn new(
        db: Arc<dyn Database>,
        remote: Arc<dyn RemoteSessionApi>,
        api_keys: Vec<SecretString>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            db,
            remote,
            api_keys,
            limiter,
        }
    }

    /// Whether a remote API key is configured.
    pub fn has_credential(&self) -> bool {
        !self.api_keys.is_empty()
    }

    fn primary_key(&self) -> Option<&SecretString> {
        self.api_keys.first()
    }

    /// Create a session remotely (when a key is configured) and record it locally.
    ///
    /// Without a key the session is only recorded locally, in `QUEUED`.
    pub async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<Session, ServiceError> {
        if let Some(name) = &request.name {
            validation::validate_name(name)?;
        }
        validation::validate_prompt(&request.prompt)?;
        validation::validate_repo(&request.repo)?;
        validation::validate_branch(&request.branch)?;

        let now = Utc::now();
        let (id, name, state, create_time) = match self.primary_key() {
            Some(key) => {
                let remote = self
                    .remote
                    .create_session(
                        key,
                        &RemoteSessionRequest {
                            prompt: request.prompt.clone(),
                            title: request.name.clone(),
                            repo: request.repo.clone(),
                            branch: request.branch.clone(),
                            require_plan_approval: request.require_plan_approval,
                            automation_mode: request.automation_mode,
                        },
                    )
                    .await?;
                if remote.id.is_empty() {
                    return Err(RemoteError::Decode.into());
                }
                let state = remote.parsed_state().unwrap_or(SessionState::Queued);
                let name = if remote.name.is_empty() {
                    format!("sessions/{}", remote.id)
                } else {
                    remote.name
                };
                (remote.id, name, state, remote.create_time.unwrap_or(now))
            }
            None => {
                let id = Uuid::new_v4().to_string();
                let name = format!("sessions/{id}");
                (id, name, SessionState::Queued, now)
            }
        };

        let session = Session {
            id,
            name,
            title: request
                .name
                .clone()
                .unwrap_or_else(|| "New Session".to_string()),
            prompt: request.prompt.clone(),
            profile_id: request
                .profile_id
                .clone()
                .unwrap_or_else(|| DEFAULT_PROFILE_ID.to_string()),
            state,
            create_time,
            update_time: create_time,
            last_updated: now.timestamp_millis(),
            last_interaction_at: None,
            outputs: SessionOutputs::default(),
            retry_count: 0,
            last_error: None,
            require_plan_approval: request.require_plan_approval,
            automation_mode: request.automation_mode,
        };
        self.db.insert_session(&session).await?;
        debug!(session_id = %session.id, state = %session.state, "Session created");
        Ok(session)
    }

    pub async fn get_session(&self, id: &str) -> Result<Session, ServiceError> {
        self.db
            .get_session(id)
            .await?
            .ok_or_else(|| ServiceError::SessionNotFound { id: id.to_string() })
    }

    pub async fn list_sessions(
        &self,
        filter: &SessionFilter,
    ) -> Result<Vec<Session>, ServiceError> {
        Ok(self.db.list_sessions(filter).await?)
    }

    /// Approve a pending plan: remotely first (if a key is configured), then
    /// locally via CAS on `AWAITING_PLAN_APPROVAL`.
    ///
    /// Returns `false` when the local session had already left that state.
    pub async fn approve_plan(&self, id: &str) -> Result<bool, ServiceError> {
        if let Some(key) = self.primary_key() {
            self.remote.approve_plan(id, key).await?;
        }
        Ok(self
            .db
            .transition_session_state(
                id,
                SessionState::AwaitingPlanApproval,
                SessionState::InProgress,
            )
            .await?)
    }

    /// Send a message to the remote agent.
    ///
    /// Requires a credential and is debounced per session. Successful sends
    /// are recorded as the session's last interaction.
    pub async fn send_message(&self, id: &str, text: &str) -> Result<(), ServiceError> {
        validation::validate_prompt(text)?;
        let key = self.primary_key().ok_or(ServiceError::MissingCredential)?;
        self.limiter.check(&format!("send_message:{id}"))?;

        self.remote.send_message(id, text, key).await?;
        self.db
            .record_interaction(id, Utc::now().timestamp_millis())
            .await?;
        Ok(())
    }

    /// Fetch the remote view of a session, trying each configured key in turn.
    pub async fn fetch_remote(&self, id: &str) -> Result<RemoteSession, ServiceError> {
        let mut last_err = None;
        for key in &self.api_keys {
            match self.remote.get_session(id, key).await {
                Ok(session) => return Ok(session),
                Err(e) => {
                    debug!(
                        session_id = %id,
                        error = %e,
                        "Remote fetch failed with key, trying next"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => e.into(),
            None => ServiceError::MissingCredential,
        })
    }
}
