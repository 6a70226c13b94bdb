//! Fixtures shared by the worker unit tests.

use std::sync::Arc;

use chrono::Utc;

use crate::ratelimit::RateLimiter;
use crate::remote::RemoteSessionClient;
use crate::remote::client::DEFAULT_BASE_URL;
use crate::session::model::{AutomationMode, SessionOutputs};
use crate::session::{Session, SessionService, SessionState};
use crate::store::{Database, LibSqlBackend};

pub async fn memory_db() -> Arc<dyn Database> {
    Arc::new(LibSqlBackend::new_memory().await.unwrap())
}

/// A service with no API key, so every call stays local.
pub fn local_sessions(db: Arc<dyn Database>) -> Arc<SessionService> {
    Arc::new(SessionService::new(
        db,
        Arc::new(RemoteSessionClient::new(DEFAULT_BASE_URL).unwrap()),
        Vec::new(),
        Arc::new(RateLimiter::default()),
    ))
}

pub fn session(id: &str, state: SessionState) -> Session {
    let now = Utc::now();
    Session {
        id: id.into(),
        name: format!("sessions/{id}"),
        title: "New Session".into(),
        prompt: "make the build green".into(),
        profile_id: "default".into(),
        state,
        create_time: now,
        update_time: now,
        last_updated: now.timestamp_millis(),
        last_interaction_at: None,
        outputs: SessionOutputs::default(),
        retry_count: 0,
        last_error: None,
        require_plan_approval: true,
        automation_mode: AutomationMode::default(),
    }
}
