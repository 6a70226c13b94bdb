//! Session state machine and record types.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a coding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Accepted by the remote, not yet picked up.
    Queued,
    /// Agent is drafting a plan.
    Planning,
    /// Agent is executing.
    InProgress,
    /// Plan is ready and waits for approval.
    AwaitingPlanApproval,
    /// Agent asked a question.
    AwaitingUserFeedback,
    Completed,
    Failed,
}

impl SessionState {
    /// Check if a worker may move a session from this state to `target`.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (Queued, Planning) |
            (Planning, InProgress) | (Planning, AwaitingPlanApproval) |
            (InProgress, AwaitingPlanApproval) | (InProgress, AwaitingUserFeedback) |
            (InProgress, Completed) | (InProgress, Failed) |
            (AwaitingPlanApproval, InProgress) |
            (AwaitingUserFeedback, InProgress)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Which cache refresh tier this state belongs to.
    pub fn refresh_tier(&self) -> RefreshTier {
        match self {
            Self::Queued | Self::Planning | Self::InProgress => RefreshTier::Active,
            Self::AwaitingPlanApproval | Self::AwaitingUserFeedback => RefreshTier::Awaiting,
            Self::Completed | Self::Failed => RefreshTier::Settled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Planning => "PLANNING",
            Self::InProgress => "IN_PROGRESS",
            Self::AwaitingPlanApproval => "AWAITING_PLAN_APPROVAL",
            Self::AwaitingUserFeedback => "AWAITING_USER_FEEDBACK",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "PLANNING" => Ok(Self::Planning),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "AWAITING_PLAN_APPROVAL" => Ok(Self::AwaitingPlanApproval),
            "AWAITING_USER_FEEDBACK" => Ok(Self::AwaitingUserFeedback),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(UnknownState(s.to_string())),
        }
    }
}

/// A state string we do not model (e.g. a newer remote state).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown session state: {0}")]
pub struct UnknownState(pub String);

/// Cache refresh tier, from hottest to coldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTier {
    Active,
    Awaiting,
    Settled,
}

/// How the remote agent should finish its work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutomationMode {
    #[default]
    AutomationModeUnspecified,
    AutoCreatePr,
}

impl AutomationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutomationModeUnspecified => "AUTOMATION_MODE_UNSPECIFIED",
            Self::AutoCreatePr => "AUTO_CREATE_PR",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "AUTO_CREATE_PR" => Self::AutoCreatePr,
            _ => Self::AutomationModeUnspecified,
        }
    }
}

/// Artifacts a session produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

/// A locally tracked session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub title: String,
    /// User-authored. Never log.
    pub prompt: String,
    pub profile_id: String,
    pub state: SessionState,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    /// Last cache refresh, epoch milliseconds.
    pub last_updated: i64,
    /// Last automated message sent, epoch milliseconds.
    pub last_interaction_at: Option<i64>,
    pub outputs: SessionOutputs,
    pub retry_count: u32,
    /// Content-free failure class of the last automated action.
    pub last_error: Option<String>,
    pub require_plan_approval: bool,
    pub automation_mode: AutomationMode,
}

impl Session {
    pub fn pr_url(&self) -> Option<&str> {
        self.outputs.pr_url.as_deref()
    }
}

/// Input for creating a session.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
    pub prompt: String,
    pub repo: String,
    pub branch: String,
    pub profile_id: Option<String>,
    pub require_plan_approval: bool,
    pub automation_mode: AutomationMode,
}

/// Query for listing sessions. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub profile_id: Option<String>,
    pub state: Option<SessionState>,
    pub created_after: Option<DateTime<Utc>>,
}

impl SessionFilter {
    pub fn in_state(state: SessionState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn created_after(mut self, after: DateTime<Utc>) -> Self {
        self.created_after = Some(after);
        self
    }
}

/// Fields mirrored from the remote during a cache refresh.
#[derive(Debug, Clone)]
pub struct SessionRefresh {
    pub state: SessionState,
    pub update_time: DateTime<Utc>,
    pub pr_url: Option<String>,
    pub refreshed_at_ms: i64,
}
