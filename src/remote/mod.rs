//! Remote session API: the agent service that actually runs sessions.

pub mod client;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::session::model::{AutomationMode, SessionState};

pub use client::RemoteSessionClient;
pub use retry::RetryConfig;

/// A session as the remote sees it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSession {
    #[serde(default)]
    pub id: String,
    /// Resource name, `sessions/{id}`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outputs: Vec<RemoteOutput>,
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
}

impl RemoteSession {
    /// Parsed state, or `None` for states this crate does not model.
    pub fn parsed_state(&self) -> Option<SessionState> {
        self.state.parse().ok()
    }

    /// First pull request URL among the outputs.
    pub fn pr_url(&self) -> Option<&str> {
        self.outputs
            .iter()
            .filter_map(|o| o.pull_request.as_ref())
            .map(|pr| pr.url.as_str())
            .find(|url| !url.is_empty())
    }

    pub fn last_message(&self) -> Option<&RemoteMessage> {
        self.messages.last()
    }

    /// How many human-role messages are exactly `text` (ignoring surrounding whitespace).
    pub fn count_human_messages(&self, text: &str) -> usize {
        let text = text.trim();
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Human && m.text.trim() == text)
            .count()
    }

    /// Fill `id` from `name` when the remote only returned the resource name.
    pub(crate) fn normalize_id(mut self) -> Self {
        if self.id.is_empty() {
            if let Some(id) = self.name.rsplit('/').next() {
                self.id = id.to_string();
            }
        }
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOutput {
    #[serde(default)]
    pub pull_request: Option<RemotePullRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemotePullRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// One transcript entry. `text` is session content and must never be logged.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMessage {
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub role: MessageRole,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    Human,
    Ai,
    System,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Body for creating a session remotely.
#[derive(Debug, Clone)]
pub struct RemoteSessionRequest {
    pub prompt: String,
    pub title: Option<String>,
    pub repo: String,
    pub branch: String,
    pub require_plan_approval: bool,
    pub automation_mode: AutomationMode,
}

/// Operations against the remote session service.
#[async_trait]
pub trait RemoteSessionApi: Send + Sync {
    async fn create_session(
        &self,
        api_key: &SecretString,
        request: &RemoteSessionRequest,
    ) -> Result<RemoteSession, RemoteError>;

    /// Fetch state, outputs and transcript. Retries transient failures.
    async fn get_session(&self, id: &str, api_key: &SecretString)
    -> Result<RemoteSession, RemoteError>;

    async fn send_message(
        &self,
        id: &str,
        text: &str,
        api_key: &SecretString,
    ) -> Result<(), RemoteError>;

    async fn approve_plan(&self, id: &str, api_key: &SecretString) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_remote_session() {
        let json = r#"{
            "name": "sessions/abc123",
            "state": "COMPLETED",
            "updateTime": "2026-10-19T10:00:00Z",
            "outputs": [{"pullRequest": {"url": "https://github.com/o/r/pull/7"}}],
            "messages": [
                {"text": "do it", "type": "HUMAN"},
                {"text": "done", "type": "AI"},
                {"text": "progress", "type": "PROGRESS_UPDATE"}
            ]
        }"#;
        let session: RemoteSession = serde_json::from_str(json).unwrap();
        let session = session.normalize_id();
        assert_eq!(session.id, "abc123");
        assert_eq!(session.parsed_state(), Some(SessionState::Completed));
        assert_eq!(session.pr_url(), Some("https://github.com/o/r/pull/7"));
        assert_eq!(session.messages[2].role, MessageRole::Unknown);
    }

    #[test]
    fn counts_only_human_repeats() {
        let session = RemoteSession {
            messages: vec![
                RemoteMessage {
                    text: "continue".into(),
                    role: MessageRole::Human,
                },
                RemoteMessage {
                    text: "continue".into(),
                    role: MessageRole::Ai,
                },
                RemoteMessage {
                    text: " continue\n".into(),
                    role: MessageRole::Human,
                },
            ],
            ..Default::default()
        };
        assert_eq!(session.count_human_messages("continue"), 2);
    }
}
