//! HTTP client for the remote session API.
//!
//! Response bodies of failed calls are never read: they may echo prompt
//! text back, and errors from this module end up in logs.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;

use crate::error::RemoteError;
use crate::remote::retry::{AttemptError, RetryConfig, retry_with_backoff};
use crate::remote::{RemoteSession, RemoteSessionApi, RemoteSessionRequest};

pub const DEFAULT_BASE_URL: &str = "https://jules.googleapis.com/v1alpha";

const API_KEY_HEADER: &str = "X-Goog-Api-Key";

/// reqwest-backed [`RemoteSessionApi`].
pub struct RemoteSessionClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl RemoteSessionClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|_| RemoteError::Request)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::DEFAULT,
        })
    }

    /// Override the backoff used for reads.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn session_url(&self, id: &str) -> String {
        format!("{}/sessions/{}", self.base_url, id)
    }

    /// POST once. Writes are not retried so a message is never sent twice.
    async fn post(
        &self,
        url: &str,
        body: serde_json::Value,
        api_key: &SecretString,
    ) -> Result<reqwest::Response, RemoteError> {
        let http = &self.http;
        let body = &body;
        retry_with_backoff(RetryConfig::NONE, move || async move {
            let resp = http
                .post(url)
                .header(API_KEY_HEADER, api_key.expose_secret())
                .json(body)
                .send()
                .await
                .map_err(|_| AttemptError::Retryable { status: None })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(AttemptError::from_status(status.as_u16()));
            }
            Ok(resp)
        })
        .await
    }
}

#[async_trait]
impl RemoteSessionApi for RemoteSessionClient {
    async fn create_session(
        &self,
        api_key: &SecretString,
        request: &RemoteSessionRequest,
    ) -> Result<RemoteSession, RemoteError> {
        let mut body = json!({
            "prompt": request.prompt,
            "sourceContext": {
                "source": format!("sources/github/{}", request.repo),
                "githubRepoContext": { "startingBranch": request.branch },
            },
            "requirePlanApproval": request.require_plan_approval,
            "automationMode": request.automation_mode.as_str(),
        });
        if let Some(title) = &request.title {
            body["title"] = json!(title);
        }

        let url = format!("{}/sessions", self.base_url);
        let resp = self.post(&url, body, api_key).await?;
        let session: RemoteSession = resp.json().await.map_err(|_| RemoteError::Decode)?;
        Ok(session.normalize_id())
    }

    async fn get_session(
        &self,
        id: &str,
        api_key: &SecretString,
    ) -> Result<RemoteSession, RemoteError> {
        let url = self.session_url(id);
        let url = &url;
        let http = &self.http;
        let session = retry_with_backoff(self.retry, move || async move {
            let resp = http
                .get(url)
                .header(API_KEY_HEADER, api_key.expose_secret())
                .send()
                .await
                .map_err(|_| AttemptError::Retryable { status: None })?;
            let status = resp.status();
            if !status.is_success() {
                return Err(AttemptError::from_status(status.as_u16()));
            }
            resp.json::<RemoteSession>()
                .await
                .map_err(|_| AttemptError::Permanent(RemoteError::Decode))
        })
        .await?;
        Ok(session.normalize_id())
    }

    async fn send_message(
        &self,
        id: &str,
        text: &str,
        api_key: &SecretString,
    ) -> Result<(), RemoteError> {
        let url = format!("{}:sendMessage", self.session_url(id));
        self.post(&url, json!({ "prompt": text }), api_key).await?;
        Ok(())
    }

    async fn approve_plan(&self, id: &str, api_key: &SecretString) -> Result<(), RemoteError> {
        let url = format!("{}:approvePlan", self.session_url(id));
        self.post(&url, json!({}), api_key).await?;
        Ok(())
    }
}
