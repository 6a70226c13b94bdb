//! reqwest-backed GitHub REST client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::GitHubError;
use crate::github::{
    Branch, CheckRunPage, CombinedStatus, GitHubApi, IssueComment, MergeRequest, PullRequest,
    PullRequestFile, PullRequestRef,
};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Page size for endpoints walked to the end.
const PAGE_SIZE: u32 = 100;

/// Stop walking list endpoints after this many pages.
const MAX_PAGES: u32 = 50;

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: SecretString,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: SecretString) -> Result<Self, GitHubError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("session-autopilot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| GitHubError::Request {
                operation: "client_init",
                source,
            })?;
        Ok(Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(self.token.expose_secret())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn send(
        operation: &'static str,
        builder: RequestBuilder,
    ) -> Result<reqwest::Response, GitHubError> {
        let resp = builder
            .send()
            .await
            .map_err(|source| GitHubError::Request { operation, source })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GitHubError::Status {
                operation,
                status: status.as_u16(),
            });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GitHubError> {
        let resp = Self::send(operation, self.request(Method::GET, path).query(query)).await?;
        resp.json::<T>()
            .await
            .map_err(|_| GitHubError::Decode { operation })
    }

    /// Walk a plain-array list endpoint until a short page.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<Vec<T>, GitHubError> {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: Vec<T> = self
                .get_json(
                    operation,
                    path,
                    &[
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ],
                )
                .await?;
            let len = batch.len();
            items.extend(batch);
            if len < PAGE_SIZE as usize {
                break;
            }
        }
        Ok(items)
    }
}

#[derive(Deserialize)]
struct CommitResponse {
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    committer: Option<Signature>,
    author: Option<Signature>,
}

#[derive(Deserialize)]
struct Signature {
    date: Option<DateTime<Utc>>,
}

#[async_trait]
impl GitHubApi for GitHubClient {
    async fn current_user_login(&self) -> Result<String, GitHubError> {
        let user: crate::github::GitHubUser = self.get_json("get_user", "/user", &[]).await?;
        Ok(user.login)
    }

    async fn get_pull_request(&self, pr: &PullRequestRef) -> Result<PullRequest, GitHubError> {
        let path = format!("/repos/{}/{}/pulls/{}", pr.owner, pr.repo, pr.number);
        self.get_json("get_pull_request", &path, &[]).await
    }

    async fn list_check_runs_for_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        page: u32,
        per_page: u32,
    ) -> Result<CheckRunPage, GitHubError> {
        let path = format!("/repos/{owner}/{repo}/commits/{git_ref}/check-runs");
        self.get_json(
            "list_check_runs",
            &path,
            &[
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    async fn get_combined_status(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> Result<CombinedStatus, GitHubError> {
        let path = format!("/repos/{owner}/{repo}/commits/{git_ref}/status");
        self.get_json(
            "get_combined_status",
            &path,
            &[("per_page", PAGE_SIZE.to_string())],
        )
        .await
    }

    async fn list_comments(&self, pr: &PullRequestRef) -> Result<Vec<IssueComment>, GitHubError> {
        let path = format!("/repos/{}/{}/issues/{}/comments", pr.owner, pr.repo, pr.number);
        self.get_all_pages("list_comments", &path).await
    }

    async fn create_comment(&self, pr: &PullRequestRef, body: &str) -> Result<(), GitHubError> {
        let path = format!("/repos/{}/{}/issues/{}/comments", pr.owner, pr.repo, pr.number);
        Self::send(
            "create_comment",
            self.request(Method::POST, &path).json(&json!({ "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        pr: &PullRequestRef,
        request: &MergeRequest,
    ) -> Result<(), GitHubError> {
        let path = format!("/repos/{}/{}/pulls/{}/merge", pr.owner, pr.repo, pr.number);
        Self::send(
            "merge_pull_request",
            self.request(Method::PUT, &path).json(&json!({
                "merge_method": request.method.as_str(),
                "commit_title": request.commit_title,
                "commit_message": request.commit_message,
                "sha": request.sha,
            })),
        )
        .await?;
        Ok(())
    }

    async fn close_pull_request(&self, pr: &PullRequestRef) -> Result<(), GitHubError> {
        let path = format!("/repos/{}/{}/pulls/{}", pr.owner, pr.repo, pr.number);
        Self::send(
            "close_pull_request",
            self.request(Method::PATCH, &path)
                .json(&json!({ "state": "closed" })),
        )
        .await?;
        Ok(())
    }

    async fn mark_ready_for_review(
        &self,
        _pr: &PullRequestRef,
        node_id: &str,
    ) -> Result<(), GitHubError> {
        // Only exposed through GraphQL.
        let query = "mutation($id: ID!) { markPullRequestReadyForReview(input: {pullRequestId: $id}) { clientMutationId } }";
        Self::send(
            "mark_ready_for_review",
            self.request(Method::POST, "/graphql")
                .json(&json!({ "query": query, "variables": { "id": node_id } })),
        )
        .await?;
        Ok(())
    }

    async fn update_branch(&self, pr: &PullRequestRef) -> Result<(), GitHubError> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/update-branch",
            pr.owner, pr.repo, pr.number
        );
        Self::send(
            "update_branch",
            self.request(Method::PUT, &path).json(&json!({})),
        )
        .await?;
        Ok(())
    }

    async fn list_pull_request_files(
        &self,
        pr: &PullRequestRef,
    ) -> Result<Vec<PullRequestFile>, GitHubError> {
        let path = format!("/repos/{}/{}/pulls/{}/files", pr.owner, pr.repo, pr.number);
        self.get_all_pages("list_pull_request_files", &path).await
    }

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<Branch>, GitHubError> {
        let path = format!("/repos/{owner}/{repo}/branches");
        self.get_all_pages("list_branches", &path).await
    }

    async fn delete_branch(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<(), GitHubError> {
        let path = format!("/repos/{owner}/{repo}/git/refs/heads/{branch}");
        Self::send("delete_branch", self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn get_commit_date(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Option<DateTime<Utc>>, GitHubError> {
        let path = format!("/repos/{owner}/{repo}/commits/{sha}");
        let commit: CommitResponse = self.get_json("get_commit", &path, &[]).await?;
        let date = commit
            .commit
            .committer
            .and_then(|s| s.date)
            .or_else(|| commit.commit.author.and_then(|s| s.date));
        Ok(date)
    }
}
