//! GitHub collaborator: pull requests, checks, comments, branches.

pub mod client;
pub mod pull_request;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::GitHubError;
use crate::settings::MergeMethod;

pub use client::GitHubClient;
pub use pull_request::{PullRequestRef, split_repo};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitHubUser {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitRef {
    #[serde(default)]
    pub sha: String,
    #[serde(rename = "ref", default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub node_id: String,
    /// `open` or `closed`.
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub merged: bool,
    /// `None` while GitHub is still computing mergeability.
    #[serde(default)]
    pub mergeable: Option<bool>,
    /// `clean`, `behind`, `dirty`, `blocked`, ... Empty when not reported.
    #[serde(default)]
    pub mergeable_state: String,
    /// `None` when the listing endpoint omitted it.
    #[serde(default)]
    pub changed_files: Option<u64>,
    #[serde(default)]
    pub head: GitRef,
    #[serde(default)]
    pub user: GitHubUser,
    pub updated_at: DateTime<Utc>,
}

impl PullRequest {
    pub fn is_open(&self) -> bool {
        self.state == "open" && !self.merged
    }

    /// The head branch lags its base and can be brought up to date.
    pub fn is_behind(&self) -> bool {
        self.mergeable_state == "behind"
    }

    pub fn has_no_changes(&self) -> bool {
        self.changed_files == Some(0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckRun {
    #[serde(default)]
    pub name: String,
    /// `queued`, `in_progress` or `completed`.
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
}

impl CheckRun {
    pub fn is_failure(&self) -> bool {
        self.status == "completed" && self.conclusion.as_deref() == Some("failure")
    }

    pub fn is_green(&self) -> bool {
        self.status == "completed"
            && matches!(
                self.conclusion.as_deref(),
                Some("success") | Some("neutral") | Some("skipped")
            )
    }
}

/// One page of check runs for a ref.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckRunPage {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub check_runs: Vec<CheckRun>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommitStatus {
    #[serde(default)]
    pub context: String,
    /// `error`, `failure`, `pending` or `success`.
    #[serde(default)]
    pub state: String,
}

/// Legacy combined commit status.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CombinedStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub statuses: Vec<CommitStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub user: GitHubUser,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BranchCommit {
    #[serde(default)]
    pub sha: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub commit: BranchCommit,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullRequestFile {
    pub filename: String,
    /// `added`, `removed`, `modified`, `renamed`, ...
    #[serde(default)]
    pub status: String,
}

/// Parameters for a merge.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub method: MergeMethod,
    pub commit_title: String,
    pub commit_message: String,
    /// Head SHA the merge is conditioned on.
    pub sha: String,
}

/// GitHub operations used by the workers.
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// Login of the authenticated account; comments by it count as our own.
    async fn current_user_login(&self) -> Result<String, GitHubError>;

    async fn get_pull_request(&self, pr: &PullRequestRef) -> Result<PullRequest, GitHubError>;

    /// One page (1-based) of check runs for `git_ref`.
    async fn list_check_runs_for_ref(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
        page: u32,
        per_page: u32,
    ) -> Result<CheckRunPage, GitHubError>;

    async fn get_combined_status(
        &self,
        owner: &str,
        repo: &str,
        git_ref: &str,
    ) -> Result<CombinedStatus, GitHubError>;

    /// All issue comments on the pull request, oldest first.
    async fn list_comments(&self, pr: &PullRequestRef) -> Result<Vec<IssueComment>, GitHubError>;

    async fn create_comment(&self, pr: &PullRequestRef, body: &str) -> Result<(), GitHubError>;

    async fn merge_pull_request(
        &self,
        pr: &PullRequestRef,
        request: &MergeRequest,
    ) -> Result<(), GitHubError>;

    async fn close_pull_request(&self, pr: &PullRequestRef) -> Result<(), GitHubError>;

    async fn mark_ready_for_review(
        &self,
        pr: &PullRequestRef,
        node_id: &str,
    ) -> Result<(), GitHubError>;

    /// Merge the base branch into the head branch.
    async fn update_branch(&self, pr: &PullRequestRef) -> Result<(), GitHubError>;

    async fn list_pull_request_files(
        &self,
        pr: &PullRequestRef,
    ) -> Result<Vec<PullRequestFile>, GitHubError>;

    async fn list_branches(&self, owner: &str, repo: &str) -> Result<Vec<Branch>, GitHubError>;

    async fn delete_branch(&self, owner: &str, repo: &str, branch: &str)
    -> Result<(), GitHubError>;

    /// Committer date of a commit, if GitHub reports one.
    async fn get_commit_date(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
    ) -> Result<Option<DateTime<Utc>>, GitHubError>;
}
