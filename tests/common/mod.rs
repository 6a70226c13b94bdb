//! In-memory fakes for the remote session API and GitHub, plus wiring helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use secrecy::SecretString;

use session_autopilot::error::{DatabaseError, GitHubError, RemoteError};
use session_autopilot::github::{
    Branch, CheckRun, CheckRunPage, CombinedStatus, GitHubApi, IssueComment, MergeRequest,
    PullRequest, PullRequestFile, PullRequestRef,
};
use session_autopilot::github::GitHubUser;
use session_autopilot::ratelimit::RateLimiter;
use session_autopilot::remote::{
    MessageRole, RemoteMessage, RemoteOutput, RemotePullRequest, RemoteSession,
    RemoteSessionApi, RemoteSessionRequest,
};
use session_autopilot::jobs::model::{CronJob, Job, JobStatus};
use session_autopilot::session::model::{
    AutomationMode, SessionFilter, SessionOutputs, SessionRefresh,
};
use session_autopilot::settings::Settings;
use session_autopilot::session::{Session, SessionService, SessionState};
use session_autopilot::store::{Database, LibSqlBackend};

pub async fn memory_db() -> Arc<dyn Database> {
    Arc::new(LibSqlBackend::new_memory().await.unwrap())
}

/// A session service backed by `remote` with one API key.
pub fn sessions_with(db: Arc<dyn Database>, remote: Arc<FakeRemote>) -> Arc<SessionService> {
    Arc::new(SessionService::new(
        db,
        remote,
        vec![SecretString::from("test-key".to_string())],
        Arc::new(RateLimiter::default()),
    ))
}

pub fn local_session(id: &str, state: SessionState) -> Session {
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
        require_plan_approval: false,
        automation_mode: AutomationMode::default(),
    }
}

pub fn with_pr(mut session: Session, url: &str) -> Session {
    session.outputs.pr_url = Some(url.to_string());
    session
}

pub fn human(text: &str) -> RemoteMessage {
    RemoteMessage {
        text: text.into(),
        role: MessageRole::Human,
    }
}

pub fn ai(text: &str) -> RemoteMessage {
    RemoteMessage {
        text: text.into(),
        role: MessageRole::Ai,
    }
}

pub fn remote_session(id: &str, state: SessionState) -> RemoteSession {
    let now = Utc::now();
    RemoteSession {
        id: id.into(),
        name: format!("sessions/{id}"),
        state: state.as_str().into(),
        create_time: Some(now),
        update_time: Some(now),
        ..Default::default()
    }
}

pub fn remote_pr_output(url: &str) -> RemoteOutput {
    RemoteOutput {
        pull_request: Some(RemotePullRequest {
            url: url.into(),
            title: None,
        }),
    }
}

// ── Remote session API ──────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRemote {
    pub sessions: Mutex<HashMap<String, RemoteSession>>,
    /// Every create request received, including failed ones.
    pub creates: Mutex<Vec<RemoteSessionRequest>>,
    /// `(session_id, text)` for every send that reached the fake.
    pub sent: Mutex<Vec<(String, String)>>,
    pub approved: Mutex<Vec<String>>,
    /// Creates numbered at or above this index fail with a 500.
    pub fail_create_from: Mutex<Option<usize>>,
    /// When set, sends fail with this status.
    pub fail_send_status: Mutex<Option<u16>>,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, session: RemoteSession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    pub fn sent_to(&self, id: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(sid, _)| sid == id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

fn status_error(status: u16) -> RemoteError {
    if status == 429 || status >= 500 {
        RemoteError::Transient {
            attempts: 6,
            status: Some(status),
        }
    } else {
        RemoteError::Status { status }
    }
}

#[async_trait]
impl RemoteSessionApi for FakeRemote {
    async fn create_session(
        &self,
        _api_key: &SecretString,
        request: &RemoteSessionRequest,
    ) -> Result<RemoteSession, RemoteError> {
        let index = {
            let mut creates = self.creates.lock().unwrap();
            creates.push(request.clone());
            creates.len() - 1
        };
        if self
            .fail_create_from
            .lock()
            .unwrap()
            .is_some_and(|from| index >= from)
        {
            return Err(RemoteError::Status { status: 500 });
        }
        let session = remote_session(&format!("remote-{index}"), SessionState::Queued);
        self.put(session.clone());
        Ok(session)
    }

    async fn get_session(
        &self,
        id: &str,
        _api_key: &SecretString,
    ) -> Result<RemoteSession, RemoteError> {
        self.sessions
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(RemoteError::Status { status: 404 })
    }

    async fn send_message(
        &self,
        id: &str,
        text: &str,
        _api_key: &SecretString,
    ) -> Result<(), RemoteError> {
        if let Some(status) = *self.fail_send_status.lock().unwrap() {
            return Err(status_error(status));
        }
        self.sent
            .lock()
            .unwrap()
            .push((id.to_string(), text.to_string()));
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.messages.push(human(text));
        }
        Ok(())
    }

    async fn approve_plan(&self, id: &str, _api_key: &SecretString) -> Result<(), RemoteError> {
        self.approved.lock().unwrap().push(id.to_string());
        if let Some(session) = self.sessions.lock().unwrap().get_mut(id) {
            session.state = SessionState::InProgress.as_str().into();
        }
        Ok(())
    }
}

// ── GitHub ──────────────────────────────────────────────────────────

/// GitHub caps check-run pages at this size regardless of `per_page`.
pub const FAKE_PAGE_CAP: usize = 30;

pub struct FakeGitHub {
    pub login: String,
    pub pulls: Mutex<HashMap<u64, PullRequest>>,
    pub check_runs: Mutex<Vec<CheckRun>>,
    pub combined: Mutex<CombinedStatus>,
    pub comments: Mutex<Vec<IssueComment>>,
    pub files: Mutex<Vec<PullRequestFile>>,
    pub branches: Mutex<Vec<Branch>>,
    pub commit_dates: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Commit lookups for these SHAs fail with a 502.
    pub failing_commits: Mutex<Vec<String>>,
    pub merges: Mutex<Vec<(u64, MergeRequest)>>,
    pub closed: Mutex<Vec<u64>>,
    pub marked_ready: Mutex<Vec<u64>>,
    pub updated_branches: Mutex<Vec<u64>>,
    pub deleted_branches: Mutex<Vec<String>>,
    /// Pages requested from the check-runs endpoint.
    pub check_run_pages: Mutex<Vec<u32>>,
    pub fail_status: Mutex<bool>,
}

impl FakeGitHub {
    pub fn new(login: &str) -> Arc<Self> {
        Arc::new(Self {
            login: login.into(),
            pulls: Mutex::default(),
            check_runs: Mutex::default(),
            combined: Mutex::new(CombinedStatus {
                state: "pending".into(),
                statuses: Vec::new(),
            }),
            comments: Mutex::default(),
            files: Mutex::default(),
            branches: Mutex::default(),
            commit_dates: Mutex::default(),
            failing_commits: Mutex::default(),
            merges: Mutex::default(),
            closed: Mutex::default(),
            marked_ready: Mutex::default(),
            updated_branches: Mutex::default(),
            deleted_branches: Mutex::default(),
            check_run_pages: Mutex::default(),
            fail_status: Mutex::new(false),
        })
    }

    pub fn add_pull(&self, pr: PullRequest) {
        self.pulls.lock().unwrap().insert(pr.number, pr);
    }

    pub fn set_check_runs(&self, runs: Vec<CheckRun>) {
        *self.check_runs.lock().unwrap() = runs;
    }

    pub fn set_combined(&self, combined: CombinedStatus) {
        *self.combined.lock().unwrap() = combined;
    }

    pub fn add_comment(&self, login: &str, body: &str) {
        let mut comments = self.comments.lock().unwrap();
        let id = comments.len() as u64 + 1;
        comments.push(IssueComment {
            id,
            body: body.into(),
            user: GitHubUser {
                login: login.into(),
            },
            created_at: Utc::now(),
        });
    }

    pub fn comment_bodies(&self) -> Vec<String> {
        self.comments
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.body.clone())
            .collect()
    }

    pub fn merge_count(&self) -> usize {
        self.merges.lock().unwrap().len()
    }
}

pub fn open_pull(number: u64) -> PullRequest {
    PullRequest {
        number,
        node_id: format!("PR_node{number}"),
        state: "open".into(),
        title: "Fix the parser".into(),
        body: Some("Handles empty input.\n\n*PR created automatically by Jules*".into()),
        draft: false,
        merged: false,
        mergeable: Some(true),
        mergeable_state: "clean".into(),
        changed_files: Some(2),
        head: session_autopilot::github::GitRef {
            sha: format!("sha{number}"),
            name: format!("jules-{number}"),
        },
        user: GitHubUser {
            login: "google-labs-jules[bot]".into(),
        },
        updated_at: Utc::now(),
    }
}

pub fn check_run(name: &str, status: &str, conclusion: Option<&str>) -> CheckRun {
    CheckRun {
        name: name.into(),
        status: status.into(),
        conclusion: conclusion.map(str::to_string),
    }
}

pub fn success_status() -> CombinedStatus {
    CombinedStatus {
        state: "success".into(),
        statuses: Vec::new(),
    }
}

fn not_found(operation: &'static str) -> GitHubError {
    GitHubError::Status {
        operation,
        status: 404,
    }
}

#[async_trait]
impl GitHubApi for FakeGitHub {
    async fn current_user_login(&self) -> Result<String, GitHubError> {
        Ok(self.login.clone())
    }

    async fn get_pull_request(&self, pr: &PullRequestRef) -> Result<PullRequest, GitHubError> {
        self.pulls
            .lock()
            .unwrap()
            .get(&pr.number)
            .cloned()
            .ok_or_else(|| not_found("get pull request"))
    }

    async fn list_check_runs_for_ref(
        &self,
        _owner: &str,
        _repo: &str,
        _git_ref: &str,
        page: u32,
        per_page: u32,
    ) -> Result<CheckRunPage, GitHubError> {
        if *self.fail_status.lock().unwrap() {
            return Err(GitHubError::Status {
                operation: "list check runs",
                status: 502,
            });
        }
        self.check_run_pages.lock().unwrap().push(page);
        let runs = self.check_runs.lock().unwrap();
        let size = (per_page as usize).min(FAKE_PAGE_CAP);
        let start = (page as usize - 1) * size;
        let check_runs = runs.iter().skip(start).take(size).cloned().collect();
        Ok(CheckRunPage {
            total_count: runs.len() as u64,
            check_runs,
        })
    }

    async fn get_combined_status(
        &self,
        _owner: &str,
        _repo: &str,
        _git_ref: &str,
    ) -> Result<CombinedStatus, GitHubError> {
        if *self.fail_status.lock().unwrap() {
            return Err(GitHubError::Status {
                operation: "get combined status",
                status: 502,
            });
        }
        Ok(self.combined.lock().unwrap().clone())
    }

    async fn list_comments(&self, _pr: &PullRequestRef) -> Result<Vec<IssueComment>, GitHubError> {
        Ok(self.comments.lock().unwrap().clone())
    }

    async fn create_comment(&self, _pr: &PullRequestRef, body: &str) -> Result<(), GitHubError> {
        let login = self.login.clone();
        self.add_comment(&login, body);
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        pr: &PullRequestRef,
        request: &MergeRequest,
    ) -> Result<(), GitHubError> {
        self.merges
            .lock()
            .unwrap()
            .push((pr.number, request.clone()));
        if let Some(pull) = self.pulls.lock().unwrap().get_mut(&pr.number) {
            pull.merged = true;
            pull.state = "closed".into();
        }
        Ok(())
    }

    async fn close_pull_request(&self, pr: &PullRequestRef) -> Result<(), GitHubError> {
        self.closed.lock().unwrap().push(pr.number);
        if let Some(pull) = self.pulls.lock().unwrap().get_mut(&pr.number) {
            pull.state = "closed".into();
        }
        Ok(())
    }

    async fn mark_ready_for_review(
        &self,
        pr: &PullRequestRef,
        _node_id: &str,
    ) -> Result<(), GitHubError> {
        self.marked_ready.lock().unwrap().push(pr.number);
        if let Some(pull) = self.pulls.lock().unwrap().get_mut(&pr.number) {
            pull.draft = false;
        }
        Ok(())
    }

    async fn update_branch(&self, pr: &PullRequestRef) -> Result<(), GitHubError> {
        self.updated_branches.lock().unwrap().push(pr.number);
        if let Some(pull) = self.pulls.lock().unwrap().get_mut(&pr.number) {
            pull.mergeable_state = "clean".into();
        }
        Ok(())
    }

    async fn list_pull_request_files(
        &self,
        _pr: &PullRequestRef,
    ) -> Result<Vec<PullRequestFile>, GitHubError> {
        Ok(self.files.lock().unwrap().clone())
    }

    async fn list_branches(&self, _owner: &str, _repo: &str) -> Result<Vec<Branch>, GitHubError> {
        Ok(self.branches.lock().unwrap().clone())
    }

    async fn delete_branch(
        &self,
        _owner: &str,
        _repo: &str,
        branch: &str,
    ) -> Result<(), GitHubError> {
        self.deleted_branches
            .lock()
            .unwrap()
            .push(branch.to_string());
        Ok(())
    }

    async fn get_commit_date(
        &self,
        _owner: &str,
        _repo: &str,
        sha: &str,
    ) -> Result<Option<DateTime<Utc>>, GitHubError> {
        if self.failing_commits.lock().unwrap().iter().any(|s| s == sha) {
            return Err(GitHubError::Status {
                operation: "get commit",
                status: 502,
            });
        }
        Ok(self.commit_dates.lock().unwrap().get(sha).copied())
    }
}

// ── Store with injected bookkeeping failures ────────────────────────

/// Delegates to an inner store, but `record_retry` fails for the listed sessions.
pub struct FlakyStore {
    pub inner: Arc<dyn Database>,
    pub failing_retries: Mutex<Vec<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn Database>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_retries: Mutex::default(),
        })
    }
}

#[async_trait]
impl Database for FlakyStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn get_settings(&self, profile_id: &str) -> Result<Settings, DatabaseError> {
        self.inner.get_settings(profile_id).await
    }

    async fn put_settings(
        &self,
        profile_id: &str,
        settings: &Settings,
    ) -> Result<(), DatabaseError> {
        self.inner.put_settings(profile_id, settings).await
    }

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        self.inner.list_jobs().await
    }

    async fn list_pending_jobs(&self, limit: usize) -> Result<Vec<Job>, DatabaseError> {
        self.inner.list_pending_jobs(limit).await
    }

    async fn claim_job(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.inner.claim_job(id).await
    }

    async fn complete_job(
        &self,
        id: Uuid,
        status: JobStatus,
        session_ids: &[String],
    ) -> Result<bool, DatabaseError> {
        self.inner.complete_job(id, status, session_ids).await
    }

    async fn list_job_repos(&self) -> Result<Vec<String>, DatabaseError> {
        self.inner.list_job_repos().await
    }

    async fn insert_cron_job(&self, cron_job: &CronJob) -> Result<(), DatabaseError> {
        self.inner.insert_cron_job(cron_job).await
    }

    async fn list_enabled_cron_jobs(&self) -> Result<Vec<CronJob>, DatabaseError> {
        self.inner.list_enabled_cron_jobs().await
    }

    async fn set_last_run_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.inner.set_last_run_at(id, at).await
    }

    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError> {
        self.inner.insert_session(session).await
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError> {
        self.inner.get_session(id).await
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, DatabaseError> {
        self.inner.list_sessions(filter).await
    }

    async fn transition_session_state(
        &self,
        id: &str,
        expected: SessionState,
        new: SessionState,
    ) -> Result<bool, DatabaseError> {
        self.inner.transition_session_state(id, expected, new).await
    }

    async fn refresh_session(
        &self,
        id: &str,
        expected: SessionState,
        refresh: &SessionRefresh,
    ) -> Result<bool, DatabaseError> {
        self.inner.refresh_session(id, expected, refresh).await
    }

    async fn record_interaction(&self, id: &str, at_ms: i64) -> Result<(), DatabaseError> {
        self.inner.record_interaction(id, at_ms).await
    }

    async fn record_retry(&self, id: &str, at_ms: i64) -> Result<(), DatabaseError> {
        if self.failing_retries.lock().unwrap().iter().any(|s| s == id) {
            return Err(DatabaseError::Query("record_retry: disk I/O error".into()));
        }
        self.inner.record_retry(id, at_ms).await
    }

    async fn set_session_error(
        &self,
        id: &str,
        class: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.inner.set_session_error(id, class).await
    }

    async fn record_action(&self, key: &str) -> Result<bool, DatabaseError> {
        self.inner.record_action(key).await
    }

    async fn has_action(&self, key: &str) -> Result<bool, DatabaseError> {
        self.inner.has_action(key).await
    }
}
