//! Unified `Database` trait: the persistence operations the workers call.
//!
//! State-changing session and job writes are compare-and-swap: they take the
//! expected prior state and report whether the row was actually updated.
//! `Ok(false)` means another writer got there first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::model::{CronJob, Job, JobStatus};
use crate::session::model::{Session, SessionFilter, SessionRefresh, SessionState};
use crate::settings::Settings;

/// Backend-agnostic database trait covering settings, jobs, cron jobs and sessions.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Settings ────────────────────────────────────────────────────

    /// Settings for a profile; defaults when none are stored.
    async fn get_settings(&self, profile_id: &str) -> Result<Settings, DatabaseError>;

    async fn put_settings(&self, profile_id: &str, settings: &Settings)
    -> Result<(), DatabaseError>;

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError>;

    /// All jobs, newest first.
    async fn list_jobs(&self) -> Result<Vec<Job>, DatabaseError>;

    /// Oldest pending jobs first, at most `limit`.
    async fn list_pending_jobs(&self, limit: usize) -> Result<Vec<Job>, DatabaseError>;

    /// PENDING → RUNNING. `false` if the job was not pending.
    async fn claim_job(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// RUNNING → `status` (terminal), persisting the sessions created so far.
    async fn complete_job(
        &self,
        id: Uuid,
        status: JobStatus,
        session_ids: &[String],
    ) -> Result<bool, DatabaseError>;

    /// Distinct `owner/repo` values across all jobs.
    async fn list_job_repos(&self) -> Result<Vec<String>, DatabaseError>;

    // ── Cron jobs ───────────────────────────────────────────────────

    async fn insert_cron_job(&self, cron_job: &CronJob) -> Result<(), DatabaseError>;

    async fn list_enabled_cron_jobs(&self) -> Result<Vec<CronJob>, DatabaseError>;

    async fn set_last_run_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError>;

    /// Sessions matching `filter`, newest first.
    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, DatabaseError>;

    /// Move `id` from `expected` to `new`.
    async fn transition_session_state(
        &self,
        id: &str,
        expected: SessionState,
        new: SessionState,
    ) -> Result<bool, DatabaseError>;

    /// Mirror remote fields onto `id` if it is still in `expected`.
    ///
    /// A PR URL is only written when none is stored yet.
    async fn refresh_session(
        &self,
        id: &str,
        expected: SessionState,
        refresh: &SessionRefresh,
    ) -> Result<bool, DatabaseError>;

    /// Record that an automated message was sent at `at_ms`.
    async fn record_interaction(&self, id: &str, at_ms: i64) -> Result<(), DatabaseError>;

    /// Bump `retry_count`, record the interaction and clear `last_error`.
    async fn record_retry(&self, id: &str, at_ms: i64) -> Result<(), DatabaseError>;

    /// Store a content-free failure class, or clear it.
    async fn set_session_error(&self, id: &str, class: Option<&str>)
    -> Result<(), DatabaseError>;

    // ── Worker actions ──────────────────────────────────────────────

    /// Record an idempotency key. `false` if it was already recorded.
    async fn record_action(&self, key: &str) -> Result<bool, DatabaseError>;

    async fn has_action(&self, key: &str) -> Result<bool, DatabaseError>;
}
