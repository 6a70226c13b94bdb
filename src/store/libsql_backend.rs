//! libSQL implementation of the `Database` trait.
//!
//! Supports local file and in-memory databases. Every CAS write is a single
//! `UPDATE ... WHERE id = ? AND <state> = ?` whose affected-row count
//! reports whether it won.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::jobs::model::{CronJob, Job, JobStatus};
use crate::session::model::{
    AutomationMode, Session, SessionFilter, SessionOutputs, SessionRefresh, SessionState,
};
use crate::settings::Settings;
use crate::store::migrations;
use crate::store::traits::Database;

const JOB_COLUMNS: &str = "id, name, repo, branch, prompt, session_count, auto_approval, \
    automation_mode, require_plan_approval, cron_job_id, background, profile_id, status, \
    session_ids, created_at";

const CRON_JOB_COLUMNS: &str = "id, name, schedule, prompt, repo, branch, session_count, \
    auto_approval, automation_mode, require_plan_approval, profile_id, enabled, last_run_at, \
    created_at";

const SESSION_COLUMNS: &str = "id, name, title, prompt, profile_id, state, create_time, \
    update_time, last_updated, last_interaction_at, outputs, retry_count, last_error, \
    require_plan_approval, automation_mode";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339, so stored timestamps compare correctly as text.
fn fmt_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_int(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn col_text(row: &libsql::Row, idx: i32, ctx: &str) -> Result<String, DatabaseError> {
    row.get::<String>(idx)
        .map_err(|e| DatabaseError::Query(format!("{ctx}: column {idx}: {e}")))
}

fn col_int(row: &libsql::Row, idx: i32, ctx: &str) -> Result<i64, DatabaseError> {
    row.get::<i64>(idx)
        .map_err(|e| DatabaseError::Query(format!("{ctx}: column {idx}: {e}")))
}

fn col_uuid(row: &libsql::Row, idx: i32, ctx: &str) -> Result<Uuid, DatabaseError> {
    let s = col_text(row, idx, ctx)?;
    Uuid::parse_str(&s).map_err(|e| DatabaseError::Serialization(format!("{ctx}: {e}")))
}

fn row_to_job(row: &libsql::Row) -> Result<Job, DatabaseError> {
    const CTX: &str = "row_to_job";
    let status_str = col_text(row, 12, CTX)?;
    let status = status_str
        .parse::<JobStatus>()
        .map_err(DatabaseError::Serialization)?;
    let session_ids_json = col_text(row, 13, CTX)?;
    let session_ids: Vec<String> = serde_json::from_str(&session_ids_json)
        .map_err(|e| DatabaseError::Serialization(format!("{CTX}: session_ids: {e}")))?;
    let cron_job_id = row
        .get::<String>(9)
        .ok()
        .and_then(|s| Uuid::parse_str(&s).ok());

    Ok(Job {
        id: col_uuid(row, 0, CTX)?,
        name: col_text(row, 1, CTX)?,
        repo: col_text(row, 2, CTX)?,
        branch: col_text(row, 3, CTX)?,
        prompt: col_text(row, 4, CTX)?,
        session_count: col_int(row, 5, CTX)? as u32,
        auto_approval: col_int(row, 6, CTX)? != 0,
        automation_mode: AutomationMode::from_db(&col_text(row, 7, CTX)?),
        require_plan_approval: col_int(row, 8, CTX)? != 0,
        cron_job_id,
        background: col_int(row, 10, CTX)? != 0,
        profile_id: col_text(row, 11, CTX)?,
        status,
        session_ids,
        created_at: parse_datetime(&col_text(row, 14, CTX)?),
    })
}

fn row_to_cron_job(row: &libsql::Row) -> Result<CronJob, DatabaseError> {
    const CTX: &str = "row_to_cron_job";
    Ok(CronJob {
        id: col_uuid(row, 0, CTX)?,
        name: col_text(row, 1, CTX)?,
        schedule: col_text(row, 2, CTX)?,
        prompt: col_text(row, 3, CTX)?,
        repo: col_text(row, 4, CTX)?,
        branch: col_text(row, 5, CTX)?,
        session_count: col_int(row, 6, CTX)? as u32,
        auto_approval: col_int(row, 7, CTX)? != 0,
        automation_mode: AutomationMode::from_db(&col_text(row, 8, CTX)?),
        require_plan_approval: col_int(row, 9, CTX)? != 0,
        profile_id: col_text(row, 10, CTX)?,
        enabled: col_int(row, 11, CTX)? != 0,
        last_run_at: row.get::<String>(12).ok().map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&col_text(row, 13, CTX)?),
    })
}

fn row_to_session(row: &libsql::Row) -> Result<Session, DatabaseError> {
    const CTX: &str = "row_to_session";
    let state_str = col_text(row, 5, CTX)?;
    let state = state_str
        .parse::<SessionState>()
        .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
    let outputs_json = col_text(row, 10, CTX)?;
    let outputs: SessionOutputs = serde_json::from_str(&outputs_json)
        .map_err(|e| DatabaseError::Serialization(format!("{CTX}: outputs: {e}")))?;

    Ok(Session {
        id: col_text(row, 0, CTX)?,
        name: col_text(row, 1, CTX)?,
        title: col_text(row, 2, CTX)?,
        prompt: col_text(row, 3, CTX)?,
        profile_id: col_text(row, 4, CTX)?,
        state,
        create_time: parse_datetime(&col_text(row, 6, CTX)?),
        update_time: parse_datetime(&col_text(row, 7, CTX)?),
        last_updated: col_int(row, 8, CTX)?,
        last_interaction_at: row.get::<i64>(9).ok(),
        outputs,
        retry_count: col_int(row, 11, CTX)? as u32,
        last_error: row.get::<String>(12).ok(),
        require_plan_approval: col_int(row, 13, CTX)? != 0,
        automation_mode: AutomationMode::from_db(&col_text(row, 14, CTX)?),
    })
}

/// Collect mapped rows, skipping (and logging) rows that fail to map.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    ctx: &str,
    map: fn(&libsql::Row) -> Result<T, DatabaseError>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("{ctx}: {e}")))?
    {
        match map(&row) {
            Ok(item) => out.push(item),
            Err(e) => tracing::warn!("Skipping {ctx} row: {e}"),
        }
    }
    Ok(out)
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Settings ────────────────────────────────────────────────────

    async fn get_settings(&self, profile_id: &str) -> Result<Settings, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT data FROM settings WHERE profile_id = ?1",
                params![profile_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_settings: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let data = col_text(&row, 0, "get_settings")?;
                serde_json::from_str(&data)
                    .map_err(|e| DatabaseError::Serialization(format!("get_settings: {e}")))
            }
            Ok(None) => Ok(Settings::default()),
            Err(e) => Err(DatabaseError::Query(format!("get_settings: {e}"))),
        }
    }

    async fn put_settings(
        &self,
        profile_id: &str,
        settings: &Settings,
    ) -> Result<(), DatabaseError> {
        let data = serde_json::to_string(settings)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO settings (profile_id, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(profile_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                params![profile_id, data, fmt_ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("put_settings: {e}")))?;
        Ok(())
    }

    // ── Jobs ────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        let session_ids = serde_json::to_string(&job.session_ids)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let cron_job_id = job.cron_job_id.map(|id| id.to_string());
        let now = fmt_ts(Utc::now());
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO jobs ({JOB_COLUMNS}, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    job.id.to_string(),
                    job.name.as_str(),
                    job.repo.as_str(),
                    job.branch.as_str(),
                    job.prompt.as_str(),
                    i64::from(job.session_count),
                    job.auto_approval as i64,
                    job.automation_mode.as_str(),
                    job.require_plan_approval as i64,
                    opt_text(cron_job_id.as_deref()),
                    job.background as i64,
                    job.profile_id.as_str(),
                    job.status.as_str(),
                    session_ids,
                    fmt_ts(job.created_at),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_jobs: {e}")))?;
        collect_rows(rows, "list_jobs", row_to_job).await
    }

    async fn list_pending_jobs(&self, limit: usize) -> Result<Vec<Job>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'PENDING'
                     ORDER BY created_at ASC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_pending_jobs: {e}")))?;
        collect_rows(rows, "list_pending_jobs", row_to_job).await
    }

    async fn claim_job(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![
                    JobStatus::Running.as_str(),
                    fmt_ts(Utc::now()),
                    id.to_string(),
                    JobStatus::Pending.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("claim_job: {e}")))?;
        Ok(affected == 1)
    }

    async fn complete_job(
        &self,
        id: Uuid,
        status: JobStatus,
        session_ids: &[String],
    ) -> Result<bool, DatabaseError> {
        if !status.is_terminal() {
            return Err(DatabaseError::Constraint(format!(
                "complete_job: {status} is not a terminal status"
            )));
        }
        let session_ids = serde_json::to_string(session_ids)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1, session_ids = ?2, updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    status.as_str(),
                    session_ids,
                    fmt_ts(Utc::now()),
                    id.to_string(),
                    JobStatus::Running.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_job: {e}")))?;
        Ok(affected == 1)
    }

    async fn list_job_repos(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT DISTINCT repo FROM jobs ORDER BY repo", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_job_repos: {e}")))?;

        let mut repos = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(repo) = row.get::<String>(0) {
                repos.push(repo);
            }
        }
        Ok(repos)
    }

    // ── Cron jobs ───────────────────────────────────────────────────

    async fn insert_cron_job(&self, cron_job: &CronJob) -> Result<(), DatabaseError> {
        let last_run_at = cron_job.last_run_at.map(fmt_ts);
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO cron_jobs ({CRON_JOB_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    cron_job.id.to_string(),
                    cron_job.name.as_str(),
                    cron_job.schedule.as_str(),
                    cron_job.prompt.as_str(),
                    cron_job.repo.as_str(),
                    cron_job.branch.as_str(),
                    i64::from(cron_job.session_count),
                    cron_job.auto_approval as i64,
                    cron_job.automation_mode.as_str(),
                    cron_job.require_plan_approval as i64,
                    cron_job.profile_id.as_str(),
                    cron_job.enabled as i64,
                    opt_text(last_run_at.as_deref()),
                    fmt_ts(cron_job.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_cron_job: {e}")))?;
        Ok(())
    }

    async fn list_enabled_cron_jobs(&self) -> Result<Vec<CronJob>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CRON_JOB_COLUMNS} FROM cron_jobs WHERE enabled = 1 ORDER BY created_at"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_enabled_cron_jobs: {e}")))?;
        collect_rows(rows, "list_enabled_cron_jobs", row_to_cron_job).await
    }

    async fn set_last_run_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE cron_jobs SET last_run_at = ?1 WHERE id = ?2",
                params![fmt_ts(at), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_last_run_at: {e}")))?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "cron_job".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn insert_session(&self, session: &Session) -> Result<(), DatabaseError> {
        let outputs = serde_json::to_string(&session.outputs)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO sessions ({SESSION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    session.id.as_str(),
                    session.name.as_str(),
                    session.title.as_str(),
                    session.prompt.as_str(),
                    session.profile_id.as_str(),
                    session.state.as_str(),
                    fmt_ts(session.create_time),
                    fmt_ts(session.update_time),
                    session.last_updated,
                    opt_int(session.last_interaction_at),
                    outputs,
                    i64::from(session.retry_count),
                    opt_text(session.last_error.as_deref()),
                    session.require_plan_approval as i64,
                    session.automation_mode.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_session: {e}")))?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_session(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session: {e}"))),
        }
    }

    async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, DatabaseError> {
        let created_after = filter.created_after.map(fmt_ts);
        let rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE (?1 IS NULL OR profile_id = ?1)
                       AND (?2 IS NULL OR state = ?2)
                       AND (?3 IS NULL OR create_time >= ?3)
                     ORDER BY create_time DESC"
                ),
                params![
                    opt_text(filter.profile_id.as_deref()),
                    opt_text(filter.state.map(|s| s.as_str())),
                    opt_text(created_after.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_sessions: {e}")))?;
        collect_rows(rows, "list_sessions", row_to_session).await
    }

    async fn transition_session_state(
        &self,
        id: &str,
        expected: SessionState,
        new: SessionState,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now();
        let affected = self
            .conn()
            .execute(
                "UPDATE sessions SET state = ?1, update_time = ?2, last_updated = ?3
                 WHERE id = ?4 AND state = ?5",
                params![
                    new.as_str(),
                    fmt_ts(now),
                    now.timestamp_millis(),
                    id,
                    expected.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition_session_state: {e}")))?;
        Ok(affected == 1)
    }

    async fn refresh_session(
        &self,
        id: &str,
        expected: SessionState,
        refresh: &SessionRefresh,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE sessions SET state = ?1, update_time = ?2, last_updated = ?3,
                     outputs = CASE
                         WHEN ?4 IS NOT NULL AND json_extract(outputs, '$.pr_url') IS NULL
                         THEN json_set(outputs, '$.pr_url', ?4)
                         ELSE outputs
                     END
                 WHERE id = ?5 AND state = ?6",
                params![
                    refresh.state.as_str(),
                    fmt_ts(refresh.update_time),
                    refresh.refreshed_at_ms,
                    opt_text(refresh.pr_url.as_deref()),
                    id,
                    expected.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("refresh_session: {e}")))?;
        Ok(affected == 1)
    }

    async fn record_interaction(&self, id: &str, at_ms: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE sessions SET last_interaction_at = ?1 WHERE id = ?2",
                params![at_ms, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_interaction: {e}")))?;
        Ok(())
    }

    async fn record_retry(&self, id: &str, at_ms: i64) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE sessions SET retry_count = retry_count + 1, last_interaction_at = ?1,
                     last_error = NULL
                 WHERE id = ?2",
                params![at_ms, id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_retry: {e}")))?;
        Ok(())
    }

    async fn set_session_error(
        &self,
        id: &str,
        class: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE sessions SET last_error = ?1 WHERE id = ?2",
                params![opt_text(class), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_session_error: {e}")))?;
        Ok(())
    }

    // ── Worker actions ──────────────────────────────────────────────

    async fn record_action(&self, key: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO worker_actions (key, recorded_at) VALUES (?1, ?2)",
                params![key, fmt_ts(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_action: {e}")))?;
        Ok(affected == 1)
    }

    async fn has_action(&self, key: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM worker_actions WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("has_action: {e}")))?;
        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(DatabaseError::Query(format!("has_action: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_session(id: &str, state: SessionState) -> Session {
        let now = Utc::now();
        Session {
            id: id.to_string(),
            name: format!("sessions/{id}"),
            title: "t".to_string(),
            prompt: "p".to_string(),
            profile_id: "default".to_string(),
            state,
            create_time: now,
            update_time: now,
            last_updated: now.timestamp_millis(),
            last_interaction_at: None,
            outputs: SessionOutputs::default(),
            retry_count: 0,
            last_error: None,
            require_plan_approval: false,
            automation_mode: AutomationMode::AutoCreatePr,
        }
    }

    fn make_job(status: JobStatus) -> Job {
        Job {
            id: Uuid::new_v4(),
            name: "nightly".to_string(),
            repo: "o/r".to_string(),
            branch: "main".to_string(),
            prompt: "p".to_string(),
            session_count: 2,
            auto_approval: true,
            automation_mode: AutomationMode::AutoCreatePr,
            require_plan_approval: false,
            cron_job_id: Some(Uuid::new_v4()),
            background: true,
            profile_id: "default".to_string(),
            status,
            session_ids: vec![],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn settings_default_then_roundtrip() {
        let db = test_db().await;
        assert_eq!(db.get_settings("default").await.unwrap(), Settings::default());

        let settings = Settings {
            auto_approval_enabled: true,
            auto_approval_interval: 15,
            ..Default::default()
        };
        db.put_settings("default", &settings).await.unwrap();
        db.put_settings("default", &settings).await.unwrap();
        assert_eq!(db.get_settings("default").await.unwrap(), settings);
        assert_eq!(db.get_settings("other").await.unwrap(), Settings::default());
    }

    #[tokio::test]
    async fn job_claim_is_compare_and_swap() {
        let db = test_db().await;
        let job = make_job(JobStatus::Pending);
        db.insert_job(&job).await.unwrap();

        assert!(db.claim_job(job.id).await.unwrap());
        assert!(!db.claim_job(job.id).await.unwrap());

        let ids = vec!["s1".to_string(), "s2".to_string()];
        assert!(db.complete_job(job.id, JobStatus::Succeeded, &ids).await.unwrap());
        // Terminal jobs are immutable.
        assert!(!db.complete_job(job.id, JobStatus::Failed, &[]).await.unwrap());

        let stored = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.session_ids, ids);
        assert_eq!(stored.cron_job_id, job.cron_job_id);
    }

    #[tokio::test]
    async fn complete_job_rejects_non_terminal_status() {
        let db = test_db().await;
        let job = make_job(JobStatus::Pending);
        db.insert_job(&job).await.unwrap();
        db.claim_job(job.id).await.unwrap();
        assert!(db.complete_job(job.id, JobStatus::Pending, &[]).await.is_err());
    }

    #[tokio::test]
    async fn pending_jobs_respect_limit_and_order() {
        let db = test_db().await;
        for i in 0..4 {
            let mut job = make_job(JobStatus::Pending);
            job.created_at = Utc::now() - Duration::minutes(10 - i);
            db.insert_job(&job).await.unwrap();
        }
        db.insert_job(&make_job(JobStatus::Succeeded)).await.unwrap();

        let pending = db.list_pending_jobs(3).await.unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert_eq!(db.list_job_repos().await.unwrap(), vec!["o/r".to_string()]);
    }

    #[tokio::test]
    async fn session_transition_is_compare_and_swap() {
        let db = test_db().await;
        db.insert_session(&make_session("s1", SessionState::AwaitingPlanApproval))
            .await
            .unwrap();

        assert!(
            db.transition_session_state(
                "s1",
                SessionState::AwaitingPlanApproval,
                SessionState::InProgress
            )
            .await
            .unwrap()
        );
        assert!(
            !db.transition_session_state(
                "s1",
                SessionState::AwaitingPlanApproval,
                SessionState::InProgress
            )
            .await
            .unwrap()
        );
        let s = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(s.state, SessionState::InProgress);
    }

    #[tokio::test]
    async fn refresh_never_overwrites_pr_url() {
        let db = test_db().await;
        db.insert_session(&make_session("s1", SessionState::InProgress))
            .await
            .unwrap();

        let first = SessionRefresh {
            state: SessionState::Completed,
            update_time: Utc::now(),
            pr_url: Some("https://github.com/o/r/pull/1".to_string()),
            refreshed_at_ms: 10,
        };
        assert!(
            db.refresh_session("s1", SessionState::InProgress, &first)
                .await
                .unwrap()
        );

        let second = SessionRefresh {
            state: SessionState::Completed,
            update_time: Utc::now(),
            pr_url: Some("https://github.com/o/r/pull/2".to_string()),
            refreshed_at_ms: 20,
        };
        assert!(
            db.refresh_session("s1", SessionState::Completed, &second)
                .await
                .unwrap()
        );

        let s = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(s.pr_url(), Some("https://github.com/o/r/pull/1"));
        assert_eq!(s.last_updated, 20);

        // Stale expected state loses.
        assert!(
            !db.refresh_session("s1", SessionState::InProgress, &second)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn list_sessions_filters() {
        let db = test_db().await;
        let mut old = make_session("old", SessionState::Completed);
        old.create_time = Utc::now() - Duration::days(5);
        db.insert_session(&old).await.unwrap();
        db.insert_session(&make_session("new", SessionState::Completed))
            .await
            .unwrap();
        db.insert_session(&make_session("busy", SessionState::InProgress))
            .await
            .unwrap();

        let recent = db
            .list_sessions(
                &SessionFilter::in_state(SessionState::Completed)
                    .created_after(Utc::now() - Duration::days(3)),
            )
            .await
            .unwrap();
        let ids: Vec<_> = recent.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new"]);

        let all = db.list_sessions(&SessionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn retry_bookkeeping() {
        let db = test_db().await;
        db.insert_session(&make_session("s1", SessionState::Failed))
            .await
            .unwrap();
        db.set_session_error("s1", Some("rate_limited")).await.unwrap();
        db.record_retry("s1", 1234).await.unwrap();

        let s = db.get_session("s1").await.unwrap().unwrap();
        assert_eq!(s.retry_count, 1);
        assert_eq!(s.last_interaction_at, Some(1234));
        assert_eq!(s.last_error, None);
    }

    #[tokio::test]
    async fn actions_are_recorded_once() {
        let db = test_db().await;
        assert!(!db.has_action("MERGED_PR_1_squash").await.unwrap());
        assert!(db.record_action("MERGED_PR_1_squash").await.unwrap());
        assert!(!db.record_action("MERGED_PR_1_squash").await.unwrap());
        assert!(db.has_action("MERGED_PR_1_squash").await.unwrap());
    }

    #[tokio::test]
    async fn cron_last_run_roundtrip() {
        let db = test_db().await;
        let cron = CronJob {
            id: Uuid::new_v4(),
            name: "c".to_string(),
            schedule: "* * * * *".to_string(),
            prompt: "p".to_string(),
            repo: "o/r".to_string(),
            branch: "main".to_string(),
            session_count: 1,
            auto_approval: false,
            automation_mode: AutomationMode::AutoCreatePr,
            require_plan_approval: false,
            profile_id: "default".to_string(),
            enabled: true,
            last_run_at: None,
            created_at: Utc::now() - Duration::minutes(2),
        };
        db.insert_cron_job(&cron).await.unwrap();

        let at = Utc::now();
        db.set_last_run_at(cron.id, at).await.unwrap();
        let stored = db.list_enabled_cron_jobs().await.unwrap();
        assert_eq!(stored.len(), 1);
        let stored_at = stored[0].last_run_at.unwrap();
        assert!((stored_at - at).num_milliseconds().abs() < 2);

        assert!(db.set_last_run_at(Uuid::new_v4(), at).await.is_err());
    }

    #[tokio::test]
    async fn opens_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("autopilot.db");
        let db = LibSqlBackend::new_local(&path).await.unwrap();
        db.put_settings("default", &Settings::default()).await.unwrap();
        assert!(path.exists());
    }
}
