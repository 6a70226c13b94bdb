//! Schema migrations, tracked in `schema_versions`.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version; append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS settings (
                profile_id TEXT PRIMARY KEY,
                data TEXT NOT NULL DEFAULT '{}',
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                repo TEXT NOT NULL,
                branch TEXT NOT NULL,
                prompt TEXT NOT NULL,
                session_count INTEGER NOT NULL,
                auto_approval INTEGER NOT NULL DEFAULT 0,
                automation_mode TEXT NOT NULL DEFAULT 'AUTOMATION_MODE_UNSPECIFIED',
                require_plan_approval INTEGER NOT NULL DEFAULT 0,
                cron_job_id TEXT,
                background INTEGER NOT NULL DEFAULT 0,
                profile_id TEXT NOT NULL DEFAULT 'default',
                status TEXT NOT NULL DEFAULT 'PENDING',
                session_ids TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

            CREATE TABLE IF NOT EXISTS cron_jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                schedule TEXT NOT NULL,
                prompt TEXT NOT NULL,
                repo TEXT NOT NULL,
                branch TEXT NOT NULL,
                session_count INTEGER NOT NULL DEFAULT 1,
                auto_approval INTEGER NOT NULL DEFAULT 0,
                automation_mode TEXT NOT NULL DEFAULT 'AUTOMATION_MODE_UNSPECIFIED',
                require_plan_approval INTEGER NOT NULL DEFAULT 0,
                profile_id TEXT NOT NULL DEFAULT 'default',
                enabled INTEGER NOT NULL DEFAULT 1,
                last_run_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cron_jobs_enabled ON cron_jobs(enabled);

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                title TEXT NOT NULL,
                prompt TEXT NOT NULL,
                profile_id TEXT NOT NULL DEFAULT 'default',
                state TEXT NOT NULL,
                create_time TEXT NOT NULL,
                update_time TEXT NOT NULL,
                last_updated INTEGER NOT NULL,
                last_interaction_at INTEGER,
                outputs TEXT NOT NULL DEFAULT '{}',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                require_plan_approval INTEGER NOT NULL DEFAULT 0,
                automation_mode TEXT NOT NULL DEFAULT 'AUTOMATION_MODE_UNSPECIFIED'
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_state ON sessions(state);
            CREATE INDEX IF NOT EXISTS idx_sessions_profile_create_time
                ON sessions(profile_id, create_time);
        "#,
    },
    Migration {
        version: 2,
        name: "worker_actions",
        sql: r#"
            CREATE TABLE IF NOT EXISTS worker_actions (
                key TEXT PRIMARY KEY,
                recorded_at TEXT NOT NULL
            );
        "#,
    },
];

const VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_versions (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)";

fn migration_err(context: &str, e: libsql::Error) -> DatabaseError {
    DatabaseError::Migration(format!("{context}: {e}"))
}

/// Apply every migration newer than the recorded version.
///
/// Each step runs in its own transaction together with its version row, so a
/// failed step leaves the schema at the previous version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(VERSION_TABLE, ())
        .await
        .map_err(|e| migration_err("create schema_versions", e))?;

    let applied = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > applied).collect();
    if pending.is_empty() {
        tracing::debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for migration in pending {
        tracing::info!(version = migration.version, name = migration.name, "Applying migration");
        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO schema_versions (version, name) VALUES ({}, '{}');\nCOMMIT;",
            migration.sql, migration.version, migration.name
        );
        if let Err(e) = conn.execute_batch(&batch).await {
            // Best effort: the batch may have failed before BEGIN took effect.
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(migration_err(
                &format!("migration V{} ({})", migration.version, migration.name),
                e,
            ));
        }
    }
    Ok(())
}

/// Highest applied version, 0 on a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_versions", ())
        .await
        .map_err(|e| migration_err("query schema version", e))?;
    match rows
        .next()
        .await
        .map_err(|e| migration_err("read schema version", e))?
    {
        Some(row) => row
            .get::<i64>(0)
            .map_err(|e| migration_err("parse schema version", e)),
        None => Ok(0),
    }
}
