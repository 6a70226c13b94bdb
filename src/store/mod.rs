//! Persistence for settings, jobs, cron jobs and sessions, backed by libSQL.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
