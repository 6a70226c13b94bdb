//! Error types for the session autopilot.
//!
//! None of these types carry user-authored text (prompts, transcripts,
//! response bodies). Variants name the field or operation that failed and,
//! at most, an HTTP status code, so any of them can be logged as-is.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Remote session error: {0}")]
    Remote(#[from] RemoteError),

    #[error("GitHub error: {0}")]
    GitHub(#[from] GitHubError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Rejected input at a mutation boundary. Messages name the field, never its value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: &'static str },

    #[error("{field} is too long (max {max} characters)")]
    TooLong { field: &'static str, max: usize },

    #[error("invalid repository format, expected owner/repo")]
    InvalidRepo,

    #[error("invalid branch name")]
    InvalidBranch,

    #[error("session count must be between 1 and {max}")]
    SessionCount { max: u32 },
}

/// Remote session API errors.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Retries were exhausted on a retryable failure. Callers try again next cycle.
    #[error("remote session API unavailable after {attempts} attempts")]
    Transient { attempts: u32, status: Option<u16> },

    /// Non-retryable HTTP status. The response body is intentionally dropped.
    #[error("remote session API returned status {status}")]
    Status { status: u16 },

    #[error("remote session API request could not be built")]
    Request,

    #[error("could not decode remote session response")]
    Decode,
}

impl RemoteError {
    /// Whether the caller should simply try again on a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the remote asked us to back off.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::Transient {
                status: Some(429),
                ..
            } | Self::Status { status: 429 }
        )
    }
}

/// GitHub API errors.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("GitHub {operation} returned status {status}")]
    Status { operation: &'static str, status: u16 },

    #[error("GitHub {operation} request failed")]
    Request {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not decode GitHub {operation} response")]
    Decode { operation: &'static str },

    #[error("invalid pull request URL")]
    InvalidPullRequestUrl,
}

/// Debounce rejection from the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("rate limit exceeded: please slow down")]
pub struct RateLimitError;

/// Cron schedule errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression: expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("invalid cron expression: {0}")]
    Parse(String),
}

/// Errors from the session and job services.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error("no remote session API key configured")]
    MissingCredential,

    #[error("session {id} not found")]
    SessionNotFound { id: String },

    #[error("job {id} not found")]
    JobNotFound { id: String },
}

impl ServiceError {
    /// Short, content-free failure class for logs and persisted error markers.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Database(_) => "database",
            Self::Remote(e) if e.is_rate_limited() => RATE_LIMITED_CLASS,
            Self::Remote(e) if e.is_transient() => "remote_transient",
            Self::Remote(_) => "remote_error",
            Self::RateLimited(_) => "debounced",
            Self::MissingCredential => "missing_credential",
            Self::SessionNotFound { .. } | Self::JobNotFound { .. } => "not_found",
        }
    }
}

/// Failure class recorded when the remote rejected us for sending too fast.
pub const RATE_LIMITED_CLASS: &str = "rate_limited";

/// Worker lifecycle and check-pass errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker manager already started")]
    AlreadyStarted,

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error("worker task failed: {0}")]
    Task(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
