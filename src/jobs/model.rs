//! Job and cron job records.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::model::AutomationMode;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting for the background job worker.
    Pending,
    /// Sessions are being created.
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Succeeded) | (Running, Failed)
        )
    }

    /// Terminal jobs are never touched again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// A template that expands into `session_count` sessions.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub repo: String,
    pub branch: String,
    /// User-authored. Never log.
    pub prompt: String,
    pub session_count: u32,
    pub auto_approval: bool,
    pub automation_mode: AutomationMode,
    pub require_plan_approval: bool,
    pub cron_job_id: Option<Uuid>,
    pub background: bool,
    pub profile_id: String,
    pub status: JobStatus,
    pub session_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a job.
#[derive(Debug, Clone, Default)]
pub struct CreateJobRequest {
    pub name: Option<String>,
    pub repo: String,
    pub branch: String,
    pub prompt: String,
    pub session_count: u32,
    pub auto_approval: bool,
    pub automation_mode: AutomationMode,
    pub require_plan_approval: bool,
    pub cron_job_id: Option<Uuid>,
    pub background: bool,
    pub profile_id: Option<String>,
}

/// A recurring job template.
#[derive(Debug, Clone)]
pub struct CronJob {
    pub id: Uuid,
    pub name: String,
    /// Five-field cron expression.
    pub schedule: String,
    /// User-authored. Never log.
    pub prompt: String,
    pub repo: String,
    pub branch: String,
    pub session_count: u32,
    pub auto_approval: bool,
    pub automation_mode: AutomationMode,
    pub require_plan_approval: bool,
    pub profile_id: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CronJob {
    /// The request for the job this template materializes into.
    pub fn to_job_request(&self) -> CreateJobRequest {
        CreateJobRequest {
            name: Some(self.name.clone()),
            repo: self.repo.clone(),
            branch: self.branch.clone(),
            prompt: self.prompt.clone(),
            session_count: self.session_count,
            auto_approval: self.auto_approval,
            automation_mode: self.automation_mode,
            require_plan_approval: self.require_plan_approval,
            cron_job_id: Some(self.id),
            background: true,
            profile_id: Some(self.profile_id.clone()),
        }
    }
}
