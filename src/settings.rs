//! Per-profile automation settings.
//!
//! Workers read these fresh from the store on every tick, so a change made
//! through the store becomes visible within one worker interval.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Profile used when none is specified.
pub const DEFAULT_PROFILE_ID: &str = "default";

pub const DEFAULT_AUTO_CONTINUE_MESSAGE: &str = "Sounds good. Now go ahead finish the work";

pub const DEFAULT_AUTO_RETRY_MESSAGE: &str = "You have been doing a great job. Let’s try another approach to see if we can achieve the same goal. Do not stop until you find a solution";

/// Automation tunables and toggles for one profile.
///
/// Stored as a JSON document; any key missing from the stored document
/// falls back to its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ── Auto approval ───────────────────────────────────────────────
    pub auto_approval_enabled: bool,
    /// Seconds between auto-approval, auto-continue and auto-retry passes.
    pub auto_approval_interval: u64,
    /// When false, only sessions spawned by a job with auto approval are approved.
    pub auto_approval_all_sessions: bool,

    // ── Auto continue ───────────────────────────────────────────────
    pub auto_continue_enabled: bool,
    /// When false, only sessions spawned by recent jobs are considered.
    pub auto_continue_all_sessions: bool,
    pub auto_continue_message: String,
    /// Stop nudging a session once the canned message appears this many times.
    pub auto_continue_max_repeats: u32,

    // ── Auto retry ──────────────────────────────────────────────────
    pub auto_retry_enabled: bool,
    pub auto_retry_message: String,
    pub auto_retry_max_attempts: u32,

    // ── Interaction throttling ──────────────────────────────────────
    /// Minimum seconds between two automated messages to the same session.
    pub min_session_interaction_interval: u64,
    /// Seconds after which a silent session may be poked again.
    pub retry_timeout: u64,

    // ── Pull request monitoring ─────────────────────────────────────
    pub pr_status_poll_interval: u64,
    pub check_failing_actions_enabled: bool,
    pub auto_merge_enabled: bool,
    pub auto_merge_method: MergeMethod,
    pub auto_merge_message: String,
    pub auto_close_stale_conflicted_prs: bool,
    pub stale_conflicted_prs_duration_days: u32,
    pub auto_close_on_conflict_message: String,

    // ── Session cache ───────────────────────────────────────────────
    pub session_cache_in_progress_interval: u64,
    pub session_cache_pending_approval_interval: u64,
    pub session_cache_completed_no_pr_interval: u64,
    pub session_cache_max_age_days: u32,

    // ── Branch cleanup ──────────────────────────────────────────────
    pub auto_delete_stale_branches: bool,
    pub auto_delete_stale_branches_after_days: u32,

    // ── Background jobs ─────────────────────────────────────────────
    pub max_concurrent_background_workers: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_approval_enabled: false,
            auto_approval_interval: 60,
            auto_approval_all_sessions: true,
            auto_continue_enabled: true,
            auto_continue_all_sessions: true,
            auto_continue_message: DEFAULT_AUTO_CONTINUE_MESSAGE.to_string(),
            auto_continue_max_repeats: 5,
            auto_retry_enabled: true,
            auto_retry_message: DEFAULT_AUTO_RETRY_MESSAGE.to_string(),
            auto_retry_max_attempts: 3,
            min_session_interaction_interval: 60,
            retry_timeout: 1200,
            pr_status_poll_interval: 60,
            check_failing_actions_enabled: true,
            auto_merge_enabled: false,
            auto_merge_method: MergeMethod::Squash,
            auto_merge_message: "Automatically merged by bot as all checks passed".to_string(),
            auto_close_stale_conflicted_prs: false,
            stale_conflicted_prs_duration_days: 3,
            auto_close_on_conflict_message: "Closed due to merge conflict".to_string(),
            session_cache_in_progress_interval: 60,
            session_cache_pending_approval_interval: 300,
            session_cache_completed_no_pr_interval: 1800,
            session_cache_max_age_days: 3,
            auto_delete_stale_branches: false,
            auto_delete_stale_branches_after_days: 3,
            max_concurrent_background_workers: 5,
        }
    }
}

impl Settings {
    pub fn auto_approval_interval(&self) -> Duration {
        Duration::from_secs(self.auto_approval_interval)
    }

    pub fn pr_status_poll_interval(&self) -> Duration {
        Duration::from_secs(self.pr_status_poll_interval)
    }

    pub fn session_cache_max_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.session_cache_max_age_days))
    }
}

/// Merge strategy passed to GitHub's merge endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    Merge,
    #[default]
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
