//! Background worker fleet.
//!
//! Every worker is an independent polling loop driven by [`WorkerManager`]:
//! - `cron`: materializes due cron jobs into pending jobs
//! - `background_job`: turns pending jobs into sessions
//! - `auto_approval`: approves pending plans
//! - `auto_continue`: nudges sessions that stopped without a PR
//! - `auto_retry`: re-prompts failed sessions and sessions with failing checks
//! - `session_cache`: mirrors remote session state locally
//! - `pr_monitor`: reports failing checks, merges green PRs, closes stale ones
//! - `stale_branch`: deletes abandoned session branches

pub mod auto_approval;
pub mod auto_continue;
pub mod auto_retry;
pub mod background_job;
pub mod cron;
pub mod manager;
pub mod polling;
pub mod pool;
pub mod pr_monitor;
pub mod session_cache;
pub mod stale_branch;
#[cfg(test)]
mod testing;
pub mod throttle;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;

pub use auto_approval::AutoApprovalWorker;
pub use auto_continue::AutoContinueWorker;
pub use auto_retry::AutoRetryWorker;
pub use background_job::BackgroundJobWorker;
pub use cron::CronWorker;
pub use manager::WorkerManager;
pub use polling::{MIN_INTERVAL, PeriodicCheck};
pub use pool::TaskPool;
pub use pr_monitor::PrMonitorWorker;
pub use session_cache::SessionCacheWorker;
pub use stale_branch::StaleBranchWorker;

/// Sessions older than this are ignored by auto-continue and auto-retry.
pub const LOOKBACK_DAYS: i64 = 3;

/// A long-running background worker.
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `cancel` fires. Returns once the current pass (if any) ends.
    async fn start(&self, cancel: CancellationToken) -> Result<(), WorkerError>;
}
