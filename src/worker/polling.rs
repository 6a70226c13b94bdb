//! The polling loop shared by every worker.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::settings::Settings;
use crate::store::Database;
use crate::worker::Worker;

/// No worker polls more often than this, whatever its settings say.
pub const MIN_INTERVAL: Duration = Duration::from_secs(10);

/// One pass of periodic work plus the cadence it runs at.
#[async_trait]
pub trait PeriodicCheck: Send + Sync {
    fn name(&self) -> &str;

    /// Delay before the next pass. Called before every sleep.
    async fn interval(&self) -> Duration;

    /// Perform a single pass.
    async fn run_check(&self) -> Result<(), WorkerError>;
}

#[async_trait]
impl<T: PeriodicCheck> Worker for T {
    fn name(&self) -> &str {
        PeriodicCheck::name(self)
    }

    async fn start(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
        run_polling_loop(self, cancel).await;
        Ok(())
    }
}

/// Sleep, check, repeat until cancelled.
///
/// A failing pass is logged and the loop carries on. Cancellation is only
/// observed while sleeping, so an in-flight pass always runs to completion.
pub async fn run_polling_loop<C: PeriodicCheck + ?Sized>(check: &C, cancel: CancellationToken) {
    let name = PeriodicCheck::name(check).to_string();
    let mut interval = floor_interval(check.interval().await);
    tracing::info!(worker = %name, interval_secs = interval.as_secs(), "Worker started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(worker = %name, "Worker stopping");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let status = match check.run_check().await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::warn!(worker = %name, error = %e, "Check failed");
                "failed"
            }
        };

        interval = floor_interval(check.interval().await);
        let next_run =
            Utc::now() + chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
        tracing::info!(
            worker = %name,
            status,
            next_run = %next_run.to_rfc3339(),
            "Task completed"
        );
    }
}

pub fn floor_interval(interval: Duration) -> Duration {
    interval.max(MIN_INTERVAL)
}

/// Settings for `profile_id`, or defaults if the store cannot be read.
///
/// Used for interval lookups, where a store hiccup should not stall the loop.
pub async fn settings_or_default(db: &dyn Database, profile_id: &str) -> Settings {
    match db.get_settings(profile_id).await {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(profile_id, error = %e, "Failed to load settings, using defaults");
            Settings::default()
        }
    }
}
