use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use session_autopilot::config::AutopilotConfig;
use session_autopilot::github::{GitHubApi, GitHubClient};
use session_autopilot::jobs::JobService;
use session_autopilot::ratelimit::RateLimiter;
use session_autopilot::remote::RemoteSessionClient;
use session_autopilot::session::SessionService;
use session_autopilot::store::{Database, LibSqlBackend};
use session_autopilot::worker::{
    AutoApprovalWorker, AutoContinueWorker, AutoRetryWorker, BackgroundJobWorker, CronWorker,
    PrMonitorWorker, SessionCacheWorker, StaleBranchWorker, TaskPool, WorkerManager,
};

/// Stderr logging, plus a daily rolling file when a log directory is configured.
///
/// The returned guard flushes the file writer on drop; hold it for the life of the process.
fn init_tracing(config: &AutopilotConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "autopilot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AutopilotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });
    config
        .ensure_dirs()
        .context("Failed to create data directories")?;
    let _log_guard = init_tracing(&config);

    eprintln!("🤖 Session Autopilot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Profile: {}", config.profile_id);
    eprintln!("   Remote API keys: {}", config.api_keys.len());
    eprintln!(
        "   GitHub: {}",
        if config.github_token.is_some() {
            "enabled"
        } else {
            "disabled (GITHUB_TOKEN not set)"
        }
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Services ─────────────────────────────────────────────────────────
    let limiter = Arc::new(RateLimiter::default());
    let remote = Arc::new(RemoteSessionClient::new(&config.api_url)?);
    let sessions = Arc::new(SessionService::new(
        Arc::clone(&db),
        remote,
        config.api_keys.clone(),
        Arc::clone(&limiter),
    ));
    let jobs = Arc::new(JobService::new(Arc::clone(&db)));
    let github: Option<Arc<dyn GitHubApi>> = match &config.github_token {
        Some(token) => Some(Arc::new(GitHubClient::new(
            &config.github_api_url,
            token.clone(),
        )?)),
        None => None,
    };

    let settings = db
        .get_settings(&config.profile_id)
        .await
        .context("Failed to load settings")?;
    let pool = TaskPool::new(settings.max_concurrent_background_workers);

    // ── Workers ──────────────────────────────────────────────────────────
    let profile = config.profile_id.as_str();
    let mut manager = WorkerManager::new();
    manager.register(Arc::new(CronWorker::new(Arc::clone(&db), jobs)))?;
    manager.register(Arc::new(BackgroundJobWorker::new(
        Arc::clone(&db),
        Arc::clone(&sessions),
        pool,
        profile,
    )))?;
    manager.register(Arc::new(AutoApprovalWorker::new(
        Arc::clone(&db),
        Arc::clone(&sessions),
        profile,
    )))?;
    manager.register(Arc::new(AutoContinueWorker::new(
        Arc::clone(&db),
        Arc::clone(&sessions),
        profile,
    )))?;
    manager.register(Arc::new(AutoRetryWorker::new(
        Arc::clone(&db),
        Arc::clone(&sessions),
        github.clone(),
        profile,
    )))?;
    manager.register(Arc::new(SessionCacheWorker::new(
        Arc::clone(&db),
        Arc::clone(&sessions),
        profile,
    )))?;
    manager.register(Arc::new(PrMonitorWorker::new(
        Arc::clone(&db),
        github.clone(),
        profile,
    )))?;
    manager.register(Arc::new(StaleBranchWorker::new(
        Arc::clone(&db),
        github,
        config.branch_prefix.clone(),
        profile,
    )))?;

    let _sweeper = limiter.spawn_sweeper(manager.cancellation_token());
    manager.start();
    eprintln!("   Workers: {}", manager.worker_names().join(", "));
    eprintln!("   Press Ctrl-C to stop.\n");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested");
    manager.stop().await;

    Ok(())
}
