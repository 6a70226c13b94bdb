//! Starts and stops the worker fleet.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::worker::Worker;

/// Owns the registered workers and the tasks running them.
///
/// Workers are started in registration order, each on its own task, under
/// one shared cancellation token.
pub struct WorkerManager {
    workers: Vec<Arc<dyn Worker>>,
    cancel: CancellationToken,
    tasks: JoinSet<Result<(), WorkerError>>,
    /// Worker name per running task, so panics can be attributed.
    task_names: HashMap<Id, String>,
    started: bool,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
            task_names: HashMap::new(),
            started: false,
        }
    }

    /// Add a worker. Must happen before [`start`](Self::start).
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> Result<(), WorkerError> {
        if self.started {
            return Err(WorkerError::AlreadyStarted);
        }
        self.workers.push(worker);
        Ok(())
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name().to_string()).collect()
    }

    /// Token cancelled by [`stop`](Self::stop); share it with auxiliary tasks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn one task per registered worker.
    pub fn start(&mut self) {
        if self.started {
            tracing::warn!("Worker manager already started");
            return;
        }
        self.started = true;

        for worker in &self.workers {
            let name = worker.name().to_string();
            let worker = Arc::clone(worker);
            let cancel = self.cancel.clone();
            let handle = self.tasks.spawn(async move { worker.start(cancel).await });
            self.task_names.insert(handle.id(), name);
        }
        tracing::info!(workers = self.workers.len(), "Workers started");
    }

    /// Cancel every worker and wait for all of them to return.
    ///
    /// Safe to call more than once.
    pub async fn stop(&mut self) {
        self.cancel.cancel();

        while let Some(joined) = self.tasks.join_next_with_id().await {
            let id = match &joined {
                Ok((id, _)) => *id,
                Err(e) => e.id(),
            };
            let name = self
                .task_names
                .remove(&id)
                .unwrap_or_else(|| format!("task-{id}"));
            match joined {
                Ok((_, Ok(()))) => tracing::debug!(worker = %name, "Worker exited"),
                Ok((_, Err(e))) => {
                    tracing::error!(worker = %name, error = %e, "Worker exited with error")
                }
                Err(e) if e.is_panic() => {
                    tracing::error!(worker = %name, task_id = %id, "Worker task panicked")
                }
                Err(e) => tracing::warn!(worker = %name, error = %e, "Worker task aborted"),
            }
        }
        if self.started {
            tracing::info!("Workers stopped");
        }
    }
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}
