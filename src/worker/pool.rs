//! Bounded concurrency for fan-out inside a single check pass.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;

/// Runs a batch of futures with at most `size` in flight.
#[derive(Debug, Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl TaskPool {
    /// A pool of `size` slots. A size of zero is treated as one.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Drive every future to completion; outputs keep input order.
    pub async fn run_all<F>(&self, tasks: Vec<F>) -> Vec<F::Output>
    where
        F: Future,
    {
        join_all(tasks.into_iter().map(|task| {
            let permits = Arc::clone(&self.permits);
            async move {
                // The semaphore is never closed, so acquire only fails if it were.
                let _permit = permits.acquire_owned().await.ok();
                task.await
            }
        }))
        .await
    }
}
