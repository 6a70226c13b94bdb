//! Per-key debounce.
//!
//! A single-slot limiter, not a token bucket: a key is rejected if it was
//! last seen less than `interval` ago.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RateLimitError;

/// Entries idle longer than this are evicted by the sweep.
pub const IDLE_TTL: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    interval: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record `key` and succeed, unless it was seen within the interval.
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = entries.get(key) {
            if now.duration_since(*last) < self.interval {
                return Err(RateLimitError);
            }
        }
        entries.insert(key.to_string(), now);
        Ok(())
    }

    /// Drop entries idle for longer than [`IDLE_TTL`]. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, last| now.duration_since(*last) <= IDLE_TTL);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) once a minute until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_TTL);
            // Skip immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, "Rate limiter swept idle keys");
                        }
                    }
                }
            }
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}
