//! Bounded exponential backoff for the remote session API.
//!
//! Only retryable failures (network errors, 429, 5xx) are retried. Anything
//! else is returned on the first attempt. Running out of retries yields
//! [`RemoteError::Transient`]; callers treat that as "try again next cycle".

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::RemoteError;

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 5 retries, 1s base, 30s cap.
    pub const DEFAULT: Self = Self {
        max_retries: 5,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    };

    /// Single attempt, no sleeping.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
    };

    /// Delay before retry number `attempt` (0-indexed), without jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// Up to 10% extra on top of the computed delay, still capped.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let spread = base.as_millis() as u64 / 10;
        if spread == 0 {
            return base;
        }
        let extra = Duration::from_millis(rand::thread_rng().gen_range(0..=spread));
        (base + extra).min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Outcome of a single failed attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Worth retrying. `status` is `None` for transport failures.
    Retryable { status: Option<u16> },
    /// Give up immediately.
    Permanent(RemoteError),
}

impl AttemptError {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        if status == 429 || (500..600).contains(&status) {
            Self::Retryable {
                status: Some(status),
            }
        } else {
            Self::Permanent(RemoteError::Status { status })
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or retries run out.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    mut operation: F,
) -> Result<T, RemoteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Permanent(e)) => return Err(e),
            Err(AttemptError::Retryable { status }) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(RemoteError::Transient {
                        attempts: attempt,
                        status,
                    });
                }
                let delay = config.jittered_delay(attempt - 1);
                tracing::debug!(attempt, ?status, ?delay, "Retrying remote session call");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
