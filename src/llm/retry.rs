//! Explicit retry policy for transient network failures.
//!
//! Invoked imperatively around the call site rather than hidden in a wrapper,
//! so the bounded-retry contract stays directly testable: at most
//! `max_attempts` calls, exponential backoff, and a cap on the total time
//! spent sleeping between them.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential-backoff retry policy with a bounded total wait.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Cap on cumulative sleep time across all retries.
    pub max_total_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_total_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_total_delay: Duration::ZERO,
        }
    }

    /// Backoff delay after the given 1-based attempt: base, 2*base, 4*base...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(16))
    }

    /// Run `op`, retrying on errors the predicate marks as retryable.
    ///
    /// Non-retryable errors fail immediately; a retryable error on the final
    /// attempt (or past the total-wait budget) is returned as-is.
    pub async fn run<T, E, Fut>(
        &self,
        is_retryable: impl Fn(&E) -> bool,
        mut op: impl FnMut() -> Fut,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut total_wait = Duration::ZERO;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_retryable(&err) || attempt >= self.max_attempts.max(1) {
                        return Err(err);
                    }
                    let delay = self.delay_after(attempt);
                    if total_wait + delay > self.max_total_delay {
                        warn!(
                            attempt = attempt,
                            error = %err,
                            "Retry budget exhausted, surfacing error"
                        );
                        return Err(err);
                    }
                    warn!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    total_wait += delay;
                }
            }
        }
    }
}
