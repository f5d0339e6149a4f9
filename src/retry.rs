//! Bounded retry for filesystem operations.
//!
//! Exclusive locks held by antivirus scanners or other editors are usually
//! released within a second or two, so file mutations are retried on a fixed
//! interval up to a bounded number of attempts. The policy itself is a pure
//! function of the attempt number; [`with_retry`] drives it on tokio timers so
//! waiting never blocks the caller's runtime.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay after the first failed attempt, in milliseconds
    pub interval_ms: u64,

    /// Multiplier applied to the delay after each further failure
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            interval_ms: 1_000,
            backoff_multiplier: 1.0,
            max_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Create a no-retry policy
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Fixed-interval policy.
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        let ms = interval.as_millis() as u64;
        Self {
            max_attempts,
            interval_ms: ms,
            backoff_multiplier: 1.0,
            max_delay_ms: ms,
        }
    }

    /// Delay to wait after `failed_attempts` consecutive failures, or `None`
    /// when the budget is spent.
    pub fn delay_after(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts == 0 || failed_attempts >= self.max_attempts.max(1) {
            return None;
        }
        let factor = self.backoff_multiplier.max(1.0).powi(failed_attempts as i32 - 1);
        let cap = self.max_delay_ms.max(self.interval_ms) as f64;
        let ms = (self.interval_ms as f64 * factor).min(cap);
        Some(Duration::from_millis(ms as u64))
    }

    /// Worst-case time spent waiting between attempts.
    pub fn worst_case_wait(&self) -> Duration {
        (1..self.max_attempts.max(1))
            .filter_map(|n| self.delay_after(n))
            .sum()
    }
}

/// Retry budget ran out; carries the last error.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Execute with retry logic
pub async fn with_retry<F, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, Exhausted<E>>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => match policy.delay_after(attempts) {
                Some(delay) => {
                    tracing::debug!(
                        "attempt {}/{} failed: {}; retrying in {:?}",
                        attempts,
                        policy.max_attempts,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
                None => {
                    return Err(Exhausted {
                        attempts,
                        last_error: e,
                    })
                }
            },
        }
    }
}
