//! Retry with exponential backoff and full jitter.
//!
//! After failed attempt `n` (1-based) the wait is drawn uniformly from
//! `[0, min(max_delay, base_delay * 2^n))`. Only errors the caller's
//! predicate accepts are retried; anything else is returned at once.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tally_shared::RetryConfig;
use tokio::time::Instant;
use tracing::warn;

/// Retry limits and backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base of the exponential backoff.
    pub base_delay: Duration,
    /// Cap on any single backoff window.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Builds the policy from configuration.
    #[must_use]
    pub const fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay(), config.max_delay())
    }

    /// A policy that makes exactly one attempt.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Upper bound (exclusive) of the wait after failed attempt `attempt`.
    #[must_use]
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let scaled = 1_u32
            .checked_shl(attempt)
            .map_or(Duration::MAX, |factor| self.base_delay.saturating_mul(factor));
        scaled.min(self.max_delay)
    }

    /// Draws the wait after failed attempt `attempt`.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = u64::try_from(self.backoff_ceiling(attempt).as_nanos()).unwrap_or(u64::MAX);
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rng.random_range(0..ceiling))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Runs `operation` until it succeeds, fails with an error `is_retryable`
/// rejects, or the policy runs out of attempts.
///
/// `operation` receives the 1-based attempt number. The last error is
/// returned unchanged on exhaustion.
pub async fn retry<T, E, F, Fut, P>(policy: &RetryPolicy, is_retryable: P, operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    retry_until(policy, None, is_retryable, operation).await
}

/// Like [`retry`], but stops before starting an attempt whose backoff would
/// end after `deadline`. An attempt already running is never interrupted.
pub async fn retry_until<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    deadline: Option<Instant>,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !is_retryable(&err) || attempt >= max_attempts {
            return Err(err);
        }

        let delay = policy.jittered_delay(attempt, &mut rand::rng());
        if deadline.is_some_and(|deadline| Instant::now() + delay >= deadline) {
            warn!(attempt, error = %err, "retry deadline reached");
            return Err(err);
        }

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        warn!(attempt, max_attempts, delay_ms, error = %err, "retrying after conflict");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
