//! Retry with exponential backoff.
//!
//! Sync signals tend to arrive the moment connectivity returns, while the
//! origin is often still unreachable. A few spaced-out attempts absorb that.

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first; never below 1.
    pub max_attempts: u32,
    /// Pause before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single pause.
    pub max_delay: Duration,
    /// Growth factor between pauses.
    pub backoff_multiplier: f64,
    /// Stretch each pause by up to a quarter, at random.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::with_attempts(3, Duration::from_millis(500))
    }
}

impl RetryConfig {
    /// One attempt, no retries.
    pub fn none() -> Self {
        Self::with_attempts(1, Duration::ZERO)
    }

    /// `max_attempts` tries, the first retry after `initial_delay`, doubling
    /// up to 30 seconds.
    pub fn with_attempts(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Pause taken before attempt number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let retries = attempt.saturating_sub(1);
        if retries == 0 {
            return Duration::ZERO;
        }

        let mut pause = self.initial_delay.as_secs_f64();
        for _ in 1..retries {
            pause *= self.backoff_multiplier;
        }
        let pause = Duration::from_secs_f64(pause.min(self.max_delay.as_secs_f64()));

        if self.jitter {
            pause.mul_f64(1.0 + 0.25 * unit_random(attempt))
        } else {
            pause
        }
    }
}

/// Pseudo-random value in `[0, 1)` from a freshly seeded hasher.
fn unit_random(salt: u32) -> f64 {
    let bits = RandomState::new().hash_one(salt);
    (bits >> 11) as f64 / (1u64 << 53) as f64
}

/// Run `operation` until it succeeds or the attempts run out.
///
/// The error of the last attempt is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(config, |_| true, operation).await
}

/// Like [`retry_with_backoff`], but stops early on errors `should_retry` rejects.
pub async fn retry_when<T, E, F, Fut, P>(
    config: &RetryConfig,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Succeeded on retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !should_retry(&error) {
            warn!(attempt, %error, "Permanent failure, not retrying");
            return Err(error);
        }
        if attempt >= attempts {
            warn!(attempts, %error, "Out of attempts");
            return Err(error);
        }

        let pause = config.delay_for_attempt(attempt + 1);
        warn!(
            attempt,
            remaining = attempts - attempt,
            ?pause,
            %error,
            "Attempt failed, backing off"
        );
        sleep(pause).await;
        attempt += 1;
    }
}
