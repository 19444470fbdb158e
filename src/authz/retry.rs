//! Exponential backoff with jitter for SubjectAccessReview calls.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Retry policy for transient backend failures
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one; at least one attempt is made
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `retryable`
/// rejects, or the attempts run out. The last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation_name: &str,
    retryable: R,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        if !retryable(&err) {
            return Err(err);
        }
        if attempt >= max_attempts {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %err,
                "Operation failed after max retries"
            );
            return Err(err);
        }

        // 0.5x to 1.5x of the nominal delay
        let jitter = rand::rng().random_range(0.5..1.5);
        let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %err,
            delay_ms = jittered_delay.as_millis() as u64,
            "Operation failed, retrying"
        );

        tokio::time::sleep(jittered_delay).await;

        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}
