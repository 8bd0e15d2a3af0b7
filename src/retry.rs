//! Retry utilities with bounded exponential backoff.
//!
//! Used for directory lookups, where the upstream signals throttling (429) or
//! temporary unavailability (503) and expects the caller to back off. The
//! caller decides which errors are worth another attempt; everything else is
//! returned immediately.
//!
//! # Example
//!
//! ```ignore
//! use vmgate::retry::{retry_with_backoff, RetryConfig};
//!
//! let groups = retry_with_backoff(
//!     &RetryConfig::directory(),
//!     "transitive_member_of",
//!     Error::is_retryable,
//!     || async { client.fetch_groups(subject).await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in 0.5..1.5
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::directory()
    }
}

impl RetryConfig {
    /// Policy for directory membership queries: 3 attempts, 400ms doubling, no jitter
    pub fn directory() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Delay slept after the given failed attempt (1-based), before the next one
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Execute an async operation, retrying errors accepted by `should_retry`.
///
/// Performs at most `config.max_attempts` attempts. Errors rejected by
/// `should_retry` are returned immediately; once the budget is spent the last
/// error is returned.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let mut delay = config.delay_after(attempt);
                if config.jitter {
                    let factor = rand::thread_rng().gen_range(0.5..1.5);
                    delay = Duration::from_secs_f64(delay.as_secs_f64() * factor);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
