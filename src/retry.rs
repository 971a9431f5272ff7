//! Retry configuration and backoff execution.
//!
//! Provides [`RetryConfig`] for controlling retry behaviour and the
//! [`with_retry`] / [`with_retry_if`] helpers that wrap any fallible
//! async operation with bounded retries, exponential backoff, and
//! jitter.
//!
//! Retryability is a caller-side policy: [`with_retry`] classifies via
//! [`SleipnirError::is_transient()`], and [`with_retry_if`] takes an
//! arbitrary predicate for callers with their own taxonomy.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::telemetry;
use crate::{Result, SleipnirError};

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff with optional jitter. Supports both broker
/// defaults and per-target overrides via the builder:
///
/// ```rust
/// # use sleipnir::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200))
///     .jitter(true);
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    pub max_delay: Duration,
    /// Whether to add up to 10% uniform random jitter to delays, so a
    /// herd of callers retrying together doesn't stay synchronized.
    /// Default: true.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Uses exponential backoff: `initial_delay * 2^attempt`, capped at
    /// `max_delay`. Does NOT include jitter — see
    /// [`effective_delay()`](Self::effective_delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Calculate the effective delay, respecting backend `retry_after` hints.
    ///
    /// A `retry_after` hint (from a `RateLimited` error) takes precedence
    /// over the calculated backoff. Jitter, when enabled, adds up to 10%
    /// on top of either.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = retry_after.unwrap_or_else(|| self.delay_for_attempt(attempt));
        if self.jitter {
            base + base.mul_f64(rand::thread_rng().gen_range(0.0..0.10))
        } else {
            base
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Retries on transient errors (as classified by
/// [`SleipnirError::is_transient()`]) up to `config.max_attempts`,
/// using exponential backoff and respecting `retry_after` hints from
/// `RateLimited` errors.
///
/// Permanent errors are returned immediately without retry; the final
/// transient failure is re-raised untouched.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    target: &str,
    operation: &str,
    f: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_if(config, target, operation, f, SleipnirError::is_transient).await
}

/// Execute an async operation with retry logic and a custom
/// retryability predicate.
///
/// Same backoff semantics as [`with_retry`]; `should_retry` replaces
/// the default transient-error classification.
pub async fn with_retry_if<F, Fut, T, P>(
    config: &RetryConfig,
    target: &str,
    operation: &str,
    f: F,
    should_retry: P,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&SleipnirError) -> bool,
{
    let mut last_err = None;
    for attempt in 0..config.max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if should_retry(&e) => {
                metrics::counter!(telemetry::RETRIES_TOTAL,
                    "target" => target.to_owned(),
                    "operation" => operation.to_owned(),
                )
                .increment(1);
                if attempt + 1 < config.max_attempts {
                    let delay = config.effective_delay(attempt, e.retry_after());
                    warn!(
                        target,
                        operation,
                        attempt = attempt + 1,
                        max_attempts = config.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e), // permanent error, no retry
        }
    }
    Err(last_err.unwrap_or(SleipnirError::NoTarget))
}
