//! Sleipnir error types

use std::time::Duration;

/// Sleipnir error types
#[derive(Debug, thiserror::Error)]
pub enum SleipnirError {
    // Backend/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    // Breaker short-circuit
    /// The circuit breaker for this target is open; the call was
    /// rejected without touching the network. Not retried by this layer.
    #[error("circuit breaker open for target '{target}'")]
    BreakerOpen { target: String },

    // Lifecycle errors
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Configuration errors
    #[error("no target configured")]
    NoTarget,

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Failure of an in-flight model load.
///
/// Kept as a separate, clonable type because a single load may be
/// awaited by many deduplicated callers — every waiter receives the
/// same outcome (see [`ModelCoordinator`](crate::lifecycle::ModelCoordinator)).
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The model never appeared in the target's listing within the
    /// polling budget.
    #[error("model '{model}' not loaded on {base_url} after {timeout_ms}ms")]
    Timeout {
        model: String,
        base_url: String,
        timeout_ms: u64,
    },

    /// The admin control plane rejected the request.
    #[error("admin request failed ({status}): {message}")]
    Admin { status: u16, message: String },

    /// Transport-level failure talking to the target or admin endpoint.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The model is absent and no admin endpoint was given to load it.
    #[error("model '{model}' absent and no admin endpoint configured")]
    NoAdmin { model: String },
}

impl From<reqwest::Error> for SleipnirError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not expose the configured bound here
            SleipnirError::Timeout(Duration::ZERO)
        } else if let Some(status) = err.status() {
            SleipnirError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            SleipnirError::Http(err.to_string())
        }
    }
}

impl SleipnirError {
    /// Whether this error is transient and worth retrying.
    ///
    /// Transient: rate limits, timeouts, transport failures, and
    /// 5xx / 408 / 429 API statuses. Everything else (validation,
    /// unknown target, breaker open, load failures) is permanent for
    /// the purposes of the retry policy. `BreakerOpen` in particular
    /// is never transient, so retries don't hammer an open breaker.
    pub fn is_transient(&self) -> bool {
        match self {
            SleipnirError::RateLimited { .. } | SleipnirError::Timeout(_) => true,
            SleipnirError::Http(_) => true,
            SleipnirError::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }

    /// Backend-provided retry-after hint, if any.
    ///
    /// Only `RateLimited` carries one; the retry policy lets it
    /// override the computed backoff.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SleipnirError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias for Sleipnir operations
pub type Result<T> = std::result::Result<T, SleipnirError>;
