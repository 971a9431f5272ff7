//! Backend target registration and the invocation seam.
//!
//! A [`Target`] names a backend endpoint and carries the caller-supplied
//! [`Invoker`] capability the broker dispatches through. The core never
//! inspects payloads or results — both are opaque `serde_json::Value`s,
//! serialized only to derive cache fingerprints.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;
use crate::lifecycle::LoadOptions;
use crate::limiter::RateLimitConfig;
use crate::retry::RetryConfig;

/// Caller-supplied invocation capability for a target.
///
/// Implementations own the transport (HTTP client, SDK, in-process
/// stub) and may fail with any [`SleipnirError`](crate::SleipnirError);
/// the error's [`is_transient()`](crate::SleipnirError::is_transient)
/// classification decides whether the retry policy re-attempts it.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Perform one inference call against the backend.
    async fn invoke(&self, model: &str, payload: &Value) -> Result<Value>;
}

/// A registered backend target.
///
/// Immutable after registration with the broker. Per-target overrides
/// take precedence over the broker-wide defaults; unset fields fall
/// back to the broker's configuration.
#[derive(Clone)]
pub struct Target {
    pub(crate) name: String,
    pub(crate) base_url: String,
    pub(crate) invoker: Arc<dyn Invoker>,
    pub(crate) retry: Option<RetryConfig>,
    pub(crate) rate_limit: Option<RateLimitConfig>,
    pub(crate) load: Option<LoadOptions>,
}

impl Target {
    /// Register a target by name, base address, and invocation capability.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        invoker: Arc<dyn Invoker>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            invoker,
            retry: None,
            rate_limit: None,
            load: None,
        }
    }

    /// Override the broker's retry policy for this target.
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Override the broker's rate-limit budget for this target.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Set lifecycle options for this target (admin endpoint, polling).
    pub fn load_options(mut self, options: LoadOptions) -> Self {
        self.load = Some(options);
        self
    }

    /// The target's registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The target's base address.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .field("load", &self.load)
            .finish_non_exhaustive()
    }
}
