//! Builder for configuring broker instances

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::cache::{CacheConfig, ResponseCache};
use crate::lifecycle::{LoadOptions, ModelCoordinator};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::retry::RetryConfig;
use crate::target::Target;
use crate::{Result, SleipnirError};

use super::RequestBroker;

/// Main entry point for creating broker instances.
pub struct Sleipnir;

impl Sleipnir {
    /// Create a new builder for configuring the broker.
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }
}

/// Default per-call timeout for backend invocations.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of global worker slots.
const DEFAULT_CONCURRENCY: usize = 8;

/// Builder for configuring broker instances.
pub struct BrokerBuilder {
    targets: Vec<Target>,
    retry: RetryConfig,
    breaker: BreakerConfig,
    rate_limit: RateLimitConfig,
    cache: Option<CacheConfig>,
    load: LoadOptions,
    concurrency: usize,
    default_timeout: Duration,
    http: Option<reqwest::Client>,
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: None,
            load: LoadOptions::default(),
            concurrency: DEFAULT_CONCURRENCY,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            http: None,
        }
    }

    /// Register a target. The first registered target has no special
    /// role — callers name the primary per request.
    pub fn target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    /// Set the broker-wide retry policy (overridable per target).
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Set the circuit breaker configuration (shared by all targets).
    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Set the broker-wide rate-limit budget (overridable per target).
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    /// Enable the response cache. Without this call no cache is
    /// allocated and every request goes to the backend.
    pub fn response_cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Set default lifecycle options for targets without their own.
    pub fn load_options(mut self, options: LoadOptions) -> Self {
        self.load = options;
        self
    }

    /// Set the number of global worker slots backend invocations
    /// share. Default: 8.
    pub fn concurrency(mut self, slots: usize) -> Self {
        self.concurrency = slots;
        self
    }

    /// Set the default per-call timeout. Default: 30s.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Use a caller-configured HTTP client for control-plane calls.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Build the broker.
    ///
    /// Fails with [`SleipnirError::NoTarget`] when no targets were
    /// registered, or [`SleipnirError::Configuration`] on duplicate
    /// target names or a zero concurrency limit.
    pub fn build(self) -> Result<RequestBroker> {
        if self.targets.is_empty() {
            return Err(SleipnirError::NoTarget);
        }
        if self.concurrency == 0 {
            return Err(SleipnirError::Configuration(
                "concurrency must be at least 1".into(),
            ));
        }

        let mut targets: HashMap<String, Arc<Target>> = HashMap::new();
        for target in self.targets {
            let name = target.name.clone();
            if targets.insert(name.clone(), Arc::new(target)).is_some() {
                return Err(SleipnirError::Configuration(format!(
                    "duplicate target name: {name}"
                )));
            }
        }

        let coordinator = match self.http {
            Some(client) => ModelCoordinator::with_client(client),
            None => ModelCoordinator::new(),
        };

        Ok(RequestBroker {
            targets,
            breaker: CircuitBreaker::new(self.breaker),
            limiter: RateLimiter::new(),
            cache: self.cache.as_ref().map(ResponseCache::new),
            coordinator,
            retry: self.retry,
            rate_limit: self.rate_limit,
            load: self.load,
            slots: Arc::new(Semaphore::new(self.concurrency)),
            default_timeout: self.default_timeout,
        })
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
