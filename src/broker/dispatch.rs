//! Request dispatch with fallback cascade.
//!
//! [`RequestBroker`] is the top-level entry point: it walks the
//! primary target and its fallbacks in order, running each attempt
//! through the rate limiter, circuit breaker, response cache, model
//! lifecycle coordinator, global concurrency slots, per-call timeout,
//! and retry policy. The first target to succeed wins; when every
//! target fails, the last observed error is surfaced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{instrument, warn};

use crate::breaker::{BreakerEvent, BreakerSnapshot, CircuitBreaker};
use crate::cache::ResponseCache;
use crate::lifecycle::{LoadOptions, MetricsSnapshot, ModelCoordinator};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::retry::{RetryConfig, with_retry};
use crate::target::Target;
use crate::telemetry;
use crate::{Result, SleipnirError};

/// Per-request options for [`RequestBroker::make_request`].
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Whether to consult and populate the response cache. Default: true.
    /// Has no effect when the broker was built without a cache.
    pub use_cache: bool,
    /// Per-call timeout override; the broker default applies when unset.
    pub timeout: Option<Duration>,
    /// Targets to try, in order, after the primary fails.
    pub fallback_targets: Vec<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            timeout: None,
            fallback_targets: Vec::new(),
        }
    }
}

impl RequestOptions {
    /// Create options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the cache for this request.
    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    /// Set the per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Append a fallback target.
    pub fn fallback(mut self, target: impl Into<String>) -> Self {
        self.fallback_targets.push(target.into());
        self
    }
}

/// One entry in a [`RequestBroker::batch_requests`] call.
#[derive(Debug, Clone)]
pub struct BrokerRequest {
    /// Primary target name.
    pub target: String,
    /// Model to run against.
    pub model: String,
    /// Opaque request payload.
    pub payload: Value,
}

/// Aggregated broker state for callers.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    /// Registered target names.
    pub targets: Vec<String>,
    /// Per-target breaker snapshots (targets that have seen traffic).
    pub breakers: HashMap<String, BreakerSnapshot>,
    /// Lifecycle counters and latency samples.
    pub lifecycle: MetricsSnapshot,
}

/// Resilience broker over registered backend targets.
///
/// Build via [`Sleipnir::builder()`](super::Sleipnir::builder).
pub struct RequestBroker {
    pub(super) targets: HashMap<String, Arc<Target>>,
    pub(super) breaker: CircuitBreaker,
    pub(super) limiter: RateLimiter,
    pub(super) cache: Option<ResponseCache>,
    pub(super) coordinator: ModelCoordinator,
    pub(super) retry: RetryConfig,
    pub(super) rate_limit: RateLimitConfig,
    pub(super) load: LoadOptions,
    pub(super) slots: Arc<tokio::sync::Semaphore>,
    pub(super) default_timeout: Duration,
}

impl RequestBroker {
    /// Perform one request against the named target, falling back
    /// across `opts.fallback_targets` in order.
    ///
    /// Per target: rate-limit admission → breaker check (fail fast
    /// when open) → cache lookup → ensure model loaded → invoke under
    /// a global worker slot, per-call timeout, and the retry policy.
    /// Success feeds the cache and the breaker; failure feeds the
    /// breaker and moves on to the next target. When every target
    /// fails, the last target's error is raised.
    #[instrument(skip(self, payload, opts))]
    pub async fn make_request(
        &self,
        target_name: &str,
        model: &str,
        payload: &Value,
        opts: &RequestOptions,
    ) -> Result<Value> {
        if !self.targets.contains_key(target_name) {
            return Err(SleipnirError::UnknownTarget(target_name.to_string()));
        }

        let start = Instant::now();
        let mut last_err = None;
        let chain =
            std::iter::once(target_name).chain(opts.fallback_targets.iter().map(String::as_str));

        for name in chain {
            let Some(target) = self.targets.get(name) else {
                warn!(target = name, "skipping unknown fallback target");
                last_err = Some(SleipnirError::UnknownTarget(name.to_string()));
                continue;
            };

            match self.try_target(target, model, payload, opts).await {
                Ok(value) => {
                    Self::record_request(name, start, true);
                    return Ok(value);
                }
                Err(e) => {
                    warn!(target = name, error = %e, "target failed, cascading");
                    Self::record_request(name, start, false);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(SleipnirError::NoTarget))
    }

    /// Execute a batch of requests, grouped by (target, model).
    ///
    /// Groups run concurrently; requests within a group run in order.
    /// The output vec matches the input order position for position,
    /// regardless of execution interleaving.
    pub async fn batch_requests(
        &self,
        requests: &[BrokerRequest],
        opts: &RequestOptions,
    ) -> Vec<Result<Value>> {
        let mut groups: HashMap<(&str, &str), Vec<usize>> = HashMap::new();
        for (index, request) in requests.iter().enumerate() {
            groups
                .entry((request.target.as_str(), request.model.as_str()))
                .or_default()
                .push(index);
        }

        let group_futures = groups.into_values().map(|indices| async move {
            let mut outcomes = Vec::with_capacity(indices.len());
            for index in indices {
                let request = &requests[index];
                let outcome = self
                    .make_request(&request.target, &request.model, &request.payload, opts)
                    .await;
                outcomes.push((index, outcome));
            }
            outcomes
        });

        let mut slots: Vec<Option<Result<Value>>> = Vec::new();
        slots.resize_with(requests.len(), || None);
        for group in join_all(group_futures).await {
            for (index, outcome) in group {
                slots[index] = Some(outcome);
            }
        }
        slots
            .into_iter()
            .map(|slot| slot.expect("every request index is assigned exactly once"))
            .collect()
    }

    /// The model lifecycle coordinator, for explicit load/unload/switch
    /// and lifecycle metrics.
    pub fn lifecycle(&self) -> &ModelCoordinator {
        &self.coordinator
    }

    /// Registered target names.
    pub fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.targets.keys().cloned().collect();
        names.sort();
        names
    }

    /// Aggregated breaker states, target list, and lifecycle metrics.
    pub fn performance_metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            targets: self.target_names(),
            breakers: self.breaker.snapshots(),
            lifecycle: self.coordinator.metrics(),
        }
    }

    /// Subscribe to circuit breaker transition events.
    pub fn subscribe_breaker_events(&self) -> broadcast::Receiver<BreakerEvent> {
        self.breaker.subscribe()
    }

    /// Reset one target's breaker to CLOSED. Test/operations hook.
    pub fn reset_breaker(&self, target: &str) {
        self.breaker.reset(target);
    }

    /// Release shared state: rate-limit histories, breaker states,
    /// cached responses, load records, and in-flight load futures.
    pub fn cleanup(&self) {
        self.limiter.clear();
        self.breaker.reset_all();
        self.coordinator.clear();
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
        }
    }

    /// One full attempt against a single target.
    async fn try_target(
        &self,
        target: &Arc<Target>,
        model: &str,
        payload: &Value,
        opts: &RequestOptions,
    ) -> Result<Value> {
        let rate = target.rate_limit.as_ref().unwrap_or(&self.rate_limit);
        self.limiter
            .wait_for_limit(&target.name, rate.limit, rate.window, rate.poll_interval)
            .await;

        // Fail fast before any network work; an open breaker is not a
        // recorded failure.
        self.breaker.check(&target.name)?;

        if opts.use_cache
            && let Some(cache) = &self.cache
            && let Some(hit) = cache.get(&target.name, model, payload).await
        {
            return Ok(hit);
        }

        let load_opts: &LoadOptions = target.load.as_ref().unwrap_or(&self.load);
        let timeout = opts.timeout.unwrap_or(self.default_timeout);
        let retry = target.retry.as_ref().unwrap_or(&self.retry);

        let outcome = async {
            self.coordinator
                .ensure_model_loaded(model, &target.base_url, load_opts)
                .await?;

            let _permit = self
                .slots
                .acquire()
                .await
                .map_err(|_| SleipnirError::Configuration("concurrency limiter closed".into()))?;

            with_retry(retry, &target.name, "invoke", || async {
                tokio::time::timeout(timeout, target.invoker.invoke(model, payload))
                    .await
                    .map_err(|_| SleipnirError::Timeout(timeout))?
            })
            .await
        }
        .await;

        match outcome {
            Ok(value) => {
                self.breaker.record_success(&target.name);
                if opts.use_cache
                    && let Some(cache) = &self.cache
                {
                    cache
                        .insert(&target.name, model, payload, value.clone())
                        .await;
                }
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure(&target.name);
                Err(e)
            }
        }
    }

    /// Record request outcome metrics (counter + histogram).
    fn record_request(target: &str, start: Instant, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "target" => target.to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "target" => target.to_owned(),
        )
        .record(start.elapsed().as_secs_f64());
    }
}
