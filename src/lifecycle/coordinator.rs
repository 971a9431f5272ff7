//! Model lifecycle coordination with concurrent-load deduplication.
//!
//! [`ModelCoordinator`] guarantees that a named model is loaded on a
//! target before an inference call proceeds, without issuing redundant
//! load requests when many callers race for the same model.
//!
//! # Deduplication
//!
//! The in-flight table maps (base_url, model) to a shared future for a
//! load already in progress. The first caller to observe an empty slot
//! becomes the sole initiator; everyone arriving while the slot is
//! occupied awaits the same future and receives the same outcome. The
//! slot is removed unconditionally when the load completes — a failed
//! load is never cached, so a later caller retries from scratch.
//!
//! # Load records
//!
//! Confirmed loads prime an affirmative record so subsequent calls
//! skip the network entirely. Records have no expiry; they are
//! invalidated by an explicit unload or process restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::Result;
use crate::error::LoadError;

use super::metrics::{LifecycleMetrics, MetricsSnapshot, OpClass};

/// Request timeout for the default control-plane HTTP client.
const ADMIN_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for [`ModelCoordinator::ensure_model_loaded`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Admin control-plane base address, if the target has one.
    /// Without it, an absent model cannot be loaded.
    pub admin_url: Option<String>,
    /// How often to re-query the listing while a load is pending.
    /// Default: 1s.
    pub poll_interval: Duration,
    /// Total budget for the load sequence — listing and admin calls
    /// included, not just the poll loop. Default: 60s.
    pub timeout: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            admin_url: None,
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

impl LoadOptions {
    /// Create options with sensible defaults and no admin endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the admin control-plane base address.
    pub fn admin_url(mut self, url: impl Into<String>) -> Self {
        self.admin_url = Some(url.into());
        self
    }

    /// Set the listing poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the total load budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Options for [`ModelCoordinator::request_model_switch`].
#[derive(Debug, Clone)]
pub struct SwitchOptions {
    /// Admin control-plane base address (required for switching).
    pub admin_url: String,
    /// Whether to unload `previous_model` after the new model is ready.
    pub unload_previous: bool,
    /// The model to unload when `unload_previous` is set.
    pub previous_model: Option<String>,
    /// Listing poll interval for the load side.
    pub poll_interval: Duration,
    /// Total budget for the load side.
    pub timeout: Duration,
}

impl SwitchOptions {
    /// Create switch options for the given admin endpoint.
    pub fn new(admin_url: impl Into<String>) -> Self {
        Self {
            admin_url: admin_url.into(),
            unload_previous: false,
            previous_model: None,
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }

    /// Unload `previous` once the new model is confirmed ready.
    pub fn unload_previous(mut self, previous: impl Into<String>) -> Self {
        self.unload_previous = true;
        self.previous_model = Some(previous.into());
        self
    }

    /// Set the listing poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the total load budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// (target base address, model name)
type LoadKey = (String, String);

#[derive(Debug, Clone, Copy)]
struct LoadRecord {
    loaded: bool,
    last_checked: Instant,
}

type SharedLoad = Shared<BoxFuture<'static, std::result::Result<(), LoadError>>>;

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

/// Coordinates model readiness across targets.
///
/// Cheap to share: the internal tables are `Arc`ed so load futures can
/// outlive the borrow that spawned them.
pub struct ModelCoordinator {
    http: reqwest::Client,
    records: Arc<Mutex<HashMap<LoadKey, LoadRecord>>>,
    in_flight: Arc<Mutex<HashMap<LoadKey, SharedLoad>>>,
    metrics: Arc<LifecycleMetrics>,
}

impl ModelCoordinator {
    /// Create a coordinator with a default HTTP client.
    ///
    /// The client carries a 30s request timeout so a hung control
    /// plane cannot suspend [`request_model_load`](Self::request_model_load)
    /// or [`request_model_unload`](Self::request_model_unload)
    /// indefinitely.
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(ADMIN_HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(http)
    }

    /// Create a coordinator with a caller-configured HTTP client.
    /// The caller's client owns its own timeout policy.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            records: Arc::new(Mutex::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            metrics: Arc::new(LifecycleMetrics::new()),
        }
    }

    /// Ensure `model` is loaded on the target at `base_url`.
    ///
    /// Fast path: a primed load record returns immediately with no
    /// network call. Otherwise the caller either joins an in-flight
    /// load for the same (target, model) or initiates one: query the
    /// listing, issue an admin load if absent, then poll until the
    /// model appears or `opts.timeout` elapses.
    ///
    /// N concurrent callers for the same key trigger exactly one
    /// underlying load sequence and observe the same outcome.
    #[instrument(skip(self, opts))]
    pub async fn ensure_model_loaded(
        &self,
        model: &str,
        base_url: &str,
        opts: &LoadOptions,
    ) -> Result<()> {
        let key = (base_url.to_string(), model.to_string());

        if self.record_says_loaded(&key) {
            debug!(model, base_url, "load record hit");
            return Ok(());
        }

        // One lock section decides initiator vs. waiter, so the future
        // is visible before any subsequent caller can check the slot.
        let load = {
            let mut in_flight = self.in_flight.lock().expect("in-flight table lock poisoned");
            match in_flight.get(&key) {
                Some(existing) => {
                    debug!(model, base_url, "joining in-flight load");
                    existing.clone()
                }
                None => {
                    let load = self.start_load(key.clone(), opts.clone());
                    in_flight.insert(key, load.clone());
                    load
                }
            }
        };

        load.await.map_err(Into::into)
    }

    /// Issue a single admin load call.
    ///
    /// Returns the call's success flag and records load metrics
    /// regardless of caller context.
    pub async fn request_model_load(&self, model: &str, admin_url: &str) -> bool {
        let start = Instant::now();
        let outcome = admin_request(&self.http, admin_url, "load", model).await;
        if let Err(ref e) = outcome {
            warn!(model, admin_url, error = %e, "model load request failed");
        }
        self.metrics
            .record(OpClass::Load, outcome.is_ok(), start.elapsed());
        outcome.is_ok()
    }

    /// Issue a single admin unload call.
    ///
    /// Returns the call's success flag and records unload metrics. A
    /// successful unload invalidates the affirmative load records for
    /// this model (across base addresses — the next `ensure` re-checks
    /// the listing, which is cheap and always correct). Records for
    /// other models are untouched.
    pub async fn request_model_unload(&self, model: &str, admin_url: &str) -> bool {
        let start = Instant::now();
        let outcome = admin_request(&self.http, admin_url, "unload", model).await;
        if let Err(ref e) = outcome {
            warn!(model, admin_url, error = %e, "model unload request failed");
        }
        if outcome.is_ok() {
            self.records
                .lock()
                .expect("load record lock poisoned")
                .retain(|(_, recorded_model), _| recorded_model != model);
        }
        self.metrics
            .record(OpClass::Unload, outcome.is_ok(), start.elapsed());
        outcome.is_ok()
    }

    /// Switch the target to `target_model`, optionally unloading the
    /// previous model afterwards.
    ///
    /// Composes [`ensure_model_loaded`](Self::ensure_model_loaded)
    /// with a trailing unload. A failed load aborts the switch without
    /// attempting the unload. The switch counts success off the load
    /// side; an unload failure is visible in the unload counters only.
    #[instrument(skip(self, opts))]
    pub async fn request_model_switch(
        &self,
        target_model: &str,
        base_url: &str,
        opts: &SwitchOptions,
    ) -> Result<()> {
        let start = Instant::now();
        let load_opts = LoadOptions {
            admin_url: Some(opts.admin_url.clone()),
            poll_interval: opts.poll_interval,
            timeout: opts.timeout,
        };

        if let Err(e) = self
            .ensure_model_loaded(target_model, base_url, &load_opts)
            .await
        {
            self.metrics
                .record(OpClass::Switch, false, start.elapsed());
            return Err(e);
        }

        if opts.unload_previous
            && let Some(previous) = opts.previous_model.as_deref()
            && previous != target_model
        {
            self.request_model_unload(previous, &opts.admin_url).await;
        }

        self.metrics.record(OpClass::Switch, true, start.elapsed());
        Ok(())
    }

    /// Current lifecycle counters and latency samples.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Zero the lifecycle metrics. Test hook.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// Whether an affirmative load record exists for (base_url, model).
    pub fn is_recorded_loaded(&self, model: &str, base_url: &str) -> bool {
        self.record_says_loaded(&(base_url.to_string(), model.to_string()))
    }

    /// Age of the load record for (base_url, model), if one exists.
    pub fn record_age(&self, model: &str, base_url: &str) -> Option<Duration> {
        self.records
            .lock()
            .expect("load record lock poisoned")
            .get(&(base_url.to_string(), model.to_string()))
            .map(|r| r.last_checked.elapsed())
    }

    /// Drop the load record for (base_url, model), forcing the next
    /// `ensure` to re-check the target.
    pub fn invalidate(&self, model: &str, base_url: &str) {
        self.records
            .lock()
            .expect("load record lock poisoned")
            .remove(&(base_url.to_string(), model.to_string()));
    }

    /// Drop all load records and in-flight entries.
    pub fn clear(&self) {
        self.records
            .lock()
            .expect("load record lock poisoned")
            .clear();
        self.in_flight
            .lock()
            .expect("in-flight table lock poisoned")
            .clear();
    }

    fn record_says_loaded(&self, key: &LoadKey) -> bool {
        self.records
            .lock()
            .expect("load record lock poisoned")
            .get(key)
            .is_some_and(|r| r.loaded)
    }

    /// Build the shared future driving one load sequence.
    ///
    /// The future owns clones of the coordinator's tables so it can
    /// prime the record and remove its own in-flight slot when done,
    /// whichever waiter polls it to completion.
    fn start_load(&self, key: LoadKey, opts: LoadOptions) -> SharedLoad {
        let http = self.http.clone();
        let metrics = Arc::clone(&self.metrics);
        let records = Arc::clone(&self.records);
        let in_flight = Arc::clone(&self.in_flight);
        let (base_url, model) = key.clone();

        async move {
            let start = Instant::now();
            // The budget bounds the whole sequence — initial listing
            // and admin call included, not just the poll loop — so a
            // hung endpoint cannot suspend the waiters past it.
            let outcome = match tokio::time::timeout(
                opts.timeout,
                run_load(&http, &model, &base_url, &opts),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(LoadError::Timeout {
                    model: model.clone(),
                    base_url: base_url.clone(),
                    timeout_ms: opts.timeout.as_millis() as u64,
                }),
            };
            metrics.record(OpClass::Load, outcome.is_ok(), start.elapsed());

            if outcome.is_ok() {
                records.lock().expect("load record lock poisoned").insert(
                    key.clone(),
                    LoadRecord {
                        loaded: true,
                        last_checked: Instant::now(),
                    },
                );
            }
            // Removed on success and failure alike; failures are never
            // cached, so the next caller starts over.
            in_flight
                .lock()
                .expect("in-flight table lock poisoned")
                .remove(&key);
            outcome
        }
        .boxed()
        .shared()
    }
}

impl Default for ModelCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// One full load sequence: list, admin-load if absent, poll to ready.
async fn run_load(
    http: &reqwest::Client,
    model: &str,
    base_url: &str,
    opts: &LoadOptions,
) -> std::result::Result<(), LoadError> {
    if list_models(http, base_url).await?.iter().any(|m| m == model) {
        debug!(model, base_url, "model already present");
        return Ok(());
    }

    let Some(admin_url) = opts.admin_url.as_deref() else {
        return Err(LoadError::NoAdmin {
            model: model.to_string(),
        });
    };

    admin_request(http, admin_url, "load", model).await?;

    let deadline = Instant::now() + opts.timeout;
    loop {
        if Instant::now() >= deadline {
            return Err(LoadError::Timeout {
                model: model.to_string(),
                base_url: base_url.to_string(),
                timeout_ms: opts.timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(opts.poll_interval).await;
        // Listing hiccups while polling are tolerated; the deadline is
        // the only thing that ends the loop early.
        match list_models(http, base_url).await {
            Ok(models) if models.iter().any(|m| m == model) => {
                debug!(model, base_url, "model became ready");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => debug!(model, base_url, error = %e, "listing poll failed"),
        }
    }
}

/// Query the target's model listing: `GET {base_url}/models`.
async fn list_models(
    http: &reqwest::Client,
    base_url: &str,
) -> std::result::Result<Vec<String>, LoadError> {
    let url = format!("{}/models", base_url.trim_end_matches('/'));
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|e| LoadError::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(LoadError::Admin {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        });
    }

    let models: Vec<ModelInfo> = response
        .json()
        .await
        .map_err(|e| LoadError::Http(e.to_string()))?;
    Ok(models.into_iter().map(|m| m.name).collect())
}

/// Issue an admin call: `POST {admin_url}/models/{action} {"model": ...}`.
async fn admin_request(
    http: &reqwest::Client,
    admin_url: &str,
    action: &str,
    model: &str,
) -> std::result::Result<(), LoadError> {
    let url = format!("{}/models/{}", admin_url.trim_end_matches('/'), action);
    let response = http
        .post(&url)
        .json(&json!({ "model": model }))
        .send()
        .await
        .map_err(|e| LoadError::Http(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(LoadError::Admin {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}
