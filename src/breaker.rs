//! Per-target circuit breaker.
//!
//! Tracks recent failures per target inside a monitoring window and
//! isolates targets that fail too often. State machine:
//!
//! ```text
//! CLOSED ──(failures ≥ threshold within window)──► OPEN
//!   ▲                                               │
//!   │ trial success                   recovery timeout elapses
//!   │                                               ▼
//!   └──────────────────────────────────────── HALF_OPEN
//!                        trial failure ──► OPEN (fresh timeout)
//! ```
//!
//! HALF_OPEN admits bounded concurrent trials rather than enforcing a
//! single-trial mutex: once the recovery timeout passes, requests flow
//! until the first recorded outcome flips the state. One success closes
//! the breaker and clears the failure window; one failure re-opens it.
//!
//! Transitions are published on a broadcast channel; nothing in the
//! breaker depends on subscribers being present.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::telemetry;
use crate::{Result, SleipnirError};

/// Configuration for per-target failure isolation.
///
/// ```rust
/// # use sleipnir::BreakerConfig;
/// # use std::time::Duration;
/// let config = BreakerConfig::new()
///     .failure_threshold(10)
///     .recovery_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Failures within the monitoring window needed to open. Default: 5.
    pub failure_threshold: u32,
    /// Minimum failure count before the threshold applies, so a single
    /// blip on a quiet target can't trip the breaker. Default: 3.
    pub minimum_requests: u32,
    /// How far back failures count. Default: 5 minutes.
    pub monitoring_window: Duration,
    /// How long an open breaker rejects before allowing a trial. Default: 60s.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            minimum_requests: 3,
            monitoring_window: Duration::from_secs(300),
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure count that opens the breaker.
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Set the minimum failures before the threshold applies.
    pub fn minimum_requests(mut self, n: u32) -> Self {
        self.minimum_requests = n;
        self
    }

    /// Set the monitoring window for counting failures.
    pub fn monitoring_window(mut self, window: Duration) -> Self {
        self.monitoring_window = window;
        self
    }

    /// Set the rejection period after the breaker opens.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Breaker state for a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests pass through; failures accumulate in the window.
    Closed,
    /// Requests are rejected until the recovery timeout elapses.
    Open,
    /// Trial requests are admitted; the first outcome decides the state.
    HalfOpen,
}

/// A state transition, published to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    /// CLOSED/HALF_OPEN → OPEN.
    Opened,
    /// OPEN → HALF_OPEN (recovery timeout elapsed).
    HalfOpened,
    /// HALF_OPEN → CLOSED (trial succeeded).
    Recovered,
}

impl BreakerTransition {
    fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::HalfOpened => "half_open",
            Self::Recovered => "recovered",
        }
    }
}

/// Transition event for one target.
#[derive(Debug, Clone)]
pub struct BreakerEvent {
    /// Target whose breaker changed state.
    pub target: String,
    /// What happened.
    pub transition: BreakerTransition,
}

/// Point-in-time view of one target's breaker.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: BreakerState,
    /// Failures currently inside the monitoring window.
    pub recent_failures: usize,
    /// Cumulative successes recorded.
    pub success_count: u64,
    /// Cumulative admission checks, including rejected ones.
    pub request_count: u64,
}

#[derive(Debug)]
struct TargetBreaker {
    state: BreakerState,
    failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
    success_count: u64,
    request_count: u64,
}

impl Default for TargetBreaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            last_failure: None,
            next_attempt: None,
            success_count: 0,
            request_count: 0,
        }
    }
}

impl TargetBreaker {
    fn prune(&mut self, window: Duration, now: Instant) {
        if let Some(cutoff) = now.checked_sub(window) {
            while self.failures.front().is_some_and(|&t| t < cutoff) {
                self.failures.pop_front();
            }
        }
    }
}

/// Registry of per-target breaker state.
///
/// Lock-based; contention is low because the critical sections are a
/// few map operations. Transition events are best-effort broadcast.
pub struct CircuitBreaker {
    config: BreakerConfig,
    states: Mutex<HashMap<String, TargetBreaker>>,
    events: broadcast::Sender<BreakerEvent>,
}

impl CircuitBreaker {
    /// Create a breaker registry; all targets start CLOSED.
    pub fn new(config: BreakerConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            states: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to transition events.
    ///
    /// Slow subscribers may observe `Lagged`; events are informational
    /// and never load-bearing.
    pub fn subscribe(&self) -> broadcast::Receiver<BreakerEvent> {
        self.events.subscribe()
    }

    /// Admission check: fail fast if the target's breaker is open.
    ///
    /// Every check counts toward `request_count`, rejected ones
    /// included, so error-rate reporting sees the full request volume.
    /// An open breaker whose recovery timeout has elapsed transitions
    /// to HALF_OPEN and admits the request as a trial.
    pub fn check(&self, target: &str) -> Result<()> {
        let mut states = self.states.lock().expect("CircuitBreaker lock poisoned");
        let breaker = states.entry(target.to_string()).or_default();
        breaker.request_count += 1;

        match breaker.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let ready = breaker
                    .next_attempt
                    .is_some_and(|at| Instant::now() >= at);
                if ready {
                    breaker.state = BreakerState::HalfOpen;
                    self.emit(target, BreakerTransition::HalfOpened);
                    Ok(())
                } else {
                    Err(SleipnirError::BreakerOpen {
                        target: target.to_string(),
                    })
                }
            }
        }
    }

    /// Record a successful call.
    ///
    /// Clears the failure window; a HALF_OPEN trial success closes the
    /// breaker and emits `Recovered`.
    pub fn record_success(&self, target: &str) {
        let mut states = self.states.lock().expect("CircuitBreaker lock poisoned");
        let breaker = states.entry(target.to_string()).or_default();
        breaker.success_count += 1;
        breaker.failures.clear();
        if breaker.state == BreakerState::HalfOpen {
            breaker.state = BreakerState::Closed;
            breaker.next_attempt = None;
            self.emit(target, BreakerTransition::Recovered);
        }
    }

    /// Record a failed call.
    ///
    /// In CLOSED, appends to the failure window and opens the breaker
    /// when the windowed count reaches both `failure_threshold` and
    /// `minimum_requests`. In HALF_OPEN, re-opens immediately with a
    /// fresh recovery timeout — the first trial failure wins, whatever
    /// other trials are still in flight.
    pub fn record_failure(&self, target: &str) {
        let now = Instant::now();
        let mut states = self.states.lock().expect("CircuitBreaker lock poisoned");
        let breaker = states.entry(target.to_string()).or_default();
        breaker.last_failure = Some(now);

        match breaker.state {
            BreakerState::HalfOpen => {
                breaker.state = BreakerState::Open;
                breaker.next_attempt = Some(now + self.config.recovery_timeout);
                self.emit(target, BreakerTransition::Opened);
            }
            BreakerState::Closed => {
                breaker.failures.push_back(now);
                breaker.prune(self.config.monitoring_window, now);
                let count = breaker.failures.len() as u32;
                if count >= self.config.failure_threshold && count >= self.config.minimum_requests
                {
                    breaker.state = BreakerState::Open;
                    breaker.next_attempt = Some(now + self.config.recovery_timeout);
                    self.emit(target, BreakerTransition::Opened);
                }
            }
            // Failures observed while already open don't extend the
            // window; the recovery timeout alone governs re-entry.
            BreakerState::Open => {}
        }
    }

    /// Run an operation under the breaker, recording its outcome.
    ///
    /// Fails fast with [`SleipnirError::BreakerOpen`] when the target
    /// is excluded; otherwise the underlying error is re-raised
    /// untouched after being recorded.
    pub async fn execute<F, Fut, T>(&self, target: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.check(target)?;
        match f().await {
            Ok(value) => {
                self.record_success(target);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(target);
                Err(e)
            }
        }
    }

    /// Reset one target to CLOSED with an empty window.
    pub fn reset(&self, target: &str) {
        let mut states = self.states.lock().expect("CircuitBreaker lock poisoned");
        states.remove(target);
        debug!(target, "breaker reset");
    }

    /// Reset every target.
    pub fn reset_all(&self) {
        self.states
            .lock()
            .expect("CircuitBreaker lock poisoned")
            .clear();
    }

    /// Snapshot one target's breaker, if it has seen traffic.
    pub fn snapshot(&self, target: &str) -> Option<BreakerSnapshot> {
        let mut states = self.states.lock().expect("CircuitBreaker lock poisoned");
        let breaker = states.get_mut(target)?;
        breaker.prune(self.config.monitoring_window, Instant::now());
        Some(BreakerSnapshot {
            state: breaker.state,
            recent_failures: breaker.failures.len(),
            success_count: breaker.success_count,
            request_count: breaker.request_count,
        })
    }

    /// Snapshot every target's breaker.
    pub fn snapshots(&self) -> HashMap<String, BreakerSnapshot> {
        let mut states = self.states.lock().expect("CircuitBreaker lock poisoned");
        let now = Instant::now();
        states
            .iter_mut()
            .map(|(name, breaker)| {
                breaker.prune(self.config.monitoring_window, now);
                (
                    name.clone(),
                    BreakerSnapshot {
                        state: breaker.state,
                        recent_failures: breaker.failures.len(),
                        success_count: breaker.success_count,
                        request_count: breaker.request_count,
                    },
                )
            })
            .collect()
    }

    fn emit(&self, target: &str, transition: BreakerTransition) {
        match transition {
            BreakerTransition::Opened => warn!(target, "circuit breaker opened"),
            BreakerTransition::HalfOpened => debug!(target, "circuit breaker half-open"),
            BreakerTransition::Recovered => debug!(target, "circuit breaker recovered"),
        }
        metrics::counter!(telemetry::BREAKER_TRANSITIONS_TOTAL,
            "target" => target.to_owned(),
            "transition" => transition.as_str(),
        )
        .increment(1);
        // Nobody listening is fine.
        let _ = self.events.send(BreakerEvent {
            target: target.to_string(),
            transition,
        });
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
