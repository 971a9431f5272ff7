//! Telemetry metric name constants.
//!
//! Centralised metric names for sleipnir operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `sleipnir_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `target` — backend target name (e.g. "primary", "local-7b")
//! - `operation` — lifecycle operation class ("load" | "unload" | "switch")
//! - `status` — outcome: "ok" or "error"

/// Total requests dispatched through the broker.
///
/// Labels: `target`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "sleipnir_requests_total";

/// Request duration in seconds.
///
/// Labels: `target`.
pub const REQUEST_DURATION_SECONDS: &str = "sleipnir_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `target`, `operation`.
pub const RETRIES_TOTAL: &str = "sleipnir_retries_total";

/// Total circuit breaker transitions.
///
/// Labels: `target`, `transition` ("opened" | "half_open" | "recovered").
pub const BREAKER_TRANSITIONS_TOTAL: &str = "sleipnir_breaker_transitions_total";

/// Total response cache hits.
pub const CACHE_HITS_TOTAL: &str = "sleipnir_cache_hits_total";

/// Total response cache misses.
pub const CACHE_MISSES_TOTAL: &str = "sleipnir_cache_misses_total";

/// Total model lifecycle operations.
///
/// Labels: `operation` ("load" | "unload" | "switch"), `status`.
pub const LIFECYCLE_OPS_TOTAL: &str = "sleipnir_lifecycle_ops_total";

/// Lifecycle operation duration in seconds.
///
/// Labels: `operation`.
pub const LIFECYCLE_DURATION_SECONDS: &str = "sleipnir_lifecycle_duration_seconds";
