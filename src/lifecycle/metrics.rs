//! Lifecycle operation metrics with percentile summaries.
//!
//! Each operation class (load / unload / switch) gets independent
//! attempt/success/failure counters plus a bounded latency sample
//! buffer. Once the buffer holds [`MAX_LATENCY_SAMPLES`] observations,
//! the oldest sample is dropped per insert (FIFO), so percentiles
//! always describe recent behaviour. Counters live for the process
//! lifetime; [`LifecycleMetrics::reset`] exists for tests.
//!
//! Observations are also mirrored to the `metrics` facade under the
//! names in [`telemetry`](crate::telemetry), for consumers with a
//! recorder installed.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::telemetry;

/// Cap on retained latency observations per operation class.
pub const MAX_LATENCY_SAMPLES: usize = 1000;

/// Lifecycle operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// Model load (admin load call or full ensure sequence).
    Load,
    /// Model unload.
    Unload,
    /// Model switch (load new, optionally unload previous).
    Switch,
}

impl OpClass {
    /// Stable label used in metric names and snapshots.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Unload => "unload",
            Self::Switch => "switch",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct OpCounters {
    attempts: u64,
    successes: u64,
    failures: u64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    load: OpCounters,
    unload: OpCounters,
    switch_: OpCounters,
    latencies_ms: HashMap<OpClass, VecDeque<f64>>,
}

impl MetricsInner {
    fn counters_mut(&mut self, op: OpClass) -> &mut OpCounters {
        match op {
            OpClass::Load => &mut self.load,
            OpClass::Unload => &mut self.unload,
            OpClass::Switch => &mut self.switch_,
        }
    }
}

/// Shared metrics store for the coordinator.
#[derive(Debug, Default)]
pub struct LifecycleMetrics {
    inner: Mutex<MetricsInner>,
}

impl LifecycleMetrics {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one operation outcome with its latency.
    pub(crate) fn record(&self, op: OpClass, ok: bool, elapsed: Duration) {
        {
            let mut inner = self.inner.lock().expect("LifecycleMetrics lock poisoned");
            let counters = inner.counters_mut(op);
            counters.attempts += 1;
            if ok {
                counters.successes += 1;
            } else {
                counters.failures += 1;
            }
            let samples = inner.latencies_ms.entry(op).or_default();
            if samples.len() == MAX_LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(elapsed.as_secs_f64() * 1000.0);
        }
        metrics::counter!(telemetry::LIFECYCLE_OPS_TOTAL,
            "operation" => op.as_str(),
            "status" => if ok { "ok" } else { "error" },
        )
        .increment(1);
        metrics::histogram!(telemetry::LIFECYCLE_DURATION_SECONDS,
            "operation" => op.as_str(),
        )
        .record(elapsed.as_secs_f64());
    }

    /// Copy out the current counters and samples.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().expect("LifecycleMetrics lock poisoned");
        MetricsSnapshot {
            load_attempts: inner.load.attempts,
            load_successes: inner.load.successes,
            load_failures: inner.load.failures,
            unload_attempts: inner.unload.attempts,
            unload_successes: inner.unload.successes,
            unload_failures: inner.unload.failures,
            switch_attempts: inner.switch_.attempts,
            switch_successes: inner.switch_.successes,
            switch_failures: inner.switch_.failures,
            latencies_ms: inner
                .latencies_ms
                .iter()
                .map(|(op, samples)| (*op, samples.iter().copied().collect()))
                .collect(),
        }
    }

    /// Zero every counter and drop all samples. Test hook.
    pub fn reset(&self) {
        *self.inner.lock().expect("LifecycleMetrics lock poisoned") = MetricsInner::default();
    }
}

/// Point-in-time copy of lifecycle metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub load_attempts: u64,
    pub load_successes: u64,
    pub load_failures: u64,
    pub unload_attempts: u64,
    pub unload_successes: u64,
    pub unload_failures: u64,
    pub switch_attempts: u64,
    pub switch_successes: u64,
    pub switch_failures: u64,
    /// Retained latency observations in milliseconds, newest last.
    pub latencies_ms: HashMap<OpClass, Vec<f64>>,
}

impl MetricsSnapshot {
    /// Percentile of retained latencies for an operation class.
    ///
    /// `pct` is in (0, 100]. Returns `None` when no samples exist.
    /// Nearest-rank method over a sorted copy of the buffer.
    pub fn latency_percentile(&self, op: OpClass, pct: f64) -> Option<f64> {
        let samples = self.latencies_ms.get(&op)?;
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("latency samples are finite"));
        let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.clamp(1, sorted.len()) - 1])
    }

    /// 95th percentile latency for an operation class.
    pub fn p95(&self, op: OpClass) -> Option<f64> {
        self.latency_percentile(op, 95.0)
    }

    /// 99th percentile latency for an operation class.
    pub fn p99(&self, op: OpClass) -> Option<f64> {
        self.latency_percentile(op, 99.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_outcomes() {
        let metrics = LifecycleMetrics::new();
        metrics.record(OpClass::Load, true, Duration::from_millis(10));
        metrics.record(OpClass::Load, false, Duration::from_millis(20));
        metrics.record(OpClass::Unload, true, Duration::from_millis(5));

        let snap = metrics.snapshot();
        assert_eq!(snap.load_attempts, 2);
        assert_eq!(snap.load_successes, 1);
        assert_eq!(snap.load_failures, 1);
        assert_eq!(snap.unload_attempts, 1);
        assert_eq!(snap.switch_attempts, 0);
    }

    #[test]
    fn sample_buffer_is_fifo_capped() {
        let metrics = LifecycleMetrics::new();
        for i in 0..(MAX_LATENCY_SAMPLES + 10) {
            metrics.record(OpClass::Load, true, Duration::from_millis(i as u64));
        }
        let snap = metrics.snapshot();
        let samples = &snap.latencies_ms[&OpClass::Load];
        assert_eq!(samples.len(), MAX_LATENCY_SAMPLES);
        // Oldest ten observations were dropped.
        assert_eq!(samples[0], 10.0);
    }

    #[test]
    fn percentiles_use_nearest_rank() {
        let metrics = LifecycleMetrics::new();
        for i in 1..=100u64 {
            metrics.record(OpClass::Switch, true, Duration::from_millis(i));
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.p95(OpClass::Switch), Some(95.0));
        assert_eq!(snap.p99(OpClass::Switch), Some(99.0));
    }

    #[test]
    fn percentile_empty_is_none() {
        let snap = LifecycleMetrics::new().snapshot();
        assert_eq!(snap.p95(OpClass::Load), None);
    }

    #[test]
    fn reset_clears_everything() {
        let metrics = LifecycleMetrics::new();
        metrics.record(OpClass::Load, true, Duration::from_millis(1));
        metrics.reset();
        let snap = metrics.snapshot();
        assert_eq!(snap.load_attempts, 0);
        assert!(snap.latencies_ms.is_empty());
    }
}
