//! Sliding-window admission control.
//!
//! [`RateLimiter`] tracks request timestamps per key inside a trailing
//! window. Entries older than the window are pruned on every check, so
//! the per-key history stays bounded by the admission limit without a
//! hard cap. Check-and-record happens under one lock acquisition — two
//! racing callers can never both be admitted into the last slot.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Admission budget for a key.
///
/// ```rust
/// # use sleipnir::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .limit(30)
///     .window(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum admissions inside any trailing window. Default: 60.
    pub limit: u32,
    /// Length of the trailing window. Default: 60s.
    pub window: Duration,
    /// How often [`RateLimiter::wait_for_limit`] re-checks. Default: 100ms.
    pub poll_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 60,
            window: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl RateLimitConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum admissions per window.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Set the trailing window length.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the polling interval for blocking waits.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Sliding-window rate limiter over per-key timestamp histories.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter with no recorded history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking admission check.
    ///
    /// Prunes timestamps older than `now - window`, admits if fewer
    /// than `limit` remain, and records the admission in the same
    /// critical section.
    pub fn check_limit(&self, key: &str, limit: u32, window: Duration) -> bool {
        let mut windows = self.windows.lock().expect("RateLimiter lock poisoned");
        let now = Instant::now();
        let entries = windows.entry(key.to_string()).or_default();

        if let Some(cutoff) = now.checked_sub(window) {
            while entries.front().is_some_and(|&t| t < cutoff) {
                entries.pop_front();
            }
        }

        if entries.len() < limit as usize {
            entries.push_back(now);
            true
        } else {
            false
        }
    }

    /// Suspend until admitted, re-checking every `poll_interval`.
    ///
    /// The wait itself is unbounded; callers needing a bound wrap this
    /// in their own timeout (the broker's per-call timeout covers it).
    pub async fn wait_for_limit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        poll_interval: Duration,
    ) {
        loop {
            if self.check_limit(key, limit, window) {
                return;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Number of admissions currently inside the window for a key.
    pub fn in_window(&self, key: &str, window: Duration) -> usize {
        let mut windows = self.windows.lock().expect("RateLimiter lock poisoned");
        let Some(entries) = windows.get_mut(key) else {
            return 0;
        };
        if let Some(cutoff) = Instant::now().checked_sub(window) {
            while entries.front().is_some_and(|&t| t < cutoff) {
                entries.pop_front();
            }
        }
        entries.len()
    }

    /// Drop all recorded history.
    pub fn clear(&self) {
        self.windows
            .lock()
            .expect("RateLimiter lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_limit() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        for _ in 0..5 {
            assert!(limiter.check_limit("k", 5, window));
        }
        assert!(!limiter.check_limit("k", 5, window));
        assert_eq!(limiter.in_window("k", window), 5);
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        assert!(limiter.check_limit("a", 1, window));
        assert!(!limiter.check_limit("a", 1, window));
        assert!(limiter.check_limit("b", 1, window));
    }

    #[test]
    fn window_expiry_readmits() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(20);
        assert!(limiter.check_limit("k", 1, window));
        assert!(!limiter.check_limit("k", 1, window));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check_limit("k", 1, window));
    }

    #[test]
    fn clear_resets_history() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        assert!(limiter.check_limit("k", 1, window));
        limiter.clear();
        assert!(limiter.check_limit("k", 1, window));
    }
}
