//! Response cache keyed by request fingerprint.
//!
//! [`ResponseCache`] stores opaque results under a deterministic
//! fingerprint of (target, model, payload). Lookup is exact — no
//! partial matches, no negative caching (a miss is never cached as
//! "no result"). Writes overwrite silently.
//!
//! Built on moka's async cache: capacity-based LRU eviction plus
//! per-entry TTL via an [`Expiry`] policy, so each `insert` carries its
//! own lifetime and reads past expiry observe absence.
//!
//! # Fingerprints
//!
//! serde_json's `Value` objects are BTreeMap-backed (keys sorted), so
//! serializing the payload yields a canonical text and the fingerprint
//! is stable across equivalent requests. The hash is deterministic
//! within a process lifetime, which is sufficient for an in-memory
//! cache; a distributed backend would need a cross-process stable hash.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use moka::Expiry;
use moka::future::Cache;
use serde_json::Value;

use crate::telemetry;

/// Configuration for the response cache.
///
/// Pass to [`BrokerBuilder::response_cache()`](crate::broker::BrokerBuilder::response_cache)
/// to activate. Without this, no cache is allocated (zero overhead).
///
/// ```rust
/// # use sleipnir::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(10_000)
///     .default_ttl(Duration::from_secs(300));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries before LRU eviction. Default: 10,000.
    pub max_entries: u64,
    /// TTL applied by [`ResponseCache::insert`]. Default: 5 minutes.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            default_ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the default time-to-live for cached entries.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Value,
    ttl: Duration,
}

/// Reads each entry's TTL off the entry itself.
struct PerEntryExpiry;

impl Expiry<u64, CacheEntry> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &u64,
        entry: &CacheEntry,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-memory fingerprint → result cache.
pub struct ResponseCache {
    cache: Cache<u64, CacheEntry>,
    default_ttl: Duration,
}

impl ResponseCache {
    /// Create a new response cache with the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .expire_after(PerEntryExpiry)
            .build();
        Self {
            cache,
            default_ttl: config.default_ttl,
        }
    }

    /// Look up a cached result.
    ///
    /// Returns `None` on miss or past-TTL entry. Emits hit/miss metrics.
    pub async fn get(&self, target: &str, model: &str, payload: &Value) -> Option<Value> {
        let key = fingerprint(target, model, payload);
        match self.cache.get(&key).await {
            Some(entry) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                Some(entry.value)
            }
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Insert a result with the configured default TTL.
    pub async fn insert(&self, target: &str, model: &str, payload: &Value, value: Value) {
        self.insert_with_ttl(target, model, payload, value, self.default_ttl)
            .await;
    }

    /// Insert a result with an explicit TTL, overwriting any existing entry.
    pub async fn insert_with_ttl(
        &self,
        target: &str,
        model: &str,
        payload: &Value,
        value: Value,
        ttl: Duration,
    ) {
        let key = fingerprint(target, model, payload);
        self.cache.insert(key, CacheEntry { value, ttl }).await;
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}

/// Compute a deterministic fingerprint for (target, model, payload).
///
/// Uses `DefaultHasher` (SipHash) over the canonical payload text.
pub fn fingerprint(target: &str, model: &str, payload: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    target.hash(&mut hasher);
    model.hash(&mut hasher);
    payload.to_string().hash(&mut hasher);
    hasher.finish()
}
