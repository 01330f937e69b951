//! Stale-aware LRU store for resolved configurations.
//!
//! Each entry carries the instant it was written. Two independent limits
//! classify it on access:
//!
//! - **freshness TTL**: younger entries are served without a network call.
//! - **stale ceiling**: older entries are deleted outright and can no longer
//!   serve as a fallback.
//!
//! Between the two an entry is *stale*: still usable when the configuration
//! service is failing, but a live call is attempted first. Staleness is
//! evaluated lazily on access; there is no background sweeper.
//!
//! Recency order and the entry map live in one [`IndexMap`], so they cannot
//! drift apart. A single mutex guards the map, the in-progress marker set and
//! the hit/miss counters; it is never held across an `.await`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;
use crate::types::{CacheKey, ConfigPayload};
use crate::{Result, VerdandiError};

/// Configuration for the [`CacheStore`].
///
/// ```rust
/// # use verdandi::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .fresh_ttl(Duration::from_secs(60))
///     .stale_ceiling(Duration::from_secs(900))
///     .max_entries(50);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Age up to which an entry is served without revalidation. Default: 5 min.
    pub fresh_ttl: Duration,
    /// Age after which an entry is deleted. Default: 1 hour.
    pub stale_ceiling: Duration,
    /// Maximum number of entries before LRU eviction. Default: 100.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fresh_ttl: Duration::from_secs(5 * 60),
            stale_ceiling: Duration::from_secs(60 * 60),
            max_entries: 100,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the freshness TTL.
    pub fn fresh_ttl(mut self, ttl: Duration) -> Self {
        self.fresh_ttl = ttl;
        self
    }

    /// Set the stale ceiling.
    pub fn stale_ceiling(mut self, ceiling: Duration) -> Self {
        self.stale_ceiling = ceiling;
        self
    }

    /// Set the maximum number of entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Reject configurations the store cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(VerdandiError::Configuration(
                "cache max_entries must be at least 1".into(),
            ));
        }
        if self.fresh_ttl > self.stale_ceiling {
            return Err(VerdandiError::Configuration(format!(
                "cache fresh TTL ({:?}) exceeds stale ceiling ({:?})",
                self.fresh_ttl, self.stale_ceiling
            )));
        }
        Ok(())
    }
}

/// One cached configuration.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub config: Arc<ConfigPayload>,
    pub variant_id: Option<String>,
    pub timestamp: Instant,
}

impl CacheEntry {
    /// Time elapsed since the entry was written.
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// Classification of a key on the fast path.
#[derive(Debug, Clone)]
pub enum Lookup {
    Fresh(CacheEntry),
    Stale(CacheEntry),
    Missing,
}

/// Snapshot of cache counters for operational introspection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub refreshes_in_progress: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 when nothing was looked up yet.
    pub hit_ratio: f64,
}

#[derive(Default)]
struct StoreInner {
    entries: IndexMap<CacheKey, CacheEntry>,
    in_progress: HashSet<CacheKey>,
    hits: u64,
    misses: u64,
}

impl StoreInner {
    /// Drop the entry if it is past the ceiling; otherwise move it to the
    /// most-recently-used end and return its index.
    fn touch(&mut self, key: &CacheKey, ceiling: Duration) -> Option<usize> {
        let idx = self.entries.get_index_of(key)?;
        if self.entries[idx].age() > ceiling {
            self.entries.shift_remove_index(idx);
            metrics::counter!(telemetry::CACHE_EXPIRATIONS_TOTAL).increment(1);
            debug!(key = %key, "dropped cache entry past stale ceiling");
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.move_index(idx, last);
        Some(last)
    }

    fn record_hit(&mut self) {
        self.hits += 1;
        metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
    }

    fn record_miss(&mut self) {
        self.misses += 1;
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
    }
}

/// In-memory, size-bounded store of resolved configurations.
pub struct CacheStore {
    config: CacheConfig,
    inner: Mutex<StoreInner>,
}

impl CacheStore {
    /// Create an empty store. Fails if `config` does not validate.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: Mutex::new(StoreInner::default()),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up an entry of any freshness.
    ///
    /// Returns `None` if the key was never set or its entry is older than the
    /// stale ceiling (the entry is deleted). Counts a hit or a miss.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut inner = self.lock();
        match inner.touch(key, self.config.stale_ceiling) {
            Some(idx) => {
                inner.record_hit();
                Some(inner.entries[idx].clone())
            }
            None => {
                inner.record_miss();
                None
            }
        }
    }

    /// Whether `get` would succeed and the entry is within the freshness TTL.
    ///
    /// Pure peek: counters, recency order and entries are left untouched.
    pub fn is_fresh(&self, key: &CacheKey) -> bool {
        self.lock()
            .entries
            .get(key)
            .is_some_and(|entry| entry.age() <= self.config.fresh_ttl)
    }

    /// Classify a key under a single lock.
    ///
    /// Present entries move to the MRU end. Only fresh entries count as hits;
    /// a stale entry still costs a network call, so it counts as a miss.
    pub fn lookup(&self, key: &CacheKey) -> Lookup {
        let mut inner = self.lock();
        let Some(idx) = inner.touch(key, self.config.stale_ceiling) else {
            inner.record_miss();
            return Lookup::Missing;
        };
        let entry = inner.entries[idx].clone();
        if entry.age() <= self.config.fresh_ttl {
            inner.record_hit();
            Lookup::Fresh(entry)
        } else {
            inner.record_miss();
            Lookup::Stale(entry)
        }
    }

    /// Insert or replace an entry, stamped with the current instant.
    ///
    /// Evicts least-recently-used entries (and their in-progress markers)
    /// until the store is back within `max_entries`.
    pub fn set(&self, key: CacheKey, config: Arc<ConfigPayload>, variant_id: Option<String>) {
        let entry = CacheEntry {
            config,
            variant_id,
            timestamp: Instant::now(),
        };
        let mut inner = self.lock();
        let (idx, _) = inner.entries.insert_full(key, entry);
        let last = inner.entries.len() - 1;
        inner.entries.move_index(idx, last);

        while inner.entries.len() > self.config.max_entries {
            let Some((evicted, _)) = inner.entries.shift_remove_index(0) else {
                break;
            };
            inner.in_progress.remove(&evicted);
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(1);
            debug!(key = %evicted, "evicted least recently used cache entry");
        }
    }

    /// Claim the refresh of `key`. Returns `false` if someone else holds it.
    pub fn mark_refresh_in_progress(&self, key: &CacheKey) -> bool {
        self.lock().in_progress.insert(key.clone())
    }

    /// Release a refresh claim. No-op if the key was not claimed.
    pub fn clear_refresh_in_progress(&self, key: &CacheKey) {
        self.lock().in_progress.remove(key);
    }

    /// Whether a refresh of `key` is currently claimed.
    pub fn is_refresh_in_progress(&self, key: &CacheKey) -> bool {
        self.lock().in_progress.contains(key)
    }

    /// Keys currently stored, least recently used first.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all entries and refresh claims. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.in_progress.clear();
    }

    /// Read-only counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total = inner.hits + inner.misses;
        CacheStats {
            size: inner.entries.len(),
            refreshes_in_progress: inner.in_progress.len(),
            hits: inner.hits,
            misses: inner.misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                inner.hits as f64 / total as f64
            },
        }
    }
}
