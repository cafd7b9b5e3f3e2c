//! # Loading Cache
//!
//! Bounded, time-expiring, single-flight cache of materialized elements.
//!
//! ## Guarantees
//!
//! 1. **Single flight**: at most one loader runs per key at any time. Every
//!    concurrent request for the same key waits for it and receives the same
//!    outcome, success or error.
//! 2. **No lock held across loads**: the loader runs without any cache lock,
//!    so a loader may itself request *other* keys from the same cache.
//! 3. **Invalidation wins**: `invalidate`, `put` and `flush` detach any
//!    in-flight load for the key. Its result is still handed to the callers
//!    already waiting for it, but it never enters the cache.
//! 4. **Negative results are not cached**: a loader returning `Ok(None)`
//!    surfaces as `NotFound` and the next request loads again.
//!
//! Capacity is bounded by an LRU; expiry is measured from the last write and
//! checked on read.

use crate::primitives::{DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_EXPIRE_AFTER_WRITE};
use crate::types::StoreError;
use lru::LruCache;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Cache limits of one element store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached elements.
    pub max_entries: usize,
    /// Seconds an element stays cached after it was written.
    pub expire_after_write_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            expire_after_write_secs: DEFAULT_EXPIRE_AFTER_WRITE.as_secs(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn expire_after_write(&self) -> Duration {
        Duration::from_secs(self.expire_after_write_secs)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Loader invocations. Never exceeds `misses`.
    pub loads: u64,
    /// Entries dropped for capacity or expiry.
    pub evictions: u64,
    pub entries: usize,
}

// =============================================================================
// LOAD SLOTS
// =============================================================================

type LoadOutcome<V> = Result<Option<V>, StoreError>;

struct LoadSlot<V> {
    outcome: Mutex<Option<LoadOutcome<V>>>,
    ready: Condvar,
    detached: AtomicBool,
}

impl<V: Clone> LoadSlot<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            ready: Condvar::new(),
            detached: AtomicBool::new(false),
        }
    }

    fn publish(&self, outcome: LoadOutcome<V>) {
        let mut guard = self.outcome.lock();
        if guard.is_none() {
            *guard = Some(outcome);
        }
        self.ready.notify_all();
    }

    fn wait(&self) -> LoadOutcome<V> {
        let mut guard = self.outcome.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            self.ready.wait(&mut guard);
        }
    }
}

/// Completes the slot even when the loader unwinds, so waiters never hang.
struct LeaderGuard<'a, K: Hash + Eq + Ord + Clone + fmt::Display, V: Clone> {
    cache: &'a LoadingCache<K, V>,
    key: &'a K,
    slot: Arc<LoadSlot<V>>,
    done: bool,
}

impl<K: Hash + Eq + Ord + Clone + fmt::Display, V: Clone> Drop for LeaderGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.done {
            let _abandoned = self.cache.finish(
                self.key,
                &self.slot,
                Err(StoreError::IllegalState(format!(
                    "loader for {} did not complete",
                    self.key
                ))),
            );
        }
    }
}

// =============================================================================
// LOADING CACHE
// =============================================================================

struct CacheEntry<V> {
    value: V,
    written: Instant,
}

/// Bounded single-flight cache.
pub struct LoadingCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    inflight: Mutex<BTreeMap<K, Arc<LoadSlot<V>>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Hash + Eq, V> fmt::Debug for LoadingCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (len, cap) = {
            let entries = self.entries.lock();
            (entries.len(), entries.cap())
        };
        f.debug_struct("LoadingCache")
            .field("entries", &len)
            .field("capacity", &cap)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<K, V> LoadingCache<K, V>
where
    K: Hash + Eq + Ord + Clone + fmt::Display,
    V: Clone,
{
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_limits(config.max_entries, config.expire_after_write())
    }

    /// Cache holding at most `max_entries` (at least one) for `ttl` after write.
    #[must_use]
    pub fn with_limits(max_entries: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(BTreeMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the cached value, or run `loader` exactly once across all
    /// concurrent callers for `key`.
    pub fn get_with<F>(&self, key: &K, loader: F) -> Result<V, StoreError>
    where
        F: FnOnce() -> LoadOutcome<V>,
    {
        if let Some(value) = self.fresh(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let slot = {
            let mut inflight = self.inflight.lock();
            // A leader may have finished between the lookup and this lock.
            if let Some(value) = self.fresh(key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(value);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            if let Some(slot) = inflight.get(key) {
                let slot = Arc::clone(slot);
                drop(inflight);
                trace!(key = %key, "joining in-flight load");
                return Self::into_value(key, slot.wait());
            }
            let slot = Arc::new(LoadSlot::new());
            inflight.insert(key.clone(), Arc::clone(&slot));
            slot
        };

        let mut guard = LeaderGuard {
            cache: self,
            key,
            slot,
            done: false,
        };
        self.loads.fetch_add(1, Ordering::Relaxed);
        let outcome = loader();
        guard.done = true;
        let outcome = self.finish(key, &guard.slot, outcome);
        Self::into_value(key, outcome)
    }

    /// Cached value if present and not expired.
    #[must_use]
    pub fn get_if_present(&self, key: &K) -> Option<V> {
        self.fresh(key)
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.fresh(key).is_some()
    }

    /// Insert a value, detaching any in-flight load for the key.
    pub fn put(&self, key: K, value: V) {
        let mut inflight = self.inflight.lock();
        if let Some(slot) = inflight.remove(&key) {
            slot.detached.store(true, Ordering::Release);
        }
        self.insert(key, value);
    }

    /// Insert `value` unless a fresh entry exists, returning whichever value
    /// ends up cached. In-flight loads stay attached and adopt that value.
    pub fn insert_if_absent(&self, key: K, value: V) -> V {
        let _inflight = self.inflight.lock();
        if let Some(existing) = self.fresh(&key) {
            return existing;
        }
        self.insert(key, value.clone());
        value
    }

    /// Drop the entry for `key`. Returns whether one was cached.
    pub fn invalidate(&self, key: &K) -> bool {
        let mut inflight = self.inflight.lock();
        if let Some(slot) = inflight.remove(key) {
            slot.detached.store(true, Ordering::Release);
        }
        self.entries.lock().pop(key).is_some()
    }

    /// Drop every entry.
    pub fn flush(&self) {
        let mut inflight = self.inflight.lock();
        for slot in inflight.values() {
            slot.detached.store(true, Ordering::Release);
        }
        inflight.clear();
        self.entries.lock().clear();
    }

    /// Drop every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| entry.written.elapsed() >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        self.evictions
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn fresh(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.written.elapsed() < self.ttl => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    fn insert(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            written: Instant::now(),
        };
        let mut entries = self.entries.lock();
        if let Some((evicted, _)) = entries.push(key.clone(), entry)
            && evicted != key
        {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(key = %evicted, "evicted for capacity");
        }
    }

    /// Publish a leader's outcome and cache it unless the slot was detached.
    /// An entry inserted while the load ran wins over the loaded value.
    fn finish(&self, key: &K, slot: &Arc<LoadSlot<V>>, outcome: LoadOutcome<V>) -> LoadOutcome<V> {
        let outcome = {
            let mut inflight = self.inflight.lock();
            let current = inflight.get(key).is_some_and(|s| Arc::ptr_eq(s, slot));
            if current {
                inflight.remove(key);
            }
            match outcome {
                Ok(Some(value)) if current && !slot.detached.load(Ordering::Acquire) => {
                    match self.fresh(key) {
                        Some(existing) => Ok(Some(existing)),
                        None => {
                            self.insert(key.clone(), value.clone());
                            Ok(Some(value))
                        }
                    }
                }
                other => other,
            }
        };
        slot.publish(outcome.clone());
        outcome
    }

    fn into_value(key: &K, outcome: LoadOutcome<V>) -> Result<V, StoreError> {
        outcome?.ok_or_else(|| StoreError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    fn cache(max: usize) -> LoadingCache<String, u32> {
        LoadingCache::with_limits(max, Duration::from_secs(60))
    }

    #[test]
    fn second_get_is_a_hit() {
        let cache = cache(10);
        let key = "a".to_string();
        assert_eq!(cache.get_with(&key, || Ok(Some(1))).expect("load"), 1);
        assert_eq!(cache.get_with(&key, || Ok(Some(2))).expect("hit"), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.loads), (1, 1, 1));
    }

    #[test]
    fn negative_results_are_not_cached() {
        let cache = cache(10);
        let key = "a".to_string();
        let err = cache.get_with(&key, || Ok(None)).expect_err("absent");
        assert!(err.is_not_found());
        assert_eq!(cache.get_with(&key, || Ok(Some(5))).expect("load"), 5);
    }

    #[test]
    fn errors_are_not_cached() {
        let cache = cache(10);
        let key = "a".to_string();
        let err = cache
            .get_with(&key, || Err(StoreError::PermissionDenied("x".into())))
            .expect_err("denied");
        assert!(matches!(err, StoreError::PermissionDenied(_)));
        assert_eq!(cache.get_with(&key, || Ok(Some(3))).expect("load"), 3);
    }

    #[test]
    fn invalidate_forces_reload() {
        let cache = cache(10);
        let key = "a".to_string();
        cache.get_with(&key, || Ok(Some(1))).expect("load");
        assert!(cache.invalidate(&key));
        assert_eq!(cache.get_with(&key, || Ok(Some(2))).expect("reload"), 2);
    }

    #[test]
    fn capacity_bound_evicts_least_recent() {
        let cache = cache(2);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            let v = u32::try_from(i).expect("small");
            cache.put((*key).to_string(), v);
        }
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&"a".to_string()));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn expired_entries_reload() {
        let cache: LoadingCache<String, u32> = LoadingCache::with_limits(10, Duration::ZERO);
        let key = "a".to_string();
        cache.get_with(&key, || Ok(Some(1))).expect("load");
        assert_eq!(cache.get_with(&key, || Ok(Some(2))).expect("reload"), 2);
        assert_eq!(cache.stats().loads, 2);
    }

    #[test]
    fn concurrent_misses_share_one_load() {
        let cache = cache(10);
        let key = "a".to_string();
        let calls = AtomicUsize::new(0);
        let barrier = Barrier::new(8);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    let value = cache
                        .get_with(&key, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            Ok(Some(7))
                        })
                        .expect("load");
                    assert_eq!(value, 7);
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loader_may_request_other_keys() {
        let cache = cache(10);
        let outer = "outer".to_string();
        let inner = "inner".to_string();
        let value = cache
            .get_with(&outer, || {
                let nested = cache.get_with(&inner, || Ok(Some(1)))?;
                Ok(Some(nested + 1))
            })
            .expect("load");
        assert_eq!(value, 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn insert_if_absent_keeps_first_value() {
        let cache = cache(10);
        let key = "a".to_string();
        assert_eq!(cache.insert_if_absent(key.clone(), 1), 1);
        assert_eq!(cache.insert_if_absent(key.clone(), 2), 1);
        assert_eq!(cache.get_if_present(&key), Some(1));
    }

    #[test]
    fn load_adopts_value_inserted_meanwhile() {
        let cache = cache(10);
        let key = "a".to_string();
        let value = cache
            .get_with(&key, || {
                cache.insert_if_absent(key.clone(), 1);
                Ok(Some(2))
            })
            .expect("load");
        assert_eq!(value, 1);
        assert_eq!(cache.get_if_present(&key), Some(1));
    }

    #[test]
    fn invalidation_during_load_keeps_result_out_of_cache() {
        let cache = cache(10);
        let key = "a".to_string();
        let value = cache
            .get_with(&key, || {
                cache.invalidate(&key);
                Ok(Some(1))
            })
            .expect("load");
        assert_eq!(value, 1);
        assert!(!cache.contains(&key));
    }
}
