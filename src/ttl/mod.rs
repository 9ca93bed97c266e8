//! Generic TTL entity cache.
//!
//! Key→value store with a per-entry freshness window and an external refresh
//! function supplied by the caller. Stale entries are never served silently:
//! a read either returns a fresh value or runs the caller's fetch and stores
//! the result. Concurrent misses on the same key coalesce into a single
//! fetch via a per-key in-flight lock registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A cached value plus the instant it was fetched.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }

    fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }
}

/// Snapshot of cache health for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlCacheStats {
    /// Number of entries currently stored (fresh or stale).
    pub size: usize,
    /// Age of the oldest entry, if any.
    pub oldest_entry_age: Option<Duration>,
    /// Age of the newest entry, if any.
    pub newest_entry_age: Option<Duration>,
    /// Configured freshness window.
    pub ttl: Duration,
}

/// TTL-bounded entity cache with single-flight refresh.
///
/// The TTL is a required construction input; concrete caches each carry
/// their own documented default rather than a hidden constant.
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    /// Per-key locks so concurrent misses on one key run one fetch.
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<V: Clone> TtlCache<V> {
    /// Create a cache with the given freshness window.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The configured freshness window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the fresh cached value for `key`, or run `fetch`, store the
    /// result, and return it.
    ///
    /// If `fetch` fails the stale-or-absent entry is left untouched and the
    /// error propagates; a later call retries the fetch. While one caller's
    /// fetch is running, other callers for the same key block and then
    /// re-check freshness, so a burst of misses performs a single refresh.
    pub fn get<E>(&self, key: &str, fetch: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        if let Some(value) = self.get_if_fresh(key) {
            return Ok(value);
        }

        let flight = self.flight_lock(key);
        let _guard = lock_recovering(&flight);

        // Another caller may have completed the refresh while we waited.
        if let Some(value) = self.get_if_fresh(key) {
            return Ok(value);
        }

        let value = fetch()?;
        self.lock_entries().insert(
            key.to_string(),
            CacheEntry {
                value: value.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Non-fetching probe: the value if present and fresh, else `None`.
    pub fn get_if_fresh(&self, key: &str) -> Option<V> {
        let entries = self.lock_entries();
        entries
            .get(key)
            .filter(|e| e.is_fresh(self.ttl))
            .map(|e| e.value.clone())
    }

    /// Store a value directly, stamping it as fetched now.
    ///
    /// For callers that refresh wholesale out-of-band (e.g. a list operation
    /// that returns the full entity set).
    pub fn insert(&self, key: &str, value: V) {
        self.lock_entries().insert(
            key.to_string(),
            CacheEntry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Drop a single entry.
    pub fn remove(&self, key: &str) {
        self.lock_entries().remove(key);
    }

    /// Clear the entire cache.
    pub fn invalidate(&self) {
        self.lock_entries().clear();
        lock_recovering(&self.in_flight).clear();
    }

    /// Clear only entries whose key starts with `prefix` (keyed-subset
    /// granularity, e.g. all entries for one project).
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.lock_entries().retain(|k, _| !k.starts_with(prefix));
    }

    /// Number of stored entries, fresh or stale.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Cache health snapshot.
    pub fn stats(&self) -> TtlCacheStats {
        let entries = self.lock_entries();
        let mut oldest: Option<Duration> = None;
        let mut newest: Option<Duration> = None;
        for entry in entries.values() {
            let age = entry.age();
            oldest = Some(oldest.map_or(age, |o| o.max(age)));
            newest = Some(newest.map_or(age, |n| n.min(age)));
        }
        TtlCacheStats {
            size: entries.len(),
            oldest_entry_age: oldest,
            newest_entry_age: newest,
            ttl: self.ttl,
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        lock_recovering(&self.entries)
    }

    fn flight_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut registry = lock_recovering(&self.in_flight);
        registry
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Lock a mutex, recovering the inner data if a previous holder panicked.
/// Cache state stays usable; a poisoned entry is at worst stale, and stale
/// entries are never served.
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[derive(Debug, PartialEq)]
    struct TestError(&'static str);

    #[test]
    fn test_miss_fetches_and_stores() {
        let cache: TtlCache<String> = TtlCache::new(Duration::from_secs(60));
        let fetches = AtomicUsize::new(0);

        let value = cache
            .get("key", || {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>("value".to_string())
            })
            .unwrap();

        assert_eq!(value, "value");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fresh_hit_does_not_refetch() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let fetches = AtomicUsize::new(0);

        for _ in 0..5 {
            let value = cache
                .get("key", || {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(42)
                })
                .unwrap();
            assert_eq!(value, 42);
        }

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expired_entry_triggers_exactly_one_refetch() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(30));
        let fetches = AtomicUsize::new(0);
        let mut fetch = || {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TestError>(1)
        };

        cache.get("key", &mut fetch).unwrap();
        thread::sleep(Duration::from_millis(50));

        // First read past the TTL refetches; the next is served from cache.
        cache.get("key", &mut fetch).unwrap();
        cache.get("key", &mut fetch).unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fetch_failure_is_not_cached() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));

        let err = cache
            .get("key", || Err::<u32, _>(TestError("boom")))
            .unwrap_err();
        assert_eq!(err, TestError("boom"));
        assert!(cache.is_empty());

        // A subsequent call retries and can succeed.
        let value = cache.get("key", || Ok::<_, TestError>(7)).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_failed_refresh_leaves_stale_entry_untouched() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_millis(20));
        cache.insert("key", 9);
        thread::sleep(Duration::from_millis(40));

        let result = cache.get("key", || Err::<u32, _>(TestError("down")));
        assert!(result.is_err());

        // The stale value is still there (not served, but not destroyed).
        assert_eq!(cache.len(), 1);
        assert!(cache.get_if_fresh("key").is_none());
    }

    #[test]
    fn test_invalidate_whole_cache() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);
        cache.insert("b", 2);

        cache.invalidate();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_prefix_scopes_to_subset() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        cache.insert("app|Debug", 1);
        cache.insert("app|Release", 2);
        cache.insert("other|Debug", 3);

        cache.invalidate_prefix("app|");

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_if_fresh("other|Debug"), Some(3));
    }

    #[test]
    fn test_stats_reflect_entry_ages() {
        let cache: TtlCache<u32> = TtlCache::new(Duration::from_secs(60));
        let empty = cache.stats();
        assert_eq!(empty.size, 0);
        assert!(empty.oldest_entry_age.is_none());

        cache.insert("a", 1);
        thread::sleep(Duration::from_millis(20));
        cache.insert("b", 2);

        let stats = cache.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.ttl, Duration::from_secs(60));
        assert!(stats.oldest_entry_age.unwrap() >= stats.newest_entry_age.unwrap());
    }

    #[test]
    fn test_concurrent_misses_coalesce_into_one_fetch() {
        let cache: Arc<TtlCache<u32>> = Arc::new(TtlCache::new(Duration::from_secs(60)));
        let fetches = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let fetches = Arc::clone(&fetches);
                thread::spawn(move || {
                    cache
                        .get("key", || {
                            fetches.fetch_add(1, Ordering::SeqCst);
                            // Hold the in-flight lock long enough for the
                            // other threads to pile up behind it.
                            thread::sleep(Duration::from_millis(30));
                            Ok::<_, TestError>(5)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 5);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
