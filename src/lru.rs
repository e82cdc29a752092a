//! Bounded in-memory cache with LRU eviction.
//!
//! Entries are totally ordered by recency through a monotonic sequence
//! number; a separate last-access timestamp drives the age-based regime.
//! Two eviction regimes run independently during a trim pass:
//!
//! 1. Count/cost: while either limit is exceeded, evict from the
//!    least-recently-used end.
//! 2. Time: any entry whose age exceeds the time limit is evicted, even if
//!    it is the most-recently-used entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LruConfig;
use crate::stats::{CacheStats, StatsCounters};

/// Receiver for batched eviction notifications.
///
/// After any eviction pass the listener is handed the exact set of evicted
/// keys, one call per pass. The cache holds the listener weakly; delivery is
/// skipped once the referent is gone.
pub trait EvictionListener: Send + Sync {
    fn did_evict(&self, keys: &[String]);
}

/// Entry in the memory cache.
struct Entry<T> {
    value: Arc<T>,
    cost: u64,
    /// Last access time for the age-based eviction regime.
    last_access: Instant,
    /// Recency sequence; higher is more recently used.
    seq: u64,
}

struct Inner<T> {
    entries: HashMap<String, Entry<T>>,
    total_cost: u64,
    next_seq: u64,
}

impl<T> Inner<T> {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn take(&mut self, key: &str) -> Option<Entry<T>> {
        let entry = self.entries.remove(key)?;
        self.total_cost = self.total_cost.saturating_sub(entry.cost);
        Some(entry)
    }
}

/// Bounded in-memory cache for cache objects.
///
/// All operations are safe under concurrent invocation; reads and writes
/// serialize through a single mutex so the recency structure is never
/// observed in a torn state. A trim pass holds the lock exactly once and
/// notifies the eviction listener after releasing it.
pub struct LruCache<T> {
    name: String,
    config: LruConfig,
    inner: Mutex<Inner<T>>,
    listener: Mutex<Option<Weak<dyn EvictionListener>>>,
    counters: Arc<StatsCounters>,
}

impl<T: Send + Sync + 'static> LruCache<T> {
    /// Create a new memory cache with the given limits.
    pub fn new(name: impl Into<String>, config: LruConfig) -> Self {
        Self::with_counters(name, config, Arc::new(StatsCounters::default()))
    }

    /// Create a memory cache sharing an existing set of statistics counters.
    pub fn with_counters(
        name: impl Into<String>,
        config: LruConfig,
        counters: Arc<StatsCounters>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                total_cost: 0,
                next_seq: 0,
            }),
            listener: Mutex::new(None),
            counters,
        }
    }

    /// Register the eviction listener.
    pub fn set_eviction_listener(&self, listener: Weak<dyn EvictionListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    /// Check whether a key is cached, without promoting it.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().unwrap().entries.contains_key(key)
    }

    /// Get a cached value, promoting the key to most-recently-used.
    pub fn get(&self, key: &str) -> Option<Arc<T>> {
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.bump_seq();
        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = Instant::now();
                entry.seq = seq;
                self.counters.record_memory_hit();
                Some(entry.value.clone())
            }
            None => {
                self.counters.record_memory_miss();
                None
            }
        }
    }

    /// Store a value with zero cost.
    pub fn set(&self, key: impl Into<String>, value: Arc<T>) {
        self.set_with_cost(key, value, 0);
    }

    /// Store a value with the given cost.
    ///
    /// Inserts or replaces, promotes the key to most-recently-used, and runs
    /// an opportunistic count/cost eviction pass. Limits are targets, never
    /// hard caps: the write itself always lands.
    pub fn set_with_cost(&self, key: impl Into<String>, value: Arc<T>, cost: u64) {
        let key = key.into();
        let evicted = {
            let mut inner = self.inner.lock().unwrap();
            let seq = inner.bump_seq();
            if let Some(old) = inner.entries.insert(
                key,
                Entry {
                    value,
                    cost,
                    last_access: Instant::now(),
                    seq,
                },
            ) {
                inner.total_cost = inner.total_cost.saturating_sub(old.cost);
            }
            inner.total_cost += cost;
            self.evict_over_limits(&mut inner)
        };
        self.report_evicted(evicted);
    }

    /// Remove a key. Removing an absent key is a no-op.
    pub fn remove(&self, key: &str) -> Option<Arc<T>> {
        let mut inner = self.inner.lock().unwrap();
        inner.take(key).map(|entry| entry.value)
    }

    /// Remove every entry. Not an eviction: the listener is not notified.
    pub fn remove_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.total_cost = 0;
        drop(inner);
        if count > 0 {
            debug!(cache = %self.name, removed = count, "memory tier cleared");
        }
    }

    /// Run a full trim pass: the time regime first, then count/cost.
    pub fn trim(&self) {
        let evicted = {
            let mut inner = self.inner.lock().unwrap();
            let mut evicted = self.evict_expired(&mut inner);
            evicted.extend(self.evict_over_limits(&mut inner));
            evicted
        };
        self.report_evicted(evicted);
    }

    /// All cached keys, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().unwrap().entries.keys().cloned().collect()
    }

    /// Number of live entries.
    pub fn total_count(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// Sum of live entries' cost.
    pub fn total_cost(&self) -> u64 {
        self.inner.lock().unwrap().total_cost
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    /// Resource-pressure signal. Clears the cache when configured to.
    ///
    /// Best-effort and synchronous; does not pause or serialize with
    /// concurrent get/set calls beyond the normal lock.
    pub fn notify_resource_pressure(&self) {
        if self.config.clear_on_resource_pressure {
            info!(cache = %self.name, "resource pressure signal, clearing memory tier");
            self.remove_all();
        }
    }

    /// Backgrounding signal. Clears the cache when configured to.
    pub fn notify_background(&self) {
        if self.config.clear_on_background {
            info!(cache = %self.name, "backgrounding signal, clearing memory tier");
            self.remove_all();
        }
    }

    /// Evict from the least-recently-used end until both the count and cost
    /// limits are satisfied, or the cache is empty.
    fn evict_over_limits(&self, inner: &mut Inner<T>) -> Vec<String> {
        let over = |inner: &Inner<T>| {
            self.config
                .count_limit
                .is_some_and(|limit| inner.entries.len() > limit)
                || self
                    .config
                    .cost_limit
                    .is_some_and(|limit| inner.total_cost > limit)
        };

        if !over(inner) {
            return Vec::new();
        }

        let mut order: Vec<(String, u64)> = inner
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.seq))
            .collect();
        order.sort_by_key(|(_, seq)| *seq);

        let mut evicted = Vec::new();
        for (key, _) in order {
            if !over(inner) {
                break;
            }
            if inner.take(&key).is_some() {
                evicted.push(key);
            }
        }
        evicted
    }

    /// Evict every entry whose age exceeds the time limit, regardless of its
    /// position in the recency order.
    fn evict_expired(&self, inner: &mut Inner<T>) -> Vec<String> {
        let Some(limit) = self.config.time_limit else {
            return Vec::new();
        };

        let now = Instant::now();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_access) > limit)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.take(key);
        }
        expired
    }

    fn report_evicted(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        self.counters.record_memory_evictions(keys.len() as u64);
        debug!(cache = %self.name, count = keys.len(), "memory tier evicted entries");
        let listener = self.listener.lock().unwrap().clone();
        if let Some(listener) = listener.and_then(|weak| weak.upgrade()) {
            listener.did_evict(&keys);
        }
    }
}

/// Background task running periodic trim passes over a memory cache.
///
/// Holds only a weak reference to the cache; the task stops on shutdown or
/// once the cache is dropped.
pub struct TrimDaemon {
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl TrimDaemon {
    /// Start the trim daemon with the given pass interval.
    pub fn start<T: Send + Sync + 'static>(cache: &Arc<LruCache<T>>, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let weak = Arc::downgrade(cache);

        let handle = tokio::spawn(async move {
            debug!(interval_secs = interval.as_secs_f64(), "memory trim daemon started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let Some(cache) = weak.upgrade() else { break };
                        cache.trim();
                    }
                }
            }
            debug!("memory trim daemon stopped");
        });

        Self {
            handle: Mutex::new(Some(handle)),
            shutdown,
        }
    }

    /// Stop the daemon and wait for the task to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for TrimDaemon {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(config: LruConfig) -> LruCache<String> {
        LruCache::new("test", config)
    }

    fn value(text: &str) -> Arc<String> {
        Arc::new(text.to_string())
    }

    #[derive(Default)]
    struct RecordingListener {
        batches: Mutex<Vec<Vec<String>>>,
    }

    impl EvictionListener for RecordingListener {
        fn did_evict(&self, keys: &[String]) {
            self.batches.lock().unwrap().push(keys.to_vec());
        }
    }

    #[test]
    fn test_set_and_get() {
        let cache = cache_with(LruConfig::default());
        cache.set("a", value("A"));
        assert_eq!(cache.get("a").as_deref(), Some(&"A".to_string()));
        assert_eq!(cache.total_count(), 1);
    }

    #[test]
    fn test_get_miss() {
        let cache = cache_with(LruConfig::default());
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn test_contains_does_not_promote() {
        let cache = cache_with(LruConfig {
            count_limit: Some(2),
            ..Default::default()
        });
        cache.set("a", value("A"));
        cache.set("b", value("B"));
        // contains must not refresh recency, so "a" stays oldest
        assert!(cache.contains("a"));
        cache.set("c", value("C"));
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_count_limit_evicts_lru_end() {
        let cache = cache_with(LruConfig {
            count_limit: Some(2),
            ..Default::default()
        });
        cache.set("a", value("A"));
        cache.set("b", value("B"));
        cache.set("c", value("C"));

        assert!(!cache.contains("a"), "oldest entry should be evicted");
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.total_count(), 2);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = cache_with(LruConfig {
            count_limit: Some(2),
            ..Default::default()
        });
        cache.set("a", value("A"));
        cache.set("b", value("B"));
        cache.get("a");
        cache.set("c", value("C"));

        assert!(cache.contains("a"), "accessed entry should survive");
        assert!(!cache.contains("b"), "unaccessed entry should be evicted");
        assert!(cache.contains("c"));
    }

    #[test]
    fn test_cost_limit_triggers_eviction() {
        let cache = cache_with(LruConfig {
            cost_limit: Some(10),
            ..Default::default()
        });
        cache.set_with_cost("a", value("A"), 6);
        cache.set_with_cost("b", value("B"), 6);

        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert_eq!(cache.total_cost(), 6);
    }

    #[test]
    fn test_replace_adjusts_cost() {
        let cache = cache_with(LruConfig::default());
        cache.set_with_cost("a", value("A"), 5);
        cache.set_with_cost("a", value("A2"), 3);

        assert_eq!(cache.total_count(), 1);
        assert_eq!(cache.total_cost(), 3);
        assert_eq!(cache.get("a").as_deref(), Some(&"A2".to_string()));
    }

    #[test]
    fn test_time_limit_evicts_even_most_recent() {
        let cache = cache_with(LruConfig {
            time_limit: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        cache.set("a", value("A"));
        // "a" is the most-recently-used (and only) entry
        std::thread::sleep(Duration::from_millis(30));
        cache.trim();

        assert!(!cache.contains("a"));
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn test_time_limit_spares_recently_accessed() {
        let cache = cache_with(LruConfig {
            time_limit: Some(Duration::from_millis(40)),
            ..Default::default()
        });
        cache.set("a", value("A"));
        cache.set("b", value("B"));
        std::thread::sleep(Duration::from_millis(25));
        cache.get("a");
        std::thread::sleep(Duration::from_millis(25));
        cache.trim();

        assert!(cache.contains("a"), "refreshed entry should survive");
        assert!(!cache.contains("b"), "stale entry should expire");
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let cache = cache_with(LruConfig::default());
        assert!(cache.remove("missing").is_none());
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn test_remove_adjusts_cost() {
        let cache = cache_with(LruConfig::default());
        cache.set_with_cost("a", value("A"), 7);
        let removed = cache.remove("a");
        assert_eq!(removed.as_deref(), Some(&"A".to_string()));
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_remove_all() {
        let cache = cache_with(LruConfig::default());
        cache.set_with_cost("a", value("A"), 1);
        cache.set_with_cost("b", value("B"), 2);
        cache.remove_all();

        assert_eq!(cache.total_count(), 0);
        assert_eq!(cache.total_cost(), 0);
        assert!(cache.keys().is_empty());
    }

    #[test]
    fn test_keys() {
        let cache = cache_with(LruConfig::default());
        cache.set("a", value("A"));
        cache.set("b", value("B"));
        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_listener_receives_exact_batch() {
        let cache = cache_with(LruConfig {
            count_limit: Some(1),
            ..Default::default()
        });
        let listener = Arc::new(RecordingListener::default());
        cache.set_eviction_listener(Arc::downgrade(&listener) as Weak<dyn EvictionListener>);

        cache.set("a", value("A"));
        cache.set("b", value("B"));

        let batches = listener.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec!["a".to_string()]);
    }

    #[test]
    fn test_dropped_listener_is_skipped() {
        let cache = cache_with(LruConfig {
            count_limit: Some(1),
            ..Default::default()
        });
        {
            let listener = Arc::new(RecordingListener::default());
            cache.set_eviction_listener(Arc::downgrade(&listener) as Weak<dyn EvictionListener>);
        }
        // Listener gone; eviction must not panic
        cache.set("a", value("A"));
        cache.set("b", value("B"));
        assert_eq!(cache.total_count(), 1);
    }

    #[test]
    fn test_remove_all_does_not_notify() {
        let cache = cache_with(LruConfig::default());
        let listener = Arc::new(RecordingListener::default());
        cache.set_eviction_listener(Arc::downgrade(&listener) as Weak<dyn EvictionListener>);

        cache.set("a", value("A"));
        cache.remove_all();

        assert!(listener.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_resource_pressure_clears_when_configured() {
        let cache = cache_with(LruConfig {
            clear_on_resource_pressure: true,
            ..Default::default()
        });
        cache.set("a", value("A"));
        cache.notify_resource_pressure();
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn test_resource_pressure_ignored_when_not_configured() {
        let cache = cache_with(LruConfig::default());
        cache.set("a", value("A"));
        cache.notify_resource_pressure();
        assert_eq!(cache.total_count(), 1);
    }

    #[test]
    fn test_background_signal_clears_when_configured() {
        let cache = cache_with(LruConfig {
            clear_on_background: true,
            ..Default::default()
        });
        cache.set("a", value("A"));
        cache.notify_background();
        assert_eq!(cache.total_count(), 0);
    }

    #[test]
    fn test_stats_track_hits_misses_and_evictions() {
        let cache = cache_with(LruConfig {
            count_limit: Some(1),
            ..Default::default()
        });
        cache.set("a", value("A"));
        cache.get("a");
        cache.get("missing");
        cache.set("b", value("B"));

        let stats = cache.stats();
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.memory_misses, 1);
        assert_eq!(stats.memory_evictions, 1);
    }

    #[tokio::test]
    async fn test_trim_daemon_expires_entries() {
        let cache = Arc::new(LruCache::new(
            "daemon",
            LruConfig {
                time_limit: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        ));
        cache.set("a", value("A"));

        let daemon = TrimDaemon::start(&cache, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(cache.total_count(), 0);
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn test_trim_daemon_shutdown_is_clean() {
        let cache = Arc::new(LruCache::<String>::new("daemon", LruConfig::default()));
        let daemon = TrimDaemon::start(&cache, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        daemon.shutdown().await;
        // A second shutdown is a no-op
        daemon.shutdown().await;
    }
}
