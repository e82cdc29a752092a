//! Two-tier cache facade.
//!
//! Composes the bounded memory tier and an optional durable store into a
//! single read-through/write-through cache. The memory tier is a cache of
//! the durable tier; the durable tier is the source of truth across
//! restarts.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::lru::{LruCache, TrimDaemon};
use crate::object::CacheObject;
use crate::stats::{CacheStats, StatsCounters};
use crate::store::{DurableStore, FsStore};

/// Two-tier cache for [`CacheObject`] values.
///
/// Lookup strategy: memory first, then the durable tier with memory
/// back-fill. Writes land in memory before the first suspension point and
/// the returned future resolves only after the durable write completes, so
/// a resolved `set` guarantees the value survives a process restart.
///
/// Durable read failures are treated as a miss and only logged; write and
/// removal failures surface through the returned `Result`.
pub struct TieredCache<T: CacheObject> {
    name: String,
    memory: Arc<LruCache<T>>,
    durable: Option<Arc<dyn DurableStore>>,
    counters: Arc<StatsCounters>,
    trim_daemon: Option<TrimDaemon>,
}

impl<T: CacheObject> TieredCache<T> {
    /// Open a tiered cache from configuration.
    ///
    /// When persistence is enabled this creates an [`FsStore`] under the
    /// configured (or name-derived) directory. Must run inside a Tokio
    /// runtime; the memory trim daemon is spawned here unless its interval
    /// is zero.
    pub async fn open(config: CacheConfig) -> Result<Self, CacheError> {
        let durable: Option<Arc<dyn DurableStore>> = if config.persist {
            let store = FsStore::open(config.resolved_directory()).await?;
            Some(Arc::new(store))
        } else {
            None
        };
        Ok(Self::assemble(config, durable))
    }

    /// Build a tiered cache over a caller-supplied durable store.
    pub fn with_store(config: CacheConfig, store: Arc<dyn DurableStore>) -> Self {
        Self::assemble(config, Some(store))
    }

    /// Build a memory-only cache, ignoring the config's persistence flag.
    pub fn memory_only(config: CacheConfig) -> Self {
        Self::assemble(config, None)
    }

    fn assemble(config: CacheConfig, durable: Option<Arc<dyn DurableStore>>) -> Self {
        let counters = Arc::new(StatsCounters::default());
        let memory = Arc::new(LruCache::with_counters(
            config.name.clone(),
            config.lru.clone(),
            counters.clone(),
        ));
        let trim_daemon = (!config.lru.trim_interval.is_zero())
            .then(|| TrimDaemon::start(&memory, config.lru.trim_interval));

        Self {
            name: config.name,
            memory,
            durable,
            counters,
            trim_daemon,
        }
    }

    /// Check the memory tier for a key. Fast path; never touches the
    /// durable tier.
    pub fn contains(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    /// Synchronous memory-only lookup, promoting the key on a hit.
    pub fn get_memory(&self, key: &str) -> Option<Arc<T>> {
        self.memory.get(key)
    }

    /// Look up a key across both tiers.
    ///
    /// A durable hit is decoded and back-filled into the memory tier
    /// (cost = encoded length) before it is returned.
    pub async fn get(&self, key: &str) -> Option<Arc<T>> {
        if let Some(value) = self.memory.get(key) {
            return Some(value);
        }

        let store = self.durable.as_ref()?;
        match store.get(key).await {
            Ok(Some(bytes)) => match T::from_bytes(&bytes) {
                Ok(object) => {
                    self.counters.record_durable_hit();
                    let object = Arc::new(object);
                    self.memory
                        .set_with_cost(key, object.clone(), bytes.len() as u64);
                    Some(object)
                }
                Err(e) => {
                    warn!(cache = %self.name, key, error = %e, "stored object undecodable, treating as miss");
                    self.counters.record_durable_miss();
                    None
                }
            },
            Ok(None) => {
                self.counters.record_durable_miss();
                None
            }
            Err(e) => {
                warn!(cache = %self.name, key, error = %e, "durable read failed, treating as miss");
                self.counters.record_durable_miss();
                None
            }
        }
    }

    /// Store a value under a key.
    ///
    /// The memory tier is updated before the first suspension point, so the
    /// value is visible to [`get_memory`] immediately. The future resolves
    /// once the durable write has completed.
    ///
    /// [`get_memory`]: TieredCache::get_memory
    pub async fn set(&self, key: &str, value: Arc<T>) -> Result<(), CacheError> {
        let bytes = value.to_bytes()?;
        self.memory.set_with_cost(key, value, bytes.len() as u64);

        if let Some(store) = &self.durable {
            store.set(key, bytes).await?;
            self.counters.record_durable_write();
        }
        Ok(())
    }

    /// Remove a key from both tiers. Removing an absent key is a no-op.
    pub async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.memory.remove(key);
        if let Some(store) = &self.durable {
            store.remove(key).await?;
        }
        Ok(())
    }

    /// Remove every entry from both tiers.
    pub async fn remove_all(&self) -> Result<(), CacheError> {
        self.memory.remove_all();
        if let Some(store) = &self.durable {
            store.remove_all(None).await?;
        }
        debug!(cache = %self.name, "cache cleared");
        Ok(())
    }

    /// Remove every entry, reporting durable-removal progress as
    /// `(removed, total)` pairs with strictly increasing `removed`.
    pub async fn remove_all_with_progress(
        &self,
        progress: impl FnMut(u64, u64) + Send + 'static,
    ) -> Result<(), CacheError> {
        self.memory.remove_all();
        if let Some(store) = &self.durable {
            store.remove_all(Some(Box::new(progress))).await?;
        }
        Ok(())
    }

    /// Memory tier handle.
    pub fn memory(&self) -> &Arc<LruCache<T>> {
        &self.memory
    }

    /// Durable tier handle, if persistence is enabled.
    pub fn durable(&self) -> Option<&Arc<dyn DurableStore>> {
        self.durable.as_ref()
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Combined statistics snapshot for both tiers.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }

    pub(crate) fn counters(&self) -> &Arc<StatsCounters> {
        &self.counters
    }

    /// Resource-pressure signal, forwarded to the memory tier.
    pub fn notify_resource_pressure(&self) {
        self.memory.notify_resource_pressure();
    }

    /// Backgrounding signal, forwarded to the memory tier.
    pub fn notify_background(&self) {
        self.memory.notify_background();
    }

    /// Stop the background trim daemon, if one is running.
    pub async fn shutdown(&self) {
        if let Some(daemon) = &self.trim_daemon {
            daemon.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use futures::future::BoxFuture;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestObject {
        id: String,
        version: String,
        payload: String,
    }

    impl TestObject {
        fn new(id: &str, version: &str, payload: &str) -> Self {
            Self {
                id: id.to_string(),
                version: version.to_string(),
                payload: payload.to_string(),
            }
        }
    }

    impl CacheObject for TestObject {
        fn object_id(&self) -> String {
            self.id.clone()
        }

        fn object_version(&self) -> String {
            self.version.clone()
        }

        fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
            serde_json::to_vec(self).map_err(|e| CacheError::Serialization(e.to_string()))
        }

        fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
            serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
        }
    }

    /// Store whose reads always fail, for the read-errors-as-miss policy.
    struct FailingStore;

    impl DurableStore for FailingStore {
        fn get(&self, _key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>> {
            Box::pin(async {
                Err(CacheError::Persistence(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk on fire",
                )))
            })
        }

        fn set(&self, _key: &str, _value: Vec<u8>) -> BoxFuture<'_, Result<(), CacheError>> {
            Box::pin(async { Ok(()) })
        }

        fn remove(&self, _key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
            Box::pin(async { Ok(false) })
        }

        fn remove_all(
            &self,
            _progress: Option<crate::store::ProgressFn>,
        ) -> BoxFuture<'_, Result<(), CacheError>> {
            Box::pin(async { Ok(()) })
        }

        fn entry_count(&self) -> BoxFuture<'_, Result<u64, CacheError>> {
            Box::pin(async { Ok(0) })
        }
    }

    fn test_config(name: &str) -> CacheConfig {
        CacheConfig::new(name).with_trim_interval(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_memory_round_trip_without_durable_reads() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::with_store(test_config("t"), store.clone());
        let object = Arc::new(TestObject::new("k", "v1", "hello"));

        cache.set("k", object.clone()).await.unwrap();
        assert_eq!(cache.get_memory("k"), Some(object));
        assert_eq!(store.read_count(), 0, "memory hit must not read durable tier");
    }

    #[tokio::test]
    async fn test_durable_round_trip_across_instances() {
        let temp = TempDir::new().unwrap();
        let config = test_config("t").with_directory(temp.path().to_path_buf());

        let cache = TieredCache::<TestObject>::open(config.clone()).await.unwrap();
        let object = Arc::new(TestObject::new("k", "v1", "persisted"));
        cache.set("k", object.clone()).await.unwrap();
        drop(cache);

        let reopened = TieredCache::<TestObject>::open(config).await.unwrap();
        let loaded = reopened.get("k").await.unwrap();
        assert_eq!(*loaded, *object);
    }

    #[tokio::test]
    async fn test_durable_hit_backfills_memory() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::with_store(test_config("t"), store.clone());
        let object = Arc::new(TestObject::new("k", "v1", "data"));

        cache.set("k", object.clone()).await.unwrap();
        cache.memory().remove_all();
        assert!(!cache.contains("k"));

        let loaded = cache.get("k").await.unwrap();
        assert_eq!(*loaded, *object);
        assert!(cache.contains("k"), "durable hit should back-fill memory");
        assert_eq!(cache.stats().durable_hits, 1);
    }

    #[tokio::test]
    async fn test_total_miss() {
        let cache =
            TieredCache::<TestObject>::with_store(test_config("t"), Arc::new(MemoryStore::new()));
        assert!(cache.get("missing").await.is_none());
        assert_eq!(cache.stats().durable_misses, 1);
    }

    #[tokio::test]
    async fn test_read_error_treated_as_miss() {
        let cache = TieredCache::<TestObject>::with_store(test_config("t"), Arc::new(FailingStore));
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_entry_treated_as_miss() {
        let store = Arc::new(MemoryStore::new());
        store.set("k", b"not json".to_vec()).await.unwrap();

        let cache = TieredCache::<TestObject>::with_store(test_config("t"), store);
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_clears_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::with_store(test_config("t"), store.clone());
        cache
            .set("k", Arc::new(TestObject::new("k", "v1", "x")))
            .await
            .unwrap();

        cache.remove("k").await.unwrap();
        assert!(!cache.contains("k"));
        assert_eq!(store.entry_count().await.unwrap(), 0);
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let cache =
            TieredCache::<TestObject>::with_store(test_config("t"), Arc::new(MemoryStore::new()));
        cache.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_all_with_progress() {
        let store = Arc::new(MemoryStore::new());
        let cache = TieredCache::with_store(test_config("t"), store.clone());
        for i in 0..3 {
            let id = format!("k{i}");
            cache
                .set(&id, Arc::new(TestObject::new(&id, "v1", "x")))
                .await
                .unwrap();
        }

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        cache
            .remove_all_with_progress(move |removed, total| {
                sink.lock().unwrap().push((removed, total));
            })
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for window in seen.windows(2) {
            assert!(window[0].0 < window[1].0, "removed count must strictly increase");
        }
        assert_eq!(cache.memory().total_count(), 0);
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_only_cache() {
        let cache = TieredCache::<TestObject>::memory_only(test_config("t"));
        let object = Arc::new(TestObject::new("k", "v1", "volatile"));

        cache.set("k", object.clone()).await.unwrap();
        assert_eq!(cache.get("k").await, Some(object));
        assert!(cache.durable().is_none());
    }

    #[tokio::test]
    async fn test_open_without_persistence() {
        let config = test_config("t").with_persist(false);
        let cache = TieredCache::<TestObject>::open(config).await.unwrap();
        assert!(cache.durable().is_none());
    }

    #[tokio::test]
    async fn test_set_is_visible_before_durable_write_resolves() {
        // The memory write happens before the first await inside set, so a
        // concurrent reader sees the value as soon as the future starts.
        let cache =
            TieredCache::<TestObject>::with_store(test_config("t"), Arc::new(MemoryStore::new()));
        let object = Arc::new(TestObject::new("k", "v1", "x"));

        let fut = cache.set("k", object.clone());
        futures::pin_mut!(fut);
        // Poll once to run up to the first suspension point.
        futures::future::poll_immediate(&mut fut).await;
        assert!(cache.contains("k"));
    }
}
