//! Cache orchestration: remote fetch, version checkout, and retry queue.
//!
//! `CacheManager` ties the tiered cache to a [`RemoteFetcher`]. A request
//! for a key consults the tiers first; missing or stale objects are
//! downloaded (deduplicated against the fetcher's in-flight listing),
//! written back through the facade, and reported to the observer before the
//! caller's future resolves.
//!
//! Failed downloads are never retried automatically: callers opt in through
//! `retry_download_objects`, and an external trigger (the periodic refresh
//! daemon, or a manual `flush_retry_queue` call) drives re-attempts. This
//! keeps retry policy with the caller and prevents retry storms.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::error::CacheError;
use crate::fetcher::RemoteFetcher;
use crate::lru::EvictionListener;
use crate::object::CacheObject;
use crate::observer::CacheObserver;
use crate::stats::CacheStats;
use crate::tiered::TieredCache;

/// Result of a download round trip.
#[derive(Debug)]
pub struct DownloadOutcome<T> {
    /// Keys that required downloading, in request order.
    pub downloaded_keys: Vec<String>,
    /// The objects resolved by the operation. For [`download_objects`] these
    /// are exactly the fresh downloads; [`get_many`] prepends durable-tier
    /// resolutions its storage handler could not deliver.
    ///
    /// [`download_objects`]: CacheManager::download_objects
    /// [`get_many`]: CacheManager::get_many
    pub objects: Vec<Arc<T>>,
}

impl<T> Default for DownloadOutcome<T> {
    fn default() -> Self {
        Self {
            downloaded_keys: Vec::new(),
            objects: Vec::new(),
        }
    }
}

/// Shared mutable manager state: the retry queue and the monitored key set.
///
/// Guarded by a single mutex, never held across an await.
struct ManagerState {
    retry_queue: HashSet<String>,
    monitored: HashSet<String>,
}

/// Orchestrates the tiered cache and a remote fetcher.
///
/// Without a fetcher the manager serves the local tiers only. With one, a
/// `get` for a missing key downloads it; when the fetcher additionally
/// supports version checkout, every `get` first reconciles the monitored
/// key set against the remote versions so stale objects are refreshed
/// before they are served.
pub struct CacheManager<T: CacheObject> {
    name: String,
    storage: TieredCache<T>,
    fetcher: Option<Arc<dyn RemoteFetcher<T>>>,
    observer: Mutex<Option<Weak<dyn CacheObserver<T>>>>,
    state: Mutex<ManagerState>,
    skip_version_checkout: AtomicBool,
    refresh: Mutex<Option<RefreshDaemon>>,
}

impl<T: CacheObject> CacheManager<T> {
    /// Open the tiered cache described by `config` and start the manager.
    ///
    /// Spawns the periodic refresh daemon when a refresh interval is
    /// configured and a fetcher is attached.
    pub async fn start(
        config: ManagerConfig,
        fetcher: Option<Arc<dyn RemoteFetcher<T>>>,
    ) -> Result<Arc<Self>, CacheError> {
        let storage = TieredCache::open(config.cache.clone()).await?;
        Ok(Self::with_storage(&config, storage, fetcher))
    }

    /// Start the manager over an already-built tiered cache.
    pub fn with_storage(
        config: &ManagerConfig,
        storage: TieredCache<T>,
        fetcher: Option<Arc<dyn RemoteFetcher<T>>>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            name: config.cache.name.clone(),
            storage,
            fetcher,
            observer: Mutex::new(None),
            state: Mutex::new(ManagerState {
                retry_queue: HashSet::new(),
                monitored: HashSet::new(),
            }),
            skip_version_checkout: AtomicBool::new(config.skip_version_checkout),
            refresh: Mutex::new(None),
        });

        // Forward memory-tier evictions to the observer.
        let listener = Arc::downgrade(&manager) as Weak<dyn EvictionListener>;
        manager.storage.memory().set_eviction_listener(listener);

        if let Some(interval) = config.refresh_interval {
            if !interval.is_zero() && manager.fetcher.is_some() {
                let daemon = RefreshDaemon::start(Arc::downgrade(&manager), interval);
                *manager.refresh.lock().unwrap() = Some(daemon);
                info!(
                    cache = %manager.name,
                    interval_secs = interval.as_secs_f64(),
                    "checkout refresh daemon started"
                );
            }
        }

        manager
    }

    /// Register the observer. Held weakly; notifications are skipped once
    /// the referent is dropped.
    pub fn set_observer(&self, observer: Weak<dyn CacheObserver<T>>) {
        *self.observer.lock().unwrap() = Some(observer);
    }

    /// Globally enable or disable version checkout at runtime.
    pub fn set_skip_version_checkout(&self, skip: bool) {
        self.skip_version_checkout.store(skip, Ordering::Relaxed);
    }

    /// Resolve a single key.
    ///
    /// With checkout inactive (globally skipped, no fetcher, or a fetcher
    /// without the capability) a cached value resolves immediately.
    /// Otherwise the checkout protocol runs over the monitored key set
    /// first, refreshing stale siblings along the way. A key absent
    /// everywhere with no fetcher attached resolves to `Ok(None)`.
    ///
    /// A concurrent `get` for a key the fetcher already has in flight does
    /// not wait for that download: it resolves with whatever is cached at
    /// the time, possibly `Ok(None)` until the download lands.
    pub async fn get(&self, key: &str) -> Result<Option<Arc<T>>, CacheError> {
        self.monitor_one(key);

        if self.checkout_enabled() {
            self.refresh_monitored().await?;
        }
        if let Some(object) = self.storage.get(key).await {
            return Ok(Some(object));
        }
        if self.fetcher.is_none() {
            return Ok(None);
        }

        let keys = vec![key.to_string()];
        self.download_objects(&keys).await?;
        Ok(self.storage.get(key).await)
    }

    /// Resolve multiple keys with a two-phase contract.
    ///
    /// `storage_handler` fires synchronously, before the first suspension
    /// point, with whatever subset is already in the memory tier, letting
    /// the caller render stale data immediately. The returned future
    /// completes after the durable pass and the checkout/download round
    /// trip; its outcome carries the keys that required downloading plus
    /// every object the handler did not already deliver (durable-tier
    /// resolutions first, then fresh downloads).
    pub async fn get_many(
        &self,
        keys: &[String],
        storage_handler: impl FnOnce(Vec<Arc<T>>),
    ) -> Result<DownloadOutcome<T>, CacheError> {
        self.monitor(keys);

        let mut delivered: HashSet<String> = HashSet::new();
        let mut cached: Vec<Arc<T>> = Vec::new();
        for key in keys {
            if delivered.contains(key) {
                continue;
            }
            if let Some(object) = self.storage.get_memory(key) {
                delivered.insert(key.clone());
                cached.push(object);
            }
        }
        storage_handler(cached);

        let mut needed: Vec<String> = Vec::new();
        if self.checkout_enabled() {
            if let Some(fetcher) = self.fetcher.clone() {
                needed.extend(self.checkout_stale_keys(&fetcher).await?);
            }
        }

        // Durable pass: resolve what the memory tier did not have. Durable
        // hits never reached the storage handler, so they travel through
        // the completion instead.
        let mut resolved: Vec<Arc<T>> = Vec::new();
        for key in keys {
            if needed.contains(key) || delivered.contains(key) {
                continue;
            }
            match self.storage.get(key).await {
                Some(object) => {
                    delivered.insert(key.clone());
                    resolved.push(object);
                }
                None => {
                    if self.fetcher.is_some() {
                        needed.push(key.clone());
                    }
                }
            }
        }

        if needed.is_empty() || self.fetcher.is_none() {
            return Ok(DownloadOutcome {
                downloaded_keys: Vec::new(),
                objects: resolved,
            });
        }

        let outcome = self.download_objects(&needed).await?;
        let mut objects = resolved;
        objects.extend(outcome.objects);
        Ok(DownloadOutcome {
            downloaded_keys: outcome.downloaded_keys,
            objects,
        })
    }

    /// Unconditionally download `keys`, except those the fetcher reports
    /// already in flight.
    ///
    /// Successful objects are stored under their own ids and reported
    /// through `did_update_objects`; keys recovered from the retry queue
    /// additionally produce `did_recover_retry_objects`. On failure the
    /// observer receives `did_fail_download` and the error is returned;
    /// nothing is queued for retry automatically.
    pub async fn download_objects(&self, keys: &[String]) -> Result<DownloadOutcome<T>, CacheError> {
        let Some(fetcher) = self.fetcher.clone() else {
            debug!(cache = %self.name, "no fetcher attached, serving local tiers only");
            return Ok(DownloadOutcome::default());
        };

        let mut seen = HashSet::new();
        let unique: Vec<String> = keys
            .iter()
            .filter(|key| seen.insert(key.as_str()))
            .cloned()
            .collect();

        let remaining = fetcher.filter_out_in_flight(unique);
        if remaining.is_empty() {
            debug!(cache = %self.name, "all requested keys already in flight");
            return Ok(DownloadOutcome::default());
        }

        debug!(cache = %self.name, count = remaining.len(), "requesting download");
        match fetcher.download(remaining.clone()).await {
            Ok(objects) => {
                let mut stored_keys = Vec::with_capacity(objects.len());
                let mut stored = Vec::with_capacity(objects.len());
                for object in objects {
                    let id = object.object_id();
                    let object = Arc::new(object);
                    if let Err(e) = self.storage.set(&id, object.clone()).await {
                        // Keep serving the object from memory even if the
                        // durable write failed.
                        warn!(cache = %self.name, key = %id, error = %e, "failed to persist downloaded object");
                    }
                    stored_keys.push(id);
                    stored.push(object);
                }
                self.storage.counters().record_download();

                let recovered: Vec<Arc<T>> = {
                    let mut state = self.state.lock().unwrap();
                    stored
                        .iter()
                        .filter(|object| state.retry_queue.remove(&object.object_id()))
                        .cloned()
                        .collect()
                };

                if let Some(observer) = self.observer() {
                    observer.did_update_objects(&stored_keys);
                    if !recovered.is_empty() {
                        observer.did_recover_retry_objects(&recovered);
                    }
                }
                if !recovered.is_empty() {
                    info!(cache = %self.name, count = recovered.len(), "retry objects recovered");
                }

                Ok(DownloadOutcome {
                    downloaded_keys: stored_keys,
                    objects: stored,
                })
            }
            Err(e) => {
                self.storage.counters().record_download_failure();
                let error = e.into_download_failed(&remaining);
                warn!(cache = %self.name, keys = ?remaining, error = %error, "download failed");
                if let Some(observer) = self.observer() {
                    observer.did_fail_download(&remaining, &error);
                }
                Err(error)
            }
        }
    }

    /// Merge `keys` into the retry queue. Re-attempts are driven by the
    /// refresh daemon or an explicit [`flush_retry_queue`] call.
    ///
    /// [`flush_retry_queue`]: CacheManager::flush_retry_queue
    pub fn retry_download_objects(&self, keys: &[String]) {
        let mut state = self.state.lock().unwrap();
        for key in keys {
            state.retry_queue.insert(key.clone());
        }
        debug!(cache = %self.name, pending = state.retry_queue.len(), "retry queue updated");
    }

    /// Remove `keys` from the retry queue without attempting a download.
    /// Does not cancel an already in-flight attempt.
    pub fn remove_retry_objects(&self, keys: &[String]) {
        let mut state = self.state.lock().unwrap();
        for key in keys {
            state.retry_queue.remove(key);
        }
    }

    /// Attempt a download for every queued key. Keys that succeed are
    /// removed from the queue; failures leave the queue untouched.
    pub async fn flush_retry_queue(&self) -> Result<DownloadOutcome<T>, CacheError> {
        let pending = self.retry_keys();
        if pending.is_empty() {
            return Ok(DownloadOutcome::default());
        }
        debug!(cache = %self.name, count = pending.len(), "retrying queued downloads");
        self.download_objects(&pending).await
    }

    /// Run the checkout protocol over the monitored key set and download
    /// whatever it marks stale or missing. No-op when checkout is inactive.
    pub async fn refresh_monitored(&self) -> Result<Vec<String>, CacheError> {
        if !self.checkout_enabled() {
            return Ok(Vec::new());
        }
        let Some(fetcher) = self.fetcher.clone() else {
            return Ok(Vec::new());
        };

        let stale = self.checkout_stale_keys(&fetcher).await?;
        if stale.is_empty() {
            debug!(cache = %self.name, "all monitored objects fresh");
            return Ok(Vec::new());
        }

        let outcome = self.download_objects(&stale).await?;
        Ok(outcome.downloaded_keys)
    }

    /// Store an object locally, bypassing the fetcher.
    pub async fn set_object(&self, key: &str, object: Arc<T>) -> Result<(), CacheError> {
        self.storage.set(key, object).await
    }

    /// Memory-tier containment check, bypassing the fetcher.
    pub fn contains_object(&self, key: &str) -> bool {
        self.storage.contains(key)
    }

    /// Remove an object from both tiers, bypassing the fetcher.
    pub async fn remove_object(&self, key: &str) -> Result<(), CacheError> {
        self.storage.remove(key).await
    }

    /// Local-only lookup across both tiers, bypassing the fetcher.
    pub async fn object_for_key(&self, key: &str) -> Option<Arc<T>> {
        self.storage.get(key).await
    }

    /// The tiered cache backing this manager.
    pub fn storage(&self) -> &TieredCache<T> {
        &self.storage
    }

    /// Manager name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Combined statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        self.storage.stats()
    }

    /// Keys currently queued for retry, sorted.
    pub fn retry_keys(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<String> = state.retry_queue.iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Keys ever requested through this manager, sorted.
    pub fn monitored_keys(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<String> = state.monitored.iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Resource-pressure signal, forwarded to the memory tier.
    pub fn notify_resource_pressure(&self) {
        self.storage.notify_resource_pressure();
    }

    /// Backgrounding signal, forwarded to the memory tier.
    pub fn notify_background(&self) {
        self.storage.notify_background();
    }

    /// Stop the refresh daemon and the memory trim daemon.
    pub async fn shutdown(&self) {
        let daemon = self.refresh.lock().unwrap().take();
        if let Some(daemon) = daemon {
            daemon.shutdown().await;
        }
        self.storage.shutdown().await;
    }

    fn observer(&self) -> Option<Arc<dyn CacheObserver<T>>> {
        self.observer.lock().unwrap().as_ref().and_then(Weak::upgrade)
    }

    fn checkout_enabled(&self) -> bool {
        !self.skip_version_checkout.load(Ordering::Relaxed)
            && self
                .fetcher
                .as_ref()
                .is_some_and(|fetcher| fetcher.supports_checkout())
    }

    fn monitor_one(&self, key: &str) {
        self.state.lock().unwrap().monitored.insert(key.to_string());
    }

    fn monitor(&self, keys: &[String]) {
        let mut state = self.state.lock().unwrap();
        for key in keys {
            state.monitored.insert(key.clone());
        }
    }

    /// Determine which monitored keys need a download.
    ///
    /// Asks the observer to narrow the candidate set (identity by default),
    /// queries the fetcher for remote versions, and marks a key stale on
    /// version mismatch, cache absence, or when the remote source could not
    /// check it (fail-open toward freshness).
    async fn checkout_stale_keys(
        &self,
        fetcher: &Arc<dyn RemoteFetcher<T>>,
    ) -> Result<Vec<String>, CacheError> {
        let monitored = self.monitored_keys();
        if monitored.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = match self.observer() {
            Some(observer) => observer.should_checkout_versions(monitored),
            None => monitored,
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let report = fetcher.checkout_versions(candidates.clone()).await?;
        let checked: HashSet<&String> = report.checked_keys.iter().collect();

        let mut stale = Vec::new();
        for key in &candidates {
            if !checked.contains(key) {
                stale.push(key.clone());
                continue;
            }
            let fresh = match (report.versions.get(key), self.storage.get(key).await) {
                (Some(remote), Some(cached)) => cached.object_version() == *remote,
                _ => false,
            };
            if !fresh {
                stale.push(key.clone());
            }
        }
        Ok(stale)
    }

    async fn refresh_tick(&self) {
        if let Err(e) = self.refresh_monitored().await {
            warn!(cache = %self.name, error = %e, "periodic checkout failed");
        }
        if let Err(e) = self.flush_retry_queue().await {
            warn!(cache = %self.name, error = %e, "retry pass failed");
        }
    }
}

impl<T: CacheObject> EvictionListener for CacheManager<T> {
    fn did_evict(&self, keys: &[String]) {
        if let Some(observer) = self.observer() {
            observer.did_trim_memory_objects(keys);
        }
    }
}

/// Background task running periodic checkout refreshes and retry passes.
///
/// Holds only a weak reference to the manager; the task stops on shutdown
/// or once the manager is dropped.
struct RefreshDaemon {
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl RefreshDaemon {
    fn start<T: CacheObject>(manager: Weak<CacheManager<T>>, interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let Some(manager) = manager.upgrade() else { break };
                        manager.refresh_tick().await;
                    }
                }
            }
            debug!("checkout refresh daemon stopped");
        });

        Self {
            handle: Mutex::new(Some(handle)),
            shutdown,
        }
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for RefreshDaemon {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
