//! Configuration types for the cache tiers and the manager.

use std::path::PathBuf;
use std::time::Duration;

/// Memory tier configuration.
///
/// All limits are target thresholds, not hard caps: a write that violates a
/// limit triggers an eviction pass rather than being blocked. A `None` limit
/// disables that dimension entirely.
#[derive(Debug, Clone)]
pub struct LruConfig {
    /// Maximum number of live entries.
    pub count_limit: Option<usize>,
    /// Maximum total cost of live entries.
    pub cost_limit: Option<u64>,
    /// Maximum entry age since last access.
    pub time_limit: Option<Duration>,
    /// Background trim pass interval. Zero disables the trim daemon.
    pub trim_interval: Duration,
    /// Clear the memory tier on a resource-pressure signal.
    pub clear_on_resource_pressure: bool,
    /// Clear the memory tier on a backgrounding signal.
    pub clear_on_background: bool,
}

impl Default for LruConfig {
    fn default() -> Self {
        Self {
            count_limit: None,
            cost_limit: None,
            time_limit: None,
            trim_interval: Duration::from_secs(10),
            clear_on_resource_pressure: false,
            clear_on_background: false,
        }
    }
}

/// Tiered cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Cache name, unique within the application namespace.
    ///
    /// Used to derive the durable tier's directory when none is given.
    pub name: String,
    /// Whether to persist objects to a durable tier at all.
    pub persist: bool,
    /// Durable tier directory override.
    pub directory: Option<PathBuf>,
    /// Memory tier configuration.
    pub lru: LruConfig,
}

impl CacheConfig {
    /// Create a configuration with the given cache name and defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persist: true,
            directory: None,
            lru: LruConfig::default(),
        }
    }

    /// Enable or disable the durable tier.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    /// Set the durable tier directory.
    pub fn with_directory(mut self, dir: PathBuf) -> Self {
        self.directory = Some(dir);
        self
    }

    /// Set the memory entry count limit.
    pub fn with_count_limit(mut self, limit: usize) -> Self {
        self.lru.count_limit = Some(limit);
        self
    }

    /// Set the memory cost limit.
    pub fn with_cost_limit(mut self, limit: u64) -> Self {
        self.lru.cost_limit = Some(limit);
        self
    }

    /// Set the memory entry age limit.
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.lru.time_limit = Some(limit);
        self
    }

    /// Set the background trim interval. Zero disables the trim daemon.
    pub fn with_trim_interval(mut self, interval: Duration) -> Self {
        self.lru.trim_interval = interval;
        self
    }

    /// Clear the memory tier when a resource-pressure signal arrives.
    pub fn clear_on_resource_pressure(mut self, clear: bool) -> Self {
        self.lru.clear_on_resource_pressure = clear;
        self
    }

    /// Clear the memory tier when a backgrounding signal arrives.
    pub fn clear_on_background(mut self, clear: bool) -> Self {
        self.lru.clear_on_background = clear;
        self
    }

    /// Resolve the durable tier directory for this configuration.
    ///
    /// Falls back to the platform cache directory joined with the cache name
    /// when no explicit directory was set.
    pub fn resolved_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("layercache")
                .join(&self.name)
        })
    }
}

/// Cache manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Underlying tiered cache configuration.
    pub cache: CacheConfig,
    /// Interval for the periodic checkout refresh over monitored keys.
    ///
    /// `None` disables the refresh daemon; retries and checkouts can still
    /// be driven manually.
    pub refresh_interval: Option<Duration>,
    /// Skip version checkout for every key, even when the fetcher supports it.
    pub skip_version_checkout: bool,
}

impl ManagerConfig {
    /// Create a manager configuration with the given name and defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            cache: CacheConfig::new(name),
            refresh_interval: None,
            skip_version_checkout: false,
        }
    }

    /// Replace the tiered cache configuration wholesale.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Enable the periodic checkout refresh at the given interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Globally skip version checkout.
    pub fn with_skip_version_checkout(mut self, skip: bool) -> Self {
        self.skip_version_checkout = skip;
        self
    }
}
