//! Cache statistics tracking and reporting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Memory tier hits.
    pub memory_hits: u64,
    /// Memory tier misses.
    pub memory_misses: u64,
    /// Entries evicted from the memory tier.
    pub memory_evictions: u64,
    /// Durable tier hits (reads that back-filled memory).
    pub durable_hits: u64,
    /// Durable tier misses.
    pub durable_misses: u64,
    /// Completed durable writes.
    pub durable_writes: u64,
    /// Successful remote downloads.
    pub downloads: u64,
    /// Failed remote downloads.
    pub download_failures: u64,
}

impl CacheStats {
    /// Memory hit rate in the range 0.0 to 1.0.
    pub fn memory_hit_rate(&self) -> f64 {
        let total = self.memory_hits + self.memory_misses;
        if total == 0 {
            0.0
        } else {
            self.memory_hits as f64 / total as f64
        }
    }

    /// Overall hit rate across both tiers in the range 0.0 to 1.0.
    pub fn overall_hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.durable_hits;
        let total = hits + self.durable_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Lock-free counters backing [`CacheStats`] snapshots.
///
/// Shared between the memory tier, the facade, and the manager so a single
/// snapshot covers the whole cache.
#[derive(Debug, Default)]
pub struct StatsCounters {
    memory_hits: AtomicU64,
    memory_misses: AtomicU64,
    memory_evictions: AtomicU64,
    durable_hits: AtomicU64,
    durable_misses: AtomicU64,
    durable_writes: AtomicU64,
    downloads: AtomicU64,
    download_failures: AtomicU64,
}

impl StatsCounters {
    pub fn record_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_miss(&self) {
        self.memory_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memory_evictions(&self, count: u64) {
        self.memory_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_durable_hit(&self) {
        self.durable_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_durable_miss(&self) {
        self.durable_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_durable_write(&self) {
        self.durable_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download(&self) {
        self.downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_download_failure(&self) {
        self.download_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            memory_misses: self.memory_misses.load(Ordering::Relaxed),
            memory_evictions: self.memory_evictions.load(Ordering::Relaxed),
            durable_hits: self.durable_hits.load(Ordering::Relaxed),
            durable_misses: self.durable_misses.load(Ordering::Relaxed),
            durable_writes: self.durable_writes.load(Ordering::Relaxed),
            downloads: self.downloads.load(Ordering::Relaxed),
            download_failures: self.download_failures.load(Ordering::Relaxed),
        }
    }
}
