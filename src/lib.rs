//! LayerCache - Two-tier, network-refreshable object cache
//!
//! This library provides a bounded in-memory cache fronting a durable store,
//! coordinated by a manager that fetches missing or stale objects from a
//! pluggable remote source, deduplicates concurrent downloads, and supports
//! manual retry of failures.
//!
//! # High-Level API
//!
//! For most use cases, the [`manager`] module provides the orchestration
//! facade:
//!
//! ```ignore
//! use layercache::{CacheManager, ManagerConfig};
//! use std::sync::Arc;
//!
//! let config = ManagerConfig::new("assets");
//! let manager = CacheManager::start(config, Some(fetcher)).await?;
//!
//! // Resolve an object, downloading it if missing or stale
//! let asset = manager.get("asset-17").await?;
//! ```
//!
//! Applications that only need local tiering can use [`TieredCache`]
//! directly, and applications with their own persistence can plug in a
//! custom [`DurableStore`].

pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod lru;
pub mod manager;
pub mod object;
pub mod observer;
pub mod stats;
pub mod store;
pub mod tiered;

pub use config::{CacheConfig, LruConfig, ManagerConfig};
pub use error::CacheError;
pub use fetcher::{CheckoutReport, RemoteFetcher};
pub use lru::{EvictionListener, LruCache, TrimDaemon};
pub use manager::{CacheManager, DownloadOutcome};
pub use object::CacheObject;
pub use observer::CacheObserver;
pub use stats::CacheStats;
pub use store::{DurableStore, FsStore, MemoryStore};
pub use tiered::TieredCache;

/// Version of the LayerCache library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
