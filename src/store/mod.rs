//! Durable byte-keyed storage for the persistent tier.
//!
//! The facade only depends on the [`DurableStore`] trait; storage backends
//! are pluggable. [`FsStore`] is the file-per-key default, [`MemoryStore`]
//! is a process-local double useful in tests and for applications that want
//! the facade API without persistence.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use futures::future::BoxFuture;

use crate::error::CacheError;

/// Progress callback for bulk removal: `(removed_count, total_count)` with
/// strictly increasing `removed_count`.
pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

/// Byte-keyed persistent key/value storage.
///
/// Assumed durable across restarts and crash-safe at per-key granularity.
/// No multi-key transactions. Implementations must not block the caller:
/// all I/O happens inside the returned futures.
pub trait DurableStore: Send + Sync {
    /// Read the bytes stored under `key`, if any.
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>>;

    /// Store `value` under `key`. The future resolves only once the value is
    /// durable.
    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Remove `key`, reporting whether it existed.
    fn remove(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// Remove every entry, reporting progress through `progress` if given.
    fn remove_all(&self, progress: Option<ProgressFn>) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Number of stored entries.
    fn entry_count(&self) -> BoxFuture<'_, Result<u64, CacheError>>;
}
