//! In-process durable store double.
//!
//! Backs the [`DurableStore`] interface with a plain map. Useful in tests
//! and wherever the facade API is wanted without real persistence. The read
//! counter lets tests assert that a lookup did or did not reach the durable
//! tier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;

use crate::error::CacheError;
use crate::store::{DurableStore, ProgressFn};

/// Map-backed store implementing [`DurableStore`].
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    reads: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let value = self.entries.lock().unwrap().get(key).cloned();
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), CacheError>> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Box::pin(async move { Ok(()) })
    }

    fn remove(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let existed = self.entries.lock().unwrap().remove(key).is_some();
        Box::pin(async move { Ok(existed) })
    }

    fn remove_all(&self, progress: Option<ProgressFn>) -> BoxFuture<'_, Result<(), CacheError>> {
        let removed: Vec<String> = {
            let mut entries = self.entries.lock().unwrap();
            let keys = entries.keys().cloned().collect();
            entries.clear();
            keys
        };
        Box::pin(async move {
            if let Some(mut report) = progress {
                let total = removed.len() as u64;
                for i in 1..=total {
                    report(i, total);
                }
            }
            Ok(())
        })
    }

    fn entry_count(&self) -> BoxFuture<'_, Result<u64, CacheError>> {
        let count = self.entries.lock().unwrap().len() as u64;
        Box::pin(async move { Ok(count) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let store = MemoryStore::new();
        store.set("k", vec![1, 2]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![1, 2]));
        assert_eq!(store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let store = MemoryStore::new();
        store.set("k", vec![1]).await.unwrap();
        assert!(store.remove("k").await.unwrap());
        assert!(!store.remove("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_count() {
        let store = MemoryStore::new();
        assert_eq!(store.read_count(), 0);
        let _ = store.get("k").await.unwrap();
        let _ = store.get("k").await.unwrap();
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn test_remove_all_progress() {
        let store = MemoryStore::new();
        store.set("a", vec![1]).await.unwrap();
        store.set("b", vec![2]).await.unwrap();

        let seen = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        store
            .remove_all(Some(Box::new(move |removed, total| {
                sink.lock().unwrap().push((removed, total));
            })))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![(1, 2), (2, 2)]);
        assert_eq!(store.entry_count().await.unwrap(), 0);
    }
}
