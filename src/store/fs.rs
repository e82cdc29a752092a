//! File-per-key durable store.
//!
//! Entries are stored in a flat directory, one file per key:
//!
//! ```text
//! {directory}/{key_hash}.obj
//! ```
//!
//! The key is hashed to produce a filename that is safe on every platform.
//! Writes go through a temp file plus rename so a crash never leaves a
//! half-written entry under its final name.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::{debug, info};

use crate::error::CacheError;
use crate::store::{DurableStore, ProgressFn};

const ENTRY_EXTENSION: &str = "obj";

/// File-per-key durable store.
pub struct FsStore {
    directory: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `directory`, creating it if needed.
    pub async fn open(directory: PathBuf) -> Result<Self, CacheError> {
        tokio::fs::create_dir_all(&directory).await?;
        info!(dir = %directory.display(), "durable store opened");
        Ok(Self { directory })
    }

    /// Store directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn key_to_filename(key: &str) -> String {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        format!("{:016x}.{ENTRY_EXTENSION}", hasher.finish())
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.directory.join(Self::key_to_filename(key))
    }

    /// Collect entry files in the store directory. Blocking; run inside
    /// `spawn_blocking`.
    fn collect_entries(directory: &Path) -> Vec<PathBuf> {
        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %directory.display(), error = %e, "store scan failed");
                return Vec::new();
            }
        };

        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext == ENTRY_EXTENSION)
            })
            .collect()
    }
}

impl DurableStore for FsStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>> {
        let path = self.key_path(key);
        Box::pin(async move {
            match tokio::fs::read(&path).await {
                Ok(data) => Ok(Some(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(CacheError::Persistence(e)),
            }
        })
    }

    fn set(&self, key: &str, value: Vec<u8>) -> BoxFuture<'_, Result<(), CacheError>> {
        let path = self.key_path(key);
        Box::pin(async move {
            let temp_path = path.with_extension("tmp");
            tokio::fs::write(&temp_path, &value).await?;
            tokio::fs::rename(&temp_path, &path).await?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let path = self.key_path(key);
        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(CacheError::Persistence(e)),
            }
        })
    }

    fn remove_all(&self, progress: Option<ProgressFn>) -> BoxFuture<'_, Result<(), CacheError>> {
        let directory = self.directory.clone();
        Box::pin(async move {
            let files = tokio::task::spawn_blocking(move || Self::collect_entries(&directory))
                .await
                .map_err(|e| CacheError::Task(e.to_string()))?;

            let total = files.len() as u64;
            let mut removed = 0u64;
            let mut progress = progress;

            for path in files {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
                if let Some(report) = progress.as_mut() {
                    report(removed, total);
                }
            }

            debug!(removed, "durable store cleared");
            Ok(())
        })
    }

    fn entry_count(&self) -> BoxFuture<'_, Result<u64, CacheError>> {
        let directory = self.directory.clone();
        Box::pin(async move {
            let count = tokio::task::spawn_blocking(move || Self::collect_entries(&directory).len())
                .await
                .map_err(|e| CacheError::Task(e.to_string()))?;
            Ok(count as u64)
        })
    }
}
