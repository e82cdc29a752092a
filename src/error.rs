//! Cache error taxonomy.

use thiserror::Error;

/// Cache-related errors.
///
/// None of these are ever raised synchronously on the caller's execution
/// context: every error travels through a returned future or an observer
/// notification.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Object absent in both tiers with no fetcher attached.
    ///
    /// Not necessarily an error to the caller; lookup APIs report plain
    /// absence as `Ok(None)` and reserve this for paths where a value was
    /// required.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The remote fetcher reported a transport or logic error for a key set.
    #[error("download failed for {keys:?}: {reason}")]
    DownloadFailed { keys: Vec<String>, reason: String },

    /// I/O error in the durable tier.
    ///
    /// Surfaced only on explicit write/remove paths; read errors are treated
    /// as a miss.
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// Object payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A background task failed to run to completion.
    #[error("background task error: {0}")]
    Task(String),
}

impl CacheError {
    /// Wrap an arbitrary fetcher error as a `DownloadFailed` for `keys`,
    /// passing an existing `DownloadFailed` through untouched.
    pub(crate) fn into_download_failed(self, keys: &[String]) -> Self {
        match self {
            CacheError::DownloadFailed { .. } => self,
            other => CacheError::DownloadFailed {
                keys: keys.to_vec(),
                reason: other.to_string(),
            },
        }
    }
}
