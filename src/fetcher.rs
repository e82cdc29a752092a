//! Remote fetch contract.

use std::collections::HashMap;

use futures::future::BoxFuture;

use crate::error::CacheError;
use crate::object::CacheObject;

/// Result of a version checkout round trip.
///
/// `checked_keys` is the subset of requested keys the remote source was
/// actually able to check; keys missing from it are treated conservatively
/// as requiring a full download.
#[derive(Debug, Clone, Default)]
pub struct CheckoutReport {
    /// Remote version per key.
    pub versions: HashMap<String, String>,
    /// Keys the remote source was able to check.
    pub checked_keys: Vec<String>,
}

/// Capability to download objects by key and report in-flight keys.
///
/// The fetcher is the authoritative source for download deduplication: the
/// manager consults [`filter_out_in_flight`] before issuing any request, so
/// implementations should claim keys there atomically. Network policy such
/// as retries and timeouts is entirely the fetcher's responsibility.
///
/// The version checkout capability is optional and decided statically:
/// the default [`supports_checkout`] returns `false`, which leaves version
/// checkout silently disabled for every key managed through this fetcher.
/// Implementations that can answer lightweight version queries override
/// both [`supports_checkout`] and [`checkout_versions`].
///
/// [`filter_out_in_flight`]: RemoteFetcher::filter_out_in_flight
/// [`supports_checkout`]: RemoteFetcher::supports_checkout
/// [`checkout_versions`]: RemoteFetcher::checkout_versions
pub trait RemoteFetcher<T: CacheObject>: Send + Sync {
    /// Return the subset of `keys` that is not already being downloaded,
    /// claiming them as in-flight.
    fn filter_out_in_flight(&self, keys: Vec<String>) -> Vec<String>;

    /// Keys currently being downloaded.
    fn keys_in_flight(&self) -> Vec<String>;

    /// Download the objects for `keys`.
    fn download(&self, keys: Vec<String>) -> BoxFuture<'_, Result<Vec<T>, CacheError>>;

    /// Whether this fetcher can answer version-only checkout queries.
    fn supports_checkout(&self) -> bool {
        false
    }

    /// Check remote versions for `keys` without transferring payloads.
    ///
    /// The default reports no checked keys and is never invoked by the
    /// manager unless [`supports_checkout`] returns `true`.
    ///
    /// [`supports_checkout`]: RemoteFetcher::supports_checkout
    fn checkout_versions(
        &self,
        keys: Vec<String>,
    ) -> BoxFuture<'_, Result<CheckoutReport, CacheError>> {
        drop(keys);
        Box::pin(async move { Ok(CheckoutReport::default()) })
    }
}
