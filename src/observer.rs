//! Cache manager observer notifications.

use std::sync::Arc;

use crate::error::CacheError;
use crate::object::CacheObject;

/// Push-only notifications from a [`CacheManager`], plus one query hook.
///
/// Every method has a default, so observers implement only what they care
/// about. The manager holds the observer through a weak reference: once the
/// referent is dropped, delivery is silently skipped.
///
/// [`CacheManager`]: crate::manager::CacheManager
pub trait CacheObserver<T: CacheObject>: Send + Sync {
    /// Objects for `keys` were downloaded and stored.
    fn did_update_objects(&self, _keys: &[String]) {}

    /// The memory tier evicted `keys` during a trim pass.
    fn did_trim_memory_objects(&self, _keys: &[String]) {}

    /// Choose which monitored keys should actually be checked out.
    ///
    /// The default checks every monitored key.
    fn should_checkout_versions(&self, keys: Vec<String>) -> Vec<String> {
        keys
    }

    /// A download for `keys` failed. The manager never queues a retry on its
    /// own; call `retry_download_objects` to opt in.
    fn did_fail_download(&self, _keys: &[String], _error: &CacheError) {}

    /// Objects that sat in the retry queue were downloaded successfully.
    ///
    /// Distinct from [`did_update_objects`], which also fires for the same
    /// download.
    ///
    /// [`did_update_objects`]: CacheObserver::did_update_objects
    fn did_recover_retry_objects(&self, _objects: &[Arc<T>]) {}
}
