//! Cacheable object contract.

use crate::error::CacheError;

/// Capability every cacheable value must satisfy.
///
/// A cache object carries a stable identity, an opaque version string used
/// for staleness detection, and a byte serialization for the durable tier.
///
/// Versions are compared for equality only, never ordered: any difference
/// between the cached version and the version reported by the remote source
/// marks the object stale. Objects are immutable once stored under a key and
/// are replaced wholesale on update.
///
/// # Example
///
/// ```ignore
/// use layercache::{CacheObject, CacheError};
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Asset {
///     id: String,
///     revision: String,
///     bytes: Vec<u8>,
/// }
///
/// impl CacheObject for Asset {
///     fn object_id(&self) -> String {
///         self.id.clone()
///     }
///
///     fn object_version(&self) -> String {
///         self.revision.clone()
///     }
///
///     fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
///         serde_json::to_vec(self).map_err(|e| CacheError::Serialization(e.to_string()))
///     }
///
///     fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
///         serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
///     }
/// }
/// ```
pub trait CacheObject: Send + Sync + Sized + 'static {
    /// Stable object identifier, unique within a cache namespace.
    fn object_id(&self) -> String;

    /// Opaque version string for staleness comparison.
    fn object_version(&self) -> String;

    /// Encode the object for the durable tier.
    fn to_bytes(&self) -> Result<Vec<u8>, CacheError>;

    /// Decode an object previously encoded with [`to_bytes`].
    ///
    /// [`to_bytes`]: CacheObject::to_bytes
    fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError>;
}
