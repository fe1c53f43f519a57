use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use crate::store::Error;

/// The key-value capability a [`SessionStore`](crate::store::SessionStore) persists into.
///
/// Implementations must expire keys on their own once the TTL passed to [`set`](Backend::set)
/// elapses; the store never deletes stale entries itself.
pub trait Backend: Clone + Debug + Send + Sync + 'static {
    /// Gets the bytes stored at `key`, or `None` if the key is absent or expired.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>, Error>> + Send;

    /// Stores `value` at `key`, replacing any previous value, to expire after `ttl`.
    fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Deletes `key`.
    ///
    /// Returns `true` if an entry was removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Returns `true` if `key` holds a live entry.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Lists every live key starting with `prefix`.
    fn keys_with_prefix(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, Error>> + Send;
}
