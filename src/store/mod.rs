//! Session persistence on top of a TTL-aware key-value backend.
//!
//! [`SessionStore`] derives backend keys from session ids, turns expiration instants
//! into TTLs and delegates the actual expiry to the backend. Nothing in this module
//! scans for or deletes stale sessions.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

mod backend;
pub use backend::Backend;

pub mod codec;
pub use codec::{Payload, Value};

pub mod lock;
pub use lock::{LockRegistry, SessionLock};

pub mod memory;

#[cfg(feature = "redis-store")]
pub mod redis;

use crate::SessionId;

/// Default namespace for backend keys.
pub const DEFAULT_PREFIX: &str = "session:";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Encoding failed with: {0}")]
    Encode(String),

    #[error("Decoding failed with: {0}")]
    Decode(String),

    #[error("unsupported session format version {found}, expected {expected}")]
    Version { found: u8, expected: u8 },

    #[error("session expiration must be in the future, remaining time was {0}")]
    InvalidExpiration(time::Duration),

    #[error("session id must not be empty")]
    InvalidId,

    #[error("{0}")]
    Backend(String),
}

#[cfg(feature = "redis-store")]
impl From<fred::error::Error> for Error {
    fn from(err: fred::error::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

/// Loads, saves and deletes encoded session payloads in a [`Backend`].
///
/// Cloning is cheap; clones share the backend handle and the [`LockRegistry`], so
/// every handle opened through clones of one store is serialized per session id.
#[derive(Clone, Debug)]
pub struct SessionStore<B: Backend> {
    backend: B,
    prefix: Arc<str>,
    locks: LockRegistry,
}

impl<B> SessionStore<B>
where
    B: Backend,
{
    /// Creates a store using [`DEFAULT_PREFIX`] as the key namespace.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            prefix: Arc::from(DEFAULT_PREFIX),
            locks: LockRegistry::new(),
        }
    }

    /// Sets the namespace every backend key is prefixed with.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Arc::from(prefix.into());
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The per-id locks shared by every handle opened on this store.
    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// The backend key for `id`.
    pub fn key(&self, id: &SessionId) -> String {
        let mut key = String::with_capacity(self.prefix.len() + id.as_str().len());
        key.push_str(&self.prefix);
        key.push_str(id.as_str());
        key
    }

    /// Returns `true` if the backend holds a live entry for `id`.
    #[tracing::instrument(name = "checking session existence", skip(self))]
    pub async fn exists(&self, id: &SessionId) -> Result<bool, Error> {
        self.backend.exists(&self.key(id)).await.map_err(|err| {
            tracing::error!(err = %err, "failed to check session existence");
            err
        })
    }

    /// Loads and decodes the payload stored for `id`.
    ///
    /// `None` means there is no session, either because it never existed or because
    /// its TTL elapsed. An empty payload is returned as `Some`.
    #[tracing::instrument(name = "loading session from backend", skip(self))]
    pub async fn load(&self, id: &SessionId) -> Result<Option<Payload>, Error> {
        let bytes = self.backend.get(&self.key(id)).await.map_err(|err| {
            tracing::error!(err = %err, "failed to load session from backend");
            err
        })?;

        match bytes {
            Some(bytes) => codec::decode(&bytes).map(Some).map_err(|err| {
                tracing::error!(err = %err, "failed to decode session payload");
                err
            }),
            None => Ok(None),
        }
    }

    /// Encodes `payload` and writes it for `id`, expiring at `expires_at`.
    ///
    /// `expires_at` must lie in the future: a non-positive remaining time is rejected
    /// with [`Error::InvalidExpiration`] before anything is written. The TTL is rounded
    /// up to the next whole millisecond.
    #[tracing::instrument(name = "saving session to backend", skip(self, payload))]
    pub async fn save(
        &self,
        id: &SessionId,
        payload: &Payload,
        expires_at: OffsetDateTime,
    ) -> Result<(), Error> {
        let remaining = expires_at - OffsetDateTime::now_utc();
        if remaining <= time::Duration::ZERO {
            tracing::error!(%remaining, "refusing to save an already expired session");
            return Err(Error::InvalidExpiration(remaining));
        }

        let bytes = codec::encode(payload).map_err(|err| {
            tracing::error!(err = %err, "failed to encode session payload");
            err
        })?;

        self.backend
            .set(&self.key(id), bytes, ttl_from(remaining))
            .await
            .map_err(|err| {
                tracing::error!(err = %err, "failed to save session to backend");
                err
            })
    }

    /// Removes the entry for `id`. Deleting a missing session is not an error.
    #[tracing::instrument(name = "deleting session from backend", skip(self))]
    pub async fn delete(&self, id: &SessionId) -> Result<(), Error> {
        let deleted = self.backend.delete(&self.key(id)).await.map_err(|err| {
            tracing::error!(err = %err, "failed to delete session from backend");
            err
        })?;

        if !deleted {
            tracing::debug!("no session entry to delete");
        }

        Ok(())
    }

    /// Counts the live sessions under this store's prefix.
    ///
    /// This lists every matching key, so it costs O(n) in the number of active
    /// sessions (plus whatever the backend needs to walk its keyspace).
    #[tracing::instrument(name = "counting sessions", skip(self))]
    pub async fn count(&self) -> Result<usize, Error> {
        let keys = self
            .backend
            .keys_with_prefix(&self.prefix)
            .await
            .map_err(|err| {
                tracing::error!(err = %err, "failed to list session keys");
                err
            })?;

        Ok(keys.len())
    }

    /// Does nothing: expired entries are removed by the backend's own TTL handling.
    pub async fn reclaim_expired(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Converts a positive remaining time into a TTL, rounding up to whole milliseconds.
pub(crate) fn ttl_from(remaining: time::Duration) -> Duration {
    let nanos = u128::try_from(remaining.whole_nanoseconds()).unwrap_or(0);
    let millis = nanos.div_ceil(1_000_000);
    Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
}
