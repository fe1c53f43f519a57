//! Per-request access to one session.

use std::ops::Deref;
use std::sync::Arc;
use std::{fmt, result};

use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use time::OffsetDateTime;

mod cookie_options;
mod id;

use crate::store::{self, Backend, Payload, SessionLock, SessionStore, Value};
pub use cookie_options::CookieOptions;
pub use id::SessionId;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error("session handle has already been released")]
    LockState,
    #[error("timed out waiting for the session lock")]
    LockTimeout,
    #[error("idle timeout {0} puts the session expiration out of range")]
    IdleTimeout(time::Duration),
}

type Result<T> = result::Result<T, Error>;

/// When [`SessionHandle::close`] writes the payload back.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SavePolicy {
    /// Save only if the payload was mutated.
    #[default]
    OnChange,
    /// Save on every close, which also pushes the expiration forward.
    Always,
}

/// Settings applied to every handle opened with them.
///
/// # Example
///
/// ```rust
/// use sessionkv::{HandleOptions, SavePolicy};
/// use std::time::Duration;
///
/// let options = HandleOptions::build()
///     .idle_timeout(time::Duration::minutes(30))
///     .save_policy(SavePolicy::Always)
///     .lock_timeout(Duration::from_secs(5));
/// ```
#[derive(Clone, Copy, Debug)]
pub struct HandleOptions {
    /// Added to the current time on close to get the session's expiration instant.
    ///
    /// Only a close that saves moves the expiration. With [`SavePolicy::OnChange`] a
    /// session that is read but not modified still expires `idle_timeout` after its
    /// last write; use [`SavePolicy::Always`] to expire after the last access instead.
    pub idle_timeout: time::Duration,
    pub save_policy: SavePolicy,
    /// Upper bound on waiting for a contended session. `None` waits forever.
    pub lock_timeout: Option<std::time::Duration>,
}

impl Default for HandleOptions {
    fn default() -> Self {
        Self {
            idle_timeout: time::Duration::hours(1),
            save_policy: SavePolicy::default(),
            lock_timeout: None,
        }
    }
}

impl HandleOptions {
    pub fn build() -> Self {
        Self::default()
    }

    pub fn idle_timeout(mut self, idle_timeout: time::Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn save_policy(mut self, save_policy: SavePolicy) -> Self {
        self.save_policy = save_policy;
        self
    }

    pub fn lock_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}

/// The observable lifecycle of a [`SessionHandle`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandleState {
    /// The lock is held and the payload is available.
    Loaded,
    /// The lock is held but the payload will not be saved.
    Discarded,
    /// The lock was released; the handle can no longer be used.
    Released,
}

struct State {
    phase: HandleState,
    payload: Payload,
    lock: Option<SessionLock>,
}

/// Exclusive, per-request access to one session.
///
/// Opening a handle takes the session's lock and loads its payload. The payload is
/// read and mutated through the handle, and [`close`](SessionHandle::close) writes
/// it back and releases the lock. The lock is released on every path out of
/// `close`, and also when the handle is dropped.
///
/// The handle is internally synchronized so it can be shared with the request
/// through an [`Arc`]; see [`Session`].
pub struct SessionHandle<B: Backend> {
    id: SessionId,
    store: SessionStore<B>,
    options: HandleOptions,
    is_new: bool,
    state: Mutex<State>,
}

impl<B> SessionHandle<B>
where
    B: Backend,
{
    /// Acquires the lock for `id`, waiting while another handle holds it, then loads
    /// the stored payload. A missing session starts out empty.
    #[tracing::instrument(name = "opening session", skip(store, options))]
    pub async fn open(
        store: &SessionStore<B>,
        id: SessionId,
        options: HandleOptions,
    ) -> Result<Self> {
        let lock = match options.lock_timeout {
            Some(timeout) => store
                .locks()
                .acquire_timeout(&id, timeout)
                .await
                .map_err(|_| {
                    tracing::warn!(?timeout, "timed out waiting for the session lock");
                    Error::LockTimeout
                })?,
            None => store.locks().acquire(&id).await,
        };

        // Dropping `lock` on the error path releases it.
        let loaded = store.load(&id).await?;
        let is_new = loaded.is_none();

        Ok(Self {
            id,
            store: store.clone(),
            options,
            is_new,
            state: Mutex::new(State {
                phase: HandleState::Loaded,
                payload: loaded.unwrap_or_default(),
                lock: Some(lock),
            }),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Returns `true` if the backend had no entry for this id when the handle was opened.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn state(&self) -> HandleState {
        self.state.lock().phase
    }

    /// Runs `f` on the payload.
    ///
    /// Fails with [`Error::LockState`] once the handle has been released.
    pub fn with_payload<R>(&self, f: impl FnOnce(&mut Payload) -> R) -> Result<R> {
        let mut state = self.state.lock();
        if state.phase == HandleState::Released {
            return Err(Error::LockState);
        }
        Ok(f(&mut state.payload))
    }

    /// Gets the value at `key` deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.with_payload(|payload| payload.get_as::<T>(key))??)
    }

    /// Serializes `value` into the payload at `key`, returning the previous value.
    pub fn insert<T: Serialize>(&self, key: &str, value: T) -> Result<Option<Value>> {
        Ok(self.with_payload(|payload| payload.insert(key, value))??)
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.with_payload(|payload| payload.remove(key))
    }

    pub fn clear(&self) -> Result<()> {
        self.with_payload(Payload::clear)
    }

    /// Deletes the session from the backend and empties the payload.
    ///
    /// The handle keeps the lock until it is closed, but nothing is saved.
    #[tracing::instrument(name = "deleting session", skip(self), fields(session_id = %self.id))]
    pub async fn delete(&self) -> Result<()> {
        if self.state() == HandleState::Released {
            return Err(Error::LockState);
        }

        self.store.delete(&self.id).await?;

        let mut state = self.state.lock();
        if state.phase != HandleState::Released {
            state.payload = Payload::new();
            state.phase = HandleState::Discarded;
        }

        Ok(())
    }

    /// Saves the payload according to the [`SavePolicy`] and releases the lock.
    ///
    /// The lock is released whether or not the save succeeds; a failed save is
    /// returned as an error. Returns `true` if the payload was written.
    #[tracing::instrument(name = "closing session", skip(self), fields(session_id = %self.id))]
    pub async fn close(&self) -> Result<bool> {
        let (payload, lock) = {
            let mut state = self.state.lock();
            let phase = state.phase;
            let payload = match phase {
                HandleState::Released => return Err(Error::LockState),
                HandleState::Discarded => None,
                HandleState::Loaded => {
                    let save = self.options.save_policy == SavePolicy::Always
                        || state.payload.is_changed();
                    save.then(|| std::mem::take(&mut state.payload))
                }
            };
            state.phase = HandleState::Released;
            (payload, state.lock.take())
        };

        let result = match payload {
            Some(payload) => {
                let idle_timeout = self.options.idle_timeout;
                match OffsetDateTime::now_utc().checked_add(idle_timeout) {
                    Some(expires_at) => self
                        .store
                        .save(&self.id, &payload, expires_at)
                        .await
                        .map(|_| true)
                        .map_err(Error::from),
                    None => Err(Error::IdleTimeout(idle_timeout)),
                }
            }
            None => Ok(false),
        };

        drop(lock);

        if let Err(err) = &result {
            tracing::error!(err = %err, "failed to save session, lock released");
        }
        result
    }

    /// Releases the lock without saving.
    #[tracing::instrument(name = "discarding session", skip(self), fields(session_id = %self.id))]
    pub fn discard(&self) -> Result<()> {
        let lock = {
            let mut state = self.state.lock();
            if state.phase == HandleState::Released {
                return Err(Error::LockState);
            }
            state.phase = HandleState::Released;
            state.payload = Payload::new();
            state.lock.take()
        };

        drop(lock);
        Ok(())
    }
}

impl<B: Backend> fmt::Debug for SessionHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("is_new", &self.is_new)
            .field("state", &self.state())
            .finish()
    }
}

impl<B: Backend> Drop for SessionHandle<B> {
    fn drop(&mut self) {
        if self.state.get_mut().phase != HandleState::Released {
            tracing::debug!(session_id = %self.id, "session handle dropped without close, changes discarded");
        }
    }
}

/// A shared [`SessionHandle`], as handed to request handlers by
/// [`SessionLayer`](crate::SessionLayer).
///
/// Handlers may close or discard the session themselves; the layer then leaves the
/// session and its cookie untouched.
///
/// # Example
///
/// ```rust
/// use axum::{Router, routing::get};
/// use sessionkv::Session;
/// use sessionkv::store::memory::MemoryBackend;
///
/// let _: Router<()> = Router::new()
///     .route("/visits", get(|session: Session<MemoryBackend>| async move {
///         let visits = session.get::<i64>("visits").unwrap().unwrap_or(0) + 1;
///         session.insert("visits", visits).unwrap();
///         visits.to_string()
///     }));
/// ```
#[derive(Debug)]
pub struct Session<B: Backend> {
    handle: Arc<SessionHandle<B>>,
}

impl<B: Backend> Session<B> {
    pub fn new(handle: Arc<SessionHandle<B>>) -> Self {
        Self { handle }
    }
}

impl<B: Backend> Clone for Session<B> {
    fn clone(&self) -> Self {
        Self {
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<B: Backend> Deref for Session<B> {
    type Target = SessionHandle<B>;

    fn deref(&self) -> &Self::Target {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryBackend;

    fn store() -> SessionStore<MemoryBackend> {
        SessionStore::new(MemoryBackend::new())
    }

    fn id(value: &str) -> SessionId {
        SessionId::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_new_session_starts_empty() {
        let store = store();
        let handle = SessionHandle::open(&store, id("fresh"), HandleOptions::default())
            .await
            .unwrap();

        assert!(handle.is_new());
        assert_eq!(handle.state(), HandleState::Loaded);
        assert!(handle.with_payload(|p| p.is_empty()).unwrap());

        assert!(!handle.close().await.unwrap());
        assert!(!store.exists(&id("fresh")).await.unwrap());
        assert!(store.locks().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_are_saved_on_close() {
        let store = store();
        let handle = SessionHandle::open(&store, id("abc"), HandleOptions::default())
            .await
            .unwrap();
        handle.insert("user", "alice").unwrap();
        assert!(handle.close().await.unwrap());
        assert_eq!(handle.state(), HandleState::Released);

        let handle = SessionHandle::open(&store, id("abc"), HandleOptions::default())
            .await
            .unwrap();
        assert!(!handle.is_new());
        assert_eq!(
            handle.get::<String>("user").unwrap(),
            Some("alice".to_string())
        );
        handle.discard().unwrap();
    }

    #[tokio::test]
    async fn test_always_policy_saves_unchanged() {
        let store = store();
        let options = HandleOptions::build().save_policy(SavePolicy::Always);
        let handle = SessionHandle::open(&store, id("touch"), options)
            .await
            .unwrap();

        assert!(handle.close().await.unwrap());
        assert!(store.exists(&id("touch")).await.unwrap());
    }

    #[tokio::test]
    async fn test_use_after_release() {
        let store = store();
        let handle = SessionHandle::open(&store, id("done"), HandleOptions::default())
            .await
            .unwrap();
        handle.close().await.unwrap();

        assert!(matches!(handle.close().await, Err(Error::LockState)));
        assert!(matches!(handle.discard(), Err(Error::LockState)));
        assert!(matches!(handle.get::<String>("user"), Err(Error::LockState)));
        assert!(matches!(handle.insert("user", 1), Err(Error::LockState)));
        assert!(matches!(handle.delete().await, Err(Error::LockState)));
    }

    #[tokio::test]
    async fn test_failed_save_still_releases() {
        let store = store();
        let options = HandleOptions::build().idle_timeout(time::Duration::seconds(-1));
        let handle = SessionHandle::open(&store, id("broken"), options)
            .await
            .unwrap();
        handle.insert("user", "alice").unwrap();

        let err = handle.close().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Store(store::Error::InvalidExpiration(_))
        ));
        assert_eq!(handle.state(), HandleState::Released);
        assert!(store.locks().is_empty());
        assert!(!store.exists(&id("broken")).await.unwrap());
    }

    #[tokio::test]
    async fn test_out_of_range_idle_timeout_is_an_error() {
        let store = store();
        let options = HandleOptions::build().idle_timeout(time::Duration::MAX);
        let handle = SessionHandle::open(&store, id("forever"), options)
            .await
            .unwrap();
        handle.insert("user", "alice").unwrap();

        let err = handle.close().await.unwrap_err();
        assert!(matches!(err, Error::IdleTimeout(_)));
        assert_eq!(handle.state(), HandleState::Released);
        assert!(store.locks().is_empty());
        assert!(!store.exists(&id("forever")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_discards_changes() {
        let store = store();
        let handle = SessionHandle::open(&store, id("gone"), HandleOptions::default())
            .await
            .unwrap();
        handle.insert("user", "alice").unwrap();
        handle.close().await.unwrap();

        let handle = SessionHandle::open(&store, id("gone"), HandleOptions::default())
            .await
            .unwrap();
        handle.delete().await.unwrap();
        assert_eq!(handle.state(), HandleState::Discarded);
        handle.insert("user", "bob").unwrap();

        assert!(!handle.close().await.unwrap());
        assert!(!store.exists(&id("gone")).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let store = store();
        let held = SessionHandle::open(&store, id("busy"), HandleOptions::default())
            .await
            .unwrap();

        let options = HandleOptions::build().lock_timeout(std::time::Duration::from_millis(20));
        let err = SessionHandle::open(&store, id("busy"), options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LockTimeout));

        held.discard().unwrap();
        let handle = SessionHandle::open(&store, id("busy"), options)
            .await
            .unwrap();
        handle.discard().unwrap();
    }

    #[tokio::test]
    async fn test_drop_releases_lock() {
        let store = store();
        let handle = SessionHandle::open(&store, id("dropped"), HandleOptions::default())
            .await
            .unwrap();
        handle.insert("user", "alice").unwrap();
        drop(handle);

        assert!(store.locks().is_empty());
        assert!(!store.exists(&id("dropped")).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_error_releases_lock() {
        let store = store();
        store
            .backend()
            .set(
                &store.key(&id("corrupt")),
                vec![crate::store::codec::FORMAT_VERSION],
                std::time::Duration::from_secs(60),
            )
            .await
            .unwrap();

        let err = SessionHandle::open(&store, id("corrupt"), HandleOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(store::Error::Decode(_))));
        assert!(store.locks().is_empty());
    }
}
