use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::error::Elapsed;

use crate::SessionId;

type Locks = DashMap<String, Arc<Mutex<()>>>;

/// Maps session ids to the mutex guarding them.
///
/// Entries are created on first acquisition and evicted once the last holder releases
/// and nobody is waiting, so the registry only grows with the number of sessions in
/// use at the same time. An entry that is held or awaited is never evicted.
///
/// The exclusion is local to this process.
#[derive(Clone, Debug, Default)]
pub struct LockRegistry {
    locks: Arc<Locks>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the caller exclusively holds the lock for `id`.
    ///
    /// Dropping the returned future before it completes gives up the place in line and
    /// evicts the entry if nobody else uses it.
    #[tracing::instrument(name = "acquiring session lock", skip(self))]
    pub async fn acquire(&self, id: &SessionId) -> SessionLock {
        // The clone happens under the shard lock, which is what eviction checks against.
        let mutex = Arc::clone(self.locks.entry(id.as_str().to_owned()).or_default().value());

        // Declared before the lock future so it is dropped after it on cancellation.
        let _cancelled = EvictOnDrop {
            locks: &self.locks,
            id: id.as_str(),
        };
        let guard = mutex.lock_owned().await;
        tracing::debug!("session lock acquired");

        SessionLock {
            id: id.as_str().to_owned(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Like [`acquire`](Self::acquire), giving up after `timeout`.
    pub async fn acquire_timeout(
        &self,
        id: &SessionId,
        timeout: Duration,
    ) -> Result<SessionLock, Elapsed> {
        tokio::time::timeout(timeout, self.acquire(id)).await
    }

    /// Number of ids with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one session id, released on [`release`](SessionLock::release) or drop.
#[derive(Debug)]
pub struct SessionLock {
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Locks>,
}

impl SessionLock {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn release(self) {}
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        evict_idle(&self.locks, &self.id);
        tracing::debug!(session_id = %self.id, "session lock released");
    }
}

fn evict_idle(locks: &Locks, id: &str) {
    locks.remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
}

/// Evicts an idle entry when an acquisition ends, completed or not.
struct EvictOnDrop<'a> {
    locks: &'a Locks,
    id: &'a str,
}

impl Drop for EvictOnDrop<'_> {
    fn drop(&mut self) {
        evict_idle(self.locks, self.id);
    }
}
