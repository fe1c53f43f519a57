use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::store::{Backend, Error};

#[derive(Debug, Clone)]
struct StoredValue {
    data: Vec<u8>,
    /// `None` when the TTL is too long to represent as an `Instant`.
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self) -> bool {
        self.expires_at.is_none_or(|expires_at| expires_at > Instant::now())
    }
}

/// An in-memory [`Backend`] with native-style TTL expiry.
///
/// Expired entries are dropped on access, so they are never observable through
/// any of the backend operations.
///
/// ### Note
///
/// Data is local to the process and lost on restart. Do not use this in a
/// production environment.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<DashMap<String, StoredValue>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are next touched.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn cleanup_expired(&self) {
        self.data.retain(|_, value| value.is_live());
    }
}

impl Backend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        self.data.remove_if(key, |_, value| !value.is_live());

        Ok(self
            .data
            .get(key)
            .filter(|value| value.is_live())
            .map(|value| value.data.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), Error> {
        self.data.insert(
            key.to_owned(),
            StoredValue {
                data: value,
                expires_at: Instant::now().checked_add(ttl),
            },
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(self
            .data
            .remove(key)
            .is_some_and(|(_, value)| value.is_live()))
    }

    async fn exists(&self, key: &str) -> Result<bool, Error> {
        self.data.remove_if(key, |_, value| !value.is_live());

        Ok(self.data.contains_key(key))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        self.cleanup_expired();

        Ok(self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();

        backend
            .set("session:a", b"one".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            backend.get("session:a").await.unwrap(),
            Some(b"one".to_vec())
        );
        assert!(backend.exists("session:a").await.unwrap());

        backend
            .set("session:a", b"two".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            backend.get("session:a").await.unwrap(),
            Some(b"two".to_vec())
        );

        assert!(backend.delete("session:a").await.unwrap());
        assert!(!backend.delete("session:a").await.unwrap());
        assert!(backend.get("session:a").await.unwrap().is_none());
        assert!(!backend.exists("session:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_expiration() {
        let backend = MemoryBackend::new();
        backend
            .set("session:short", vec![1], Duration::from_millis(50))
            .await
            .unwrap();
        backend
            .set("session:long", vec![2], Duration::from_secs(60))
            .await
            .unwrap();

        assert!(backend.exists("session:short").await.unwrap());

        sleep(Duration::from_millis(100)).await;

        assert!(backend.get("session:short").await.unwrap().is_none());
        assert!(!backend.exists("session:short").await.unwrap());
        assert_eq!(
            backend.keys_with_prefix("session:").await.unwrap(),
            vec!["session:long".to_string()]
        );
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let backend = MemoryBackend::new();
        backend
            .set("session:forever", vec![1], Duration::MAX)
            .await
            .unwrap();

        assert_eq!(backend.get("session:forever").await.unwrap(), Some(vec![1]));
        assert!(backend.exists("session:forever").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let backend = MemoryBackend::new();
        for key in ["session:1", "session:2", "other:1"] {
            backend
                .set(key, Vec::new(), Duration::from_secs(60))
                .await
                .unwrap();
        }

        let mut keys = backend.keys_with_prefix("session:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session:1", "session:2"]);
    }
}
