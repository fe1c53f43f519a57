mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use sessionkv::store::{Error, Payload, SessionStore, Value};
    use sessionkv::store::memory::MemoryBackend;
    use std::time::Duration;
    use time::OffsetDateTime;

    fn in_secs(secs: i64) -> OffsetDateTime {
        OffsetDateTime::now_utc() + time::Duration::seconds(secs)
    }

    #[tokio::test]
    async fn test_save_then_load_until_expiry() {
        let store = memory_store();
        let id = id("abc123");

        let mut payload = Payload::new();
        payload.insert("user", "alice").unwrap();
        store
            .save(&id, &payload, OffsetDateTime::now_utc() + time::Duration::milliseconds(500))
            .await
            .unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded, payload);
        assert_eq!(loaded.get("user").and_then(Value::as_str), Some("alice"));
        assert!(store.exists(&id).await.unwrap());

        tokio::time::sleep(Duration::from_millis(700)).await;

        assert!(store.load(&id).await.unwrap().is_none());
        assert!(!store.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_typed_values_round_trip() {
        let store = memory_store();
        let id = id("typed");

        let mut payload = Payload::new();
        payload.insert("user", create_test_user()).unwrap();
        payload.insert("preferences", create_test_preferences()).unwrap();
        payload.insert("visits", 3i64).unwrap();
        store.save(&id, &payload, in_secs(60)).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(
            loaded.get_as::<TestUser>("user").unwrap(),
            Some(create_test_user())
        );
        assert_eq!(
            loaded.get_as::<TestPreferences>("preferences").unwrap(),
            Some(create_test_preferences())
        );
        assert_eq!(loaded.get_as::<i64>("visits").unwrap(), Some(3));
        assert_eq!(loaded.get_as::<i64>("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let store = memory_store();
        let id = id("overwrite");

        let mut payload = Payload::new();
        payload.insert("user", "alice").unwrap();
        store.save(&id, &payload, in_secs(60)).await.unwrap();

        let mut payload = Payload::new();
        payload.insert("user", "bob").unwrap();
        store.save(&id, &payload, in_secs(60)).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.get_as::<String>("user").unwrap().as_deref(), Some("bob"));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = memory_store();
        let id = id("to-delete");

        store.save(&id, &Payload::new(), in_secs(60)).await.unwrap();
        assert!(store.exists(&id).await.unwrap());

        store.delete(&id).await.unwrap();
        assert!(!store.exists(&id).await.unwrap());
        assert!(store.load(&id).await.unwrap().is_none());

        store.delete(&id).await.unwrap();
        store.delete(&super::common::id("never-existed")).await.unwrap();
    }

    #[tokio::test]
    async fn test_count() {
        let store = memory_store();
        assert_eq!(store.count().await.unwrap(), 0);

        for i in 0..5 {
            store
                .save(&id(&format!("user-{i}")), &Payload::new(), in_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(store.count().await.unwrap(), 5);

        store.delete(&id("user-0")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_stores_share_backend_by_prefix() {
        let backend = MemoryBackend::new();
        let app = SessionStore::new(backend.clone()).with_prefix("app:");
        let admin = SessionStore::new(backend.clone()).with_prefix("admin:");
        let id = id("shared");

        let mut payload = Payload::new();
        payload.insert("role", "user").unwrap();
        app.save(&id, &payload, in_secs(60)).await.unwrap();

        assert!(app.exists(&id).await.unwrap());
        assert!(!admin.exists(&id).await.unwrap());
        assert_eq!(app.count().await.unwrap(), 1);
        assert_eq!(admin.count().await.unwrap(), 0);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_expiration_writes_nothing() {
        let store = memory_store();
        let id = id("expired");

        let err = store
            .save(&id, &Payload::new(), in_secs(-10))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidExpiration(_)));
        assert!(!store.exists(&id).await.unwrap());
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reclaim_expired_is_noop() {
        let store = memory_store();
        let id = id("kept");

        store.save(&id, &Payload::new(), in_secs(60)).await.unwrap();
        store.reclaim_expired().await.unwrap();
        assert!(store.exists(&id).await.unwrap());
    }
}
