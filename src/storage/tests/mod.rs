// src/storage/tests/mod.rs

mod memory_tests;

// Common utilities for storage tests
pub(crate) mod common {
    use std::time::Duration;
    use tokio::time;

    use crate::error::Result;
    use crate::storage::StorageBackend;

    // Test basic storage operations that should work on any backend
    pub async fn test_basic_operations<S: StorageBackend>(storage: &S) -> Result<()> {
        let key = "test_basic_key";
        let value: &[u8] = b"test_value";

        storage.set(key, value, None).await?;

        let result = storage.get(key).await?;
        assert_eq!(result.as_deref(), Some(value));

        // Overwrite keeps a single entry
        storage.set(key, b"second", None).await?;
        assert_eq!(storage.get(key).await?.as_deref(), Some(&b"second"[..]));

        assert!(storage.exists(key).await?);
        assert!(!storage.exists("non_existent_key").await?);

        assert!(storage.delete(key).await?);
        assert!(!storage.delete(key).await?);
        assert!(!storage.exists(key).await?);
        assert_eq!(storage.get(key).await?, None);

        Ok(())
    }

    // Test expiration; `ttl` must suit the backend's resolution
    pub async fn test_key_expiration<S: StorageBackend>(storage: &S, ttl: Duration) -> Result<()> {
        let key = "test_expiry_key";

        storage.set(key, b"expiring_value", Some(ttl)).await?;
        assert!(storage.exists(key).await?);

        time::sleep(ttl + ttl / 2).await;

        assert!(!storage.exists(key).await?);
        assert_eq!(storage.get(key).await?, None);

        Ok(())
    }

    // Test glob listing under a namespace
    pub async fn test_pattern_listing<S: StorageBackend>(storage: &S) -> Result<()> {
        storage.set("ns:user:1:profile", b"a", None).await?;
        storage.set("ns:user:2:profile", b"b", None).await?;
        storage.set("ns:order:1", b"c", None).await?;

        let mut keys = storage.keys("ns:user:*").await?;
        keys.sort();
        assert_eq!(keys, vec!["ns:user:1:profile", "ns:user:2:profile"]);

        let keys = storage.keys("ns:order:?").await?;
        assert_eq!(keys, vec!["ns:order:1"]);

        for key in ["ns:user:1:profile", "ns:user:2:profile", "ns:order:1"] {
            storage.delete(key).await?;
        }

        Ok(())
    }
}
