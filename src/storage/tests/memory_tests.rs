#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;
    use tokio::time;

    use crate::config::InMemoryConfig;
    use crate::error::{ResilienceError, StorageError};
    use crate::storage::{glob_match, MemoryStorage, StorageBackend};

    use super::super::common;

    // Helper function to create a MemoryStorage instance for testing
    fn create_test_memory() -> MemoryStorage {
        MemoryStorage::new(InMemoryConfig {
            max_entries: 1000,
            use_background_task: true,
            cleanup_interval: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn test_memory_basic_operations() {
        let memory = create_test_memory();
        let result = common::test_basic_operations(&memory).await;
        assert!(result.is_ok(), "Basic operations failed: {:?}", result);
    }

    #[tokio::test]
    async fn test_memory_key_expiration() {
        let memory = create_test_memory();
        let result = common::test_key_expiration(&memory, Duration::from_millis(100)).await;
        assert!(result.is_ok(), "Expiration failed: {:?}", result);
    }

    #[tokio::test]
    async fn test_huge_ttl_is_stored_without_expiry() {
        let memory = create_test_memory();
        memory
            .set("forever", b"v", Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();

        assert_eq!(memory.get("forever").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_pattern_listing() {
        let memory = create_test_memory();
        let result = common::test_pattern_listing(&memory).await;
        assert!(result.is_ok(), "Pattern listing failed: {:?}", result);
    }

    #[tokio::test]
    async fn test_background_cleanup_removes_expired_entries() {
        let memory = create_test_memory();
        assert!(memory.has_cleanup_task());

        memory
            .set("short", b"v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        memory.set("long", b"v", None).await.unwrap();

        time::sleep(Duration::from_millis(150)).await;

        assert_eq!(memory.len(), 1);
        assert!(memory.exists("long").await.unwrap());
    }

    #[test]
    fn test_storage_without_runtime_skips_cleanup_task() {
        let memory = MemoryStorage::new(InMemoryConfig {
            max_entries: 10,
            use_background_task: true,
            cleanup_interval: Duration::from_secs(1),
        });
        assert!(!memory.has_cleanup_task());
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let memory = MemoryStorage::new(InMemoryConfig {
            max_entries: 3,
            use_background_task: false,
            cleanup_interval: Duration::from_secs(1),
        });

        for i in 0..3 {
            let key = format!("small_key_{}", i);
            memory.set(&key, b"value", None).await.unwrap();
        }

        // Overwriting an existing key is fine at capacity
        assert!(memory.set("small_key_0", b"new", None).await.is_ok());

        let overflow = memory.set("overflow_key", b"overflow", None).await;
        assert!(matches!(
            overflow,
            Err(ResilienceError::Storage(StorageError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_capacity_reclaims_expired_entries() {
        let memory = MemoryStorage::new(InMemoryConfig {
            max_entries: 2,
            use_background_task: false,
            cleanup_interval: Duration::from_secs(1),
        });

        memory
            .set("a", b"1", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        memory.set("b", b"2", None).await.unwrap();
        time::sleep(Duration::from_millis(30)).await;

        assert!(memory.set("c", b"3", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let memory = Arc::new(create_test_memory());
        let barrier = Arc::new(Barrier::new(8));
        let mut handles = Vec::new();

        for worker in 0..8 {
            let memory = Arc::clone(&memory);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                for i in 0..25 {
                    let key = format!("worker:{}:{}", worker, i);
                    memory.set(&key, b"x", None).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(memory.len(), 200);
        assert_eq!(memory.keys("worker:3:*").await.unwrap().len(), 25);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("cache:rec-gen:*", "cache:rec-gen:user1:auto"));
        assert!(!glob_match("cache:rec-gen:*", "cache:session:user1"));
        assert!(glob_match("user:?", "user:7"));
        assert!(!glob_match("user:?", "user:42"));
        assert!(glob_match("*:auto", "rec-gen:user1:auto"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("literal\\*", "literal*"));
        assert!(!glob_match("literal\\*", "literalX"));
        assert!(glob_match("", ""));
        assert!(!glob_match("", "x"));
    }
}
