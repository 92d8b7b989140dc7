// src/test_utils.rs

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::cache::DistributedCache;
use crate::config::{CacheConfig, EvictionPolicy, OrchestratorConfig};
use crate::error::{ResilienceError, Result, StorageError};
use crate::orchestrator::ResilienceOrchestrator;
use crate::resilience::CircuitBreakerRegistry;
use crate::storage::{glob_match, StorageBackend};

/// Shared-tier double with failure injection and call counting
#[derive(Debug, Default)]
pub struct MockStorage {
    data: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
    fail: AtomicBool,
    pub get_calls: AtomicUsize,
    pub set_calls: AtomicUsize,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until switched off
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Writes a raw value, bypassing the cache envelope
    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_vec(), None));
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).map(|(v, _)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ResilienceError::Storage(StorageError::RedisConnection(
                "Simulated failure".to_string(),
            )))
        } else {
            Ok(())
        }
    }

    fn live(entry: &(Vec<u8>, Option<Instant>)) -> bool {
        entry.1.map_or(true, |expiry| expiry > Instant::now())
    }
}

#[async_trait]
impl StorageBackend for MockStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let data = self.data.lock().unwrap();
        Ok(data
            .get(key)
            .filter(|entry| Self::live(entry))
            .map(|(v, _)| v.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let expiry = ttl.and_then(|ttl| Instant::now().checked_add(ttl));
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_vec(), expiry));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.data.lock().unwrap().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .get(key)
            .map_or(false, |entry| Self::live(entry)))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, entry)| Self::live(entry) && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

/// Builds a cache over a fresh `MockStorage`
pub fn create_test_cache(
    capacity: usize,
    policy: EvictionPolicy,
) -> (DistributedCache, Arc<MockStorage>) {
    let storage = Arc::new(MockStorage::new());
    let config = CacheConfig {
        key_prefix: "test".to_string(),
        local_capacity: capacity,
        eviction_policy: policy,
        default_ttl: Duration::from_secs(60),
        ..CacheConfig::default()
    };
    let cache = DistributedCache::new("test", config, storage.clone());
    (cache, storage)
}

/// Orchestrator config with millisecond backoff and a breaker that only
/// opens once plenty of calls have been seen
pub fn fast_orchestrator_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.retry.base.base_delay = Duration::from_millis(10);
    config.retry.base.max_delay = Duration::from_millis(50);
    config.retry.base.min_delay = Duration::from_millis(1);
    config.retry.overrides.clear();
    config.circuit_breaker.minimum_requests = 1000;
    config
}

/// Orchestrator backed by a fresh test cache
pub fn create_test_orchestrator(
    service_name: &str,
    config: OrchestratorConfig,
) -> (ResilienceOrchestrator, Arc<DistributedCache>, Arc<MockStorage>) {
    let (cache, storage) = create_test_cache(100, EvictionPolicy::Lru);
    let cache = Arc::new(cache);
    let breakers = CircuitBreakerRegistry::default();
    let orchestrator =
        ResilienceOrchestrator::new(service_name, config, &breakers, Some(Arc::clone(&cache)));
    (orchestrator, cache, storage)
}

/// Operation that fails a fixed number of times before succeeding
#[derive(Debug, Clone)]
pub struct FlakyOperation {
    calls: Arc<AtomicUsize>,
    failures: usize,
    error: ResilienceError,
}

impl FlakyOperation {
    pub fn new(failures: usize, error: ResilienceError) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            failures,
            error,
        }
    }

    /// Always fails with `error`
    pub fn always_failing(error: ResilienceError) -> Self {
        Self::new(usize::MAX, error)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn call(&self) -> Result<String> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            Err(self.error.clone())
        } else {
            Ok(format!("success after {} calls", attempt))
        }
    }
}

/// A retryable network failure
pub fn network_error() -> ResilienceError {
    ResilienceError::Network("ECONNRESET".to_string())
}
