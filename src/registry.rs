// src/registry.rs
//! Name-keyed registries owned by start-up code and passed to whoever needs them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::cache::DistributedCache;
use crate::config::CacheConfig;
use crate::orchestrator::ResilienceOrchestrator;
use crate::storage::StorageBackend;

fn sorted_values<T>(map: &HashMap<String, Arc<T>>) -> Vec<Arc<T>> {
    let mut entries: Vec<(&String, &Arc<T>)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter().map(|(_, value)| Arc::clone(value)).collect()
}

/// One two-tier cache per name
#[derive(Debug, Default)]
pub struct CacheRegistry {
    caches: RwLock<HashMap<String, Arc<DistributedCache>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cache for `name`, creating it on first use. The config and
    /// backend are only used when the cache is created.
    pub fn get_or_create(
        &self,
        name: &str,
        config: CacheConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Arc<DistributedCache> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut caches = self.caches.write().unwrap_or_else(|p| p.into_inner());
        caches
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(cache = name, prefix = %config.key_prefix, "Creating cache");
                Arc::new(DistributedCache::new(name, config, backend))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<DistributedCache>> {
        self.caches
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    /// All caches, ordered by name
    pub fn all(&self) -> Vec<Arc<DistributedCache>> {
        let caches = self.caches.read().unwrap_or_else(|p| p.into_inner());
        sorted_values(&*caches)
    }

    pub fn len(&self) -> usize {
        self.caches.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Orchestrators keyed by service name
#[derive(Debug, Default)]
pub struct OrchestratorRegistry {
    orchestrators: RwLock<HashMap<String, Arc<ResilienceOrchestrator>>>,
}

impl OrchestratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers under the orchestrator's service name, replacing any previous one
    pub fn register(&self, orchestrator: Arc<ResilienceOrchestrator>) {
        let name = orchestrator.service_name().to_string();
        let previous = self
            .orchestrators
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.clone(), orchestrator);
        if previous.is_some() {
            warn!(service = %name, "Replaced registered orchestrator");
        }
    }

    pub fn get(&self, service_name: &str) -> Option<Arc<ResilienceOrchestrator>> {
        self.orchestrators
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(service_name)
            .cloned()
    }

    /// All orchestrators, ordered by service name
    pub fn all(&self) -> Vec<Arc<ResilienceOrchestrator>> {
        let orchestrators = self
            .orchestrators
            .read()
            .unwrap_or_else(|p| p.into_inner());
        sorted_values(&*orchestrators)
    }

    pub fn len(&self) -> usize {
        self.orchestrators
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
