// src/cache/mod.rs
//! Two-tier cache: a small process-local tier in front of a shared store.
//!
//! The shared tier is the source of truth. Local entries are a projection of
//! it and may be evicted or expire independently. Shared-tier failures are
//! counted and logged, then treated as a miss; they never reach the caller.

pub mod local;

#[cfg(test)]
mod tests;

pub use local::LocalCache;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cache_op;
use crate::config::{CacheConfig, CachePolicy, CachePriority};
use crate::error::Result;
use crate::storage::StorageBackend;

/// Envelope stored in the shared tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    /// Wall-clock insertion time, epoch milliseconds
    pub inserted_at: i64,
    pub ttl_ms: u64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value, ttl: Duration, tags: Vec<String>) -> Self {
        Self {
            value,
            inserted_at: Utc::now().timestamp_millis(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            tags,
        }
    }

    /// Time left before the entry expires, or None if it already has
    pub fn remaining_ttl(&self, now_ms: i64) -> Option<Duration> {
        let ttl_ms = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        let expires_at = self.inserted_at.saturating_add(ttl_ms);
        if now_ms < expires_at {
            Some(Duration::from_millis((expires_at - now_ms) as u64))
        } else {
            None
        }
    }
}

/// Options for a single write
#[derive(Debug, Clone, Default)]
pub struct CacheSetOptions {
    /// Falls back to the cache's default TTL
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    /// Falls back to the cache's `mirror_writes_locally` setting
    pub mirror_local: Option<bool>,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of the cache counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub local_hits: u64,
    pub shared_hits: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub local_size: usize,
    pub local_capacity: usize,
    pub local_utilization: f64,
}

impl CacheMetricsSnapshot {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub healthy: bool,
    pub shared_tier_reachable: bool,
    pub shared_tier_latency_ms: u64,
    pub hit_rate: f64,
    pub local_utilization: f64,
    pub issues: Vec<String>,
}

/// Two-tier cache instance
#[derive(Debug)]
pub struct DistributedCache {
    name: String,
    config: CacheConfig,
    local: LocalCache,
    shared: Arc<dyn StorageBackend>,
    counters: CacheCounters,
}

impl DistributedCache {
    pub fn new(name: impl Into<String>, config: CacheConfig, shared: Arc<dyn StorageBackend>) -> Self {
        let local = LocalCache::new(config.local_capacity, config.eviction_policy);
        Self {
            name: name.into(),
            config,
            local,
            shared,
            counters: CacheCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Prefixes a logical key with this instance's namespace
    pub fn namespaced(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Policy for a category, falling back to the default TTL at medium priority
    pub fn policy_for(&self, category: &str) -> CachePolicy {
        self.config
            .categories
            .get(category)
            .copied()
            .unwrap_or(CachePolicy::new(self.config.default_ttl, CachePriority::Medium))
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with_options(key, true).await
    }

    pub async fn get_for_category<T: DeserializeOwned>(&self, category: &str, key: &str) -> Option<T> {
        let policy = self.policy_for(category);
        self.get_with_policy(key, &policy).await
    }

    pub async fn get_with_policy<T: DeserializeOwned>(&self, key: &str, policy: &CachePolicy) -> Option<T> {
        self.get_with_options(key, policy.priority.uses_local_tier())
            .await
    }

    /// Read path: local tier, then shared tier with local repopulation
    pub async fn get_with_options<T: DeserializeOwned>(&self, key: &str, use_local: bool) -> Option<T> {
        let started = Instant::now();
        let full_key = self.namespaced(key);

        if use_local {
            if let Some(bytes) = self.local.get(&full_key) {
                match serde_json::from_slice::<T>(&bytes) {
                    Ok(value) => {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        self.counters.local_hits.fetch_add(1, Ordering::Relaxed);
                        cache_op!("get", full_key.as_str(), "local_hit", elapsed_ms(started));
                        return Some(value);
                    }
                    Err(e) => {
                        // Stale shape; drop it and consult the shared tier
                        self.local.remove(&full_key);
                        debug!(key = %full_key, error = %e, "Discarding undecodable local entry");
                    }
                }
            }
        }

        match self.read_shared::<T>(&full_key, use_local).await {
            Ok(Some(value)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.counters.shared_hits.fetch_add(1, Ordering::Relaxed);
                cache_op!("get", full_key.as_str(), "shared_hit", elapsed_ms(started));
                Some(value)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                cache_op!("get", full_key.as_str(), "miss", elapsed_ms(started));
                None
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(cache = %self.name, key = %full_key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn read_shared<T: DeserializeOwned>(&self, full_key: &str, repopulate: bool) -> Result<Option<T>> {
        let bytes = match self.shared.get(full_key).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        let entry: CacheEntry = serde_json::from_slice(&bytes)?;
        let remaining = match entry.remaining_ttl(Utc::now().timestamp_millis()) {
            Some(remaining) => remaining,
            None => {
                // The store kept it past its embedded TTL; drop it
                if let Err(e) = self.shared.delete(full_key).await {
                    debug!(key = %full_key, error = %e, "Failed to delete expired shared entry");
                }
                return Ok(None);
            }
        };

        let value: T = serde_json::from_value(entry.value.clone())?;
        if repopulate {
            let local_bytes = serde_json::to_vec(&entry.value)?;
            self.local.insert(full_key, local_bytes, remaining, entry.tags);
        }
        Ok(Some(value))
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let options = CacheSetOptions {
            ttl,
            ..CacheSetOptions::default()
        };
        self.set_with_options(key, value, options).await
    }

    pub async fn set_for_category<T: Serialize>(&self, category: &str, key: &str, value: &T) -> bool {
        let policy = self.policy_for(category);
        self.set_with_policy(key, value, &policy).await
    }

    pub async fn set_with_policy<T: Serialize>(&self, key: &str, value: &T, policy: &CachePolicy) -> bool {
        let options = CacheSetOptions {
            ttl: Some(policy.ttl),
            tags: Vec::new(),
            mirror_local: Some(policy.priority.uses_local_tier()),
        };
        self.set_with_options(key, value, options).await
    }

    /// Write path: shared tier always, local tier when mirroring is enabled.
    ///
    /// Returns whether the shared write succeeded.
    pub async fn set_with_options<T: Serialize>(&self, key: &str, value: &T, options: CacheSetOptions) -> bool {
        let started = Instant::now();
        let full_key = self.namespaced(key);
        let ttl = options.ttl.unwrap_or(self.config.default_ttl);
        let mirror = options.mirror_local.unwrap_or(self.config.mirror_writes_locally);

        match self.write_shared(&full_key, value, ttl, options.tags, mirror).await {
            Ok(()) => {
                self.counters.sets.fetch_add(1, Ordering::Relaxed);
                cache_op!("set", full_key.as_str(), "stored", elapsed_ms(started));
                true
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache = %self.name, key = %full_key, error = %e, "Cache write failed");
                false
            }
        }
    }

    async fn write_shared<T: Serialize>(
        &self,
        full_key: &str,
        value: &T,
        ttl: Duration,
        tags: Vec<String>,
        mirror: bool,
    ) -> Result<()> {
        let json = serde_json::to_value(value)?;
        let entry = CacheEntry::new(json, ttl, tags);
        let bytes = serde_json::to_vec(&entry)?;
        self.shared.set(full_key, &bytes, Some(ttl)).await?;

        if mirror {
            let local_bytes = serde_json::to_vec(&entry.value)?;
            self.local.insert(full_key, local_bytes, ttl, entry.tags);
        } else {
            // An older mirrored copy would shadow the new value
            self.local.remove(full_key);
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> bool {
        let full_key = self.namespaced(key);
        let removed_local = self.local.remove(&full_key);

        match self.shared.delete(&full_key).await {
            Ok(removed) => {
                self.counters.deletes.fetch_add(1, Ordering::Relaxed);
                removed || removed_local
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache = %self.name, key = %full_key, error = %e, "Cache delete failed");
                removed_local
            }
        }
    }

    /// Deletes every key matching the glob `pattern` under this namespace from
    /// both tiers. Returns the number of shared keys deleted.
    pub async fn delete_pattern(&self, pattern: &str) -> usize {
        let full_pattern = self.namespaced(pattern);
        let purged_local = self.local.remove_matching(&full_pattern);
        let keys = match self.shared.keys(&full_pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache = %self.name, pattern = %full_pattern, error = %e, "Cache pattern lookup failed");
                return 0;
            }
        };

        let mut deleted = 0;
        for key in keys {
            match self.shared.delete(&key).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(cache = %self.name, key = %key, error = %e, "Cache delete failed");
                }
            }
        }

        self.counters
            .deletes
            .fetch_add(deleted as u64, Ordering::Relaxed);
        debug!(
            cache = %self.name,
            pattern = %full_pattern,
            deleted,
            purged_local,
            "Pattern invalidation"
        );
        deleted
    }

    /// Deletes every entry under this namespace whose envelope carries `tag`
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        self.local.remove_tagged(tag);

        let keys = match self.shared.keys(&self.namespaced("*")).await {
            Ok(keys) => keys,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache = %self.name, tag, error = %e, "Tag invalidation lookup failed");
                return 0;
            }
        };

        let mut deleted = 0;
        for key in keys {
            let tagged = match self.shared.get(&key).await {
                Ok(Some(bytes)) => serde_json::from_slice::<CacheEntry>(&bytes)
                    .map(|entry| entry.tags.iter().any(|t| t == tag))
                    .unwrap_or(false),
                Ok(None) => false,
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, error = %e, "Skipping unreadable entry");
                    false
                }
            };

            if tagged && matches!(self.shared.delete(&key).await, Ok(true)) {
                deleted += 1;
            }
        }

        self.counters
            .deletes
            .fetch_add(deleted as u64, Ordering::Relaxed);
        deleted
    }

    pub async fn exists(&self, key: &str) -> bool {
        let full_key = self.namespaced(key);
        if self.local.contains(&full_key) {
            return true;
        }

        match self.shared.exists(&full_key).await {
            Ok(exists) => exists,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache = %self.name, key = %full_key, error = %e, "Cache exists check failed");
                false
            }
        }
    }

    pub fn clear_local(&self) {
        self.local.clear();
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheMetricsSnapshot {
            hits,
            misses,
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            shared_hits: self.counters.shared_hits.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            evictions: self.local.evictions(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            local_size: self.local.len(),
            local_capacity: self.local.capacity(),
            local_utilization: self.local.utilization(),
        }
    }

    pub fn reset_metrics(&self) {
        for counter in [
            &self.counters.hits,
            &self.counters.misses,
            &self.counters.local_hits,
            &self.counters.shared_hits,
            &self.counters.sets,
            &self.counters.deletes,
            &self.counters.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Pings the shared tier and summarises cache effectiveness
    pub async fn health_check(&self) -> CacheHealth {
        let started = Instant::now();
        let ping = self.shared.ping().await;
        let latency = elapsed_ms(started);
        let metrics = self.metrics();

        let mut issues = Vec::new();
        if let Err(e) = &ping {
            issues.push(format!("Shared tier unreachable: {}", e));
        }

        CacheHealth {
            healthy: ping.is_ok(),
            shared_tier_reachable: ping.is_ok(),
            shared_tier_latency_ms: latency,
            hit_rate: metrics.hit_rate,
            local_utilization: metrics.local_utilization,
            issues,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
