// src/cache/local.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::trace;

use crate::config::EvictionPolicy;
use crate::storage::glob_match;

/// Entry in the local tier
#[derive(Debug, Clone)]
struct LocalEntry {
    value: Vec<u8>,
    /// None when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
    tags: Vec<String>,
    /// Number of hits since insertion
    hits: u64,
    /// Monotonic access sequence; larger is more recent
    last_access: u64,
}

impl LocalEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

#[derive(Debug, Default)]
struct LocalState {
    entries: HashMap<String, LocalEntry>,
    clock: u64,
    evictions: u64,
}

impl LocalState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Bounded process-local tier with LRU or LFU eviction.
///
/// The lock is held only for map work and never across an `.await`.
#[derive(Debug)]
pub struct LocalCache {
    state: Mutex<LocalState>,
    capacity: usize,
    policy: EvictionPolicy,
}

impl LocalCache {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self {
            state: Mutex::new(LocalState::default()),
            capacity: capacity.max(1),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a live value and records the access
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = &mut *guard;
        let seq = state.tick();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.hits += 1;
                entry.last_access = seq;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(key);
        }
        None
    }

    /// Inserts or replaces an entry, evicting one entry first when full
    pub fn insert(&self, key: &str, value: Vec<u8>, ttl: Duration, tags: Vec<String>) {
        let mut state = self.lock();
        let seq = state.tick();

        if !state.entries.contains_key(key) && state.entries.len() >= self.capacity {
            if let Some(victim) = self.select_victim(&state.entries) {
                state.entries.remove(&victim);
                state.evictions += 1;
                trace!(key = %victim, policy = ?self.policy, "Evicted local cache entry");
            }
        }

        state.entries.insert(
            key.to_string(),
            LocalEntry {
                value,
                expires_at: Instant::now().checked_add(ttl),
                tags,
                hits: 0,
                last_access: seq,
            },
        );
    }

    fn select_victim(&self, entries: &HashMap<String, LocalEntry>) -> Option<String> {
        let victim = match self.policy {
            EvictionPolicy::Lru => entries.iter().min_by_key(|(_, e)| e.last_access),
            EvictionPolicy::Lfu => entries.iter().min_by_key(|(_, e)| (e.hits, e.last_access)),
        };
        victim.map(|(key, _)| key.clone())
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    /// Drops every key matching the glob `pattern`; returns how many were removed
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !glob_match(pattern, key));
        before - state.entries.len()
    }

    /// Drops every entry carrying `tag`
    pub fn remove_tagged(&self, tag: &str) -> usize {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.tags.iter().any(|t| t == tag));
        before - state.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .map_or(false, |entry| entry.is_live(now))
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    pub fn evictions(&self) -> u64 {
        self.lock().evictions
    }

    /// Fraction of capacity in use
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }
}
