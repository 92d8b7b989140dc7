// src/storage/memory.rs

// In-process shared tier (for single-node deployments and tests)
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task;
use tokio::time;
use tracing::debug;

use crate::config::InMemoryConfig;
use crate::error::{ResilienceError, Result, StorageError};
use crate::storage::StorageBackend;

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    expiry: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expiry.map_or(true, |expiry| expiry > now)
    }
}

type EntryMap = HashMap<String, MemoryEntry>;

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Arc<RwLock<EntryMap>>,
    config: InMemoryConfig,
    cleanup_task: Option<Arc<task::JoinHandle<()>>>,
}

impl MemoryStorage {
    /// Creates a new in-memory storage with the given configuration.
    ///
    /// The background sweep needs a running tokio runtime; without one the
    /// storage still works and expired entries are dropped lazily on access.
    pub fn new(config: InMemoryConfig) -> Self {
        let data = Arc::new(RwLock::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        let cleanup_task = if config.use_background_task {
            tokio::runtime::Handle::try_current().ok().map(|handle| {
                let weak = Arc::downgrade(&data);
                let period = config.cleanup_interval;

                // Stops once every storage handle has been dropped
                Arc::new(handle.spawn(async move {
                    let mut interval = time::interval(period);
                    loop {
                        interval.tick().await;
                        match weak.upgrade() {
                            Some(data) => Self::cleanup_expired_entries(&data),
                            None => break,
                        }
                    }
                    debug!("Memory storage cleanup task stopped");
                }))
            })
        } else {
            None
        };

        Self {
            data,
            config,
            cleanup_task,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryMap> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryMap> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clean up expired entries
    fn cleanup_expired_entries(data: &RwLock<EntryMap>) {
        let now = Instant::now();
        let mut data = data.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        data.retain(|_, entry| entry.is_live(now));
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.read().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_cleanup_task(&self) -> bool {
        self.cleanup_task.is_some()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let data = self.read();
            match data.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Key is expired, remove it
        self.write().remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut data = self.write();

        if data.len() >= self.config.max_entries && !data.contains_key(key) {
            let now = Instant::now();
            data.retain(|_, entry| entry.is_live(now));
            if data.len() >= self.config.max_entries {
                return Err(ResilienceError::Storage(StorageError::Unavailable(
                    "Maximum entries limit exceeded".to_string(),
                )));
            }
        }

        // A TTL too large for `Instant` never expires
        let expiry = ttl.and_then(|duration| Instant::now().checked_add(duration));
        data.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expiry,
            },
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .write()
            .remove(key)
            .map_or(false, |entry| entry.is_live(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self.read().get(key).map_or(false, |e| e.is_live(now)))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .read()
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Redis-style glob matching: `*` any run, `?` one char, `[abc]` a set,
/// `\x` a literal.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    match_from(&pattern, &text)
}

fn match_from(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Position to resume from after the most recent `*`
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(&pattern[p..], text[t]) {
                        if matched {
                            p += next;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == '[' {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star_p, star_t)) => {
                backtrack = Some((star_p, star_t + 1));
                p = star_p + 1;
                t = star_t + 1;
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

// Returns (matched, pattern length consumed), or None for an unterminated class
fn match_class(pattern: &[char], c: char) -> Option<(bool, usize)> {
    let end = pattern.iter().skip(1).position(|&ch| ch == ']')? + 1;
    let class = &pattern[1..end];
    let (negate, class) = match class.first() {
        Some('^') => (true, &class[1..]),
        _ => (false, class),
    };

    let mut found = false;
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == '-' {
            if class[i] <= c && c <= class[i + 2] {
                found = true;
            }
            i += 3;
        } else {
            if class[i] == c {
                found = true;
            }
            i += 1;
        }
    }

    Some((found != negate, end + 1))
}
