// src/storage/mod.rs
//! Shared-tier backends for the two-tier cache.
//!
//! The cache needs only a minimal capability set from the shared store:
//! get, set with TTL, delete, exists and key listing by glob pattern.

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::{glob_match, MemoryStorage};
pub use redis::RedisStorage;

use super::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// Core trait that all shared-tier backends must implement
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    // Retrieves a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // Stores a value with a key; the backend expires it after `ttl`
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    // Deletes a key
    async fn delete(&self, key: &str) -> Result<bool>;

    // Checks if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    // Lists keys matching a Redis-style glob pattern
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    // Round-trip used by health checks
    async fn ping(&self) -> Result<()>;
}
