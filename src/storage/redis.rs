// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::{ResilienceError, Result, StorageError};
use crate::storage::StorageBackend;

/// Longest expiry passed to PSETEX, about a hundred years
const MAX_EXPIRY_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

#[derive(Clone)]
pub struct RedisStorage {
    connection: Arc<tokio::sync::Mutex<ConnectionManager>>,
    config: RedisConfig,
}

// Manually implement Debug
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("connection_timeout", &self.config.connection_timeout)
            .finish()
    }
}

fn command_error(e: redis::RedisError) -> ResilienceError {
    ResilienceError::from(e)
}

impl RedisStorage {
    /// Creates a new Redis storage with the given configuration
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| ResilienceError::Storage(StorageError::RedisConnection(e.to_string())))?;

        let connection_future = ConnectionManager::new(client);

        // Apply the connection timeout using tokio::time::timeout
        let connection_manager =
            match tokio::time::timeout(config.connection_timeout, connection_future).await {
                Ok(result) => result.map_err(|e| {
                    ResilienceError::Storage(StorageError::RedisConnection(e.to_string()))
                })?,
                Err(_) => {
                    return Err(ResilienceError::Storage(StorageError::RedisConnection(
                        format!(
                            "Connection to Redis at {} timed out after {:?}",
                            config.url, config.connection_timeout
                        ),
                    )));
                }
            };

        Ok(Self {
            connection: Arc::new(tokio::sync::Mutex::new(connection_manager)),
            config,
        })
    }

    /// Bounds a command by the connection timeout
    async fn with_deadline<T, F>(&self, operation: &str, command: F) -> Result<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.connection_timeout, command).await {
            Ok(result) => result.map_err(command_error),
            Err(_) => Err(ResilienceError::Storage(StorageError::RedisConnection(
                format!(
                    "Redis {} timed out after {:?}",
                    operation, self.config.connection_timeout
                ),
            ))),
        }
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.lock().await;
        self.with_deadline("GET", conn.get(key)).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.connection.lock().await;

        match ttl {
            // PSETEX rejects a zero expiry
            Some(ttl) if ttl.as_millis() <= MAX_EXPIRY_MS as u128 => {
                let millis = (ttl.as_millis() as u64).max(1);
                self.with_deadline("PSETEX", conn.pset_ex(key, value, millis))
                    .await
            }
            // Expiries Redis would reject as out of range are stored without one
            _ => {
                self.with_deadline("SET", conn.set(key, value)).await
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let removed: i64 = self.with_deadline("DEL", conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        self.with_deadline("EXISTS", conn.exists(key)).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.lock().await;
        self.with_deadline("KEYS", conn.keys(pattern)).await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.lock().await;
        let reply: String = self
            .with_deadline("PING", redis::cmd("PING").query_async(&mut *conn))
            .await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(ResilienceError::Storage(StorageError::RedisCommand(
                format!("Unexpected response from Redis PING: {}", reply),
            )))
        }
    }
}
