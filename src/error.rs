// for error definitions
use redis;
use std::time::Duration;
use thiserror::Error;

/// Message fragments that mark an error as network-related.
const NETWORK_MARKERS: &[&str] = &[
    "econnreset",
    "enotfound",
    "econnrefused",
    "etimedout",
    "connection reset",
    "connection refused",
    "not found",
    "timed out",
    "socket",
    "broken pipe",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResilienceError {
    /// Transient infrastructure failure (connection reset, refused, DNS, ...)
    #[error("Network error: {0}")]
    Network(String),

    /// An operation did not complete before its deadline
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    /// Caller-input error; never retried for write operations
    #[error("Validation error: {0}")]
    Validation(String),

    /// The circuit breaker rejected the call without attempting it
    #[error("Circuit breaker '{resource}' is open")]
    CircuitOpen { resource: String },

    /// Any other failure reported by a wrapped operation
    #[error("Operation failed: {0}")]
    Operation(String),

    /// Errors related to the shared cache backend
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResilienceError {
    /// True for transient infrastructure failures that are worth retrying.
    pub fn is_network(&self) -> bool {
        match self {
            ResilienceError::Network(_) | ResilienceError::Timeout { .. } => true,
            ResilienceError::Storage(StorageError::RedisConnection(_)) => true,
            ResilienceError::CircuitOpen { .. } | ResilienceError::Validation(_) => false,
            other => {
                let message = other.to_string().to_lowercase();
                NETWORK_MARKERS.iter().any(|marker| message.contains(marker))
            }
        }
    }

    /// True when the caller supplied invalid input.
    pub fn is_validation(&self) -> bool {
        match self {
            ResilienceError::Validation(_) => true,
            ResilienceError::Operation(message) => {
                message.to_lowercase().contains("validation")
            }
            _ => false,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ResilienceError::Timeout { .. })
    }
}

/// Storage-specific errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Redis connection errors
    #[error("Redis connection error: {0}")]
    RedisConnection(String),

    // Redis authentication errors
    #[error("Redis authentication error: {0}")]
    RedisAuth(String),

    /// Redis command errors
    #[error("Redis command error: {0}")]
    RedisCommand(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// Injected or backend-specific unavailability
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for ResilienceError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                // authentication errors
                ResilienceError::Storage(StorageError::RedisAuth(err.to_string()))
            }
            redis::ErrorKind::IoError | redis::ErrorKind::ClientError => {
                // Connection-related errors
                ResilienceError::Storage(StorageError::RedisConnection(err.to_string()))
            }
            _ => {
                // Command/operation related errors
                ResilienceError::Storage(StorageError::RedisCommand(err.to_string()))
            }
        }
    }
}

// implement conversions from serde_json::Error to ResilienceError
impl From<serde_json::Error> for ResilienceError {
    fn from(err: serde_json::Error) -> Self {
        ResilienceError::Storage(StorageError::Serialization(err.to_string()))
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, ResilienceError>;
