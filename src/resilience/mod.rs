// src/resilience/mod.rs
//! Resilience primitives composed by the orchestrator.
//!
//! 1. **Circuit Breaking** - fail fast while a resource keeps failing
//! 2. **Retry with Exponential Backoff** - operation-type-aware retries for transient failures
//! 3. **Timeouts** - per-operation deadlines with an early warning signal

mod circuit_breaker;
mod retry_policy;
mod timeout_manager;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitBreakerRegistry, CircuitState,
};
pub use retry_policy::{
    backoff_delay, compute_delay, delay_ceiling, RetryContext, RetryMetrics, RetryPolicy,
};
pub use timeout_manager::{TimeoutEvent, TimeoutManager, TimeoutMetrics};
