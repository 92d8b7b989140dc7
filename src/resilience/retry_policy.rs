use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{OperationType, RetryConfig, RetryPolicyConfig};
use crate::error::{ResilienceError, Result};

/// Weight given to the newest outcome in the contextual success rate
const SUCCESS_RATE_ALPHA: f64 = 0.1;

/// Fraction of the delay used as the jitter band on either side
const JITTER_RATIO: f64 = 0.15;

/// Identifies one logical call across its attempts
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub operation_name: String,
    pub request_id: Uuid,
}

impl RetryContext {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            request_id: Uuid::new_v4(),
        }
    }
}

/// Snapshot of retry counters
#[derive(Debug, Clone, Serialize)]
pub struct RetryMetrics {
    pub total_attempts: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub total_delay_ms: u64,
    pub attempts_by_type: HashMap<OperationType, u64>,
    /// Moving average of retry outcomes, 1.0 when nothing has been retried
    pub contextual_success_rate: f64,
}

#[derive(Debug)]
struct ContextualStats {
    attempts_by_type: HashMap<OperationType, u64>,
    success_rate: f64,
}

impl Default for ContextualStats {
    fn default() -> Self {
        Self {
            attempts_by_type: HashMap::new(),
            success_rate: 1.0,
        }
    }
}

/// Bounded re-execution with exponential backoff, aware of the operation type
#[derive(Debug)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
    total_attempts: AtomicU64,
    successful_retries: AtomicU64,
    failed_retries: AtomicU64,
    total_delay_ms: AtomicU64,
    stats: Mutex<ContextualStats>,
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self {
            config,
            total_attempts: AtomicU64::new(0),
            successful_retries: AtomicU64::new(0),
            failed_retries: AtomicU64::new(0),
            total_delay_ms: AtomicU64::new(0),
            stats: Mutex::new(ContextualStats::default()),
        }
    }

    pub fn config(&self) -> &RetryPolicyConfig {
        &self.config
    }

    /// Base config with the override for `op_type` applied
    pub fn resolve(&self, op_type: OperationType) -> RetryConfig {
        self.config.resolve(op_type)
    }

    /// Decides whether a failure on `attempt` (1-based) earns another attempt
    pub fn should_retry(
        &self,
        error: &ResilienceError,
        attempt: u32,
        config: &RetryConfig,
        op_type: OperationType,
    ) -> bool {
        if attempt >= config.max_attempts || error.is_circuit_open() {
            return false;
        }

        if self.config.contextual {
            if op_type == OperationType::Write && error.is_validation() {
                return false;
            }
            if op_type == OperationType::External && error.is_network() {
                return true;
            }
        }

        let message = error.to_string().to_lowercase();
        let matched = config
            .retryable_errors
            .iter()
            .any(|matcher| message.contains(&matcher.to_lowercase()));

        matched || error.is_network()
    }

    pub async fn execute<F, Fut, T>(&self, operation: F, op_type: OperationType) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_context(operation, op_type, None).await
    }

    /// Runs `operation` until it succeeds, fails for good, or attempts run out.
    ///
    /// The last error is returned unchanged.
    pub async fn execute_with_context<F, Fut, T>(
        &self,
        mut operation: F,
        op_type: OperationType,
        context: Option<RetryContext>,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let config = self.resolve(op_type);
        let context = context.unwrap_or_else(|| RetryContext::new("anonymous"));
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.record_attempt(op_type);

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        self.successful_retries.fetch_add(1, Ordering::Relaxed);
                        self.update_success_rate(true);
                        info!(
                            operation = %context.operation_name,
                            request_id = %context.request_id,
                            attempt,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !self.should_retry(&err, attempt, &config, op_type) {
                        self.failed_retries.fetch_add(1, Ordering::Relaxed);
                        self.update_success_rate(false);
                        warn!(
                            operation = %context.operation_name,
                            request_id = %context.request_id,
                            operation_type = %op_type,
                            attempt,
                            error = %err,
                            "Giving up on operation"
                        );
                        return Err(err);
                    }

                    let delay = compute_delay(&config, attempt, op_type);
                    self.total_delay_ms
                        .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
                    debug!(
                        operation = %context.operation_name,
                        request_id = %context.request_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying operation"
                    );
                    time::sleep(delay).await;
                }
            }
        }
    }

    fn record_attempt(&self, op_type: OperationType) {
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
        let mut stats = self.lock_stats();
        *stats.attempts_by_type.entry(op_type).or_insert(0) += 1;
    }

    fn update_success_rate(&self, success: bool) {
        let outcome = if success { 1.0 } else { 0.0 };
        let mut stats = self.lock_stats();
        stats.success_rate =
            SUCCESS_RATE_ALPHA * outcome + (1.0 - SUCCESS_RATE_ALPHA) * stats.success_rate;
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, ContextualStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn success_rate(&self) -> f64 {
        self.lock_stats().success_rate
    }

    pub fn metrics(&self) -> RetryMetrics {
        let stats = self.lock_stats();
        RetryMetrics {
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            successful_retries: self.successful_retries.load(Ordering::Relaxed),
            failed_retries: self.failed_retries.load(Ordering::Relaxed),
            total_delay_ms: self.total_delay_ms.load(Ordering::Relaxed),
            attempts_by_type: stats.attempts_by_type.clone(),
            contextual_success_rate: stats.success_rate,
        }
    }

    pub fn reset_metrics(&self) {
        self.total_attempts.store(0, Ordering::Relaxed);
        self.successful_retries.store(0, Ordering::Relaxed);
        self.failed_retries.store(0, Ordering::Relaxed);
        self.total_delay_ms.store(0, Ordering::Relaxed);
        *self.lock_stats() = ContextualStats::default();
    }
}

/// Delay before the retry that follows `attempt`, before jitter:
/// `base * multiplier^(attempt-1)` capped at `max_delay`, then scaled by type.
pub fn backoff_delay(config: &RetryConfig, attempt: u32, op_type: OperationType) -> Duration {
    let exp = attempt.saturating_sub(1) as i32;
    let base_ms = config.base_delay.as_millis() as f64;
    let max_ms = config.max_delay.as_millis() as f64;
    let capped_ms = (base_ms * config.backoff_multiplier.powi(exp)).min(max_ms);

    let adjusted_ms = match op_type {
        OperationType::External => capped_ms * 1.5,
        OperationType::Critical => capped_ms * 0.8,
        OperationType::Read | OperationType::Write => capped_ms,
    };

    Duration::from_millis(adjusted_ms as u64)
}

/// Largest delay `compute_delay` can return for `attempt`
pub fn delay_ceiling(config: &RetryConfig, attempt: u32, op_type: OperationType) -> Duration {
    let delay = backoff_delay(config, attempt, op_type);
    let ceiling = if config.jitter_enabled {
        delay.mul_f64(1.0 + JITTER_RATIO)
    } else {
        delay
    };
    ceiling.max(config.min_delay)
}

/// Backoff delay with uniform jitter in ±15%, never below `min_delay`
pub fn compute_delay(config: &RetryConfig, attempt: u32, op_type: OperationType) -> Duration {
    let delay_ms = backoff_delay(config, attempt, op_type).as_millis() as f64;

    let jittered_ms = if config.jitter_enabled {
        let factor = 1.0 - JITTER_RATIO + rand::random::<f64>() * 2.0 * JITTER_RATIO;
        delay_ms * factor
    } else {
        delay_ms
    };

    Duration::from_millis(jittered_ms as u64).max(config.min_delay)
}
