// src/orchestrator.rs
//! Composes cache, timeout, retry and circuit breaker into one execution path.
//!
//! Layering, outermost first: cache lookup, circuit breaker, retry loop,
//! per-attempt timeout, operation. A cache hit skips every other layer.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::cache::{CacheMetricsSnapshot, DistributedCache};
use crate::config::{CachePolicy, OperationType, OrchestratorConfig};
use crate::error::Result;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitBreakerRegistry, CircuitState, RetryContext,
    RetryMetrics, RetryPolicy, TimeoutManager, TimeoutMetrics,
};
use crate::resilience_event;

/// Below this contextual retry success rate the orchestrator is unhealthy
const MIN_RETRY_SUCCESS_RATE: f64 = 0.8;

/// Below this overall success rate the orchestrator is unhealthy
const MIN_SUCCESS_RATE: f64 = 0.95;

/// Slack on top of the retry budget for timer and scheduling lag
const BREAKER_DEADLINE_GRACE: Duration = Duration::from_secs(1);

/// Per-operation-name counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub average_latency_ms: f64,
    #[serde(skip)]
    total_latency: Duration,
}

impl OperationStats {
    fn record(&mut self, success: bool, cache_hit: bool, latency: Duration) {
        self.executions += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if cache_hit {
            self.cache_hits += 1;
        }
        self.total_latency += latency;
        self.average_latency_ms =
            self.total_latency.as_secs_f64() * 1000.0 / self.executions as f64;
    }

    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            1.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }
}

#[derive(Debug, Default)]
struct ExecutionStats {
    overall: OperationStats,
    by_operation: HashMap<String, OperationStats>,
}

/// Aggregated view over every layer of one orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceMetricsSnapshot {
    pub service_name: String,
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cache_hits: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub operations: HashMap<String, OperationStats>,
    pub circuit_breaker: CircuitBreakerMetrics,
    pub retry: RetryMetrics,
    pub timeouts: TimeoutMetrics,
    pub cache: Option<CacheMetricsSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub service_name: String,
    pub healthy: bool,
    pub circuit_state: CircuitState,
    pub success_rate: f64,
    pub issues: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Resilient executor for one service
#[derive(Debug)]
pub struct ResilienceOrchestrator {
    service_name: String,
    config: OrchestratorConfig,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    timeouts: TimeoutManager,
    cache: Option<Arc<DistributedCache>>,
    stats: Mutex<ExecutionStats>,
}

impl ResilienceOrchestrator {
    /// Builds an orchestrator whose breaker is shared through `breakers` under
    /// the service name.
    pub fn new(
        service_name: impl Into<String>,
        config: OrchestratorConfig,
        breakers: &CircuitBreakerRegistry,
        cache: Option<Arc<DistributedCache>>,
    ) -> Self {
        let service_name = service_name.into();
        let breaker = breakers.get_or_create(&service_name, Some(config.circuit_breaker.clone()));
        let retry = RetryPolicy::new(config.retry.clone());
        let timeouts = TimeoutManager::new(config.timeouts.clone());

        info!(
            service = %service_name,
            caching = config.enable_caching && cache.is_some(),
            "Resilience orchestrator created"
        );

        Self {
            service_name,
            config,
            breaker,
            retry,
            timeouts,
            cache,
            stats: Mutex::new(ExecutionStats::default()),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn timeout_manager(&self) -> &TimeoutManager {
        &self.timeouts
    }

    pub fn cache(&self) -> Option<&Arc<DistributedCache>> {
        self.cache.as_ref()
    }

    fn cache_policy(&self, operation_name: &str) -> CachePolicy {
        self.config
            .cache_strategies
            .get(operation_name)
            .copied()
            .unwrap_or(self.config.default_cache_policy)
    }

    fn active_cache<'a>(&'a self, cache_key: Option<&'a str>) -> Option<(&'a DistributedCache, &'a str)> {
        if !self.config.enable_caching {
            return None;
        }
        match (self.cache.as_deref(), cache_key) {
            (Some(cache), Some(key)) => Some((cache, key)),
            _ => None,
        }
    }

    /// Per-attempt deadline for an operation type, scaled like any configured timeout
    fn attempt_timeout(&self, op_type: OperationType, multiplier: f64) -> Option<Duration> {
        self.config
            .operation_timeouts
            .get(&op_type)
            .map(|timeout| timeout.mul_f64(multiplier))
    }

    /// The breaker's deadline never cuts the retry loop short, so the caller
    /// always sees the last attempt's own error.
    fn breaker_deadline(&self, op_type: OperationType, multiplier: f64) -> Duration {
        let budget = self.config.retry_budget(op_type, multiplier);
        self.config
            .circuit_breaker
            .timeout
            .max(budget.saturating_add(BREAKER_DEADLINE_GRACE))
    }

    /// Runs `operation` through the full pipeline.
    ///
    /// The operation may be invoked several times by the retry layer, or not
    /// at all on a cache hit or while the circuit is open. Errors are
    /// propagated unchanged.
    pub async fn execute<F, Fut, T>(
        &self,
        operation: F,
        operation_name: &str,
        op_type: OperationType,
        cache_key: Option<&str>,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Serialize + DeserializeOwned,
    {
        let started = Instant::now();
        let policy = self.cache_policy(operation_name);

        if let Some((cache, key)) = self.active_cache(cache_key) {
            if let Some(value) = cache.get_with_policy::<T>(key, &policy).await {
                debug!(service = %self.service_name, operation = operation_name, key, "Served from cache");
                self.record(operation_name, op_type, true, true, started.elapsed());
                return Ok(value);
            }
        }

        let multiplier = self.timeouts.adaptive_multiplier();
        let attempt_timeout = self.attempt_timeout(op_type, multiplier);
        let deadline = self.breaker_deadline(op_type, multiplier);
        let context = RetryContext::new(operation_name);
        let result = self
            .breaker
            .execute_with_deadline(
                || {
                    self.retry.execute_with_context(
                        || {
                            self.timeouts.execute_with_timeout(
                                operation(),
                                Some(operation_name),
                                attempt_timeout,
                            )
                        },
                        op_type,
                        Some(context),
                    )
                },
                deadline,
            )
            .await;

        match result {
            Ok(value) => {
                if let Some((cache, key)) = self.active_cache(cache_key) {
                    let is_null = serde_json::to_value(&value)
                        .map(|json| json.is_null())
                        .unwrap_or(true);
                    if !is_null {
                        cache.set_with_policy(key, &value, &policy).await;
                    }
                }
                self.record(operation_name, op_type, true, false, started.elapsed());
                Ok(value)
            }
            Err(err) => {
                debug!(
                    service = %self.service_name,
                    operation = operation_name,
                    error = %err,
                    "Resilient execution failed"
                );
                self.record(operation_name, op_type, false, false, started.elapsed());
                Err(err)
            }
        }
    }

    fn lock_stats(&self) -> MutexGuard<'_, ExecutionStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(
        &self,
        operation_name: &str,
        op_type: OperationType,
        success: bool,
        cache_hit: bool,
        latency: Duration,
    ) {
        {
            let mut stats = self.lock_stats();
            stats.overall.record(success, cache_hit, latency);
            stats
                .by_operation
                .entry(operation_name.to_string())
                .or_default()
                .record(success, cache_hit, latency);
        }
        resilience_event!(
            self.service_name.as_str(),
            operation_name,
            op_type,
            success,
            latency.as_millis() as u64
        );
    }

    /// Overall success rate; 1.0 before anything has run
    pub fn success_rate(&self) -> f64 {
        self.lock_stats().overall.success_rate()
    }

    pub async fn metrics(&self) -> ResilienceMetricsSnapshot {
        let circuit_breaker = self.breaker.metrics().await;
        let stats = self.lock_stats();

        ResilienceMetricsSnapshot {
            service_name: self.service_name.clone(),
            total_executions: stats.overall.executions,
            successful_executions: stats.overall.successes,
            failed_executions: stats.overall.failures,
            cache_hits: stats.overall.cache_hits,
            success_rate: stats.overall.success_rate(),
            average_latency_ms: stats.overall.average_latency_ms,
            operations: stats.by_operation.clone(),
            circuit_breaker,
            retry: self.retry.metrics(),
            timeouts: self.timeouts.metrics(),
            cache: self.cache.as_ref().map(|cache| cache.metrics()),
        }
    }

    /// Rolls the health of every layer into one verdict
    pub async fn health_status(&self) -> HealthStatus {
        let circuit_state = self.breaker.state().await;
        let (executions, success_rate) = {
            let stats = self.lock_stats();
            (stats.overall.executions, stats.overall.success_rate())
        };

        let mut issues = Vec::new();
        if circuit_state == CircuitState::Open {
            issues.push("Circuit breaker is open".to_string());
        }
        let retry_rate = self.retry.success_rate();
        if retry_rate < MIN_RETRY_SUCCESS_RATE {
            issues.push(format!("Retry success rate {:.2} is below {:.2}", retry_rate, MIN_RETRY_SUCCESS_RATE));
        }
        if !self.timeouts.is_healthy() {
            issues.push(format!(
                "Timeout rate {:.2} is too high",
                self.timeouts.timeout_rate()
            ));
        }
        if executions > 0 && success_rate < MIN_SUCCESS_RATE {
            issues.push(format!(
                "Success rate {:.2} is below {:.2}",
                success_rate, MIN_SUCCESS_RATE
            ));
        }

        HealthStatus {
            service_name: self.service_name.clone(),
            healthy: issues.is_empty(),
            circuit_state,
            success_rate,
            issues,
            checked_at: Utc::now(),
        }
    }

    /// Clears execution, retry and timeout counters. Breaker state and the
    /// cache, which may be shared, are left alone.
    pub fn reset_metrics(&self) {
        *self.lock_stats() = ExecutionStats::default();
        self.retry.reset_metrics();
        self.timeouts.reset_metrics();
        info!(service = %self.service_name, "Orchestrator metrics reset");
    }
}
