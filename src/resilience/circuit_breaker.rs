use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::{ResilienceError, Result};

/// Stand-in reopen time when `reset_timeout` overflows `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected without being attempted
    Open,
    /// Reset timeout elapsed; the next call probes the resource
    HalfOpen,
}

/// Point-in-time copy of a breaker's counters
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub rejected_count: u64,
    /// Executed calls (success + failure); rejections are not included
    pub total_requests: u64,
    pub failure_rate: f64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    success_count: u64,
    failure_count: u64,
    timeout_count: u64,
    rejected_count: u64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            success_count: 0,
            failure_count: 0,
            timeout_count: 0,
            rejected_count: 0,
            last_success_at: None,
            last_failure_at: None,
            next_attempt_at: None,
        }
    }

    fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    fn failure_rate(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.failure_count as f64 / total as f64,
        }
    }
}

/// Failure-rate circuit breaker guarding one named resource.
///
/// Transitions and counters are serialised by a single async mutex which is
/// released before the wrapped operation runs.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Runs `operation` if the circuit admits it, enforcing the breaker's own timeout.
    ///
    /// Errors from the operation are recorded as failures and returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_deadline(operation, self.config.timeout).await
    }

    /// Like `execute`, with `deadline` in place of the configured timeout
    pub async fn execute_with_deadline<F, Fut, T>(&self, operation: F, deadline: Duration) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.admit().await?;

        match time::timeout(deadline, operation()).await {
            Ok(Ok(value)) => {
                self.on_success().await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_failure(false).await;
                Err(err)
            }
            Err(_) => {
                self.on_failure(true).await;
                Err(ResilienceError::Timeout {
                    operation: self.name.clone(),
                    timeout: deadline,
                })
            }
        }
    }

    async fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let ready = inner
            .next_attempt_at
            .map_or(true, |at| Instant::now() >= at);
        if ready {
            inner.state = CircuitState::HalfOpen;
            info!(breaker = %self.name, "Circuit breaker half-open, probing resource");
            return Ok(());
        }

        inner.rejected_count += 1;
        debug!(breaker = %self.name, rejected = inner.rejected_count, "Call rejected by open circuit");
        Err(ResilienceError::CircuitOpen {
            resource: self.name.clone(),
        })
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.success_count += 1;
        inner.last_success_at = Some(Utc::now());

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.success_count = 0;
            inner.failure_count = 0;
            inner.timeout_count = 0;
            inner.next_attempt_at = None;
            info!(breaker = %self.name, "Circuit breaker closed after successful probe");
        }
    }

    async fn on_failure(&self, timed_out: bool) {
        let mut inner = self.inner.lock().await;
        inner.failure_count += 1;
        if timed_out {
            inner.timeout_count += 1;
        }
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.total() >= self.config.minimum_requests
                    && inner.failure_rate() >= self.config.failure_threshold
                {
                    self.trip(&mut inner);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        total = inner.total(),
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.trip(&mut inner);
                warn!(breaker = %self.name, "Circuit breaker re-opened after failed probe");
            }
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        let now = Instant::now();
        inner.next_attempt_at = Some(
            now.checked_add(self.config.reset_timeout)
                .unwrap_or_else(|| now + FAR_FUTURE),
        );
    }

    /// Opens the circuit immediately for a full reset timeout
    pub async fn force_open(&self) {
        let mut inner = self.inner.lock().await;
        self.trip(&mut inner);
        warn!(breaker = %self.name, "Circuit breaker forced open");
    }

    /// Closes the circuit and clears every counter
    pub async fn reset(&self) {
        *self.inner.lock().await = BreakerState::new();
        info!(breaker = %self.name, "Circuit breaker reset");
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock().await;
        let next_attempt_at = inner.next_attempt_at.map(|at| {
            let remaining = at.saturating_duration_since(Instant::now());
            Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero())
        });

        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: inner.state,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            timeout_count: inner.timeout_count,
            rejected_count: inner.rejected_count,
            total_requests: inner.total(),
            failure_rate: inner.failure_rate(),
            last_success_at: inner.last_success_at,
            last_failure_at: inner.last_failure_at,
            next_attempt_at,
        }
    }
}

/// Lazily creates and shares one breaker per resource name
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config,
        }
    }

    /// Returns the breaker for `name`, creating it with `config` (or the
    /// registry default) on first use. Later configs for the same name are ignored.
    pub fn get_or_create(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut breakers = self
            .breakers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(
                    name,
                    config.unwrap_or_else(|| self.default_config.clone()),
                ))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub async fn all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let mut metrics = Vec::new();
        for breaker in self.snapshot() {
            metrics.push(breaker.metrics().await);
        }
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// Resets the named breaker; returns false when it does not exist
    pub async fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset().await;
                true
            }
            None => false,
        }
    }
}
