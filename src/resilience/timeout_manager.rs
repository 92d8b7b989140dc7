use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::{self, Future};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, warn};

use crate::config::TimeoutConfig;
use crate::error::{ResilienceError, Result};

/// Number of execution-time samples kept for the rolling average
const SAMPLE_WINDOW: usize = 1000;

/// Timeout rate above which the manager reports itself unhealthy
const UNHEALTHY_TIMEOUT_RATE: f64 = 0.10;

/// Share of the deadline after which the graceful warning fires at the latest
const GRACEFUL_FRACTION: f64 = 0.8;

const EVENT_CAPACITY: usize = 64;

/// Broadcast to subscribers as deadlines approach or pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeoutEvent {
    /// The operation is still running close to its deadline
    GracefulWarning {
        operation: String,
        elapsed_ms: u64,
        timeout_ms: u64,
    },
    TimedOut {
        operation: String,
        timeout_ms: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeoutMetrics {
    pub total_operations: u64,
    pub timeout_operations: u64,
    pub timeout_rate: f64,
    /// Rolling average over the most recent samples
    pub average_execution_ms: f64,
    pub sample_count: usize,
    pub timeouts_by_operation: HashMap<String, u64>,
    pub adaptive_multiplier: f64,
}

#[derive(Debug, Default)]
struct ExecutionSamples {
    window: VecDeque<Duration>,
    sum: Duration,
}

impl ExecutionSamples {
    fn push(&mut self, sample: Duration) {
        if self.window.len() == SAMPLE_WINDOW {
            if let Some(oldest) = self.window.pop_front() {
                self.sum = self.sum.saturating_sub(oldest);
            }
        }
        self.window.push_back(sample);
        self.sum += sample;
    }

    fn average_ms(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.sum.as_secs_f64() * 1000.0 / self.window.len() as f64
        }
    }
}

/// Enforces per-operation deadlines and keeps execution-time statistics
#[derive(Debug)]
pub struct TimeoutManager {
    config: TimeoutConfig,
    adaptive_multiplier: RwLock<f64>,
    total_operations: AtomicU64,
    timeout_operations: AtomicU64,
    samples: Mutex<ExecutionSamples>,
    timeouts_by_operation: Mutex<HashMap<String, u64>>,
    events: broadcast::Sender<TimeoutEvent>,
}

impl TimeoutManager {
    pub fn new(config: TimeoutConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            adaptive_multiplier: RwLock::new(config.adaptive_multiplier),
            config,
            total_operations: AtomicU64::new(0),
            timeout_operations: AtomicU64::new(0),
            samples: Mutex::new(ExecutionSamples::default()),
            timeouts_by_operation: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimeoutEvent> {
        self.events.subscribe()
    }

    pub fn adaptive_multiplier(&self) -> f64 {
        *self
            .adaptive_multiplier
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Scales configured timeouts; custom per-call timeouts are never scaled
    pub fn set_adaptive_multiplier(&self, multiplier: f64) {
        let multiplier = if multiplier.is_finite() && multiplier > 0.0 {
            multiplier
        } else {
            1.0
        };
        *self
            .adaptive_multiplier
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = multiplier;
        debug!(multiplier, "Adaptive timeout multiplier updated");
    }

    /// Custom timeout, else the per-name timeout, else the default
    pub fn resolve_timeout(&self, name: Option<&str>, custom: Option<Duration>) -> Duration {
        if let Some(custom) = custom {
            return custom;
        }
        let configured = name
            .and_then(|name| self.config.operation_timeouts.get(name).copied())
            .unwrap_or(self.config.default_timeout);
        configured.mul_f64(self.adaptive_multiplier())
    }

    /// Races `operation` against its deadline.
    ///
    /// When the deadline wins the operation future is dropped and
    /// `ResilienceError::Timeout` is returned.
    pub async fn execute_with_timeout<F, T>(
        &self,
        operation: F,
        name: Option<&str>,
        custom_timeout: Option<Duration>,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.resolve_timeout(name, custom_timeout);
        let name = name.unwrap_or("anonymous");
        self.total_operations.fetch_add(1, Ordering::Relaxed);

        let graceful_at = self
            .config
            .graceful_timeout
            .map(|graceful| graceful.min(timeout.mul_f64(GRACEFUL_FRACTION)));

        let start = Instant::now();
        let deadline = time::sleep(timeout);
        let warning = async move {
            match graceful_at {
                Some(at) => time::sleep(at).await,
                None => future::pending::<()>().await,
            }
        };
        tokio::pin!(operation);
        tokio::pin!(deadline);
        tokio::pin!(warning);

        let mut warned = false;
        let outcome = loop {
            tokio::select! {
                biased;
                result = &mut operation => break Some(result),
                _ = &mut deadline => break None,
                _ = &mut warning, if !warned => {
                    warned = true;
                    let elapsed = start.elapsed();
                    warn!(
                        operation = name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        timeout_ms = timeout.as_millis() as u64,
                        "Operation approaching timeout"
                    );
                    let _ = self.events.send(TimeoutEvent::GracefulWarning {
                        operation: name.to_string(),
                        elapsed_ms: elapsed.as_millis() as u64,
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
            }
        };

        self.lock_samples().push(start.elapsed());

        match outcome {
            Some(result) => result,
            None => {
                self.timeout_operations.fetch_add(1, Ordering::Relaxed);
                *self
                    .lock_timeouts()
                    .entry(name.to_string())
                    .or_insert(0) += 1;
                warn!(operation = name, timeout_ms = timeout.as_millis() as u64, "Operation timed out");
                let _ = self.events.send(TimeoutEvent::TimedOut {
                    operation: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
                Err(ResilienceError::Timeout {
                    operation: name.to_string(),
                    timeout,
                })
            }
        }
    }

    fn lock_samples(&self) -> MutexGuard<'_, ExecutionSamples> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_timeouts(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.timeouts_by_operation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn timeout_rate(&self) -> f64 {
        let total = self.total_operations.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.timeout_operations.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn is_healthy(&self) -> bool {
        self.timeout_rate() <= UNHEALTHY_TIMEOUT_RATE
    }

    pub fn metrics(&self) -> TimeoutMetrics {
        let samples = self.lock_samples();
        TimeoutMetrics {
            total_operations: self.total_operations.load(Ordering::Relaxed),
            timeout_operations: self.timeout_operations.load(Ordering::Relaxed),
            timeout_rate: self.timeout_rate(),
            average_execution_ms: samples.average_ms(),
            sample_count: samples.window.len(),
            timeouts_by_operation: self.lock_timeouts().clone(),
            adaptive_multiplier: self.adaptive_multiplier(),
        }
    }

    pub fn reset_metrics(&self) {
        self.total_operations.store(0, Ordering::Relaxed);
        self.timeout_operations.store(0, Ordering::Relaxed);
        *self.lock_samples() = ExecutionSamples::default();
        self.lock_timeouts().clear();
    }
}
