// src/monitoring.rs
//! Periodic, read-only inspection of registered orchestrators and caches.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task;
use tokio::time;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{MonitoringConfig, OperationType};
use crate::registry::{CacheRegistry, OrchestratorRegistry};
use crate::resilience::CircuitState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    /// Cache or service name the alert is about
    pub source: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    fn new(severity: AlertSeverity, source: &str, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            source: source.to_string(),
            message,
            raised_at: Utc::now(),
        }
    }
}

/// Suggested default timeout for a service, never applied automatically
#[derive(Debug, Clone, Serialize)]
pub struct TimeoutRecommendation {
    pub service_name: String,
    pub average_execution_ms: f64,
    /// The timeout manager's default, used by calls with no per-type deadline
    pub current_timeout_ms: u64,
    /// Per-attempt deadlines the orchestrator enforces, after scaling
    pub attempt_timeouts_ms: HashMap<OperationType, u64>,
    pub recommended_timeout_ms: u64,
}

/// Polls the registries and raises threshold alerts
#[derive(Debug)]
pub struct MonitoringService {
    orchestrators: Arc<OrchestratorRegistry>,
    caches: Arc<CacheRegistry>,
    config: MonitoringConfig,
    alerts: Mutex<VecDeque<Alert>>,
    /// Cancel flag for the polling task
    cancel_flag: Arc<AtomicBool>,
}

impl MonitoringService {
    pub fn new(
        orchestrators: Arc<OrchestratorRegistry>,
        caches: Arc<CacheRegistry>,
        config: MonitoringConfig,
    ) -> Self {
        Self {
            orchestrators,
            caches,
            config,
            alerts: Mutex::new(VecDeque::new()),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    /// Start polling every `poll_interval` on a background task
    pub fn start(self: &Arc<Self>) -> task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        let cancel_flag = Arc::clone(&self.cancel_flag);
        let interval = self.config.poll_interval;

        task::spawn(async move {
            let mut interval_timer = time::interval(interval);
            info!(interval_ms = interval.as_millis() as u64, "Monitoring started");

            loop {
                interval_timer.tick().await;

                if cancel_flag.load(Ordering::SeqCst) {
                    break;
                }

                let raised = monitor.poll_once().await;
                debug!(alerts = raised.len(), "Monitoring poll complete");
            }

            debug!("Monitoring task stopped");
        })
    }

    /// Stop the polling task after its current tick
    pub fn stop(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    /// Evaluates every threshold once and returns the alerts it raised
    pub async fn poll_once(&self) -> Vec<Alert> {
        let mut raised = Vec::new();

        for cache in self.caches.all() {
            let metrics = cache.metrics();
            if metrics.lookups() >= self.config.min_cache_samples
                && metrics.hit_rate < self.config.min_hit_rate
            {
                raised.push(Alert::new(
                    AlertSeverity::Warning,
                    cache.name(),
                    format!(
                        "Cache hit rate {:.2} is below {:.2}",
                        metrics.hit_rate, self.config.min_hit_rate
                    ),
                ));
            }
            if metrics.local_utilization > self.config.max_local_utilization {
                raised.push(Alert::new(
                    AlertSeverity::Warning,
                    cache.name(),
                    format!(
                        "Local tier utilization {:.2} exceeds {:.2}",
                        metrics.local_utilization, self.config.max_local_utilization
                    ),
                ));
            }
        }

        for orchestrator in self.orchestrators.all() {
            let service = orchestrator.service_name();

            let timeout_rate = orchestrator.timeout_manager().timeout_rate();
            if timeout_rate > self.config.timeout_rate_critical {
                raised.push(Alert::new(
                    AlertSeverity::Critical,
                    service,
                    format!("Timeout rate {:.2} exceeds {:.2}", timeout_rate, self.config.timeout_rate_critical),
                ));
            } else if timeout_rate > self.config.timeout_rate_warning {
                raised.push(Alert::new(
                    AlertSeverity::Warning,
                    service,
                    format!("Timeout rate {:.2} exceeds {:.2}", timeout_rate, self.config.timeout_rate_warning),
                ));
            }

            let health = orchestrator.health_status().await;
            if health.circuit_state == CircuitState::Open {
                raised.push(Alert::new(
                    AlertSeverity::Critical,
                    service,
                    "Circuit breaker is open".to_string(),
                ));
            }

            let metrics = orchestrator.metrics().await;
            if metrics.total_executions > 0 && metrics.success_rate < self.config.min_success_rate {
                raised.push(Alert::new(
                    AlertSeverity::Warning,
                    service,
                    format!(
                        "Success rate {:.2} is below {:.2}",
                        metrics.success_rate, self.config.min_success_rate
                    ),
                ));
            }
        }

        for alert in &raised {
            match alert.severity {
                AlertSeverity::Critical => {
                    error!(source = %alert.source, alert_id = %alert.id, "{}", alert.message)
                }
                AlertSeverity::Warning => {
                    warn!(source = %alert.source, alert_id = %alert.id, "{}", alert.message)
                }
            }
        }

        self.retain(&raised);
        raised
    }

    fn lock_alerts(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        self.alerts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn retain(&self, raised: &[Alert]) {
        let mut alerts = self.lock_alerts();
        alerts.extend(raised.iter().cloned());
        while alerts.len() > self.config.max_alerts {
            alerts.pop_front();
        }
    }

    /// Retained alerts, oldest first
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.lock_alerts().iter().cloned().collect()
    }

    pub fn clear_alerts(&self) {
        self.lock_alerts().clear();
    }

    /// Recommends `max(min_timeout, average * factor)` for every service with samples
    pub fn timeout_recommendations(&self) -> Vec<TimeoutRecommendation> {
        self.orchestrators
            .all()
            .into_iter()
            .filter_map(|orchestrator| {
                let metrics = orchestrator.timeout_manager().metrics();
                if metrics.sample_count == 0 {
                    return None;
                }

                let scaled_ms =
                    (metrics.average_execution_ms * self.config.recommendation_factor).max(0.0);
                let scaled = Duration::from_secs_f64(scaled_ms / 1000.0);
                let recommended = scaled.max(self.config.min_recommended_timeout);
                let current = orchestrator.timeout_manager().resolve_timeout(None, None);
                let multiplier = orchestrator.timeout_manager().adaptive_multiplier();
                let attempt_timeouts_ms = OperationType::ALL
                    .iter()
                    .map(|op_type| {
                        let timeout = orchestrator.config().attempt_timeout(*op_type, multiplier);
                        (*op_type, timeout.as_millis() as u64)
                    })
                    .collect();

                Some(TimeoutRecommendation {
                    service_name: orchestrator.service_name().to_string(),
                    average_execution_ms: metrics.average_execution_ms,
                    current_timeout_ms: current.as_millis() as u64,
                    attempt_timeouts_ms,
                    recommended_timeout_ms: recommended.as_millis() as u64,
                })
            })
            .collect()
    }
}
