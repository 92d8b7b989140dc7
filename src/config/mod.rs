// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{ResilienceError, Result};

/// Kind of downstream operation; selects retry overrides and timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Read,
    Write,
    External,
    Critical,
}

impl OperationType {
    pub const ALL: [OperationType; 4] = [
        OperationType::Read,
        OperationType::Write,
        OperationType::External,
        OperationType::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Read => "read",
            OperationType::Write => "write",
            OperationType::External => "external",
            OperationType::Critical => "critical",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationType {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(OperationType::Read),
            "write" => Ok(OperationType::Write),
            "external" => Ok(OperationType::External),
            "critical" => Ok(OperationType::Critical),
            other => Err(ResilienceError::Config(format!(
                "Unknown operation type: {}",
                other
            ))),
        }
    }
}

/// Configuration for a circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failure ratio (failures / executed calls) that opens the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    /// Per-call timeout enforced by the breaker itself
    #[serde(default = "default_breaker_timeout", rename = "timeout_ms", with = "duration_serde")]
    pub timeout: Duration,

    /// Duration to keep the circuit open before probing again
    #[serde(default = "default_reset_timeout", rename = "reset_timeout_ms", with = "duration_serde")]
    pub reset_timeout: Duration,

    /// Executed calls required before the failure ratio is evaluated
    #[serde(default = "default_minimum_requests")]
    pub minimum_requests: u64,
}

fn default_failure_threshold() -> f64 {
    0.5
}

fn default_breaker_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_reset_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_minimum_requests() -> u64 {
    1
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            timeout: default_breaker_timeout(),
            reset_timeout: default_reset_timeout(),
            minimum_requests: default_minimum_requests(),
        }
    }
}

/// Configuration for retry strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay", rename = "base_delay_ms", with = "duration_serde")]
    pub base_delay: Duration,

    /// Upper bound for the exponential part of the delay
    #[serde(default = "default_max_delay", rename = "max_delay_ms", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Whether to add jitter to backoff
    #[serde(default = "default_true")]
    pub jitter_enabled: bool,

    /// Floor applied after jitter
    #[serde(default = "default_min_delay", rename = "min_delay_ms", with = "duration_serde")]
    pub min_delay: Duration,

    /// Substrings that make an error retryable when found in its message
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_min_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_retryable_errors() -> Vec<String> {
    vec![
        "ECONNRESET".to_string(),
        "ENOTFOUND".to_string(),
        "ECONNREFUSED".to_string(),
        "ETIMEDOUT".to_string(),
        "temporarily unavailable".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_enabled: true,
            min_delay: default_min_delay(),
            retryable_errors: default_retryable_errors(),
        }
    }
}

/// Per-operation-type adjustments layered on top of the base retry config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryOverride {
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default, rename = "base_delay_ms", with = "option_duration_serde")]
    pub base_delay: Option<Duration>,

    #[serde(default, rename = "max_delay_ms", with = "option_duration_serde")]
    pub max_delay: Option<Duration>,
}

/// Retry configuration for every operation type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    #[serde(default)]
    pub base: RetryConfig,

    #[serde(default = "default_retry_overrides")]
    pub overrides: HashMap<OperationType, RetryOverride>,

    /// Enables operation-type-aware retry decisions
    #[serde(default = "default_true")]
    pub contextual: bool,
}

fn default_retry_overrides() -> HashMap<OperationType, RetryOverride> {
    let mut overrides = HashMap::new();
    overrides.insert(
        OperationType::External,
        RetryOverride {
            max_attempts: Some(5),
            base_delay: Some(Duration::from_millis(2000)),
            max_delay: Some(Duration::from_secs(30)),
        },
    );
    overrides.insert(
        OperationType::Critical,
        RetryOverride {
            max_attempts: Some(2),
            base_delay: Some(Duration::from_millis(500)),
            max_delay: Some(Duration::from_secs(2)),
        },
    );
    overrides
}

impl RetryPolicyConfig {
    /// Base config with the override for `op_type` applied
    pub fn resolve(&self, op_type: OperationType) -> RetryConfig {
        let mut effective = self.base.clone();
        if let Some(overrides) = self.overrides.get(&op_type) {
            if let Some(max_attempts) = overrides.max_attempts {
                effective.max_attempts = max_attempts;
            }
            if let Some(base_delay) = overrides.base_delay {
                effective.base_delay = base_delay;
            }
            if let Some(max_delay) = overrides.max_delay {
                effective.max_delay = max_delay;
            }
        }
        effective
    }
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base: RetryConfig::default(),
            overrides: default_retry_overrides(),
            contextual: true,
        }
    }
}

/// Configuration for the timeout manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout", rename = "default_timeout_ms", with = "duration_serde")]
    pub default_timeout: Duration,

    /// Timeouts keyed by operation name
    #[serde(default, rename = "operation_timeouts_ms", with = "duration_map_serde")]
    pub operation_timeouts: HashMap<String, Duration>,

    /// Elapsed time at which a warning is emitted; `None` disables it
    #[serde(default = "default_graceful_timeout", rename = "graceful_timeout_ms", with = "option_duration_serde")]
    pub graceful_timeout: Option<Duration>,

    /// Externally supplied factor applied to configured timeouts
    #[serde(default = "default_adaptive_multiplier")]
    pub adaptive_multiplier: f64,
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_graceful_timeout() -> Option<Duration> {
    Some(Duration::from_secs(4))
}

fn default_adaptive_multiplier() -> f64 {
    1.0
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            operation_timeouts: HashMap::new(),
            graceful_timeout: default_graceful_timeout(),
            adaptive_multiplier: default_adaptive_multiplier(),
        }
    }
}

/// Local-tier eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used
    Lru,
    /// Least frequently used
    Lfu,
}

/// Priority of a cache category; controls use of the local tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    High,
    Medium,
    Low,
}

impl CachePriority {
    /// Whether entries of this priority live in the local tier
    pub fn uses_local_tier(&self) -> bool {
        !matches!(self, CachePriority::Low)
    }
}

/// TTL and priority for a cache category
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(rename = "ttl_ms", with = "duration_serde")]
    pub ttl: Duration,
    pub priority: CachePriority,
}

impl CachePolicy {
    pub fn new(ttl: Duration, priority: CachePriority) -> Self {
        Self { ttl, priority }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            priority: CachePriority::Medium,
        }
    }
}

/// Configuration for a two-tier cache instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Key prefix to use for all keys in both tiers
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Hard capacity of the local tier
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,

    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: EvictionPolicy,

    #[serde(default = "default_cache_ttl", rename = "default_ttl_ms", with = "duration_serde")]
    pub default_ttl: Duration,

    /// Mirror plain `set` calls into the local tier
    #[serde(default = "default_true")]
    pub mirror_writes_locally: bool,

    #[serde(default = "default_categories")]
    pub categories: HashMap<String, CachePolicy>,
}

fn default_key_prefix() -> String {
    "cache".to_string()
}

fn default_local_capacity() -> usize {
    1000
}

fn default_eviction_policy() -> EvictionPolicy {
    EvictionPolicy::Lru
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_categories() -> HashMap<String, CachePolicy> {
    let mut categories = HashMap::new();
    categories.insert(
        "session".to_string(),
        CachePolicy::new(Duration::from_secs(1800), CachePriority::High),
    );
    categories.insert(
        "recommendations".to_string(),
        CachePolicy::new(Duration::from_secs(600), CachePriority::High),
    );
    categories.insert(
        "analytics".to_string(),
        CachePolicy::new(Duration::from_secs(3600), CachePriority::Low),
    );
    categories
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            local_capacity: default_local_capacity(),
            eviction_policy: default_eviction_policy(),
            default_ttl: default_cache_ttl(),
            mirror_writes_locally: true,
            categories: default_categories(),
        }
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", rename = "connection_timeout_ms", with = "duration_serde")]
    pub connection_timeout: Duration,
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_true")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", rename = "cleanup_interval_ms", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: true,
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// Configuration for one resilience orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_true")]
    pub enable_caching: bool,

    #[serde(default = "default_orchestrator_breaker")]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryPolicyConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Per-attempt timeout keyed by operation type
    #[serde(default = "default_operation_type_timeouts", rename = "operation_timeouts_ms", with = "duration_map_serde")]
    pub operation_timeouts: HashMap<OperationType, Duration>,

    /// Cache policy keyed by operation name
    #[serde(default)]
    pub cache_strategies: HashMap<String, CachePolicy>,

    #[serde(default)]
    pub default_cache_policy: CachePolicy,
}

// The breaker wraps the whole retry loop, so its own timeout must outlast
// `OrchestratorConfig::max_retry_budget` (about 102s for the defaults).
fn default_orchestrator_breaker() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        timeout: Duration::from_secs(120),
        ..CircuitBreakerConfig::default()
    }
}

fn default_operation_type_timeouts() -> HashMap<OperationType, Duration> {
    let mut timeouts = HashMap::new();
    timeouts.insert(OperationType::Read, Duration::from_secs(3));
    timeouts.insert(OperationType::Write, Duration::from_secs(5));
    timeouts.insert(OperationType::External, Duration::from_secs(10));
    timeouts.insert(OperationType::Critical, Duration::from_secs(2));
    timeouts
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enable_caching: true,
            circuit_breaker: default_orchestrator_breaker(),
            retry: RetryPolicyConfig::default(),
            timeouts: TimeoutConfig::default(),
            operation_timeouts: default_operation_type_timeouts(),
            cache_strategies: HashMap::new(),
            default_cache_policy: CachePolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Deadline of one attempt of `op_type`, scaled by `multiplier`. Types without
    /// an entry fall back to the longest timeout the timeout manager could pick.
    pub fn attempt_timeout(&self, op_type: OperationType, multiplier: f64) -> Duration {
        let configured = self
            .operation_timeouts
            .get(&op_type)
            .copied()
            .unwrap_or_else(|| {
                self.timeouts
                    .operation_timeouts
                    .values()
                    .copied()
                    .fold(self.timeouts.default_timeout, Duration::max)
            });
        configured.mul_f64(multiplier)
    }

    /// Longest time the retry loop can take for `op_type`: every attempt running
    /// into its deadline plus the largest possible delay between attempts.
    pub fn retry_budget(&self, op_type: OperationType, multiplier: f64) -> Duration {
        let retry = self.retry.resolve(op_type);
        let attempts = retry.max_attempts.max(1);
        let running = self
            .attempt_timeout(op_type, multiplier)
            .checked_mul(attempts)
            .unwrap_or(Duration::MAX);
        (1..attempts)
            .map(|attempt| crate::resilience::delay_ceiling(&retry, attempt, op_type))
            .fold(running, |total, delay| total.saturating_add(delay))
    }

    /// Largest `retry_budget` over every operation type
    pub fn max_retry_budget(&self, multiplier: f64) -> Duration {
        OperationType::ALL
            .iter()
            .map(|op_type| self.retry_budget(*op_type, multiplier))
            .max()
            .unwrap_or_default()
    }
}

/// Thresholds and cadence for the monitoring service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_poll_interval", rename = "poll_interval_ms", with = "duration_serde")]
    pub poll_interval: Duration,

    #[serde(default = "default_min_hit_rate")]
    pub min_hit_rate: f64,

    /// Lookups required before the hit rate is judged
    #[serde(default = "default_min_cache_samples")]
    pub min_cache_samples: u64,

    #[serde(default = "default_max_local_utilization")]
    pub max_local_utilization: f64,

    #[serde(default = "default_timeout_rate_warning")]
    pub timeout_rate_warning: f64,

    #[serde(default = "default_timeout_rate_critical")]
    pub timeout_rate_critical: f64,

    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Number of alerts retained in memory
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,

    /// Multiplier applied to the average execution time when recommending timeouts
    #[serde(default = "default_recommendation_factor")]
    pub recommendation_factor: f64,

    #[serde(default = "default_min_recommended_timeout", rename = "min_recommended_timeout_ms", with = "duration_serde")]
    pub min_recommended_timeout: Duration,
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_min_hit_rate() -> f64 {
    0.7
}

fn default_min_cache_samples() -> u64 {
    20
}

fn default_max_local_utilization() -> f64 {
    0.9
}

fn default_timeout_rate_warning() -> f64 {
    0.05
}

fn default_timeout_rate_critical() -> f64 {
    0.10
}

fn default_min_success_rate() -> f64 {
    0.95
}

fn default_max_alerts() -> usize {
    100
}

fn default_recommendation_factor() -> f64 {
    2.0
}

fn default_min_recommended_timeout() -> Duration {
    Duration::from_millis(100)
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            min_hit_rate: default_min_hit_rate(),
            min_cache_samples: default_min_cache_samples(),
            max_local_utilization: default_max_local_utilization(),
            timeout_rate_warning: default_timeout_rate_warning(),
            timeout_rate_critical: default_timeout_rate_critical(),
            min_success_rate: default_min_success_rate(),
            max_alerts: default_max_alerts(),
            recommendation_factor: default_recommendation_factor(),
            min_recommended_timeout: default_min_recommended_timeout(),
        }
    }
}

/// Everything a service needs at start-up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Shared tier; falls back to in-memory storage when absent
    #[serde(default)]
    pub redis: Option<RedisConfig>,

    #[serde(default)]
    pub memory: InMemoryConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

fn default_service_name() -> String {
    "default".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            orchestrator: OrchestratorConfig::default(),
            cache: CacheConfig::default(),
            redis: None,
            memory: InMemoryConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ServiceConfig = serde_json::from_str(json)
            .map_err(|e| ResilienceError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ResilienceError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Apply `SERVICE_NAME`, `REDIS_URL`, `CACHE_KEY_PREFIX` and `CACHE_LOCAL_CAPACITY`
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("SERVICE_NAME") {
            self.service_name = name;
        }
        if let Some(url) = lookup("REDIS_URL") {
            match self.redis.as_mut() {
                Some(redis) => redis.url = url,
                None => {
                    self.redis = Some(RedisConfig {
                        url,
                        connection_timeout: default_conn_timeout(),
                    })
                }
            }
        }
        if let Some(prefix) = lookup("CACHE_KEY_PREFIX") {
            self.cache.key_prefix = prefix;
        }
        if let Some(capacity) = lookup("CACHE_LOCAL_CAPACITY") {
            self.cache.local_capacity = capacity.parse().map_err(|_| {
                ResilienceError::Config(format!("CACHE_LOCAL_CAPACITY is not a number: {}", capacity))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.orchestrator.circuit_breaker.failure_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ResilienceError::Config(format!(
                "failure_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.orchestrator.retry.base.max_attempts == 0 {
            return Err(ResilienceError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if let Some((op_type, _)) = self
            .orchestrator
            .retry
            .overrides
            .iter()
            .find(|(_, o)| o.max_attempts == Some(0))
        {
            return Err(ResilienceError::Config(format!(
                "max_attempts override for {} must be at least 1",
                op_type
            )));
        }
        if self.cache.local_capacity == 0 {
            return Err(ResilienceError::Config(
                "local_capacity must be at least 1".to_string(),
            ));
        }
        let multiplier = self.orchestrator.timeouts.adaptive_multiplier;
        if !(multiplier.is_finite() && multiplier > 0.0) {
            return Err(ResilienceError::Config(
                "adaptive_multiplier must be positive".to_string(),
            ));
        }
        let budget = self.orchestrator.max_retry_budget(multiplier);
        if self.orchestrator.circuit_breaker.timeout < budget {
            return Err(ResilienceError::Config(format!(
                "circuit breaker timeout {:?} is shorter than the retry budget {:?}",
                self.orchestrator.circuit_breaker.timeout, budget
            )));
        }
        Ok(())
    }
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

pub(crate) mod duration_map_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;
    use std::hash::Hash;
    use std::time::Duration;

    pub fn serialize<K, S>(map: &HashMap<K, Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Eq + Hash,
        S: Serializer,
    {
        let millis: HashMap<&K, u64> = map
            .iter()
            .map(|(k, d)| (k, d.as_millis() as u64))
            .collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, K, D>(deserializer: D) -> Result<HashMap<K, Duration>, D::Error>
    where
        K: Deserialize<'de> + Eq + Hash,
        D: Deserializer<'de>,
    {
        let millis = HashMap::<K, u64>::deserialize(deserializer)?;
        Ok(millis
            .into_iter()
            .map(|(k, ms)| (k, Duration::from_millis(ms)))
            .collect())
    }
}
