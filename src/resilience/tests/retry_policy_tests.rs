// src/resilience/tests/retry_policy_tests.rs

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{OperationType, RetryConfig, RetryOverride, RetryPolicyConfig};
use crate::error::ResilienceError;
use crate::resilience::{backoff_delay, compute_delay, RetryContext, RetryPolicy};
use crate::test_utils::{network_error, FlakyOperation};

fn fast_config(max_attempts: u32) -> RetryPolicyConfig {
    RetryPolicyConfig {
        base: RetryConfig {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            min_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        },
        overrides: HashMap::new(),
        contextual: true,
    }
}

#[tokio::test]
async fn test_succeeds_after_transient_failures() {
    let policy = RetryPolicy::new(fast_config(4));
    let operation = FlakyOperation::new(2, network_error());

    let result = policy
        .execute_with_context(
            || operation.call(),
            OperationType::Read,
            Some(RetryContext::new("load-profile")),
        )
        .await;

    assert_eq!(result.as_deref(), Ok("success after 3 calls"));
    assert_eq!(operation.calls(), 3);

    let metrics = policy.metrics();
    assert_eq!(metrics.total_attempts, 3);
    assert_eq!(metrics.successful_retries, 1);
    assert_eq!(metrics.failed_retries, 0);
    assert_eq!(metrics.attempts_by_type.get(&OperationType::Read), Some(&3));
    assert!(metrics.total_delay_ms > 0);
    assert_eq!(metrics.contextual_success_rate, 1.0);
}

#[tokio::test]
async fn test_exhaustion_returns_last_error() {
    let policy = RetryPolicy::new(fast_config(3));
    let operation = FlakyOperation::always_failing(network_error());

    let result = policy.execute(|| operation.call(), OperationType::Read).await;

    assert_eq!(result, Err(network_error()));
    assert_eq!(operation.calls(), 3);

    let metrics = policy.metrics();
    assert_eq!(metrics.failed_retries, 1);
    assert!((metrics.contextual_success_rate - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn test_first_attempt_success_is_not_a_retry() {
    let policy = RetryPolicy::new(fast_config(3));
    let operation = FlakyOperation::new(0, network_error());

    assert!(policy.execute(|| operation.call(), OperationType::Read).await.is_ok());
    assert_eq!(policy.metrics().successful_retries, 0);
    assert_eq!(policy.metrics().total_delay_ms, 0);
}

#[tokio::test]
async fn test_write_validation_errors_are_not_retried() {
    let policy = RetryPolicy::new(fast_config(3));
    let operation = FlakyOperation::always_failing(ResilienceError::Validation(
        "email is malformed".to_string(),
    ));

    let result = policy.execute(|| operation.call(), OperationType::Write).await;

    assert!(matches!(result, Err(ResilienceError::Validation(_))));
    assert_eq!(operation.calls(), 1);
    assert_eq!(policy.metrics().failed_retries, 1);
}

#[tokio::test]
async fn test_circuit_open_is_never_retried() {
    let policy = RetryPolicy::new(fast_config(5));
    let operation = FlakyOperation::always_failing(ResilienceError::CircuitOpen {
        resource: "payments".to_string(),
    });

    let result = policy.execute(|| operation.call(), OperationType::External).await;

    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(operation.calls(), 1);
}

#[tokio::test]
async fn test_configured_matcher_makes_error_retryable() {
    let policy = RetryPolicy::new(fast_config(2));
    let operation = FlakyOperation::new(
        1,
        ResilienceError::Operation("service temporarily unavailable".to_string()),
    );

    assert!(policy.execute(|| operation.call(), OperationType::Read).await.is_ok());
    assert_eq!(operation.calls(), 2);

    let plain = FlakyOperation::always_failing(ResilienceError::Operation("boom".to_string()));
    assert!(policy.execute(|| plain.call(), OperationType::Read).await.is_err());
    assert_eq!(plain.calls(), 1);
}

#[test]
fn test_should_retry_rules() {
    let policy = RetryPolicy::new(fast_config(3));
    let config = policy.resolve(OperationType::Read);
    let validation = ResilienceError::Validation("missing field".to_string());

    assert!(policy.should_retry(&network_error(), 1, &config, OperationType::External));
    assert!(!policy.should_retry(&network_error(), 3, &config, OperationType::External));
    assert!(!policy.should_retry(&validation, 1, &config, OperationType::Write));
    assert!(!policy.should_retry(&validation, 1, &config, OperationType::Read));
    assert!(policy.should_retry(
        &ResilienceError::Operation("ECONNREFUSED 10.0.0.1:5432".to_string()),
        1,
        &config,
        OperationType::Read
    ));
}

#[test]
fn test_contextual_rules_can_be_disabled() {
    let mut config = fast_config(3);
    config.contextual = false;
    config.base.retryable_errors.push("validation".to_string());
    let policy = RetryPolicy::new(config);
    let effective = policy.resolve(OperationType::Write);

    // Without contextual rules the matcher alone decides
    let validation = ResilienceError::Validation("bad".to_string());
    assert!(policy.should_retry(&validation, 1, &effective, OperationType::Write));
}

#[test]
fn test_resolve_applies_type_overrides() {
    let policy = RetryPolicy::new(RetryPolicyConfig::default());

    let read = policy.resolve(OperationType::Read);
    assert_eq!(read.max_attempts, 3);
    assert_eq!(read.base_delay, Duration::from_millis(1000));

    let external = policy.resolve(OperationType::External);
    assert_eq!(external.max_attempts, 5);
    assert_eq!(external.base_delay, Duration::from_millis(2000));
    assert_eq!(external.max_delay, Duration::from_secs(30));
    // Fields without an override come from the base config
    assert_eq!(external.backoff_multiplier, 2.0);

    let mut partial = RetryPolicyConfig::default();
    partial.overrides.insert(
        OperationType::Write,
        RetryOverride {
            max_attempts: Some(1),
            ..RetryOverride::default()
        },
    );
    let write = RetryPolicy::new(partial).resolve(OperationType::Write);
    assert_eq!(write.max_attempts, 1);
    assert_eq!(write.max_delay, Duration::from_secs(10));
}

#[test]
fn test_backoff_grows_and_caps() {
    let config = RetryConfig {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(500),
        jitter_enabled: false,
        ..RetryConfig::default()
    };

    let delays: Vec<u64> = (1..=4)
        .map(|attempt| backoff_delay(&config, attempt, OperationType::Read).as_millis() as u64)
        .collect();
    assert_eq!(delays, vec![100, 200, 400, 500]);

    assert_eq!(
        backoff_delay(&config, 2, OperationType::External),
        Duration::from_millis(300)
    );
    assert_eq!(
        backoff_delay(&config, 2, OperationType::Critical),
        Duration::from_millis(160)
    );
    assert_eq!(
        compute_delay(&config, 3, OperationType::Write),
        Duration::from_millis(400)
    );
}

#[test]
fn test_jitter_stays_within_band() {
    let config = RetryConfig {
        base_delay: Duration::from_millis(1000),
        max_delay: Duration::from_secs(10),
        ..RetryConfig::default()
    };

    for attempt in 1..=3 {
        let nominal = backoff_delay(&config, attempt, OperationType::Read).as_millis() as f64;
        for _ in 0..200 {
            let delay = compute_delay(&config, attempt, OperationType::Read).as_millis() as f64;
            assert!(delay >= (nominal * 0.85).floor(), "{} below band", delay);
            assert!(delay <= nominal * 1.15, "{} above band", delay);
        }
    }
}

#[test]
fn test_delay_never_below_floor() {
    let config = RetryConfig {
        base_delay: Duration::from_millis(20),
        min_delay: Duration::from_millis(100),
        ..RetryConfig::default()
    };

    for _ in 0..50 {
        assert!(compute_delay(&config, 1, OperationType::Critical) >= Duration::from_millis(100));
    }
}

#[tokio::test]
async fn test_reset_metrics() {
    let policy = RetryPolicy::new(fast_config(2));
    let operation = FlakyOperation::always_failing(network_error());
    let _ = policy.execute(|| operation.call(), OperationType::Read).await;

    policy.reset_metrics();
    let metrics = policy.metrics();
    assert_eq!(metrics.total_attempts, 0);
    assert_eq!(metrics.failed_retries, 0);
    assert!(metrics.attempts_by_type.is_empty());
    assert_eq!(metrics.contextual_success_rate, 1.0);
}
