// src/resilience/tests/circuit_breaker_tests.rs

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tokio_test::{assert_err, assert_ok};

use crate::config::CircuitBreakerConfig;
use crate::error::ResilienceError;
use crate::resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
use crate::test_utils::{network_error, FlakyOperation};

fn test_config(reset_timeout: Duration) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 0.5,
        timeout: Duration::from_secs(1),
        reset_timeout,
        minimum_requests: 1,
    }
}

async fn fail(breaker: &CircuitBreaker) {
    let result: crate::error::Result<()> = breaker.execute(|| async { Err(network_error()) }).await;
    assert!(result.is_err());
}

async fn succeed(breaker: &CircuitBreaker) {
    assert_ok!(breaker.execute(|| async { Ok::<_, ResilienceError>(()) }).await);
}

#[tokio::test]
async fn test_initial_state_is_closed() {
    let breaker = CircuitBreaker::new("db", CircuitBreakerConfig::default());

    assert_eq!(breaker.state().await, CircuitState::Closed);
    let value = breaker.execute(|| async { Ok::<_, ResilienceError>(7) }).await;
    assert_eq!(value, Ok(7));

    let metrics = breaker.metrics().await;
    assert_eq!(metrics.success_count, 1);
    assert_eq!(metrics.total_requests, 1);
    assert!(metrics.last_success_at.is_some());
}

#[tokio::test]
async fn test_circuit_opens_when_failure_ratio_reaches_threshold() {
    let breaker = CircuitBreaker::new(
        "db",
        CircuitBreakerConfig {
            minimum_requests: 4,
            ..test_config(Duration::from_secs(60))
        },
    );

    succeed(&breaker).await;
    succeed(&breaker).await;
    fail(&breaker).await;
    // 1 of 3 failed
    assert_eq!(breaker.state().await, CircuitState::Closed);

    fail(&breaker).await;
    // 2 of 4 failed, threshold 0.5
    assert_eq!(breaker.state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_open_circuit_rejects_without_invoking() {
    let breaker = CircuitBreaker::new("db", test_config(Duration::from_secs(60)));
    fail(&breaker).await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    let operation = FlakyOperation::new(0, network_error());
    let result = breaker.execute(|| operation.call()).await;

    assert_eq!(
        result,
        Err(ResilienceError::CircuitOpen {
            resource: "db".to_string()
        })
    );
    assert_eq!(operation.calls(), 0, "operation must not run while open");

    let metrics = breaker.metrics().await;
    assert_eq!(metrics.rejected_count, 1);
    // Rejections are not executed calls
    assert_eq!(metrics.total_requests, 1);
    assert!(metrics.next_attempt_at.is_some());
}

#[tokio::test]
async fn test_half_open_success_closes_and_resets_counts() {
    let breaker = CircuitBreaker::new("db", test_config(Duration::from_millis(100)));
    fail(&breaker).await;
    let _ = breaker.execute(|| async { Ok::<_, ResilienceError>(()) }).await;
    assert_eq!(breaker.metrics().await.rejected_count, 1);

    time::sleep(Duration::from_millis(150)).await;
    succeed(&breaker).await;

    assert_eq!(breaker.state().await, CircuitState::Closed);
    let metrics = breaker.metrics().await;
    assert_eq!(metrics.failure_count, 0);
    assert_eq!(metrics.success_count, 0);
    assert_eq!(metrics.rejected_count, 1, "rejections survive the reset");
    assert!(metrics.last_failure_at.is_some());
    assert!(metrics.last_success_at.is_some());
}

#[tokio::test]
async fn test_half_open_failure_reopens_with_fresh_deadline() {
    let breaker = CircuitBreaker::new("db", test_config(Duration::from_millis(100)));
    fail(&breaker).await;

    time::sleep(Duration::from_millis(150)).await;
    fail(&breaker).await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    // The new deadline starts from the failed probe
    let rejected = breaker.execute(|| async { Ok::<_, ResilienceError>(()) }).await;
    assert!(matches!(rejected, Err(ResilienceError::CircuitOpen { .. })));

    time::sleep(Duration::from_millis(150)).await;
    succeed(&breaker).await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test]
async fn test_breaker_enforces_its_own_timeout() {
    let breaker = CircuitBreaker::new(
        "slow",
        CircuitBreakerConfig {
            timeout: Duration::from_millis(50),
            ..test_config(Duration::from_secs(60))
        },
    );

    let result = breaker
        .execute(|| async {
            time::sleep(Duration::from_millis(300)).await;
            Ok::<_, ResilienceError>(())
        })
        .await;

    assert!(matches!(result, Err(ResilienceError::Timeout { .. })));
    let metrics = breaker.metrics().await;
    assert_eq!(metrics.timeout_count, 1);
    assert_eq!(metrics.failure_count, 1);
    assert_eq!(metrics.state, CircuitState::Open);
}

#[tokio::test]
async fn test_explicit_deadline_replaces_configured_timeout() {
    let breaker = CircuitBreaker::new(
        "batch",
        CircuitBreakerConfig {
            timeout: Duration::from_millis(20),
            ..test_config(Duration::from_secs(60))
        },
    );

    let slow = || async {
        time::sleep(Duration::from_millis(60)).await;
        Ok::<_, ResilienceError>("done")
    };
    assert_eq!(
        breaker.execute_with_deadline(slow, Duration::from_millis(500)).await,
        Ok("done")
    );

    let result = breaker
        .execute_with_deadline(slow, Duration::from_millis(10))
        .await;
    assert_eq!(
        result,
        Err(ResilienceError::Timeout {
            operation: "batch".to_string(),
            timeout: Duration::from_millis(10),
        })
    );
    assert_eq!(breaker.metrics().await.timeout_count, 1);
}

#[tokio::test]
async fn test_operation_error_is_returned_unchanged() {
    let breaker = CircuitBreaker::new("db", CircuitBreakerConfig::default());
    let err = ResilienceError::Validation("bad payload".to_string());

    let result: crate::error::Result<()> = breaker
        .execute(|| {
            let err = err.clone();
            async move { Err(err) }
        })
        .await;

    assert_eq!(result, Err(err));
}

#[tokio::test]
async fn test_lock_not_held_during_operation() {
    let breaker = Arc::new(CircuitBreaker::new("db", CircuitBreakerConfig::default()));
    let slow = || async {
        time::sleep(Duration::from_millis(100)).await;
        Ok::<_, ResilienceError>(())
    };

    let start = Instant::now();
    let (a, b) = tokio::join!(breaker.execute(slow), breaker.execute(slow));
    assert_ok!(a);
    assert_ok!(b);
    assert!(start.elapsed() < Duration::from_millis(180));
}

#[tokio::test]
async fn test_force_open_and_reset() {
    let breaker = CircuitBreaker::new("db", test_config(Duration::from_secs(60)));

    breaker.force_open().await;
    assert_err!(breaker.execute(|| async { Ok::<_, ResilienceError>(()) }).await);

    breaker.reset().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
    let metrics = breaker.metrics().await;
    assert_eq!(metrics.rejected_count, 0);
    assert!(metrics.next_attempt_at.is_none());
    succeed(&breaker).await;
}

#[tokio::test]
async fn test_registry_shares_breakers_by_name() {
    let registry = CircuitBreakerRegistry::new(test_config(Duration::from_secs(60)));

    let first = registry.get_or_create("payments", None);
    let custom = CircuitBreakerConfig {
        failure_threshold: 0.9,
        ..CircuitBreakerConfig::default()
    };
    let second = registry.get_or_create("payments", Some(custom.clone()));
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.config().failure_threshold, 0.5);

    let other = registry.get_or_create("search", Some(custom));
    assert_eq!(other.config().failure_threshold, 0.9);

    assert_eq!(registry.names(), vec!["payments", "search"]);
    assert!(registry.get("missing").is_none());

    fail(&first).await;
    let metrics = registry.all_metrics().await;
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].name, "payments");
    assert_eq!(metrics[0].state, CircuitState::Open);

    assert!(registry.reset("payments").await);
    assert!(!registry.reset("missing").await);
    assert_eq!(first.state().await, CircuitState::Closed);
}
