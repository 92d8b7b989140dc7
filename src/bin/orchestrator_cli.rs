// src/bin/orchestrator_cli.rs

use prettytable::{row, Table};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resilience_orchestrator::config::{
    CacheConfig, InMemoryConfig, OperationType, OrchestratorConfig,
};
use resilience_orchestrator::storage::MemoryStorage;
use resilience_orchestrator::{
    CircuitBreakerRegistry, DistributedCache, ResilienceError, ResilienceOrchestrator,
};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "orchestrator_cli",
    about = "Runs a simulated flaky dependency through the resilience pipeline"
)]
struct Opt {
    /// Operation type, selects retry overrides and timeouts
    #[structopt(short = "o", long, possible_values = &["read", "write", "external", "critical"], default_value = "read")]
    operation_type: OperationType,

    /// Probability that a single attempt fails with a network error
    #[structopt(short, long, default_value = "0.3")]
    failure_rate: f64,

    /// Simulated latency of one attempt in milliseconds
    #[structopt(short, long, default_value = "20")]
    latency_ms: u64,

    /// Per-attempt timeout in milliseconds for the chosen operation type
    #[structopt(short, long, default_value = "500")]
    timeout_ms: u64,

    /// Base retry delay in milliseconds
    #[structopt(long, default_value = "50")]
    base_delay_ms: u64,

    /// Number of requests to simulate
    #[structopt(short = "n", long, default_value = "20")]
    num_requests: usize,

    /// Number of distinct cache keys; 0 disables caching
    #[structopt(short, long, default_value = "5")]
    keys: usize,

    /// Time between requests in milliseconds
    #[structopt(short = "i", long, default_value = "0")]
    request_interval_ms: u64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        "orchestrator_cli=error,resilience_orchestrator=error".to_string()
    } else {
        let log_level = match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        format!(
            "orchestrator_cli={},resilience_orchestrator={}",
            log_level, log_level
        )
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(filter))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !(0.0..=1.0).contains(&opt.failure_rate) {
        return Err("failure rate must be between 0 and 1".into());
    }

    let mut config = OrchestratorConfig {
        enable_caching: opt.keys > 0,
        ..OrchestratorConfig::default()
    };
    config
        .operation_timeouts
        .insert(opt.operation_type, Duration::from_millis(opt.timeout_ms));
    config.retry.base.base_delay = Duration::from_millis(opt.base_delay_ms);
    config.retry.base.min_delay = Duration::from_millis(1);
    config.retry.overrides.clear();

    let storage = Arc::new(MemoryStorage::new(InMemoryConfig::default()));
    let cache = Arc::new(DistributedCache::new(
        "cli",
        CacheConfig {
            key_prefix: "cli".to_string(),
            ..CacheConfig::default()
        },
        storage,
    ));
    let breakers = CircuitBreakerRegistry::default();
    let orchestrator = ResilienceOrchestrator::new("cli", config, &breakers, Some(cache));

    info!(
        "Simulating {} {} requests, failure rate {:.0}%",
        opt.num_requests,
        opt.operation_type,
        opt.failure_rate * 100.0
    );

    let failure_rate = opt.failure_rate;
    let latency = Duration::from_millis(opt.latency_ms);
    let flaky = move || async move {
        time::sleep(latency).await;
        if rand::random::<f64>() < failure_rate {
            Err(ResilienceError::Network("ECONNRESET (simulated)".to_string()))
        } else {
            Ok(format!("payload@{}", chrono::Utc::now().timestamp_millis()))
        }
    };

    let interval = Duration::from_millis(opt.request_interval_ms);
    let start_time = Instant::now();
    let mut results = Table::new();
    results.add_row(row!["#", "Key", "Outcome", "Latency"]);

    for i in 0..opt.num_requests {
        let request_time = Instant::now();
        let key = (opt.keys > 0).then(|| format!("item:{}", i % opt.keys));

        let outcome = match orchestrator
            .execute(flaky, "simulated-call", opt.operation_type, key.as_deref())
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!("Request {} failed: {}", i + 1, e);
                format!("ERROR: {}", e)
            }
        };
        results.add_row(row![
            i + 1,
            key.as_deref().unwrap_or("-"),
            outcome,
            format!("{:?}", request_time.elapsed())
        ]);

        let elapsed = request_time.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }

    println!("\nRequests:");
    results.printstd();

    let metrics = orchestrator.metrics().await;
    let health = orchestrator.health_status().await;

    let mut summary = Table::new();
    summary.add_row(row!["Metric", "Value"]);
    summary.add_row(row!["Executions", metrics.total_executions]);
    summary.add_row(row!["Succeeded", metrics.successful_executions]);
    summary.add_row(row!["Failed", metrics.failed_executions]);
    summary.add_row(row!["Cache hits", metrics.cache_hits]);
    summary.add_row(row!["Success rate", format!("{:.1}%", metrics.success_rate * 100.0)]);
    summary.add_row(row!["Avg latency", format!("{:.1} ms", metrics.average_latency_ms)]);
    summary.add_row(row!["Attempts", metrics.retry.total_attempts]);
    summary.add_row(row!["Successful retries", metrics.retry.successful_retries]);
    summary.add_row(row!["Failed retries", metrics.retry.failed_retries]);
    summary.add_row(row!["Timeouts", metrics.timeouts.timeout_operations]);
    summary.add_row(row!["Breaker state", format!("{:?}", metrics.circuit_breaker.state)]);
    summary.add_row(row!["Breaker rejections", metrics.circuit_breaker.rejected_count]);
    summary.add_row(row!["Healthy", health.healthy]);
    summary.add_row(row!["Time elapsed", format!("{:?}", start_time.elapsed())]);

    println!("\nSummary:");
    summary.printstd();

    for issue in &health.issues {
        println!("  ! {}", issue);
    }

    Ok(())
}
