// src/bin/orchestrator_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resilience_orchestrator::config::{
    CacheConfig, InMemoryConfig, MonitoringConfig, OperationType, OrchestratorConfig, RedisConfig,
};
use resilience_orchestrator::storage::{MemoryStorage, RedisStorage, StorageBackend};
use resilience_orchestrator::{
    CacheRegistry, CircuitBreakerRegistry, MonitoringService, OrchestratorRegistry,
    ResilienceError, ResilienceOrchestrator,
};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "orchestrator_bench",
    about = "Concurrent load benchmark for the resilience pipeline"
)]
struct Opt {
    /// Shared cache tier
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Operation type used for every call
    #[structopt(short = "o", long, possible_values = &["read", "write", "external", "critical"], default_value = "read")]
    operation_type: OperationType,

    /// Number of concurrent callers
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of requests per caller
    #[structopt(short = "r", long, default_value = "100")]
    requests_per_user: usize,

    /// Maximum number of in-flight requests
    #[structopt(short = "c", long, default_value = "50")]
    concurrency: usize,

    /// Probability that a single attempt fails
    #[structopt(short, long, default_value = "0.05")]
    failure_rate: f64,

    /// Simulated latency of one attempt in milliseconds
    #[structopt(short, long, default_value = "5")]
    latency_ms: u64,

    /// Number of distinct cache keys; 0 disables caching
    #[structopt(short, long, default_value = "200")]
    keys: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[derive(Debug, Default)]
struct WorkerTally {
    ok: u64,
    failed: u64,
    rejected: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let filter = if opt.disable_logs {
        "orchestrator_bench=error,resilience_orchestrator=error".to_string()
    } else {
        let log_level = match opt.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        format!(
            "orchestrator_bench={},resilience_orchestrator={}",
            log_level, log_level
        )
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(filter))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let backend: Arc<dyn StorageBackend> = match opt.storage.as_str() {
        "memory" => Arc::new(MemoryStorage::new(InMemoryConfig {
            max_entries: 100_000,
            use_background_task: true,
            cleanup_interval: Duration::from_secs(60),
        })),
        "redis" => {
            let redis_config = RedisConfig {
                url: opt.redis_url.clone(),
                connection_timeout: Duration::from_secs(5),
            };
            match RedisStorage::new(redis_config).await {
                Ok(storage) => Arc::new(storage),
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    return Err(format!("Failed to connect to Redis: {}", e).into());
                }
            }
        }
        other => return Err(format!("Unknown storage backend: {}", other).into()),
    };

    let mut config = OrchestratorConfig {
        enable_caching: opt.keys > 0,
        ..OrchestratorConfig::default()
    };
    config.retry.base.base_delay = Duration::from_millis(10);
    config.retry.base.min_delay = Duration::from_millis(1);
    config.retry.overrides.clear();
    config.circuit_breaker.minimum_requests = 50;

    let breakers = CircuitBreakerRegistry::default();
    let caches = Arc::new(CacheRegistry::new());
    let orchestrators = Arc::new(OrchestratorRegistry::new());
    let cache = caches.get_or_create(
        "bench",
        CacheConfig {
            key_prefix: "bench".to_string(),
            ..CacheConfig::default()
        },
        backend,
    );
    let orchestrator = Arc::new(ResilienceOrchestrator::new(
        "bench",
        config,
        &breakers,
        Some(cache),
    ));
    orchestrators.register(Arc::clone(&orchestrator));
    let monitor = MonitoringService::new(orchestrators, caches, MonitoringConfig::default());

    let total = (opt.num_users * opt.requests_per_user) as u64;
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {per_sec} {msg}",
        )?
        .progress_chars("##-"),
    );

    info!("Starting benchmark with {} callers", opt.num_users);
    let start_time = Instant::now();
    let barrier = Arc::new(Barrier::new(opt.num_users));
    let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
    let mut handles = Vec::with_capacity(opt.num_users);

    for user_id in 0..opt.num_users {
        let orchestrator = Arc::clone(&orchestrator);
        let barrier = Arc::clone(&barrier);
        let semaphore = Arc::clone(&semaphore);
        let stop = Arc::clone(&stop);
        let progress = progress.clone();
        let opt = opt.clone();

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let failure_rate = opt.failure_rate;
            let latency = Duration::from_millis(opt.latency_ms);
            let operation = move || async move {
                time::sleep(latency).await;
                if rand::random::<f64>() < failure_rate {
                    Err(ResilienceError::Network("ECONNRESET (simulated)".to_string()))
                } else {
                    Ok(rand::random::<u32>())
                }
            };

            let mut tally = WorkerTally::default();
            for i in 0..opt.requests_per_user {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(_permit) = semaphore.acquire().await else {
                    break;
                };

                let key = (opt.keys > 0).then(|| format!("item:{}", (user_id * 31 + i) % opt.keys));
                match orchestrator
                    .execute(operation, "bench-call", opt.operation_type, key.as_deref())
                    .await
                {
                    Ok(_) => tally.ok += 1,
                    Err(ResilienceError::CircuitOpen { .. }) => tally.rejected += 1,
                    Err(e) => {
                        tally.failed += 1;
                        if !opt.disable_logs {
                            warn!("Call failed: {}", e);
                        }
                    }
                }
                progress.inc(1);
            }
            tally
        }));
    }

    let results = futures::future::join_all(handles).await;
    let elapsed = start_time.elapsed();
    if stop.load(Ordering::SeqCst) {
        progress.abandon_with_message("interrupted");
    } else {
        progress.finish_with_message("done");
    }

    let mut tally = WorkerTally::default();
    for result in results {
        match result {
            Ok(worker) => {
                tally.ok += worker.ok;
                tally.failed += worker.failed;
                tally.rejected += worker.rejected;
            }
            Err(e) => error!("Worker task failed: {}", e),
        }
    }

    let completed = tally.ok + tally.failed + tally.rejected;
    let metrics = orchestrator.metrics().await;

    let mut table = Table::new();
    table.add_row(row!["Metric", "Value"]);
    table.add_row(row!["Requests", completed]);
    table.add_row(row!["Succeeded", tally.ok]);
    table.add_row(row!["Failed", tally.failed]);
    table.add_row(row!["Rejected (open circuit)", tally.rejected]);
    table.add_row(row!["Duration", format!("{:?}", elapsed)]);
    table.add_row(row![
        "Throughput",
        format!("{:.2} req/sec", completed as f64 / elapsed.as_secs_f64())
    ]);
    table.add_row(row!["Avg latency", format!("{:.2} ms", metrics.average_latency_ms)]);
    table.add_row(row!["Cache hits", metrics.cache_hits]);
    table.add_row(row!["Attempts", metrics.retry.total_attempts]);
    table.add_row(row!["Retry delay total", format!("{} ms", metrics.retry.total_delay_ms)]);
    table.add_row(row!["Timeouts", metrics.timeouts.timeout_operations]);
    table.add_row(row!["Breaker state", format!("{:?}", metrics.circuit_breaker.state)]);
    if let Some(cache) = &metrics.cache {
        table.add_row(row!["Cache hit rate", format!("{:.1}%", cache.hit_rate * 100.0)]);
        table.add_row(row!["Local evictions", cache.evictions]);
    }

    println!("\nBenchmark Results:");
    table.printstd();

    let alerts = monitor.poll_once().await;
    if !alerts.is_empty() {
        let mut alert_table = Table::new();
        alert_table.add_row(row!["Severity", "Source", "Message"]);
        for alert in alerts {
            alert_table.add_row(row![format!("{:?}", alert.severity), alert.source, alert.message]);
        }
        println!("\nAlerts:");
        alert_table.printstd();
    }

    for recommendation in monitor.timeout_recommendations() {
        println!(
            "Recommended timeout for {}: {} ms (current default {} ms, {} attempts {} ms)",
            recommendation.service_name,
            recommendation.recommended_timeout_ms,
            recommendation.current_timeout_ms,
            opt.operation_type,
            recommendation
                .attempt_timeouts_ms
                .get(&opt.operation_type)
                .copied()
                .unwrap_or(recommendation.current_timeout_ms)
        );
    }

    Ok(())
}
