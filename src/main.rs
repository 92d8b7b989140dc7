use dotenv::dotenv;
use std::sync::Arc;
use tracing::{info, warn};

use resilience_orchestrator::config::OperationType;
use resilience_orchestrator::storage::{MemoryStorage, RedisStorage, StorageBackend};
use resilience_orchestrator::{
    init_logging, CacheRegistry, CircuitBreakerRegistry, MonitoringService, OrchestratorRegistry,
    ResilienceOrchestrator, ServiceConfig,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();
    info!("Resilience orchestrator starting up");

    let mut config = match std::env::var("ORCHESTRATOR_CONFIG") {
        Ok(path) => ServiceConfig::from_file(&path)?,
        Err(_) => ServiceConfig::default(),
    };
    config.apply_env_overrides()?;
    info!(service = %config.service_name, "Configuration loaded");

    let backend: Arc<dyn StorageBackend> = match &config.redis {
        Some(redis) => match RedisStorage::new(redis.clone()).await {
            Ok(storage) => Arc::new(storage),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, using in-memory shared tier");
                Arc::new(MemoryStorage::new(config.memory.clone()))
            }
        },
        None => Arc::new(MemoryStorage::new(config.memory.clone())),
    };

    let breakers = CircuitBreakerRegistry::new(config.orchestrator.circuit_breaker.clone());
    let caches = Arc::new(CacheRegistry::new());
    let orchestrators = Arc::new(OrchestratorRegistry::new());

    let cache = caches.get_or_create(&config.service_name, config.cache.clone(), backend);
    let orchestrator = Arc::new(ResilienceOrchestrator::new(
        config.service_name.as_str(),
        config.orchestrator.clone(),
        &breakers,
        Some(cache),
    ));
    orchestrators.register(Arc::clone(&orchestrator));

    let monitor = Arc::new(MonitoringService::new(
        Arc::clone(&orchestrators),
        Arc::clone(&caches),
        config.monitoring.clone(),
    ));
    let monitor_handle = monitor.start();

    // Warm-up call; the second one is served from the cache
    for _ in 0..2 {
        let greeting: Vec<String> = orchestrator
            .execute(
                || async { Ok(vec!["ready".to_string()]) },
                "startup-check",
                OperationType::Read,
                Some("startup:check"),
            )
            .await?;
        info!(?greeting, "Startup check completed");
    }

    let health = orchestrator.health_status().await;
    info!(
        healthy = health.healthy,
        circuit = ?health.circuit_state,
        "Orchestrator initialized successfully"
    );

    info!("Press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;

    monitor.stop();
    monitor_handle.abort();

    let metrics = orchestrator.metrics().await;
    info!(metrics = %serde_json::to_string(&metrics)?, "Final metrics");
    Ok(())
}
