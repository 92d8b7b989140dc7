// library entry
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitoring;
pub mod orchestrator;
pub mod registry;
pub mod resilience;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use cache::DistributedCache;
pub use config::{OperationType, ServiceConfig};
pub use error::{ResilienceError, Result};
pub use logging::init as init_logging;
pub use monitoring::MonitoringService;
pub use orchestrator::ResilienceOrchestrator;
pub use registry::{CacheRegistry, OrchestratorRegistry};
pub use resilience::CircuitBreakerRegistry;
