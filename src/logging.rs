use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,resilience_orchestrator=trace
pub fn init() {
    INIT.call_once(|| {
        // Set up the subscriber with a simple console format
        tracing_subscriber::registry()
            .with(default_filter())
            .with(
                fmt::layer()
                    .with_target(true) // Include module path in logs
                    .with_thread_ids(true) // Useful for debugging concurrency issues
                    .with_line_number(true),
            ) // Include line numbers for error location
            .init();

        tracing::info!("Logging initialized");
    });
}

/// Initialize logging with one JSON object per line, for log shippers.
pub fn init_json() {
    INIT.call_once(|| {
        tracing_subscriber::registry()
            .with(default_filter())
            .with(fmt::layer().json().with_current_span(false))
            .init();

        tracing::info!("JSON logging initialized");
    });
}

/// Macro for logging the outcome of an orchestrated execution
#[macro_export]
macro_rules! resilience_event {
    ($service:expr, $operation:expr, $op_type:expr, $success:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            service = $service,
            operation = $operation,
            operation_type = %$op_type,
            success = $success,
            elapsed_ms = $elapsed_ms,
            "Resilient execution"
        )
    };
}

/// Macro for logging cache operations with timing
#[macro_export]
macro_rules! cache_op {
    ($operation:expr, $key:expr, $outcome:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            outcome = $outcome,
            elapsed_ms = $elapsed_ms,
            "Cache operation"
        )
    };
}
