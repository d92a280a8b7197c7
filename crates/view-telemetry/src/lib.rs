//! # View Telemetry
//!
//! Logging and metrics for the graphview crates.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` with an env filter and either
//!   human-readable or JSON output.
//! - **Metrics**: Prometheus counters and gauges for the subscription
//!   multiplexer and the view resolver.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use view_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GV_SERVICE_NAME` | `graphview` | Service name in log lines |
//! | `GV_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `GV_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `GV_JSON_LOGS` | `false` | JSON formatted logs |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, CYCLE_MARKERS, FALLBACK_RENDERS,
    RENDER_ERRORS, SNAPSHOTS_DELIVERED, SUBSCRIBERS_ACTIVE, UPSTREAM_CLOSES, UPSTREAM_ERRORS,
    UPSTREAM_OPENS, UPSTREAM_QUERIES_ACTIVE,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard to hold for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    init_logging(&config)?;
    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(TelemetryGuard { _metrics: metrics })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
