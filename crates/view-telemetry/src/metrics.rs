//! Prometheus metrics for graphview.
//!
//! All metrics follow the naming convention: `gv_<component>_<metric>_<unit>`
//!
//! - **Counter**: Monotonically increasing value (e.g. upstream_opens_total)
//! - **Gauge**: Value that can go up or down (e.g. subscribers_active)

use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // SUBSCRIPTION MULTIPLEXER
    // =========================================================================

    /// Shared queries with a live upstream connection
    pub static ref UPSTREAM_QUERIES_ACTIVE: Gauge = Gauge::new(
        "gv_bus_upstream_queries_active",
        "Number of upstream store queries currently open"
    ).expect("metric creation failed");

    /// Attached subscribers across all shared queries
    pub static ref SUBSCRIBERS_ACTIVE: Gauge = Gauge::new(
        "gv_bus_subscribers_active",
        "Number of subscribers currently attached to shared queries"
    ).expect("metric creation failed");

    /// Upstream opens issued
    pub static ref UPSTREAM_OPENS: Counter = Counter::new(
        "gv_bus_upstream_opens_total",
        "Total upstream queries opened against the store"
    ).expect("metric creation failed");

    /// Upstream closes issued
    pub static ref UPSTREAM_CLOSES: Counter = Counter::new(
        "gv_bus_upstream_closes_total",
        "Total upstream queries closed"
    ).expect("metric creation failed");

    /// Upstream failures delivered to subscribers
    pub static ref UPSTREAM_ERRORS: Counter = Counter::new(
        "gv_bus_upstream_errors_total",
        "Total upstream query failures"
    ).expect("metric creation failed");

    /// Snapshots handed to subscriber callbacks
    pub static ref SNAPSHOTS_DELIVERED: Counter = Counter::new(
        "gv_bus_snapshots_delivered_total",
        "Total result snapshots delivered to subscribers"
    ).expect("metric creation failed");

    // =========================================================================
    // VIEW RESOLVER
    // =========================================================================

    /// Objects rendered by the generic fallback
    pub static ref FALLBACK_RENDERS: Counter = Counter::new(
        "gv_view_fallback_renders_total",
        "Objects rendered with the fallback key/value renderer"
    ).expect("metric creation failed");

    /// Reference markers substituted for cycles or depth overflow
    pub static ref CYCLE_MARKERS: Counter = Counter::new(
        "gv_view_reference_markers_total",
        "Reference markers substituted to break cycles or bound depth"
    ).expect("metric creation failed");

    /// Renderer errors turned into inline error markers
    pub static ref RENDER_ERRORS: Counter = Counter::new(
        "gv_view_render_errors_total",
        "Renderer failures rendered as inline error markers"
    ).expect("metric creation failed");
}

/// Handle for the registered metrics
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Multiplexer
        Box::new(UPSTREAM_QUERIES_ACTIVE.clone()),
        Box::new(SUBSCRIBERS_ACTIVE.clone()),
        Box::new(UPSTREAM_OPENS.clone()),
        Box::new(UPSTREAM_CLOSES.clone()),
        Box::new(UPSTREAM_ERRORS.clone()),
        Box::new(SNAPSHOTS_DELIVERED.clone()),
        // Resolver
        Box::new(FALLBACK_RENDERS.clone()),
        Box::new(CYCLE_MARKERS.clone()),
        Box::new(RENDER_ERRORS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
