//! Prometheus metrics exported by the `transmute` binary.
//!
//! Core metrics (conversions, cache, retention, jobs) are registered from
//! `transmute_core::metrics`; the gauges here are sampled from the
//! orchestrator right before encoding.

use once_cell::sync::Lazy;
use prometheus::{self, Encoder, IntGauge, Registry, TextEncoder};

use transmute_core::ConversionOrchestrator;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// Orchestrator Metrics (collected dynamically)
// =============================================================================

/// Conversions currently holding a gate permit.
pub static CONVERSIONS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "transmute_conversions_in_flight",
        "Number of conversions currently executing",
    )
    .unwrap()
});

/// Requests waiting for a gate permit.
pub static CONVERSIONS_WAITING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "transmute_conversions_waiting",
        "Number of conversions waiting for a free slot",
    )
    .unwrap()
});

/// Entries in the conversion cache.
pub static CACHE_ENTRIES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("transmute_cache_entries", "Number of cached conversions").unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    transmute_core::metrics::register_metrics(registry).unwrap();

    registry
        .register(Box::new(CONVERSIONS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(CONVERSIONS_WAITING.clone()))
        .unwrap();
    registry.register(Box::new(CACHE_ENTRIES.clone())).unwrap();
}

/// Samples orchestrator state into the dynamic gauges.
pub async fn collect_dynamic_metrics(orchestrator: &ConversionOrchestrator) {
    let status = orchestrator.status().await;
    CONVERSIONS_IN_FLIGHT.set(status.gate.in_flight as i64);
    CONVERSIONS_WAITING.set(status.gate.waiting as i64);
    CACHE_ENTRIES.set(status.cache_entries as i64);
}

/// Encodes every registered metric in the Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
