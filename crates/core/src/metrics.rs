//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Conversions (results, duration, backend failures)
//! - Conversion cache (hits, misses, stale entries)
//! - Retention sweeps and background jobs

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Conversions
// =============================================================================

/// Conversions total by category and result.
pub static CONVERSIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("transmute_conversions_total", "Total conversion requests"),
        &["category", "result"], // result: "success", "cache_hit", or an error kind
    )
    .unwrap()
});

/// Conversion duration in seconds (cache misses only).
pub static CONVERSION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "transmute_conversion_duration_seconds",
            "Duration of executed conversions",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["category"],
    )
    .unwrap()
});

/// Failed backend attempts inside fallback chains.
pub static BACKEND_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "transmute_backend_failures_total",
            "Backend attempts that did not produce an output",
        ),
        &["backend", "reason"], // reason: "unavailable", "failed"
    )
    .unwrap()
});

// =============================================================================
// Cache
// =============================================================================

/// Cache lookups by result.
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("transmute_cache_lookups_total", "Conversion cache lookups"),
        &["result"], // "hit", "miss", "stale"
    )
    .unwrap()
});

// =============================================================================
// Retention & jobs
// =============================================================================

/// Entries removed by the retention sweeper.
pub static SWEPT_ENTRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "transmute_swept_entries_total",
            "Files and directories removed by retention sweeps",
        ),
        &["kind"], // "file", "dir"
    )
    .unwrap()
});

/// Completed retention sweeps.
pub static SWEEPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("transmute_sweeps_total", "Completed retention sweeps").unwrap()
});

/// Background jobs by final status.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("transmute_jobs_finished_total", "Finished background jobs"),
        &["status"], // "success", "failure"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Conversions
        Box::new(CONVERSIONS_TOTAL.clone()),
        Box::new(CONVERSION_DURATION.clone()),
        Box::new(BACKEND_FAILURES.clone()),
        // Cache
        Box::new(CACHE_LOOKUPS.clone()),
        // Retention & jobs
        Box::new(SWEPT_ENTRIES.clone()),
        Box::new(SWEEPS_TOTAL.clone()),
        Box::new(JOBS_FINISHED.clone()),
    ]
}

/// Registers every core metric in `registry`.
pub fn register_metrics(registry: &prometheus::Registry) -> prometheus::Result<()> {
    for collector in all_metrics() {
        registry.register(collector)?;
    }
    Ok(())
}
