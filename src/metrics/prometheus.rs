//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by schema-forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::{Mutex, OnceLock};

/// Global Prometheus registry for all schema-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of builds, labeled by outcome.
pub static BUILDS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Build duration in seconds, from staging to cleanup.
pub static BUILD_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Number of builds currently running.
pub static BUILDS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Total workspace entries that could not be deleted.
pub static CLEANUP_FAILURES: OnceLock<Counter> = OnceLock::new();

/// Serializes `init_metrics` so all statics come from one registry.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Initialize all metrics and register them with the registry.
///
/// Recording before this is called is a no-op. Calling it again keeps the
/// metrics from the first call.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let builds_total = CounterVec::new(
        Opts::new("schema_forge_builds_total", "Total number of builds"),
        &["outcome"],
    )?;

    let build_duration = Histogram::with_opts(
        HistogramOpts::new(
            "schema_forge_build_duration_seconds",
            "Build duration in seconds",
        )
        .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
    )?;

    let builds_in_progress = Gauge::new(
        "schema_forge_builds_in_progress",
        "Number of builds currently running",
    )?;

    let cleanup_failures = Counter::new(
        "schema_forge_workspace_cleanup_failures_total",
        "Total workspace entries that could not be deleted",
    )?;

    registry.register(Box::new(builds_total.clone()))?;
    registry.register(Box::new(build_duration.clone()))?;
    registry.register(Box::new(builds_in_progress.clone()))?;
    registry.register(Box::new(cleanup_failures.clone()))?;

    let _ = BUILDS_TOTAL.set(builds_total);
    let _ = BUILD_DURATION.set(build_duration);
    let _ = BUILDS_IN_PROGRESS.set(builds_in_progress);
    let _ = CLEANUP_FAILURES.set(cleanup_failures);
    let _ = REGISTRY.set(registry);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        init_metrics().unwrap();

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("schema_forge_builds_in_progress"));
        assert!(metrics.contains("schema_forge_workspace_cleanup_failures_total"));
    }
}
