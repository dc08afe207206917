//! High-level recording interface over the raw Prometheus metrics.

use prometheus::Gauge;

use super::prometheus::{BUILDS_IN_PROGRESS, BUILDS_TOTAL, BUILD_DURATION, CLEANUP_FAILURES};

/// Holds one slot of the in-progress gauge; released on drop, including
/// when the build future is cancelled.
#[derive(Debug)]
#[must_use = "the build counts as finished as soon as the guard is dropped"]
pub struct InProgressGuard {
    gauge: Option<Gauge>,
}

impl InProgressGuard {
    fn acquire(gauge: Option<Gauge>) -> Self {
        if let Some(gauge) = &gauge {
            gauge.inc();
        }
        Self { gauge }
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        if let Some(gauge) = &self.gauge {
            gauge.dec();
        }
    }
}

/// Metrics collector for recording build metrics.
///
/// Every method is a no-op until `init_metrics()` has run, so the collector
/// can be used unconditionally.
///
/// # Example
///
/// ```ignore
/// use schema_forge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// let _in_progress = collector.track_build();
/// collector.record_build("success", 4.2);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Record a completed build.
    ///
    /// # Arguments
    ///
    /// * `outcome` - One of `success`, `failure`, `timeout`, `staging_error`,
    ///   `launch_error`, `crash`
    /// * `duration_secs` - Wall-clock build duration in seconds
    pub fn record_build(&self, outcome: &str, duration_secs: f64) {
        if let Some(builds_total) = BUILDS_TOTAL.get() {
            builds_total.with_label_values(&[outcome]).inc();
        }

        if let Some(build_duration) = BUILD_DURATION.get() {
            build_duration.observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded build metric"
        );
    }

    /// Counts a build as in progress until the returned guard is dropped.
    pub fn track_build(&self) -> InProgressGuard {
        InProgressGuard::acquire(BUILDS_IN_PROGRESS.get().cloned())
    }

    /// Record workspace entries that could not be deleted.
    pub fn record_cleanup_failures(&self, count: usize) {
        if count == 0 {
            return;
        }

        if let Some(counter) = CLEANUP_FAILURES.get() {
            counter.inc_by(count as f64);
        }

        tracing::trace!(count = count, "Recorded cleanup failures");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_record_build() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();

        let before = BUILDS_TOTAL
            .get()
            .map(|c| c.with_label_values(&["timeout"]).get())
            .unwrap_or(0.0);
        collector.record_build("timeout", 1.5);
        let after = BUILDS_TOTAL
            .get()
            .map(|c| c.with_label_values(&["timeout"]).get())
            .unwrap_or(0.0);

        assert!(after >= before + 1.0);
        assert!(export_metrics().contains("outcome=\"timeout\""));
    }

    #[test]
    fn test_record_cleanup_failures() {
        init_metrics().unwrap();
        let collector = MetricsCollector::new();

        let before = CLEANUP_FAILURES.get().map(|c| c.get()).unwrap_or(0.0);
        collector.record_cleanup_failures(0);
        collector.record_cleanup_failures(3);
        let after = CLEANUP_FAILURES.get().map(|c| c.get()).unwrap_or(0.0);

        assert!(after >= before + 3.0);
    }

    #[test]
    fn test_in_progress_guard_releases_on_drop() {
        let gauge = Gauge::new("test_builds_in_progress", "test gauge").unwrap();

        let first = InProgressGuard::acquire(Some(gauge.clone()));
        let second = InProgressGuard::acquire(Some(gauge.clone()));
        assert_eq!(gauge.get(), 2.0);

        drop(first);
        assert_eq!(gauge.get(), 1.0);
        drop(second);
        assert_eq!(gauge.get(), 0.0);
    }

    #[tokio::test]
    async fn test_in_progress_guard_released_by_cancelled_future() {
        let gauge = Gauge::new("test_cancelled_builds", "test gauge").unwrap();
        let tracked = gauge.clone();

        let pending = async move {
            let _guard = InProgressGuard::acquire(Some(tracked));
            futures::future::pending::<()>().await;
        };
        let cancelled = tokio::time::timeout(std::time::Duration::from_millis(50), pending).await;

        assert!(cancelled.is_err());
        assert_eq!(gauge.get(), 0.0);
    }

    #[test]
    fn test_track_build_without_init_is_noop() {
        let guard = InProgressGuard::acquire(None);
        drop(guard);
    }
}
