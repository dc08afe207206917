//! Metrics module for Prometheus-based monitoring.
//!
//! Build counts by outcome, build durations, in-flight builds and workspace
//! cleanup failures.
//!
//! # Example
//!
//! ```ignore
//! use schema_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_build("success", 12.5);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{InProgressGuard, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{BUILDS_IN_PROGRESS, BUILDS_TOTAL, BUILD_DURATION, CLEANUP_FAILURES, REGISTRY};
