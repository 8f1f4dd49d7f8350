//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every call produces:
//!     → logging.rs (structured log events, correlation IDs)
//!     → metrics.rs (counters, latency windows, percentiles)
//!
//! Consumers:
//!     → Log aggregation (stdout, file, remote)
//!     → Metrics endpoint (Prometheus scrape)
//!     → In-process snapshots (operator/diagnostics API)
//! ```
//!
//! # Design Decisions
//! - Metric updates are cheap (per-service shard locks, bounded windows)
//! - The in-process collector and the Prometheus facade tell the same story
//! - Request ID flows through all log events

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{init_metrics, EndpointSnapshot, MetricsCollector, ServiceMetricsSnapshot};

use crate::config::ObservabilityConfig;

/// Initialize logging and, when enabled, the Prometheus exporter from config.
pub fn init(config: &ObservabilityConfig) {
    init_logging(&config.log_level);
    if config.metrics_enabled {
        match config.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                address = %config.metrics_address,
                error = %e,
                "Invalid metrics listen address"
            ),
        }
    }
}
