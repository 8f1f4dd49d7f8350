//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Track per-service and per-`METHOD:endpoint` call counts and latencies
//! - Derive average / p50 / p95 / p99 from bounded sample windows
//! - Track status-code, error-kind, and circuit-transition distributions
//! - Emit the same story through the `metrics` facade for Prometheus scrape
//!
//! # Design Decisions
//! - Per-service state lives in its own DashMap entry; recording for one
//!   service never contends with another
//! - Latency windows are bounded (1000 per service, 100 per endpoint) so
//!   memory stays flat under load
//! - Percentiles use linear interpolation on sorted samples
//! - Reset is explicit operator action, never automatic

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::CommsError;

/// Bounded latency samples kept per service.
const SERVICE_LATENCY_WINDOW: usize = 1000;
/// Bounded latency samples kept per endpoint.
const ENDPOINT_LATENCY_WINDOW: usize = 100;

/// Install the Prometheus scrape endpoint.
///
/// Must be called from within a tokio runtime. Failure is logged, not fatal:
/// the in-process collector keeps working without the exporter.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
    }
}

/// Per-endpoint accumulated state.
#[derive(Debug, Default)]
struct EndpointMetrics {
    total: u64,
    successful: u64,
    failed: u64,
    latencies_ms: VecDeque<f64>,
}

impl EndpointMetrics {
    fn count(&mut self, success: bool) {
        self.total += 1;
        if success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    fn record(&mut self, success: bool, latency_ms: f64) {
        self.count(success);
        if self.latencies_ms.len() == ENDPOINT_LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);
    }
}

/// Per-service accumulated state. Guarded by its DashMap entry.
#[derive(Debug, Default)]
struct ServiceMetrics {
    total: u64,
    successful: u64,
    failed: u64,
    cache_hits: u64,
    cache_misses: u64,
    retries: u64,
    latencies_ms: VecDeque<f64>,
    status_codes: HashMap<u16, u64>,
    error_kinds: HashMap<String, u64>,
    endpoints: HashMap<String, EndpointMetrics>,
    circuit_transitions: HashMap<String, u64>,
}

impl ServiceMetrics {
    fn record_latency(&mut self, latency_ms: f64) {
        if self.latencies_ms.len() == SERVICE_LATENCY_WINDOW {
            self.latencies_ms.pop_front();
        }
        self.latencies_ms.push_back(latency_ms);
    }
}

/// Read-only view of one endpoint's metrics.
#[derive(Debug, Clone)]
pub struct EndpointSnapshot {
    /// Total calls to this endpoint.
    pub total: u64,
    /// Successful calls.
    pub successful: u64,
    /// Failed calls.
    pub failed: u64,
    /// Mean latency over the sample window, in milliseconds.
    pub average_latency_ms: f64,
    /// 95th percentile latency, in milliseconds.
    pub p95_latency_ms: f64,
}

/// Read-only view of one service's metrics.
#[derive(Debug, Clone)]
pub struct ServiceMetricsSnapshot {
    /// Total calls (including cache hits).
    pub total: u64,
    /// Successful calls.
    pub successful: u64,
    /// Failed calls.
    pub failed: u64,
    /// Calls served from the response cache.
    pub cache_hits: u64,
    /// Cache lookups that missed.
    pub cache_misses: u64,
    /// Individual retry attempts.
    pub retries: u64,
    /// Mean latency over the sample window, in milliseconds.
    pub average_latency_ms: f64,
    /// 50th percentile latency, in milliseconds.
    pub p50_latency_ms: f64,
    /// 95th percentile latency, in milliseconds.
    pub p95_latency_ms: f64,
    /// 99th percentile latency, in milliseconds.
    pub p99_latency_ms: f64,
    /// Response status code distribution.
    pub status_codes: HashMap<u16, u64>,
    /// Classified error-kind distribution.
    pub error_kinds: HashMap<String, u64>,
    /// Per-`METHOD:endpoint` breakdown.
    pub endpoints: HashMap<String, EndpointSnapshot>,
    /// Circuit transitions, keyed `from->to`.
    pub circuit_transitions: HashMap<String, u64>,
}

/// In-process metrics collector for the communication layer.
pub struct MetricsCollector {
    services: DashMap<String, ServiceMetrics>,
    started_at: RwLock<SystemTime>,
}

impl MetricsCollector {
    /// Create an empty collector stamped with the current time.
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            started_at: RwLock::new(SystemTime::now()),
        }
    }

    /// Record a successful call.
    pub fn record_success(
        &self,
        service: &str,
        method: &str,
        endpoint: &str,
        status: u16,
        latency: Duration,
    ) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        {
            let mut m = self.services.entry(service.to_string()).or_default();
            m.total += 1;
            m.successful += 1;
            *m.status_codes.entry(status).or_default() += 1;
            m.record_latency(latency_ms);
            m.endpoints
                .entry(format!("{method}:{endpoint}"))
                .or_default()
                .record(true, latency_ms);
        }

        metrics::counter!(
            "comms_requests_total",
            "service" => service.to_string(),
            "method" => method.to_string(),
            "outcome" => "success",
        )
        .increment(1);
        metrics::histogram!(
            "comms_request_duration_seconds",
            "service" => service.to_string(),
        )
        .record(latency.as_secs_f64());
    }

    /// Record a failed call.
    pub fn record_failure(
        &self,
        service: &str,
        method: &str,
        endpoint: &str,
        error: &CommsError,
        latency: Duration,
    ) {
        let latency_ms = latency.as_secs_f64() * 1000.0;
        {
            let mut m = self.services.entry(service.to_string()).or_default();
            m.total += 1;
            m.failed += 1;
            if let Some(status) = error.status() {
                *m.status_codes.entry(status).or_default() += 1;
            }
            *m.error_kinds.entry(error.kind().to_string()).or_default() += 1;
            m.record_latency(latency_ms);
            m.endpoints
                .entry(format!("{method}:{endpoint}"))
                .or_default()
                .record(false, latency_ms);
        }

        metrics::counter!(
            "comms_requests_total",
            "service" => service.to_string(),
            "method" => method.to_string(),
            "outcome" => "failure",
        )
        .increment(1);
        metrics::counter!(
            "comms_errors_total",
            "service" => service.to_string(),
            "kind" => error.kind(),
        )
        .increment(1);
    }

    /// Record a call served from the response cache.
    pub fn record_cache_hit(&self, service: &str, method: &str, endpoint: &str) {
        {
            let mut m = self.services.entry(service.to_string()).or_default();
            m.total += 1;
            m.successful += 1;
            m.cache_hits += 1;
            // A hit never touched the wire; a synthetic zero sample would
            // drag the endpoint's latency percentiles down.
            m.endpoints.entry(format!("{method}:{endpoint}")).or_default().count(true);
        }
        metrics::counter!("comms_cache_events_total", "service" => service.to_string(), "event" => "hit")
            .increment(1);
    }

    /// Record a call rejected before it reached the wire (unknown service,
    /// auth failure, unserializable body). The failure counts toward totals
    /// and error kinds; nothing was measured, so no latency sample is taken.
    pub fn record_rejection(&self, service: &str, method: &str, endpoint: &str, error: &CommsError) {
        {
            let mut m = self.services.entry(service.to_string()).or_default();
            m.total += 1;
            m.failed += 1;
            *m.error_kinds.entry(error.kind().to_string()).or_default() += 1;
            m.endpoints.entry(format!("{method}:{endpoint}")).or_default().count(false);
        }

        metrics::counter!(
            "comms_requests_total",
            "service" => service.to_string(),
            "method" => method.to_string(),
            "outcome" => "failure",
        )
        .increment(1);
        metrics::counter!(
            "comms_errors_total",
            "service" => service.to_string(),
            "kind" => error.kind(),
        )
        .increment(1);
    }

    /// Record a cache lookup that missed.
    pub fn record_cache_miss(&self, service: &str) {
        self.services.entry(service.to_string()).or_default().cache_misses += 1;
        metrics::counter!("comms_cache_events_total", "service" => service.to_string(), "event" => "miss")
            .increment(1);
    }

    /// Record one retry attempt against a service.
    pub fn record_retry(&self, service: &str) {
        self.services.entry(service.to_string()).or_default().retries += 1;
        metrics::counter!("comms_retries_total", "service" => service.to_string()).increment(1);
    }

    /// Record a circuit-breaker state transition.
    pub fn record_circuit_transition(&self, service: &str, from: &str, to: &str) {
        {
            let mut m = self.services.entry(service.to_string()).or_default();
            *m.circuit_transitions.entry(format!("{from}->{to}")).or_default() += 1;
        }
        metrics::counter!(
            "comms_circuit_transitions_total",
            "service" => service.to_string(),
            "from" => from.to_string(),
            "to" => to.to_string(),
        )
        .increment(1);
    }

    /// Snapshot one service's metrics.
    pub fn snapshot(&self, service: &str) -> Option<ServiceMetricsSnapshot> {
        self.services.get(service).map(|m| snapshot_of(&m))
    }

    /// Snapshot every service.
    pub fn snapshot_all(&self) -> HashMap<String, ServiceMetricsSnapshot> {
        self.services
            .iter()
            .map(|entry| (entry.key().clone(), snapshot_of(entry.value())))
            .collect()
    }

    /// When collection (last) started.
    pub fn started_at(&self) -> SystemTime {
        *self.started_at.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop all accumulated state and restamp the collection start.
    pub fn reset(&self) {
        self.services.clear();
        *self.started_at.write().unwrap_or_else(|e| e.into_inner()) = SystemTime::now();
        tracing::info!("Metrics collector reset");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_of(m: &ServiceMetrics) -> ServiceMetricsSnapshot {
    let samples: Vec<f64> = m.latencies_ms.iter().copied().collect();
    ServiceMetricsSnapshot {
        total: m.total,
        successful: m.successful,
        failed: m.failed,
        cache_hits: m.cache_hits,
        cache_misses: m.cache_misses,
        retries: m.retries,
        average_latency_ms: mean(&samples),
        p50_latency_ms: percentile(&samples, 50.0),
        p95_latency_ms: percentile(&samples, 95.0),
        p99_latency_ms: percentile(&samples, 99.0),
        status_codes: m.status_codes.clone(),
        error_kinds: m.error_kinds.clone(),
        endpoints: m
            .endpoints
            .iter()
            .map(|(key, e)| {
                let endpoint_samples: Vec<f64> = e.latencies_ms.iter().copied().collect();
                (
                    key.clone(),
                    EndpointSnapshot {
                        total: e.total,
                        successful: e.successful,
                        failed: e.failed,
                        average_latency_ms: mean(&endpoint_samples),
                        p95_latency_ms: percentile(&endpoint_samples, 95.0),
                    },
                )
            })
            .collect(),
        circuit_transitions: m.circuit_transitions.clone(),
    }
}

fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Percentile by linear interpolation on sorted samples.
fn percentile(samples: &[f64], p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let fraction = rank - lower as f64;
    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolation() {
        let samples = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&samples, 50.0), 25.0);
        assert_eq!(percentile(&samples, 0.0), 10.0);
        assert_eq!(percentile(&samples, 100.0), 40.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
    }

    #[test]
    fn test_counts_and_snapshot() {
        let collector = MetricsCollector::new();
        collector.record_success("users", "GET", "/api/users/1", 200, Duration::from_millis(20));
        collector.record_success("users", "GET", "/api/users/1", 200, Duration::from_millis(40));
        collector.record_failure(
            "users",
            "POST",
            "/api/users",
            &CommsError::Status { service: "users".into(), status: 400 },
            Duration::from_millis(10),
        );
        collector.record_cache_hit("users", "GET", "/api/users/1");
        collector.record_cache_miss("users");
        collector.record_retry("users");

        let snap = collector.snapshot("users").unwrap();
        assert_eq!(snap.total, 4);
        assert_eq!(snap.successful, 3);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.status_codes.get(&200), Some(&2));
        assert_eq!(snap.status_codes.get(&400), Some(&1));
        assert_eq!(snap.error_kinds.get("status"), Some(&1));
        assert_eq!(snap.endpoints.get("GET:/api/users/1").unwrap().total, 3);
        assert_eq!(snap.average_latency_ms, (20.0 + 40.0 + 10.0) / 3.0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let collector = MetricsCollector::new();
        for i in 0..(SERVICE_LATENCY_WINDOW + 500) {
            collector.record_success("users", "GET", "/x", 200, Duration::from_millis(i as u64));
        }
        let m = collector.services.get("users").unwrap();
        assert_eq!(m.latencies_ms.len(), SERVICE_LATENCY_WINDOW);
    }

    #[test]
    fn test_reset_clears_and_restamps() {
        let collector = MetricsCollector::new();
        let before = collector.started_at();
        collector.record_success("users", "GET", "/x", 200, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(5));

        collector.reset();
        assert!(collector.snapshot("users").is_none());
        assert!(collector.started_at() > before);
    }

    #[test]
    fn test_cache_hits_leave_endpoint_latency_untouched() {
        let collector = MetricsCollector::new();
        collector.record_success("users", "GET", "/api/users/1", 200, Duration::from_millis(100));
        for _ in 0..20 {
            collector.record_cache_hit("users", "GET", "/api/users/1");
        }

        let snap = collector.snapshot("users").unwrap();
        let endpoint = snap.endpoints.get("GET:/api/users/1").unwrap();
        assert_eq!(endpoint.total, 21);
        // Only the one real call contributed a sample.
        assert_eq!(endpoint.average_latency_ms, 100.0);
        assert_eq!(endpoint.p95_latency_ms, 100.0);
    }

    #[test]
    fn test_rejections_count_without_latency_samples() {
        let collector = MetricsCollector::new();
        collector.record_rejection(
            "users",
            "GET",
            "/api/users/1",
            &CommsError::Auth("idp unreachable".into()),
        );

        let snap = collector.snapshot("users").unwrap();
        assert_eq!(snap.total, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.error_kinds.get("auth"), Some(&1));
        assert_eq!(snap.average_latency_ms, 0.0);
        assert_eq!(snap.endpoints.get("GET:/api/users/1").unwrap().failed, 1);
    }

    #[test]
    fn test_circuit_transition_distribution() {
        let collector = MetricsCollector::new();
        collector.record_circuit_transition("users", "closed", "open");
        collector.record_circuit_transition("users", "closed", "open");
        collector.record_circuit_transition("users", "open", "half_open");

        let snap = collector.snapshot("users").unwrap();
        assert_eq!(snap.circuit_transitions.get("closed->open"), Some(&2));
        assert_eq!(snap.circuit_transitions.get("open->half_open"), Some(&1));
    }
}
