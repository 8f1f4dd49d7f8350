//! Outbound service communication orchestrator.
//!
//! # Responsibilities
//! - Resolve logical service names to base URLs (direct or gateway mode)
//! - Compose the resilience pipeline for each call:
//!   dedup -> cache -> circuit breaker -> retry -> HTTP -> unwrap -> metrics
//! - Attach auth and correlation headers to every outbound request
//!
//! # Design Decisions
//! - The breaker wraps the whole retry sequence: one admitted call is one
//!   trial, and only its final outcome feeds the failure window
//! - Mutations (`send`) skip dedup and cache; collapsing or replaying a
//!   non-idempotent request is never safe
//! - Waiters share the raw JSON payload; each caller decodes into its own
//!   target type, so one in-flight execution can serve heterogeneous callers
//! - Event publishing hands off to an injected channel; the bus itself lives
//!   outside this crate

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::auth::TokenProvider;
use crate::cache::ResponseCache;
use crate::config::{CommsConfig, ConfigError, HealthConfig};
use crate::context::current_request_id;
use crate::dedup::{DedupStats, RequestDeduplicator};
use crate::discovery::{self, EndpointInfo};
use crate::envelope;
use crate::error::CommsError;
use crate::observability::MetricsCollector;
use crate::resilience::{CircuitBreaker, CircuitStatus, RetryPolicy};

/// Payload shared between deduplicated callers. `None` is a logical
/// "no result" (failed envelope, empty body, type-free success).
type DedupOutcome = Result<Option<Value>, CommsError>;

/// What one HTTP attempt produced.
struct RawResponse {
    status: u16,
    etag: Option<String>,
    /// `None` for an empty body or a 304.
    body: Option<Value>,
    not_modified: bool,
}

struct Inner {
    http: reqwest::Client,
    /// lowercase logical name -> base URL without trailing slash
    routes: HashMap<String, String>,
    gateway: Option<String>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    dedup: RequestDeduplicator<DedupOutcome>,
    cache: ResponseCache,
    token: TokenProvider,
    metrics: Arc<MetricsCollector>,
    health: HealthConfig,
    events: Option<mpsc::UnboundedSender<Value>>,
}

/// Cheap-to-clone handle over the shared pipeline state.
#[derive(Clone)]
pub struct ServiceCommunicator {
    inner: Arc<Inner>,
}

impl ServiceCommunicator {
    /// Build a communicator from validated configuration.
    pub fn new(config: CommsConfig) -> Result<Self, ConfigError> {
        Self::build(config, None)
    }

    /// Build a communicator that forwards published events into `sink`.
    pub fn with_event_sink(
        config: CommsConfig,
        sink: mpsc::UnboundedSender<Value>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, Some(sink))
    }

    fn build(
        config: CommsConfig,
        events: Option<mpsc::UnboundedSender<Value>>,
    ) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.http.connect_timeout_secs))
            .timeout(Duration::from_secs(config.http.request_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(config.http.pool_idle_timeout_secs))
            .build()
            .map_err(|e| ConfigError::Setup(format!("http client: {e}")))?;

        let routes = config
            .services
            .iter()
            .map(|s| (s.name.to_lowercase(), s.base_url.trim_end_matches('/').to_string()))
            .collect();
        let gateway = config
            .gateway
            .enabled
            .then(|| config.gateway.base_url.trim_end_matches('/').to_string());

        let metrics = Arc::new(MetricsCollector::new());
        let token = TokenProvider::new(&config.auth, &config.http)?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                routes,
                gateway,
                retry: RetryPolicy::new(&config.retry),
                breaker: CircuitBreaker::new(&config.circuit_breaker, Arc::clone(&metrics)),
                dedup: RequestDeduplicator::new(),
                cache: ResponseCache::new(&config.cache),
                token,
                metrics,
                health: config.health,
                events,
            }),
        })
    }

    /// Fetch `endpoint` on `service` and decode the unwrapped payload.
    ///
    /// `Ok(None)` covers every "no result" outcome: a failed envelope, an
    /// empty body, or a payload that does not match `T`. Errors are reserved
    /// for failures of the call itself.
    pub async fn get<T: DeserializeOwned>(
        &self,
        service: &str,
        endpoint: &str,
        headers: &[(&str, &str)],
    ) -> Result<Option<T>, CommsError> {
        let service = service.to_lowercase();
        if let Err(error) = self.resolve(&service) {
            return Err(reject(&self.inner, &service, "GET", endpoint, error));
        }

        // Correlation is captured here: the task-local scope does not cross
        // into the spawned winner task.
        let request_id = correlation_id();
        let key = dedup_key("GET", &service, endpoint, headers);
        let caller_headers: Vec<(String, String)> =
            headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

        let inner = Arc::clone(&self.inner);
        let fut = fetch_cached(
            inner,
            service.clone(),
            endpoint.to_string(),
            caller_headers,
            request_id,
            key.clone(),
        );

        let outcome = self
            .inner
            .dedup
            .execute(&key, fut)
            .await
            .map_err(|_| CommsError::InFlightDropped { service: service.clone() })??;

        Ok(outcome.and_then(|payload| envelope::decode(&service, endpoint, payload)))
    }

    /// POST `body` to `endpoint` on `service` and decode the unwrapped reply.
    ///
    /// Skips cache and dedup; breaker, retry, and metrics still apply.
    pub async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        service: &str,
        endpoint: &str,
        body: &B,
        headers: &[(&str, &str)],
    ) -> Result<Option<T>, CommsError> {
        let service = service.to_lowercase();
        let base = match self.resolve(&service) {
            Ok(base) => base.to_string(),
            Err(error) => return Err(reject(&self.inner, &service, "POST", endpoint, error)),
        };
        let url = format!("{base}{endpoint}");
        let request_id = correlation_id();
        let body = match serde_json::to_value(body) {
            Ok(body) => body,
            Err(e) => {
                let error =
                    CommsError::Serialization { service: service.clone(), reason: e.to_string() };
                return Err(reject(&self.inner, &service, "POST", endpoint, error));
            }
        };
        let caller_headers: Vec<(String, String)> =
            headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();

        let inner = &self.inner;
        let bearer = match inner.token.bearer().await {
            Ok(bearer) => bearer,
            Err(error) => return Err(reject(inner, &service, "POST", endpoint, error)),
        };
        let started = Instant::now();

        let result = inner
            .breaker
            .execute(
                &service,
                inner.retry.execute(
                    |attempt| {
                        dispatch(
                            inner,
                            &service,
                            reqwest::Method::POST,
                            &url,
                            &caller_headers,
                            bearer.as_deref(),
                            &request_id,
                            None,
                            Some(&body),
                            attempt,
                        )
                    },
                    |attempt, error, delay| {
                        inner.metrics.record_retry(&service);
                        tracing::warn!(
                            service = %service,
                            endpoint = %endpoint,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "Retrying request"
                        );
                    },
                ),
            )
            .await;

        match result {
            Ok(raw) => {
                inner.metrics.record_success(&service, "POST", endpoint, raw.status, started.elapsed());
                let payload = raw.body.and_then(|b| envelope::extract_payload(&service, endpoint, b));
                Ok(payload.and_then(|p| envelope::decode(&service, endpoint, p)))
            }
            Err(error) => {
                inner.metrics.record_failure(&service, "POST", endpoint, &error, started.elapsed());
                Err(error)
            }
        }
    }

    /// Hand an event to the injected bus sink. Without a sink, or with a
    /// sink whose receiver is gone, the event is logged and dropped.
    pub fn publish_event<E: Serialize>(&self, event: &E) {
        let value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping unserializable event");
                return;
            }
        };
        match &self.inner.events {
            Some(sink) => {
                if sink.send(value).is_err() {
                    tracing::warn!("Event sink closed, dropping event");
                }
            }
            None => tracing::debug!("No event sink configured, dropping event"),
        }
    }

    /// Probe `service`'s readiness endpoint. Any non-2xx response or
    /// transport failure is unhealthy; this never errors.
    pub async fn check_health(&self, service: &str) -> bool {
        let service = service.to_lowercase();
        let base = match self.resolve(&service) {
            Ok(base) => base,
            Err(_) => {
                tracing::warn!(service = %service, "Health check for unknown service");
                return false;
            }
        };
        let url = format!("{base}{}", self.inner.health.path);
        let timeout = Duration::from_secs(self.inner.health.timeout_secs);

        match self.inner.http.get(&url).timeout(timeout).send().await {
            Ok(resp) => {
                let healthy = resp.status().is_success();
                if !healthy {
                    tracing::debug!(
                        service = %service,
                        status = resp.status().as_u16(),
                        "Health probe returned non-success"
                    );
                }
                healthy
            }
            Err(e) => {
                tracing::debug!(service = %service, error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Fetch and flatten `service`'s OpenAPI document.
    pub async fn discover_endpoints(
        &self,
        service: &str,
    ) -> Result<HashMap<String, EndpointInfo>, CommsError> {
        let service = service.to_lowercase();
        let base = self.resolve(&service)?;
        let url = format!("{base}{}", discovery::OPENAPI_PATH);

        let resp = self.inner.http.get(&url).send().await.map_err(|e| {
            transport_error(&service, &e)
        })?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(self.classify_status(&service, status));
        }
        let doc: Value = resp.json().await.map_err(|e| CommsError::Transient {
            service: service.clone(),
            status: None,
            reason: format!("invalid OpenAPI document: {e}"),
        })?;

        let endpoints = discovery::parse_openapi(&doc);
        tracing::debug!(service = %service, count = endpoints.len(), "Discovered endpoints");
        Ok(endpoints)
    }

    /// Collector for per-service call metrics.
    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    /// Deduplicator counters.
    pub fn dedup_stats(&self) -> DedupStats {
        self.inner.dedup.stats()
    }

    /// Current breaker state for `service`.
    pub fn circuit_status(&self, service: &str) -> CircuitStatus {
        self.inner.breaker.status(&service.to_lowercase())
    }

    /// Number of live response-cache entries.
    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    fn resolve(&self, service: &str) -> Result<&str, CommsError> {
        if let Some(gateway) = &self.inner.gateway {
            return Ok(gateway);
        }
        self.inner
            .routes
            .get(service)
            .map(String::as_str)
            .ok_or_else(|| CommsError::UnknownService(service.to_string()))
    }

    fn classify_status(&self, service: &str, status: u16) -> CommsError {
        classify_status(&self.inner.retry, service, status)
    }
}

/// Winner-side GET pipeline: cache -> breaker -> retry -> HTTP -> unwrap.
/// Runs in a detached task owned by the deduplicator, so everything here is
/// owned or behind the `Arc`.
async fn fetch_cached(
    inner: Arc<Inner>,
    service: String,
    endpoint: String,
    caller_headers: Vec<(String, String)>,
    request_id: String,
    cache_key: String,
) -> DedupOutcome {
    let base = match inner.gateway.as_deref().or_else(|| inner.routes.get(&service).map(String::as_str)) {
        Some(base) => base.to_string(),
        None => {
            let error = CommsError::UnknownService(service.clone());
            return Err(reject(&inner, &service, "GET", &endpoint, error));
        }
    };
    let url = format!("{base}{endpoint}");

    let cacheable = inner.cache.is_cacheable(&service, "GET", &endpoint);
    let mut stale_etag = None;
    if cacheable {
        if let Some(value) = inner.cache.get(&cache_key) {
            inner.metrics.record_cache_hit(&service, "GET", &endpoint);
            tracing::debug!(service = %service, endpoint = %endpoint, "Cache hit");
            return Ok(Some(value));
        }
        inner.metrics.record_cache_miss(&service);
        stale_etag = inner.cache.stale_etag(&cache_key);
    }

    let bearer = match inner.token.bearer().await {
        Ok(bearer) => bearer,
        Err(error) => return Err(reject(&inner, &service, "GET", &endpoint, error)),
    };
    let started = Instant::now();

    let result = inner
        .breaker
        .execute(
            &service,
            inner.retry.execute(
                |attempt| {
                    dispatch(
                        &inner,
                        &service,
                        reqwest::Method::GET,
                        &url,
                        &caller_headers,
                        bearer.as_deref(),
                        &request_id,
                        stale_etag.as_deref(),
                        None,
                        attempt,
                    )
                },
                |attempt, error, delay| {
                    inner.metrics.record_retry(&service);
                    tracing::warn!(
                        service = %service,
                        endpoint = %endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying request"
                    );
                },
            ),
        )
        .await;

    match result {
        Ok(raw) => {
            inner.metrics.record_success(&service, "GET", &endpoint, raw.status, started.elapsed());
            if raw.not_modified {
                let ttl = inner.cache.ttl_for(&service);
                let value = inner.cache.revalidated(&cache_key, ttl);
                if value.is_none() {
                    tracing::debug!(
                        service = %service,
                        endpoint = %endpoint,
                        "Entry evicted during revalidation"
                    );
                }
                return Ok(value);
            }
            let payload = raw.body.and_then(|b| envelope::extract_payload(&service, &endpoint, b));
            if cacheable {
                if let Some(payload) = &payload {
                    let ttl = inner.cache.ttl_for(&service);
                    inner.cache.set(&cache_key, payload.clone(), ttl, raw.etag);
                }
            }
            Ok(payload)
        }
        Err(error) => {
            inner.metrics.record_failure(&service, "GET", &endpoint, &error, started.elapsed());
            Err(error)
        }
    }
}

/// One HTTP attempt. Header order: caller headers, then auth, then
/// correlation; a conditional `If-None-Match` is added when a stale cached
/// entry can be revalidated.
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    inner: &Inner,
    service: &str,
    method: reqwest::Method,
    url: &str,
    caller_headers: &[(String, String)],
    bearer: Option<&str>,
    request_id: &str,
    etag: Option<&str>,
    body: Option<&Value>,
    attempt: u32,
) -> Result<RawResponse, CommsError> {
    let mut req = inner.http.request(method, url);
    for (name, value) in caller_headers {
        req = req.header(name, value);
    }
    if let Some(token) = bearer {
        req = req.bearer_auth(token);
    }
    req = req.header("X-Request-ID", request_id);
    if let Some(etag) = etag {
        req = req.header(reqwest::header::IF_NONE_MATCH, etag);
    }
    if let Some(body) = body {
        req = req.json(body);
    }

    tracing::debug!(service = %service, url = %url, attempt, "Dispatching request");

    let resp = req.send().await.map_err(|e| transport_error(service, &e))?;
    let status = resp.status().as_u16();

    if status == 304 && etag.is_some() {
        return Ok(RawResponse { status, etag: None, body: None, not_modified: true });
    }
    if !resp.status().is_success() {
        return Err(classify_status(&inner.retry, service, status));
    }

    let etag = resp
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = resp.bytes().await.map_err(|e| transport_error(service, &e))?;
    let body = if bytes.is_empty() {
        None
    } else {
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(service = %service, error = %e, "Response body is not JSON");
                None
            }
        }
    };

    Ok(RawResponse { status, etag, body, not_modified: false })
}

/// Count a call that failed before reaching the wire, then hand the error
/// back. Keeps the metrics contract intact on every early-return path.
fn reject(
    inner: &Inner,
    service: &str,
    method: &str,
    endpoint: &str,
    error: CommsError,
) -> CommsError {
    inner.metrics.record_rejection(service, method, endpoint, &error);
    error
}

fn transport_error(service: &str, error: &reqwest::Error) -> CommsError {
    let reason = if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        "connection failed".to_string()
    } else {
        error.to_string()
    };
    CommsError::Transient { service: service.to_string(), status: None, reason }
}

/// Retryability is decided here, once, when the error is built.
fn classify_status(retry: &RetryPolicy, service: &str, status: u16) -> CommsError {
    if retry.is_retryable_status(status) {
        CommsError::Transient {
            service: service.to_string(),
            status: Some(status),
            reason: format!("upstream returned status {status}"),
        }
    } else {
        CommsError::Status { service: service.to_string(), status }
    }
}

/// Correlation id for an outbound request: the inbound request's id when we
/// are inside a [`crate::context::with_request_id`] scope, a fresh v4
/// otherwise.
fn correlation_id() -> String {
    current_request_id().unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// In-flight identity of a request: method, target, and caller headers
/// (sorted, so header order never splits identical requests).
fn dedup_key(method: &str, service: &str, endpoint: &str, headers: &[(&str, &str)]) -> String {
    let mut key = format!("{method}:{service}:{endpoint}");
    if !headers.is_empty() {
        let mut pairs: Vec<String> =
            headers.iter().map(|(k, v)| format!("{}={v}", k.to_lowercase())).collect();
        pairs.sort();
        key.push(':');
        key.push_str(&pairs.join(","));
    }
    key
}
