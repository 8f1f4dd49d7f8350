//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! communication layer. All types derive Serde traits for deserialization
//! from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the inter-service communication layer.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CommsConfig {
    /// Service resolution table: logical name -> base URL.
    pub services: Vec<ServiceEntry>,

    /// Gateway mode: route every logical name through one base URL.
    pub gateway: GatewayConfig,

    /// Shared HTTP client settings.
    pub http: HttpClientConfig,

    /// Retry settings.
    pub retry: RetrySettings,

    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerSettings,

    /// Response cache settings.
    pub cache: CacheSettings,

    /// Machine-to-machine auth settings.
    pub auth: AuthConfig,

    /// Health check settings.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// One entry in the service resolution table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceEntry {
    /// Logical service name (matched case-insensitively).
    pub name: String,

    /// Base URL (e.g. "http://notifications:8080").
    pub base_url: String,
}

/// Gateway-mode configuration.
///
/// When enabled, every logical name resolves to `base_url`; targets sit
/// behind one API gateway instead of being addressed directly.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Send all traffic through the gateway.
    pub enabled: bool,

    /// Gateway base URL.
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://gateway:8080".to_string(),
        }
    }
}

/// Shared HTTP client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Idle pooled connection timeout in seconds.
    pub pool_idle_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            pool_idle_timeout_secs: 60,
        }
    }
}

/// Backoff strategy selector for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Delay grows linearly with the attempt number.
    Linear,
    /// Delay doubles each attempt.
    Exponential,
    /// Exponential delay scaled by a random factor in [0.5, 1.0].
    #[default]
    ExponentialJitter,
}

/// Retry settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,

    /// Base delay for backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Backoff strategy.
    pub strategy: BackoffKind,

    /// HTTP status codes treated as transient.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            strategy: BackoffKind::ExponentialJitter,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

/// Circuit breaker settings.
///
/// Windowing model: a sliding window of the last `window_size` call outcomes
/// per service. The circuit opens when the window holds at least
/// `minimum_throughput` samples and at least `failure_threshold` failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Failures within the window before the circuit opens.
    pub failure_threshold: u32,

    /// Minimum samples in the window before the circuit may open.
    pub minimum_throughput: u32,

    /// How long the circuit stays open before a half-open trial, in seconds.
    pub break_secs: u64,

    /// Sliding window size in samples.
    pub window_size: usize,

    /// Per-call deadline enforced by the breaker, in seconds.
    pub call_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            minimum_throughput: 5,
            break_secs: 30,
            window_size: 20,
            call_timeout_secs: 30,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Enable response caching.
    pub enabled: bool,

    /// Default TTL for cached responses in seconds.
    pub default_ttl_secs: u64,

    /// Per-service cacheability policies. A service without a policy uses the
    /// defaults (GET/HEAD, every endpoint, default TTL).
    pub policies: Vec<ServiceCachePolicy>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 60,
            policies: Vec::new(),
        }
    }
}

/// Per-service cacheability policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceCachePolicy {
    /// Logical service name this policy applies to.
    pub service: String,

    /// Enable caching for this service.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Methods that may be cached. GET/HEAD if empty.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Endpoint patterns to include (exact or trailing `*`). Empty = all.
    #[serde(default)]
    pub include: Vec<String>,

    /// Endpoint patterns to exclude. Exclude wins over include.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// TTL override in seconds for this service.
    pub ttl_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// Machine-to-machine auth configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable M2M token acquisition. When disabled no Authorization header
    /// is attached (unless a fallback token is set).
    pub enabled: bool,

    /// Token endpoint URL (client-credentials flow).
    pub token_url: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret.
    pub client_secret: String,

    /// Requested scopes.
    pub scopes: Vec<String>,

    /// Refresh the token this many seconds before its reported expiry.
    pub refresh_margin_secs: u64,

    /// Static bearer token used when acquisition fails (or when auth is
    /// disabled but calls still need a credential). Operator escape hatch.
    pub fallback_token: Option<String>,

    /// PEM bundle (cert + key) for an mTLS client certificate, as an
    /// alternative credential for the token endpoint.
    pub client_cert_path: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: Vec::new(),
            refresh_margin_secs: 60,
            fallback_token: None,
            client_cert_path: None,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Readiness path probed on the target service.
    pub path: String,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            path: "/health/ready".to_string(),
            timeout_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
