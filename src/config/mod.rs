//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CommsConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the resolution table never changes
//!   after process start
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, BackoffKind, CacheSettings, CircuitBreakerSettings, CommsConfig, GatewayConfig,
    HealthConfig, HttpClientConfig, ObservabilityConfig, RetrySettings, ServiceCachePolicy,
    ServiceEntry,
};
pub use validation::{validate_config, ValidationError};
