//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → circuit_breaker.rs (fail fast if the service is known-bad)
//!     → retry.rs (bounded retries on transient failures)
//!     → backoff.rs (delay between attempts)
//! ```
//!
//! # Design Decisions
//! - The breaker wraps the whole retry sequence: one call = one sample,
//!   regardless of how many attempts it took
//! - Retryability is a property of the error, decided at construction
//! - All waits are cancellable tokio sleeps

pub mod backoff;
pub mod circuit_breaker;
pub mod retry;

pub use backoff::BackoffStrategy;
pub use circuit_breaker::{CircuitBreaker, CircuitStatus};
pub use retry::RetryPolicy;
