//! Error taxonomy for inter-service calls.
//!
//! # Design Decisions
//! - Retryability is decided when the error is constructed, not by string
//!   inspection in the retry loop
//! - Circuit-open is distinct from transient: callers should not immediately retry
//! - Logical failures (`success: false` envelopes) and decode mismatches are
//!   NOT errors; they surface as `Ok(None)` from the communicator

use thiserror::Error;

/// Errors produced by the communication layer.
///
/// Clone is deliberate: a deduplicated call delivers the same failure to every
/// concurrent waiter.
#[derive(Debug, Clone, Error)]
pub enum CommsError {
    /// Transient transport or upstream failure. Retryable.
    #[error("transient failure calling {service}: {reason}")]
    Transient {
        /// Logical name of the target service.
        service: String,
        /// HTTP status, if the failure came from a response.
        status: Option<u16>,
        /// Human-readable cause.
        reason: String,
    },

    /// The circuit for this service is open; no call was attempted.
    #[error("circuit open for service {service}")]
    CircuitOpen {
        /// Logical name of the target service.
        service: String,
    },

    /// The service name has no entry in the resolution table. Fatal.
    #[error("unknown service '{0}'")]
    UnknownService(String),

    /// M2M token acquisition failed and no fallback token is configured.
    #[error("token acquisition failed: {0}")]
    Auth(String),

    /// Non-retryable HTTP failure (e.g. 400, 401, 404).
    #[error("service {service} returned status {status}")]
    Status {
        /// Logical name of the target service.
        service: String,
        /// The response status code.
        status: u16,
    },

    /// The shared in-flight call was dropped before producing a result.
    #[error("in-flight call to {service} was dropped before completing")]
    InFlightDropped {
        /// Logical name of the target service.
        service: String,
    },

    /// The request body could not be serialized. Non-retryable: the same
    /// body fails the same way on every attempt.
    #[error("request serialization failed for {service}: {reason}")]
    Serialization {
        /// Logical name of the target service.
        service: String,
        /// What the serializer rejected.
        reason: String,
    },
}

impl CommsError {
    /// Whether the retry layer may re-attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommsError::Transient { .. })
    }

    /// Stable short name used for metrics error-distribution keys.
    pub fn kind(&self) -> &'static str {
        match self {
            CommsError::Transient { .. } => "transient",
            CommsError::CircuitOpen { .. } => "circuit_open",
            CommsError::UnknownService(_) => "unknown_service",
            CommsError::Auth(_) => "auth",
            CommsError::Status { .. } => "status",
            CommsError::InFlightDropped { .. } => "in_flight_dropped",
            CommsError::Serialization { .. } => "serialization",
        }
    }

    /// HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CommsError::Transient { status, .. } => *status,
            CommsError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
