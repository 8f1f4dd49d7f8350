//! Resilient inter-service HTTP communication for the SkillSwap platform.
//!
//! Every outbound call from one service to another goes through the
//! [`ServiceCommunicator`], which composes the resilience pipeline around a
//! shared HTTP client.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │               SERVICE COMMUNICATOR                │
//!                    │                                                   │
//!     get/send ──────┼─▶ dedup ──▶ cache ──▶ breaker ──▶ retry ──▶ HTTP │──▶ Target
//!                    │     │         │                                   │    Service
//!     payload ◀──────┼── decode ◀─ unwrap ◀────────── response ◀────────┼────
//!                    │                                                   │
//!                    │  ┌─────────────────────────────────────────────┐ │
//!                    │  │           Cross-Cutting Concerns             │ │
//!                    │  │  ┌────────┐ ┌──────┐ ┌─────────┐ ┌────────┐ │ │
//!                    │  │  │ config │ │ auth │ │ context │ │ observ-│ │ │
//!                    │  │  │        │ │ M2M  │ │ req-id  │ │ ability│ │ │
//!                    │  │  └────────┘ └──────┘ └─────────┘ └────────┘ │ │
//!                    │  └─────────────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────────┘
//! ```
//!
//! Mutations (`send`) skip the dedup and cache stages; health checks and
//! endpoint discovery bypass the pipeline entirely.

// Core pipeline
pub mod cache;
pub mod communicator;
pub mod dedup;
pub mod envelope;
pub mod resilience;

// Cross-cutting concerns
pub mod auth;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod observability;

pub use communicator::ServiceCommunicator;
pub use config::{load_config, CommsConfig};
pub use error::CommsError;
pub use resilience::CircuitStatus;
