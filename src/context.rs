//! Request-correlation context.
//!
//! # Responsibilities
//! - Carry the inbound request's correlation ID across await points
//! - Let the communicator stamp `X-Request-ID` on outbound calls
//!
//! # Design Decisions
//! - A tokio task-local, not a global: concurrent requests never see each
//!   other's IDs
//! - Absent context is fine; the communicator generates a fresh UUID instead

use std::future::Future;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Run `fut` with `request_id` as the ambient correlation ID.
///
/// Services call this at the top of their inbound handlers so every outbound
/// call made while handling the request carries the same `X-Request-ID`.
pub async fn with_request_id<F: Future>(request_id: String, fut: F) -> F::Output {
    REQUEST_ID.scope(request_id, fut).await
}

/// The ambient correlation ID, if one is set.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}
