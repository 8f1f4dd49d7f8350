//! Response envelope unwrapping.
//!
//! Internal services reply with a uniform envelope:
//!
//! ```json
//! { "success": true, "data": { ... }, "errors": ["..."] }
//! ```
//!
//! # Design Decisions
//! - Two-phase parse: a structural probe for the envelope shape, then typed
//!   decode of the payload — alternate wire formats stay contained here
//! - `success: false` is a logical failure, not an exception: the transport
//!   worked, the operation didn't; callers see "no result"
//! - Nothing in this path returns an error; mismatches degrade to "no result"
//!   with a logged warning

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Extract the payload from a response body.
///
/// Probes for the `{success, data, errors}` envelope; a body without that
/// shape is treated as the payload itself. Returns `None` for a
/// `success: false` envelope (logical failure) or a `success: true` envelope
/// with null/absent data.
pub fn extract_payload(service: &str, endpoint: &str, body: Value) -> Option<Value> {
    let is_envelope = body
        .as_object()
        .map(|obj| obj.get("success").map(Value::is_boolean).unwrap_or(false))
        .unwrap_or(false);

    if !is_envelope {
        // Raw payload, no envelope.
        return Some(body);
    }

    let mut obj = match body {
        Value::Object(obj) => obj,
        _ => unreachable!("is_envelope implies an object"),
    };

    let success = obj.get("success").and_then(Value::as_bool).unwrap_or(false);
    if !success {
        let errors: Vec<String> = obj
            .remove("errors")
            .and_then(|e| serde_json::from_value(e).ok())
            .unwrap_or_else(|| vec!["request failed".to_string()]);
        tracing::warn!(
            service = %service,
            endpoint = %endpoint,
            errors = ?errors,
            "Service reported logical failure"
        );
        return None;
    }

    match obj.remove("data") {
        Some(Value::Null) | None => {
            tracing::debug!(
                service = %service,
                endpoint = %endpoint,
                "Successful envelope carried no data"
            );
            None
        }
        Some(data) => Some(data),
    }
}

/// Decode a payload into the caller's type. Never errors: a mismatch logs a
/// warning and yields `None`.
pub fn decode<T: DeserializeOwned>(service: &str, endpoint: &str, payload: Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(value) => Some(value),
        Err(error) => {
            tracing::warn!(
                service = %service,
                endpoint = %endpoint,
                error = %error,
                target_type = std::any::type_name::<T>(),
                "Response payload did not match expected type"
            );
            None
        }
    }
}
