//! Endpoint discovery from OpenAPI documents.
//!
//! # Responsibilities
//! - Fetch a service's `/swagger/v1/swagger.json` and flatten its `paths`
//!   into a `"METHOD:path"` map
//! - Surface per-operation summary, tags, and whether the operation declares
//!   a security requirement

use std::collections::HashMap;

use serde_json::Value;

/// What discovery knows about a single operation.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointInfo {
    pub summary: String,
    pub tags: Vec<String>,
    pub requires_auth: bool,
}

/// Path of the OpenAPI document relative to a service's base URL.
pub const OPENAPI_PATH: &str = "/swagger/v1/swagger.json";

const HTTP_METHODS: [&str; 7] = ["get", "post", "put", "delete", "patch", "head", "options"];

/// Flatten an OpenAPI document's `paths` object into `"METHOD:path"` keys.
///
/// Entries under a path that are not HTTP methods (`parameters`, `summary`,
/// extensions) are skipped. A document without a `paths` object yields an
/// empty map.
pub fn parse_openapi(doc: &Value) -> HashMap<String, EndpointInfo> {
    let mut endpoints = HashMap::new();

    let paths = match doc.get("paths").and_then(Value::as_object) {
        Some(paths) => paths,
        None => return endpoints,
    };

    for (path, operations) in paths {
        let operations = match operations.as_object() {
            Some(ops) => ops,
            None => continue,
        };
        for (method, op) in operations {
            if !HTTP_METHODS.contains(&method.as_str()) {
                continue;
            }
            let summary = op
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let tags: Vec<String> = op
                .get("tags")
                .and_then(|t| serde_json::from_value(t.clone()).ok())
                .unwrap_or_default();
            let requires_auth = op
                .get("security")
                .and_then(Value::as_array)
                .map(|s| !s.is_empty())
                .unwrap_or(false);

            let key = format!("{}:{}", method.to_ascii_uppercase(), path);
            endpoints.insert(key, EndpointInfo { summary, tags, requires_auth });
        }
    }

    endpoints
}
