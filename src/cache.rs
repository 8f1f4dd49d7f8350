//! TTL response caching with per-service policies.
//!
//! # Responsibilities
//! - Store deserialized response payloads under deduplication-style keys
//! - Expire entries by TTL; expired entries read as absent
//! - Gate cacheability per service: enabled flag, allowed methods,
//!   include/exclude endpoint patterns (exclude wins)
//! - Keep expired entries that carry an ETag as revalidation candidates
//!
//! # Design Decisions
//! - Entries are replaced, never mutated; revalidation swaps in a restamped copy
//! - Patterns are exact strings or a trailing `*` prefix; no regex
//! - Only GET/HEAD are cacheable unless a policy says otherwise

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

use crate::config::{CacheSettings, ServiceCachePolicy};

/// One cached response payload.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    value: Value,
    etag: Option<String>,
    stored_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_valid(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

/// TTL-keyed store of previously fetched, deserialized responses.
pub struct ResponseCache {
    entries: DashMap<String, CachedEntry>,
    policies: HashMap<String, ServiceCachePolicy>,
    default_ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    /// Build a cache from config.
    pub fn new(settings: &CacheSettings) -> Self {
        let policies = settings
            .policies
            .iter()
            .map(|p| (p.service.to_lowercase(), p.clone()))
            .collect();
        Self {
            entries: DashMap::new(),
            policies,
            default_ttl: Duration::from_secs(settings.default_ttl_secs),
            enabled: settings.enabled,
        }
    }

    /// Whether a call to `service` with `method` on `endpoint` may use the cache.
    pub fn is_cacheable(&self, service: &str, method: &str, endpoint: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let method = method.to_uppercase();
        match self.policies.get(&service.to_lowercase()) {
            None => method == "GET" || method == "HEAD",
            Some(policy) => {
                if !policy.enabled {
                    return false;
                }
                let method_allowed = if policy.methods.is_empty() {
                    method == "GET" || method == "HEAD"
                } else {
                    policy.methods.iter().any(|m| m.eq_ignore_ascii_case(&method))
                };
                if !method_allowed {
                    return false;
                }
                // Exclude wins over include.
                if policy.exclude.iter().any(|p| pattern_matches(p, endpoint)) {
                    return false;
                }
                policy.include.is_empty()
                    || policy.include.iter().any(|p| pattern_matches(p, endpoint))
            }
        }
    }

    /// TTL for entries from `service` (policy override or the default).
    pub fn ttl_for(&self, service: &str) -> Duration {
        self.policies
            .get(&service.to_lowercase())
            .and_then(|p| p.ttl_secs)
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl)
    }

    /// Fetch a still-valid entry's payload.
    ///
    /// Expired entries read as absent. An expired entry without an ETag is
    /// evicted; with an ETag it is kept for conditional revalidation.
    pub fn get(&self, key: &str) -> Option<Value> {
        let expired_without_etag = match self.entries.get(key) {
            None => return None,
            Some(entry) if entry.is_valid() => return Some(entry.value.clone()),
            Some(entry) => entry.etag.is_none(),
        };
        if expired_without_etag {
            self.entries.remove(key);
        }
        None
    }

    /// ETag of an expired entry awaiting revalidation, if any.
    pub fn stale_etag(&self, key: &str) -> Option<String> {
        self.entries
            .get(key)
            .filter(|entry| !entry.is_valid())
            .and_then(|entry| entry.etag.clone())
    }

    /// Store a payload.
    pub fn set(&self, key: &str, value: Value, ttl: Duration, etag: Option<String>) {
        self.entries.insert(
            key.to_string(),
            CachedEntry { value, etag, stored_at: Instant::now(), ttl },
        );
    }

    /// Extend an entry's freshness after a successful conditional fetch
    /// (HTTP 304), returning the still-current payload.
    pub fn revalidated(&self, key: &str, ttl: Duration) -> Option<Value> {
        let mut entry = self.entries.get_mut(key)?;
        let refreshed = CachedEntry {
            value: entry.value.clone(),
            etag: entry.etag.clone(),
            stored_at: Instant::now(),
            ttl,
        };
        *entry = refreshed;
        Some(entry.value.clone())
    }

    /// Remove an entry.
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Number of entries currently stored (valid or awaiting revalidation).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Exact match, or prefix match when the pattern ends in `*`.
fn pattern_matches(pattern: &str, endpoint: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => endpoint.starts_with(prefix),
        None => endpoint == pattern,
    }
}
