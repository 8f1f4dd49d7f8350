//! Semantic configuration checks, run after deserialization.

use url::Url;

use crate::config::schema::CommsConfig;

/// A single semantic validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A service entry has an unparseable base URL.
    #[error("service '{service}' has invalid base_url '{url}'")]
    InvalidBaseUrl {
        /// Offending service name.
        service: String,
        /// Offending URL string.
        url: String,
    },

    /// Two service entries share a name (case-insensitive).
    #[error("duplicate service name '{0}'")]
    DuplicateService(String),

    /// Gateway mode is on but its base URL does not parse.
    #[error("gateway base_url '{0}' is invalid")]
    InvalidGatewayUrl(String),

    /// A numeric setting is out of range.
    #[error("{0}")]
    OutOfRange(String),

    /// Auth is enabled but incomplete.
    #[error("auth is enabled but {0} is empty")]
    IncompleteAuth(&'static str),
}

/// Validate semantic constraints the serde layer cannot express.
pub fn validate_config(config: &CommsConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for entry in &config.services {
        let name = entry.name.to_lowercase();
        if !seen.insert(name.clone()) {
            errors.push(ValidationError::DuplicateService(name));
        }
        if Url::parse(&entry.base_url).is_err() {
            errors.push(ValidationError::InvalidBaseUrl {
                service: entry.name.clone(),
                url: entry.base_url.clone(),
            });
        }
    }

    if config.gateway.enabled && Url::parse(&config.gateway.base_url).is_err() {
        errors.push(ValidationError::InvalidGatewayUrl(config.gateway.base_url.clone()));
    }

    if config.retry.max_attempts == 0 {
        errors.push(ValidationError::OutOfRange("retry.max_attempts must be >= 1".into()));
    }
    if config.retry.base_delay_ms > config.retry.max_delay_ms {
        errors.push(ValidationError::OutOfRange(
            "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
        ));
    }
    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::OutOfRange(
            "circuit_breaker.failure_threshold must be >= 1".into(),
        ));
    }
    if config.circuit_breaker.window_size < config.circuit_breaker.minimum_throughput as usize {
        errors.push(ValidationError::OutOfRange(
            "circuit_breaker.window_size must hold at least minimum_throughput samples".into(),
        ));
    }

    if config.auth.enabled {
        if config.auth.token_url.is_empty() {
            errors.push(ValidationError::IncompleteAuth("token_url"));
        }
        // Either a client secret or an mTLS client certificate must be present.
        if config.auth.client_secret.is_empty() && config.auth.client_cert_path.is_none() {
            errors.push(ValidationError::IncompleteAuth("client_secret (or client_cert_path)"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServiceEntry;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&CommsConfig::default()).is_ok());
    }

    #[test]
    fn test_bad_url_and_duplicate_name() {
        let mut config = CommsConfig::default();
        config.services.push(ServiceEntry {
            name: "Users".into(),
            base_url: "http://users:8080".into(),
        });
        config.services.push(ServiceEntry {
            name: "users".into(),
            base_url: "not a url".into(),
        });

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateService("users".into())));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidBaseUrl { .. })));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = CommsConfig::default();
        config.retry.max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_incomplete_auth_rejected() {
        let mut config = CommsConfig::default();
        config.auth.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::IncompleteAuth("token_url")));
    }
}
