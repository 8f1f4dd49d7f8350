//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::CommsConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML for the schema.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but failed semantic validation.
    #[error("validation failed: {}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    /// A client built from this config could not be constructed.
    #[error("setup failed: {0}")]
    Setup(String),
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<CommsConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: CommsConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_round_trip() {
        let dir = std::env::temp_dir();
        let path = dir.join("skillswap_comms_test_config.toml");
        std::fs::write(
            &path,
            r#"
            [[services]]
            name = "video-calls"
            base_url = "http://video-calls:8080"

            [circuit_breaker]
            failure_threshold = 3
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.services[0].name, "video-calls");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);

        std::fs::remove_file(&path).unwrap_or_default();
    }

    #[test]
    fn test_validation_errors_surface() {
        let dir = std::env::temp_dir();
        let path = dir.join("skillswap_comms_bad_config.toml");
        std::fs::write(
            &path,
            r#"
            [retry]
            max_attempts = 0
            "#,
        )
        .unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        std::fs::remove_file(&path).unwrap_or_default();
    }
}
