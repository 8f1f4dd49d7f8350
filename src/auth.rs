//! Machine-to-machine token acquisition.
//!
//! # Responsibilities
//! - Acquire bearer tokens via the client-credentials flow
//! - Cache the token and refresh it ahead of expiry
//! - Fall back to an operator-configured static token on acquisition failure
//!
//! # Design Decisions
//! - The async mutex held across the fetch IS the single-flight protection:
//!   concurrent callers that find an expired token queue behind one fetch
//!   instead of stampeding the identity provider
//! - Disabled auth is the null object: `bearer()` yields `Ok(None)` (or the
//!   fallback token if one is set) and the orchestrator attaches nothing
//! - An mTLS client certificate is an alternative credential to the secret

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{AuthConfig, ConfigError, HttpClientConfig};
use crate::error::CommsError;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    300
}

#[derive(Debug, Clone)]
struct TokenEntry {
    token: String,
    expires_at: Instant,
}

/// Acquires and caches M2M bearer tokens.
pub struct TokenProvider {
    http: reqwest::Client,
    config: AuthConfig,
    refresh_margin: Duration,
    cached: Mutex<Option<TokenEntry>>,
}

impl TokenProvider {
    /// Build a provider from config.
    ///
    /// Reads the mTLS client certificate bundle, if configured, at
    /// construction time so a bad path fails at startup rather than on the
    /// first call.
    pub fn new(config: &AuthConfig, http: &HttpClientConfig) -> Result<Self, ConfigError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .timeout(Duration::from_secs(http.request_timeout_secs));

        if let Some(path) = &config.client_cert_path {
            let pem = std::fs::read(path)?;
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| ConfigError::Setup(format!("invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| ConfigError::Setup(format!("token client setup failed: {e}")))?;

        Ok(Self {
            http: client,
            config: config.clone(),
            refresh_margin: Duration::from_secs(config.refresh_margin_secs),
            cached: Mutex::new(None),
        })
    }

    /// The bearer token to attach, if any.
    ///
    /// Returns `Ok(None)` when auth is disabled and no fallback token exists.
    /// Acquisition failure is fatal for the calling request unless a fallback
    /// token is configured.
    pub async fn bearer(&self) -> Result<Option<String>, CommsError> {
        if !self.config.enabled {
            return Ok(self.config.fallback_token.clone());
        }

        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if Instant::now() + self.refresh_margin < entry.expires_at {
                return Ok(Some(entry.token.clone()));
            }
        }

        match self.fetch().await {
            Ok(entry) => {
                let token = entry.token.clone();
                *cached = Some(entry);
                Ok(Some(token))
            }
            Err(error) => match &self.config.fallback_token {
                Some(fallback) => {
                    tracing::warn!(
                        error = %error,
                        "Token acquisition failed, using configured fallback token"
                    );
                    Ok(Some(fallback.clone()))
                }
                None => Err(error),
            },
        }
    }

    async fn fetch(&self) -> Result<TokenEntry, CommsError> {
        let scope = self.config.scopes.join(" ");
        let mut params = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
        ];
        if !self.config.client_secret.is_empty() {
            params.push(("client_secret", self.config.client_secret.as_str()));
        }
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| CommsError::Auth(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CommsError::Auth(format!("token endpoint returned {status}")));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| CommsError::Auth(format!("malformed token response: {e}")))?;

        tracing::debug!(expires_in = body.expires_in, "Acquired M2M token");

        Ok(TokenEntry {
            token: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_auth_yields_nothing() {
        let provider =
            TokenProvider::new(&AuthConfig::default(), &HttpClientConfig::default()).unwrap();
        assert_eq!(provider.bearer().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disabled_auth_with_fallback_yields_fallback() {
        let config = AuthConfig {
            fallback_token: Some("static-token".into()),
            ..AuthConfig::default()
        };
        let provider = TokenProvider::new(&config, &HttpClientConfig::default()).unwrap();
        assert_eq!(provider.bearer().await.unwrap().as_deref(), Some("static-token"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_without_fallback_is_fatal() {
        let config = AuthConfig {
            enabled: true,
            token_url: "http://127.0.0.1:1/oauth/token".into(),
            client_id: "comms".into(),
            client_secret: "secret".into(),
            ..AuthConfig::default()
        };
        let provider = TokenProvider::new(&config, &HttpClientConfig::default()).unwrap();
        assert!(matches!(provider.bearer().await, Err(CommsError::Auth(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_with_fallback_degrades() {
        let config = AuthConfig {
            enabled: true,
            token_url: "http://127.0.0.1:1/oauth/token".into(),
            client_id: "comms".into(),
            client_secret: "secret".into(),
            fallback_token: Some("fallback".into()),
            ..AuthConfig::default()
        };
        let provider = TokenProvider::new(&config, &HttpClientConfig::default()).unwrap();
        assert_eq!(provider.bearer().await.unwrap().as_deref(), Some("fallback"));
    }
}
