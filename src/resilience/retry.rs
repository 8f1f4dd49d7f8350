//! Retry execution with bounded attempts.
//!
//! # Responsibilities
//! - Execute an operation up to `max_attempts` times
//! - Retry only on errors classified as transient
//! - Sleep between attempts per the configured backoff strategy
//!
//! # Design Decisions
//! - The `on_retry` hook observes, it cannot veto; metrics/logging only
//! - The backoff sleep is a plain tokio sleep: dropping the future cancels
//!   the wait promptly

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::error::CommsError;
use crate::resilience::backoff::BackoffStrategy;

/// Executes operations with bounded, backoff-spaced retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    strategy: BackoffStrategy,
    retryable_statuses: HashSet<u16>,
}

impl RetryPolicy {
    /// Build a policy from config.
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            // Guarded by config validation, but never allow zero attempts.
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            strategy: settings.strategy.into(),
            retryable_statuses: settings.retryable_statuses.iter().copied().collect(),
        }
    }

    /// Whether a response status belongs to the configured retryable set.
    ///
    /// Used at error-construction time to classify a failed response as
    /// `Transient` (retryable) or `Status` (fatal).
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Configured maximum attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op`, retrying transient failures.
    ///
    /// `op` receives the 1-based attempt number. `on_retry(attempt, error,
    /// delay)` fires after a failed attempt that will be retried, once the
    /// delay is known.
    pub async fn execute<T, F, Fut, C>(&self, mut op: F, mut on_retry: C) -> Result<T, CommsError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, CommsError>>,
        C: FnMut(u32, &CommsError, Duration),
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= self.max_attempts || !error.is_retryable() {
                        return Err(error);
                    }

                    let delay = self.strategy.delay(attempt, self.base_delay, self.max_delay);
                    on_retry(attempt, &error, delay);
                    tracing::debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
