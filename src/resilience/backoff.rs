//! Backoff delay calculation.
//!
//! # Design Decisions
//! - Pure except for the jitter draw; tests assert bounds, not exact values
//! - Saturating arithmetic: a large attempt number must clamp, never overflow
//! - Jitter scales the exponential delay by a uniform factor in [0.5, 1.0]
//!   so synchronized retries spread out instead of stampeding

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffKind;

/// Backoff strategy: attempt number -> delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// `min(base * attempt, max)`.
    Linear,
    /// `min(base * 2^(attempt-1), max)`.
    Exponential,
    /// Exponential delay scaled by a uniform random factor in [0.5, 1.0].
    ExponentialJitter,
}

impl From<BackoffKind> for BackoffStrategy {
    fn from(kind: BackoffKind) -> Self {
        match kind {
            BackoffKind::Linear => BackoffStrategy::Linear,
            BackoffKind::Exponential => BackoffStrategy::Exponential,
            BackoffKind::ExponentialJitter => BackoffStrategy::ExponentialJitter,
        }
    }
}

impl BackoffStrategy {
    /// Delay before the retry following `attempt` (1-based).
    pub fn delay(&self, attempt: u32, base: Duration, max: Duration) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = base.as_millis() as u64;
        let max_ms = max.as_millis() as u64;

        let delay_ms = match self {
            BackoffStrategy::Linear => base_ms.saturating_mul(attempt as u64).min(max_ms),
            BackoffStrategy::Exponential => exponential_ms(attempt, base_ms, max_ms),
            BackoffStrategy::ExponentialJitter => {
                let capped = exponential_ms(attempt, base_ms, max_ms);
                let factor = rand::thread_rng().gen_range(0.5..=1.0);
                ((capped as f64 * factor) as u64).min(max_ms)
            }
        };

        Duration::from_millis(delay_ms)
    }
}

fn exponential_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let exponential_base = 2u64.saturating_pow(attempt - 1);
    base_ms.saturating_mul(exponential_base).min(max_ms)
}
