//! Circuit breaker for downstream service protection.
//!
//! # States
//! - Closed: normal operation, requests pass through, outcomes sampled
//! - Open: service assumed down, requests fail fast
//! - Half-Open: testing if the service recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= threshold within the sample window
//! Open → Half-Open: after the break duration (evaluated lazily on the next call)
//! Half-Open → Closed: trial request succeeds
//! Half-Open → Open: trial request fails
//! ```
//!
//! # Design Decisions
//! - Per-service circuit, held in a concurrent registry (no global lock)
//! - Fail fast in Open state: no network call is attempted
//! - Single trial in Half-Open; concurrent calls fail fast until it resolves
//! - One `execute` is one sample: a wrapped retry sequence counts once

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::CircuitBreakerSettings;
use crate::error::CommsError;
use crate::observability::metrics::MetricsCollector;

/// Circuit status for one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    /// Requests pass through; failures are counted.
    Closed,
    /// Requests fail immediately without a network call.
    Open,
    /// One trial request is permitted.
    HalfOpen,
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitStatus::Closed => write!(f, "closed"),
            CircuitStatus::Open => write!(f, "open"),
            CircuitStatus::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Mutable per-service circuit state. Guarded by the registry's shard lock.
#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    /// Sliding window of recent outcomes; `true` = failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    trial_started_at: Option<Instant>,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            status: CircuitStatus::Closed,
            window: VecDeque::new(),
            opened_at: None,
            trial_started_at: None,
        }
    }
}

impl CircuitState {
    fn failures(&self) -> u32 {
        self.window.iter().filter(|failed| **failed).count() as u32
    }

    fn sample(&mut self, failed: bool, window_size: usize) {
        if self.window.len() == window_size {
            self.window.pop_front();
        }
        self.window.push_back(failed);
    }
}

/// Per-service circuit breaker registry.
pub struct CircuitBreaker {
    failure_threshold: u32,
    minimum_throughput: u32,
    break_duration: Duration,
    window_size: usize,
    call_timeout: Duration,
    states: DashMap<String, CircuitState>,
    metrics: Arc<MetricsCollector>,
}

impl CircuitBreaker {
    /// Build a breaker registry from config.
    pub fn new(settings: &CircuitBreakerSettings, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            minimum_throughput: settings.minimum_throughput,
            break_duration: Duration::from_secs(settings.break_secs),
            window_size: settings.window_size.max(1),
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
            states: DashMap::new(),
            metrics,
        }
    }

    /// Current status of the circuit for `service`.
    pub fn status(&self, service: &str) -> CircuitStatus {
        self.states.get(service).map(|s| s.status).unwrap_or(CircuitStatus::Closed)
    }

    /// Run `op` under circuit protection.
    ///
    /// Fails fast with [`CommsError::CircuitOpen`] when the circuit is open
    /// (or a half-open trial is already in flight). The operation runs under
    /// the breaker's own per-call deadline, independent of any timeout inside
    /// `op`.
    pub async fn execute<T, Fut>(&self, service: &str, op: Fut) -> Result<T, CommsError>
    where
        Fut: std::future::Future<Output = Result<T, CommsError>>,
    {
        if !self.admit(service) {
            return Err(CommsError::CircuitOpen { service: service.to_string() });
        }

        let outcome = match tokio::time::timeout(self.call_timeout, op).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CommsError::Transient {
                service: service.to_string(),
                status: None,
                reason: format!("call exceeded breaker deadline of {:?}", self.call_timeout),
            }),
        };

        match &outcome {
            Ok(_) => self.record_success(service),
            Err(error) => {
                // The breaker sampled nothing if it refused the call itself.
                if !matches!(error, CommsError::CircuitOpen { .. }) {
                    self.record_failure(service);
                }
            }
        }

        outcome
    }

    /// Decide whether a call may proceed, advancing Open → Half-Open lazily.
    fn admit(&self, service: &str) -> bool {
        let mut state = self.states.entry(service.to_string()).or_default();
        match state.status {
            CircuitStatus::Closed => true,
            CircuitStatus::Open => {
                let elapsed_break = state
                    .opened_at
                    .map(|t| t.elapsed() >= self.break_duration)
                    .unwrap_or(true);
                if elapsed_break {
                    self.transition(service, &mut state, CircuitStatus::HalfOpen);
                    state.trial_started_at = Some(Instant::now());
                    true
                } else {
                    false
                }
            }
            CircuitStatus::HalfOpen => {
                // One trial at a time. A trial older than the call timeout can
                // no longer produce an outcome (its caller is gone); let a new
                // one through instead of wedging the circuit.
                match state.trial_started_at {
                    Some(started) if started.elapsed() <= self.call_timeout => false,
                    _ => {
                        state.trial_started_at = Some(Instant::now());
                        true
                    }
                }
            }
        }
    }

    fn record_success(&self, service: &str) {
        let mut state = self.states.entry(service.to_string()).or_default();
        match state.status {
            CircuitStatus::HalfOpen => {
                state.window.clear();
                state.opened_at = None;
                state.trial_started_at = None;
                self.transition(service, &mut state, CircuitStatus::Closed);
            }
            CircuitStatus::Closed => state.sample(false, self.window_size),
            // A straggling outcome while already open changes nothing,
            // success and failure alike.
            CircuitStatus::Open => {}
        }
    }

    fn record_failure(&self, service: &str) {
        let mut state = self.states.entry(service.to_string()).or_default();
        match state.status {
            CircuitStatus::HalfOpen => {
                state.opened_at = Some(Instant::now());
                state.trial_started_at = None;
                self.transition(service, &mut state, CircuitStatus::Open);
            }
            CircuitStatus::Closed => {
                state.sample(true, self.window_size);
                if state.window.len() as u32 >= self.minimum_throughput
                    && state.failures() >= self.failure_threshold
                {
                    state.opened_at = Some(Instant::now());
                    self.transition(service, &mut state, CircuitStatus::Open);
                }
            }
            // A straggling outcome while already open changes nothing.
            CircuitStatus::Open => {}
        }
    }

    fn transition(&self, service: &str, state: &mut CircuitState, to: CircuitStatus) {
        let from = state.status;
        state.status = to;
        tracing::warn!(
            service = %service,
            from = %from,
            to = %to,
            "Circuit state transition"
        );
        self.metrics.record_circuit_transition(service, &from.to_string(), &to.to_string());
    }
}
