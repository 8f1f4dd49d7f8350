//! Single-flight request deduplication.
//!
//! # Responsibilities
//! - Collapse concurrent identical requests into one underlying call
//! - Deliver the one outcome (success or failure) identically to every waiter
//! - Track deduplication statistics
//!
//! # Design Decisions
//! - The registry entry is inserted with DashMap's entry API: the shard lock
//!   makes insertion an atomic check-and-set, so exactly one caller wins
//! - The winner's operation runs as a detached task: a waiter dropping out
//!   (cancellation) never cancels the call for the others
//! - The entry is removed before the outcome is published, success or
//!   failure, so a key can never stay occupied by a finished call

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

/// The in-flight call completed without publishing a result (owner task
/// panicked or was aborted). Waiters observe this instead of hanging.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("in-flight request dropped before completing")]
pub struct InFlightDropped;

/// Snapshot of deduplicator statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupStats {
    /// All calls that went through the deduplicator.
    pub total_requests: u64,
    /// Calls that attached to an existing in-flight execution.
    pub deduplicated_requests: u64,
    /// Calls that executed the operation (race winners).
    pub unique_requests: u64,
    /// Keys currently in flight.
    pub in_flight: usize,
    /// `deduplicated / total`, 0 when nothing was recorded.
    pub dedup_rate: f64,
}

/// Single-flight executor over a cloneable outcome.
///
/// The orchestrator instantiates this with its call-outcome type; waiters all
/// receive clones of the single result.
pub struct RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    in_flight: Arc<DashMap<String, watch::Receiver<Option<T>>>>,
    total: AtomicU64,
    deduplicated: AtomicU64,
    unique: AtomicU64,
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty deduplicator.
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            total: AtomicU64::new(0),
            deduplicated: AtomicU64::new(0),
            unique: AtomicU64::new(0),
        }
    }

    /// Execute `op` under single-flight semantics for `key`.
    ///
    /// If a call for `key` is already in flight, awaits its shared outcome
    /// without executing `op`. Otherwise runs `op` as a detached task and
    /// publishes its outcome to every waiter on the key.
    pub async fn execute<F>(&self, key: &str, op: F) -> Result<T, InFlightDropped>
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.total.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = watch::channel(None);
        let (mut waiter_rx, won_race) = match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                entry.insert(rx.clone());
                (rx, true)
            }
        };

        if won_race {
            self.unique.fetch_add(1, Ordering::Relaxed);
            let registry = Arc::clone(&self.in_flight);
            let key = key.to_string();
            tokio::spawn(async move {
                let outcome = op.await;
                // Remove first: the next caller for this key starts fresh
                // instead of observing a completed generation.
                registry.remove(&key);
                let _ = tx.send(Some(outcome));
            });
        } else {
            self.deduplicated.fetch_add(1, Ordering::Relaxed);
        }

        // The watch guard borrows waiter_rx; clone the outcome out before
        // the function returns and drops the receiver.
        let outcome = match waiter_rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        outcome.ok_or(InFlightDropped)
    }

    /// Current statistics.
    pub fn stats(&self) -> DedupStats {
        let total = self.total.load(Ordering::Relaxed);
        let deduplicated = self.deduplicated.load(Ordering::Relaxed);
        DedupStats {
            total_requests: total,
            deduplicated_requests: deduplicated,
            unique_requests: self.unique.load(Ordering::Relaxed),
            in_flight: self.in_flight.len(),
            dedup_rate: if total == 0 { 0.0 } else { deduplicated as f64 / total as f64 },
        }
    }
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
