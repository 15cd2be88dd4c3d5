//! Node statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by a node's producer and workers
#[derive(Debug, Default)]
pub struct NodeStats {
    /// Units produced by accept/receive
    accepted: AtomicU64,
    /// Units whose processing finished (successfully or not)
    processed: AtomicU64,
    /// Units whose handler failed or panicked
    failed: AtomicU64,
    /// Units evicted from a full queue or discarded at shutdown
    dropped: AtomicU64,
    /// Units currently being processed
    active: AtomicU64,
    /// Transient accept/receive errors
    producer_errors: AtomicU64,
}

impl NodeStats {
    /// Create zeroed statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self, failed: bool) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn unit_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn unit_finished(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn record_producer_error(&self) {
        self.producer_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Units produced by accept/receive
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Units whose processing finished
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Units whose handler failed
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Units dropped without processing
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Units in flight
    #[must_use]
    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Transient producer errors
    #[must_use]
    pub fn producer_errors(&self) -> u64 {
        self.producer_errors.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all stats
    #[must_use]
    pub fn snapshot(&self) -> NodeStatsSnapshot {
        NodeStatsSnapshot {
            accepted: self.accepted(),
            processed: self.processed(),
            failed: self.failed(),
            dropped: self.dropped(),
            active: self.active(),
            producer_errors: self.producer_errors(),
        }
    }
}

/// Snapshot of node statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStatsSnapshot {
    /// Units produced by accept/receive
    pub accepted: u64,
    /// Units whose processing finished
    pub processed: u64,
    /// Units whose handler failed
    pub failed: u64,
    /// Units dropped without processing
    pub dropped: u64,
    /// Units in flight
    pub active: u64,
    /// Transient producer errors
    pub producer_errors: u64,
}

impl NodeStatsSnapshot {
    /// Units processed without error
    #[must_use]
    pub const fn succeeded(&self) -> u64 {
        self.processed.saturating_sub(self.failed)
    }
}
