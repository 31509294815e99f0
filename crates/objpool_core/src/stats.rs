//! Pool statistics.
//!
//! Counters are updated by the transaction manager and the recovery engine
//! and can be read at any time through [`crate::Pool::stats`].
//!
//! ```rust,ignore
//! let pool = Pool::open(path, "layout")?;
//! let stats = pool.stats().snapshot();
//! println!("committed: {}", stats.transactions_committed);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pool statistics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct PoolStats {
    // Transaction counters
    transactions_started: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,

    // Undo log counters
    snapshots_logged: AtomicU64,
    snapshot_bytes: AtomicU64,

    // Allocator counters
    allocations: AtomicU64,
    frees: AtomicU64,

    // Recovery counters
    rollbacks_recovered: AtomicU64,
    commits_recovered: AtomicU64,
}

impl PoolStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_transaction_start(&self) {
        self.transactions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transaction_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_snapshot(&self, bytes: u64) {
        self.snapshots_logged.fetch_add(1, Ordering::Relaxed);
        self.snapshot_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback_recovered(&self) {
        self.rollbacks_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_recovered(&self) {
        self.commits_recovered.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the total number of transactions started.
    pub fn transactions_started(&self) -> u64 {
        self.transactions_started.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the total number of transactions aborted, explicitly or by
    /// resource exhaustion.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of snapshot records appended.
    pub fn snapshots_logged(&self) -> u64 {
        self.snapshots_logged.load(Ordering::Relaxed)
    }

    /// Returns the number of bytes copied into snapshot records.
    pub fn snapshot_bytes(&self) -> u64 {
        self.snapshot_bytes.load(Ordering::Relaxed)
    }

    /// Returns the number of transactional allocations.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Returns the number of frees executed at commit.
    pub fn frees(&self) -> u64 {
        self.frees.load(Ordering::Relaxed)
    }

    /// Returns how many interrupted transactions recovery rolled back.
    pub fn rollbacks_recovered(&self) -> u64 {
        self.rollbacks_recovered.load(Ordering::Relaxed)
    }

    /// Returns how many interrupted commits recovery rolled forward.
    pub fn commits_recovered(&self) -> u64 {
        self.commits_recovered.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_started: self.transactions_started(),
            transactions_committed: self.transactions_committed(),
            transactions_aborted: self.transactions_aborted(),
            snapshots_logged: self.snapshots_logged(),
            snapshot_bytes: self.snapshot_bytes(),
            allocations: self.allocations(),
            frees: self.frees(),
            rollbacks_recovered: self.rollbacks_recovered(),
            commits_recovered: self.commits_recovered(),
        }
    }
}

/// A point-in-time snapshot of pool statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Total number of transactions started.
    pub transactions_started: u64,
    /// Total number of transactions committed.
    pub transactions_committed: u64,
    /// Total number of transactions aborted.
    pub transactions_aborted: u64,
    /// Snapshot records appended.
    pub snapshots_logged: u64,
    /// Bytes copied into snapshot records.
    pub snapshot_bytes: u64,
    /// Transactional allocations.
    pub allocations: u64,
    /// Frees executed at commit.
    pub frees: u64,
    /// Transactions rolled back by recovery.
    pub rollbacks_recovered: u64,
    /// Commits rolled forward by recovery.
    pub commits_recovered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = PoolStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_transactions() {
        let stats = PoolStats::new();

        stats.record_transaction_start();
        stats.record_transaction_start();
        stats.record_transaction_commit();
        stats.record_transaction_abort();

        assert_eq!(stats.transactions_started(), 2);
        assert_eq!(stats.transactions_committed(), 1);
        assert_eq!(stats.transactions_aborted(), 1);
    }

    #[test]
    fn snapshot_bytes_accumulate() {
        let stats = PoolStats::new();
        stats.record_snapshot(4);
        stats.record_snapshot(16);

        let snap = stats.snapshot();
        assert_eq!(snap.snapshots_logged, 2);
        assert_eq!(snap.snapshot_bytes, 20);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(PoolStats::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_allocation();
                    s.record_free();
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.allocations(), 800);
        assert_eq!(stats.frees(), 800);
    }
}
