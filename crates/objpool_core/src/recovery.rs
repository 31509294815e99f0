//! Crash recovery.
//!
//! Runs once, synchronously, before a pool is handed out. The undo log
//! header decides what happens:
//!
//! | log state | action |
//! |-----------|--------|
//! | `None`      | nothing |
//! | `Active`    | restore snapshots, free logged allocations, drop deferred frees, clear |
//! | `Committed` | execute deferred frees, clear |
//!
//! Every step is idempotent and the log is cleared last, so a crash during
//! recovery is handled by simply running recovery again.

use crate::error::CoreResult;
use crate::header::PoolHeader;
use crate::log::LogState;
use crate::space::PoolSpace;
use crate::stats::PoolStats;
use crate::transaction::TransactionManager;
use crate::types::TransactionId;
use objpool_storage::StorageBackend;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Outcome of recovery at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryReport {
    /// The log was empty.
    Clean,
    /// An interrupted transaction was rolled back.
    RolledBack {
        /// The interrupted transaction.
        txid: TransactionId,
        /// Snapshot records restored.
        snapshots_restored: u64,
        /// Allocations freed.
        allocations_undone: u64,
        /// Deferred frees dropped.
        frees_discarded: u64,
    },
    /// A commit interrupted after its commit point was finished.
    RolledForward {
        /// The committed transaction.
        txid: TransactionId,
        /// Deferred frees executed.
        frees_applied: u64,
    },
}

impl RecoveryReport {
    /// Returns true if recovery changed the pool.
    #[must_use]
    pub fn recovered(&self) -> bool {
        !matches!(self, Self::Clean)
    }
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::RolledBack {
                txid,
                snapshots_restored,
                allocations_undone,
                frees_discarded,
            } => write!(
                f,
                "rolled back {txid}: {snapshots_restored} snapshots restored, \
                 {allocations_undone} allocations undone, {frees_discarded} frees discarded"
            ),
            Self::RolledForward {
                txid,
                frees_applied,
            } => write!(f, "rolled forward {txid}: {frees_applied} frees applied"),
        }
    }
}

/// Brings the pool to a consistent state according to its undo log.
pub(crate) fn recover(manager: &mut TransactionManager) -> CoreResult<RecoveryReport> {
    let header = manager.log_header()?;

    let report = match header.state {
        LogState::None => RecoveryReport::Clean,
        LogState::Active => {
            let summary = manager.rollback_log()?;
            manager.clear_log()?;
            manager.stats().record_rollback_recovered();
            RecoveryReport::RolledBack {
                txid: header.txid,
                snapshots_restored: summary.snapshots_restored,
                allocations_undone: summary.allocations_undone,
                frees_discarded: summary.frees_discarded,
            }
        }
        LogState::Committed => {
            let frees_applied = manager.roll_forward()?;
            manager.clear_log()?;
            manager.stats().record_commit_recovered();
            RecoveryReport::RolledForward {
                txid: header.txid,
                frees_applied,
            }
        }
    };

    manager.set_needs_recovery(false);
    if report.recovered() {
        manager.space_mut().sync()?;
        info!(%report, "pool recovered");
    }
    Ok(report)
}

/// Runs recovery directly on a backend holding a pool, without checking the
/// layout or keeping the pool open. Returns the backend afterwards.
///
/// # Errors
///
/// Returns `ConsistencyCheckFailed` if the header or log cannot be decoded
/// or replayed.
pub fn recover_backend(
    backend: Box<dyn StorageBackend>,
) -> CoreResult<(RecoveryReport, Box<dyn StorageBackend>)> {
    let space = PoolSpace::new(backend);
    let header = PoolHeader::read(&space)?;
    let mut manager = TransactionManager::load(space, &header, Arc::new(PoolStats::new()))?;
    let report = recover(&mut manager)?;
    Ok((report, manager.into_space().into_backend()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_display() {
        assert_eq!(RecoveryReport::Clean.to_string(), "clean");
        let report = RecoveryReport::RolledForward {
            txid: TransactionId::new(4),
            frees_applied: 2,
        };
        assert!(report.recovered());
        assert_eq!(report.to_string(), "rolled forward txn:4: 2 frees applied");
    }
}
