//! Undo-logged transactions.
//!
//! A transaction moves the pool through
//! `None -> Active -> Committing -> None` or `Active -> Aborting -> None`:
//! - **Active**: bytes are snapshotted into the undo log before they are
//!   modified in place; allocations and frees are logged as intents
//! - **Committing**: modified ranges are persisted, the log is marked
//!   committed, deferred frees run, the log is cleared
//! - **Aborting**: snapshots are restored, allocations are freed, deferred
//!   frees are dropped, the log is cleared
//!
//! Transactions do not nest. A [`TxLock`] passed to `begin` is held until
//! commit or abort has finished.

mod handle;
mod lock;
mod manager;
mod state;

pub use handle::Transaction;
pub use lock::TxLock;
pub(crate) use manager::TransactionManager;
pub use state::{RangeSet, TxState};
