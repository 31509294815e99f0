//! # objpool Core
//!
//! Transactional persistent-object pool for objpool.
//!
//! This crate provides:
//! - Pool creation and open over any [`objpool_storage::StorageBackend`]
//! - An undo log that makes multi-object updates all-or-nothing
//! - A crash-consistent heap allocator whose allocations and frees are
//!   transactional
//! - Recovery at open, rolling interrupted transactions back and finished
//!   commits forward
//! - Read-only consistency checks and heap audits
//!
//! ## Example
//!
//! ```rust
//! use objpool_core::{Config, Field, Pool};
//! use objpool_storage::InMemoryBackend;
//!
//! const COUNTER: Field<u64> = Field::new(0);
//!
//! let config = Config::default().pool_size(1 << 20).log_size(8192);
//! let backend = Box::new(InMemoryBackend::new(config.pool_size as usize));
//! let pool = Pool::create_with_backend(backend, "counter", &config).unwrap();
//! let root = pool.root();
//!
//! pool.transaction(None, |tx| {
//!     let n = tx.get(root, COUNTER)?;
//!     tx.set(root, COUNTER, n + 1)
//! })
//! .unwrap();
//!
//! assert_eq!(pool.get(root, COUNTER).unwrap(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod alloc;
mod check;
mod config;
mod error;
mod field;
mod header;
mod log;
mod pool;
mod recovery;
mod space;
mod stats;
mod transaction;
mod types;

pub use alloc::{
    BlockHeader, HeapAudit, ReachabilityAudit, BLOCK_ALIGN, BLOCK_HEADER_SIZE, MIN_BLOCK_SIZE,
};
pub use check::{check_path, read_log, CheckReport};
pub use config::{Config, MIN_LOG_SIZE};
pub use error::{CoreError, CoreResult};
pub use field::{Field, FieldValue};
pub use header::{
    PoolHeader, FORMAT_MAJOR, FORMAT_MINOR, HEADER_SIZE, MAX_LAYOUT_LEN, POOL_MAGIC,
};
pub use log::{
    compute_crc32, LogHeader, LogState, UndoRecord, UndoRecordKind, LOG_HEADER_SIZE,
};
pub use pool::Pool;
pub use recovery::{recover_backend, RecoveryReport};
pub use stats::{PoolStats, StatsSnapshot};
pub use transaction::{RangeSet, Transaction, TxLock, TxState};
pub use types::{ObjectType, Oid, TransactionId, ROOT_TYPE_NUM};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
