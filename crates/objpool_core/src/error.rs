//! Error types for objpool core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in objpool core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] objpool_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The pool could not be created.
    #[error("failed to create pool {path}: {reason}")]
    PoolCreateFailed {
        /// Location of the pool.
        path: String,
        /// Why creation failed.
        reason: String,
    },

    /// The pool could not be opened.
    #[error("failed to open pool {path}: {reason}")]
    PoolOpenFailed {
        /// Location of the pool.
        path: String,
        /// Why opening failed.
        reason: String,
    },

    /// A transaction is already active on this pool.
    #[error("a transaction is already active on this pool")]
    AlreadyActive,

    /// The transaction handle no longer refers to the active transaction.
    #[error("transaction is not active")]
    TransactionNotActive,

    /// The undo log has no room for another record.
    #[error("undo log exhausted: record needs {needed} bytes, {available} available")]
    LogExhausted {
        /// Encoded size of the rejected record.
        needed: u64,
        /// Bytes left in the log.
        available: u64,
    },

    /// The heap has no free block large enough.
    #[error("heap exhausted: no free block for {requested} bytes")]
    HeapExhausted {
        /// Requested object size.
        requested: u64,
    },

    /// A null, freed, or out-of-bounds persistent reference was used.
    #[error("invalid reference at offset {offset:#x}: {reason}")]
    InvalidReference {
        /// Pool offset of the reference.
        offset: u64,
        /// What is wrong with it.
        reason: String,
    },

    /// A write touched bytes that were never added to the undo log.
    #[error("write to {len} bytes at {offset:#x} without a prior snapshot")]
    UnloggedWrite {
        /// Pool offset of the write.
        offset: u64,
        /// Length of the write.
        len: u64,
    },

    /// The undo log or heap could not be replayed or verified.
    #[error("consistency check failed: {message}")]
    ConsistencyCheckFailed {
        /// Description of the inconsistency.
        message: String,
    },

    /// A failed commit or abort left the log non-empty. Reopen the pool or
    /// call `Pool::recover`.
    #[error("pool requires recovery before a new transaction can begin")]
    RecoveryRequired,

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },
}

impl CoreError {
    /// Creates a pool creation error.
    pub fn pool_create_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PoolCreateFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a pool open error.
    pub fn pool_open_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PoolOpenFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid reference error.
    pub fn invalid_reference(offset: u64, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a consistency check error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::ConsistencyCheckFailed {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Returns true for resource exhaustion that forces the enclosing
    /// transaction to abort.
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, Self::LogExhausted { .. } | Self::HeapExhausted { .. })
    }
}
