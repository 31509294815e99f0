//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to access bytes outside the fixed storage size.
    #[error("access out of bounds: offset {offset}, len {len}, size {size}")]
    OutOfBounds {
        /// The requested offset.
        offset: u64,
        /// The requested length.
        len: usize,
        /// The storage size.
        size: u64,
    },

    /// The backing file already exists.
    #[error("storage already exists: {0}")]
    AlreadyExists(String),

    /// Another handle holds the exclusive lock on the storage.
    #[error("storage is locked by another handle")]
    Locked,

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Checks that `offset..offset+len` lies within `size`.
    pub(crate) fn check_bounds(offset: u64, len: usize, size: u64) -> StorageResult<()> {
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= size => Ok(()),
            _ => Err(Self::OutOfBounds { offset, len, size }),
        }
    }
}
