//! Storage backend trait definition.

use crate::error::StorageResult;

/// A fixed-size, byte-addressable durable region.
///
/// Backends are **opaque byte stores**. They provide in-place reads and
/// writes plus a durability barrier. objpool owns all format interpretation:
/// backends do not understand pool headers, undo records, or heap blocks.
///
/// # Invariants
///
/// - `size` never changes after the backend is created
/// - `read_at` returns the bytes most recently written at that offset,
///   whether or not they have been persisted
/// - after `persist(offset, len)` returns, the bytes in that range survive
///   process termination and power loss
/// - an aligned 8-byte `write_at` followed by `persist` is failure-atomic:
///   after a crash the word holds either the old or the new value
/// - bytes written but not yet persisted may or may not survive a crash
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent pools
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the storage size or an
    /// I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Writes `data` in place starting at `offset`.
    ///
    /// The write is visible to subsequent reads immediately but is not
    /// guaranteed durable until the range is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the storage size or an
    /// I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Makes the bytes in `offset..offset+len` durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is out of bounds or the flush fails.
    fn persist(&mut self, offset: u64, len: usize) -> StorageResult<()>;

    /// Returns the fixed size of the storage in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// This is a stronger guarantee than `persist` - it covers the whole
    /// region and any file metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;
}
