//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// An in-memory storage backend.
///
/// This backend keeps the whole region in a `Vec<u8>` and is suitable for:
/// - Unit tests
/// - Replaying a captured crash image
/// - Ephemeral pools that don't need persistence
///
/// `persist` is a no-op: every write is considered durable as soon as it
/// lands. Crash simulation that distinguishes persisted from un-persisted
/// bytes lives in `objpool_testkit`.
///
/// # Example
///
/// ```rust
/// use objpool_storage::{StorageBackend, InMemoryBackend};
///
/// let mut backend = InMemoryBackend::new(16);
/// backend.write_at(0, &[1, 2, 3]).unwrap();
/// assert_eq!(backend.size().unwrap(), 16);
/// assert_eq!(backend.read_at(0, 3).unwrap(), vec![1, 2, 3]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a zero-filled backend of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0; size]),
        }
    }

    /// Creates a backend over pre-existing bytes.
    ///
    /// Useful for testing recovery scenarios from a captured image.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all bytes in the backend.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        StorageError::check_bounds(offset, len, data.len() as u64)?;
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn write_at(&mut self, offset: u64, bytes: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        StorageError::check_bounds(offset, bytes.len(), data.len() as u64)?;
        let start = offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn persist(&mut self, offset: u64, len: usize) -> StorageResult<()> {
        StorageError::check_bounds(offset, len, self.data.read().len() as u64)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }
}
