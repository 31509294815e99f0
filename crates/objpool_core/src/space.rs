//! Typed access to the pool's byte range.

use crate::error::{CoreError, CoreResult};
use objpool_storage::StorageBackend;

/// The pool's durable address range.
///
/// Thin wrapper over a [`StorageBackend`] adding little-endian word helpers
/// and write-then-persist shorthands. Every durable update in objpool goes
/// through one of the `*_persist` methods.
pub(crate) struct PoolSpace {
    backend: Box<dyn StorageBackend>,
}

impl PoolSpace {
    pub(crate) fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub(crate) fn into_backend(self) -> Box<dyn StorageBackend> {
        self.backend
    }

    pub(crate) fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    pub(crate) fn read(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read_at(offset, len)?)
    }

    pub(crate) fn read_u64(&self, offset: u64) -> CoreResult<u64> {
        let bytes = self.read(offset, 8)?;
        let array: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::consistency(format!("short read at {offset:#x}")))?;
        Ok(u64::from_le_bytes(array))
    }

    pub(crate) fn write(&mut self, offset: u64, data: &[u8]) -> CoreResult<()> {
        Ok(self.backend.write_at(offset, data)?)
    }

    pub(crate) fn persist(&mut self, offset: u64, len: u64) -> CoreResult<()> {
        Ok(self.backend.persist(offset, len as usize)?)
    }

    pub(crate) fn write_persist(&mut self, offset: u64, data: &[u8]) -> CoreResult<()> {
        self.write(offset, data)?;
        self.persist(offset, data.len() as u64)
    }

    /// Writes and persists one aligned 8-byte word: the failure-atomic unit.
    pub(crate) fn write_u64_persist(&mut self, offset: u64, value: u64) -> CoreResult<()> {
        debug_assert_eq!(offset % 8, 0, "atomic words must be 8-byte aligned");
        self.write_persist(offset, &value.to_le_bytes())
    }

    pub(crate) fn zero_persist(&mut self, offset: u64, len: u64) -> CoreResult<()> {
        if len == 0 {
            return Ok(());
        }
        let zeros = vec![0u8; len as usize];
        self.write_persist(offset, &zeros)
    }

    pub(crate) fn sync(&mut self) -> CoreResult<()> {
        Ok(self.backend.sync()?)
    }
}
