//! Heap block headers.

use crate::error::{CoreError, CoreResult};
use crate::space::PoolSpace;

/// Size of the header in front of every block's data.
pub const BLOCK_HEADER_SIZE: u64 = 16;

/// Block sizes and offsets are multiples of this.
pub const BLOCK_ALIGN: u64 = 16;

/// Smallest block the heap creates, header included.
pub const MIN_BLOCK_SIZE: u64 = 32;

const ALLOCATED_FLAG: u64 = 1;

/// Decoded block header.
///
/// ```text
/// | size_and_flags u64 (bit 0 = allocated) | type_num u32 | reserved u32 |
/// ```
///
/// Both words are updated with single aligned 8-byte writes. The first word
/// alone decides whether the block is allocated and how far it extends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Total block size, header included.
    pub size: u64,
    /// Whether the block holds a live object.
    pub allocated: bool,
    /// Type number of the object, meaningful only when allocated.
    pub type_num: u32,
}

impl BlockHeader {
    /// Header of a free block.
    #[must_use]
    pub const fn free(size: u64) -> Self {
        Self {
            size,
            allocated: false,
            type_num: 0,
        }
    }

    /// Returns the encoded first word.
    #[must_use]
    pub const fn size_word(&self) -> u64 {
        if self.allocated {
            self.size | ALLOCATED_FLAG
        } else {
            self.size
        }
    }

    /// Returns the encoded second word.
    #[must_use]
    pub const fn type_word(&self) -> u64 {
        self.type_num as u64
    }

    /// Decodes a header from its two words.
    #[must_use]
    pub const fn from_words(size_word: u64, type_word: u64) -> Self {
        Self {
            size: size_word & !ALLOCATED_FLAG,
            allocated: size_word & ALLOCATED_FLAG != 0,
            type_num: type_word as u32,
        }
    }

    /// Reads the header of the block at `offset`.
    pub(crate) fn read(space: &PoolSpace, offset: u64) -> CoreResult<Self> {
        let size_word = space.read_u64(offset)?;
        let type_word = space.read_u64(offset + 8)?;
        let header = Self::from_words(size_word, type_word);
        if header.size < MIN_BLOCK_SIZE || header.size % BLOCK_ALIGN != 0 {
            return Err(CoreError::consistency(format!(
                "corrupt block header at {offset:#x}: size {}",
                header.size
            )));
        }
        Ok(header)
    }
}

/// Rounds `value` up to a multiple of [`BLOCK_ALIGN`].
#[must_use]
pub const fn align_up(value: u64) -> u64 {
    (value + BLOCK_ALIGN - 1) / BLOCK_ALIGN * BLOCK_ALIGN
}

/// Rounds `value` down to a multiple of [`BLOCK_ALIGN`].
#[must_use]
pub const fn align_down(value: u64) -> u64 {
    value / BLOCK_ALIGN * BLOCK_ALIGN
}

/// Returns the block size needed for an object of `size` data bytes.
#[must_use]
pub fn block_size_for(size: u64) -> Option<u64> {
    let raw = size.checked_add(BLOCK_HEADER_SIZE + BLOCK_ALIGN - 1)?;
    Some((raw / BLOCK_ALIGN * BLOCK_ALIGN).max(MIN_BLOCK_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_words() {
        let header = BlockHeader {
            size: 64,
            allocated: true,
            type_num: 7,
        };
        assert_eq!(header.size_word(), 65);
        assert_eq!(header.type_word(), 7);
        assert_eq!(
            BlockHeader::from_words(header.size_word(), header.type_word()),
            header
        );
        assert_eq!(BlockHeader::free(64).size_word(), 64);
    }

    #[test]
    fn sizes() {
        assert_eq!(block_size_for(0), Some(MIN_BLOCK_SIZE));
        assert_eq!(block_size_for(4), Some(32));
        assert_eq!(block_size_for(16), Some(32));
        assert_eq!(block_size_for(17), Some(48));
        assert_eq!(block_size_for(u64::MAX), None);
        assert_eq!(align_up(4097), 4112);
        assert_eq!(align_down(4097), 4096);
    }
}
