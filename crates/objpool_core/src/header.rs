//! Pool header format.
//!
//! The header occupies the first [`HEADER_SIZE`] bytes of every pool and is
//! written last during creation, so a pool without a valid header was never
//! fully created.
//!
//! ```text
//! | magic (8) | major (2) | minor (2) | reserved (4) | uuid (16) | layout (64) |
//! | pool_size (8) | log_offset (8) | log_size (8) | heap_offset (8) | heap_size (8) |
//! | root oid (16) | root_size (8) | crc32 (4) |
//! ```

use crate::error::{CoreError, CoreResult};
use crate::log::compute_crc32;
use crate::space::PoolSpace;
use crate::types::Oid;
use serde::Serialize;
use uuid::Uuid;

/// Magic bytes identifying an objpool pool.
pub const POOL_MAGIC: [u8; 8] = *b"OBJPOOL\0";

/// Current major format version. Pools with another major are refused.
pub const FORMAT_MAJOR: u16 = 1;

/// Current minor format version.
pub const FORMAT_MINOR: u16 = 0;

/// Bytes reserved for the header at the start of the pool.
pub const HEADER_SIZE: u64 = 4096;

/// Longest layout signature, in bytes.
pub const MAX_LAYOUT_LEN: usize = 63;

const LAYOUT_FIELD_LEN: usize = MAX_LAYOUT_LEN + 1;
const CRC_OFFSET: usize = 160;
const ENCODED_LEN: usize = CRC_OFFSET + 4;

/// Decoded pool header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolHeader {
    /// Format version (major, minor).
    pub format_version: (u16, u16),
    /// Identity of the pool, fixed at creation.
    pub uuid: Uuid,
    /// Layout signature the pool was created with.
    pub layout: String,
    /// Total pool size in bytes.
    pub pool_size: u64,
    /// Offset of the undo log region.
    pub log_offset: u64,
    /// Size of the undo log region.
    pub log_size: u64,
    /// Offset of the heap region.
    pub heap_offset: u64,
    /// Size of the heap region.
    pub heap_size: u64,
    /// The root object.
    pub root: Oid,
    /// Requested size of the root object.
    pub root_size: u64,
}

impl PoolHeader {
    /// Checks that `layout` can be stored in a header.
    pub fn validate_layout(layout: &str) -> CoreResult<()> {
        if layout.len() > MAX_LAYOUT_LEN {
            return Err(CoreError::invalid_argument(format!(
                "layout signature is {} bytes, maximum is {MAX_LAYOUT_LEN}",
                layout.len()
            )));
        }
        if layout.contains('\0') {
            return Err(CoreError::invalid_argument(
                "layout signature must not contain NUL",
            ));
        }
        Ok(())
    }

    /// Serializes the header, including its checksum.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENCODED_LEN);
        buf.extend_from_slice(&POOL_MAGIC);
        buf.extend_from_slice(&self.format_version.0.to_le_bytes());
        buf.extend_from_slice(&self.format_version.1.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(self.uuid.as_bytes());

        let mut layout = [0u8; LAYOUT_FIELD_LEN];
        let len = self.layout.len().min(MAX_LAYOUT_LEN);
        layout[..len].copy_from_slice(&self.layout.as_bytes()[..len]);
        buf.extend_from_slice(&layout);

        for value in [
            self.pool_size,
            self.log_offset,
            self.log_size,
            self.heap_offset,
            self.heap_size,
        ] {
            buf.extend_from_slice(&value.to_le_bytes());
        }
        buf.extend_from_slice(&self.root.to_bytes());
        buf.extend_from_slice(&self.root_size.to_le_bytes());

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserializes and verifies a header.
    ///
    /// # Errors
    ///
    /// Returns `ConsistencyCheckFailed` for a bad magic, checksum, version,
    /// or geometry.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < ENCODED_LEN {
            return Err(CoreError::consistency("pool header truncated"));
        }
        if bytes[0..8] != POOL_MAGIC {
            return Err(CoreError::consistency("not an objpool pool (bad magic)"));
        }

        let stored_crc = read_u32(bytes, CRC_OFFSET);
        let computed_crc = compute_crc32(&bytes[..CRC_OFFSET]);
        if stored_crc != computed_crc {
            return Err(CoreError::consistency(format!(
                "pool header checksum mismatch: stored {stored_crc:08x}, computed {computed_crc:08x}"
            )));
        }

        let major = u16::from_le_bytes([bytes[8], bytes[9]]);
        let minor = u16::from_le_bytes([bytes[10], bytes[11]]);
        if major != FORMAT_MAJOR {
            return Err(CoreError::consistency(format!(
                "incompatible format version: pool is v{major}.{minor}, expected v{FORMAT_MAJOR}.x"
            )));
        }

        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[16..32]);

        let layout_field = &bytes[32..32 + LAYOUT_FIELD_LEN];
        let layout_len = layout_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MAX_LAYOUT_LEN);
        let layout = String::from_utf8(layout_field[..layout_len].to_vec())
            .map_err(|_| CoreError::consistency("layout signature is not UTF-8"))?;

        let root = Oid::from_slice(&bytes[136..152])
            .ok_or_else(|| CoreError::consistency("root oid truncated"))?;

        let header = Self {
            format_version: (major, minor),
            uuid: Uuid::from_bytes(uuid),
            layout,
            pool_size: read_u64(bytes, 96),
            log_offset: read_u64(bytes, 104),
            log_size: read_u64(bytes, 112),
            heap_offset: read_u64(bytes, 120),
            heap_size: read_u64(bytes, 128),
            root,
            root_size: read_u64(bytes, 152),
        };
        header.check_geometry()?;
        Ok(header)
    }

    /// Reads and verifies the header at the start of `space`.
    pub(crate) fn read(space: &PoolSpace) -> CoreResult<Self> {
        let size = space.size()?;
        if size < HEADER_SIZE {
            return Err(CoreError::consistency(format!(
                "pool is {size} bytes, smaller than its header"
            )));
        }
        let bytes = space.read(0, ENCODED_LEN)?;
        let header = Self::decode(&bytes)?;
        if header.pool_size != size {
            return Err(CoreError::consistency(format!(
                "header records {} bytes but the pool is {size} bytes",
                header.pool_size
            )));
        }
        Ok(header)
    }

    /// Writes the header and persists it.
    pub(crate) fn write(&self, space: &mut PoolSpace) -> CoreResult<()> {
        space.write_persist(0, &self.encode())
    }

    fn check_geometry(&self) -> CoreResult<()> {
        let log_end = self.log_offset.checked_add(self.log_size);
        let heap_end = self.heap_offset.checked_add(self.heap_size);
        let ok = self.log_offset >= HEADER_SIZE
            && matches!(log_end, Some(end) if end <= self.heap_offset)
            && matches!(heap_end, Some(end) if end <= self.pool_size)
            && self.root.offset() > self.heap_offset
            && self.root.offset() < self.heap_offset + self.heap_size;
        if ok {
            Ok(())
        } else {
            Err(CoreError::consistency("pool header geometry is invalid"))
        }
    }
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut array = [0u8; 8];
    array.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(array)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut array = [0u8; 4];
    array.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ROOT_TYPE_NUM;

    fn sample() -> PoolHeader {
        PoolHeader {
            format_version: (FORMAT_MAJOR, FORMAT_MINOR),
            uuid: Uuid::new_v4(),
            layout: "recovery".to_string(),
            pool_size: 1 << 20,
            log_offset: HEADER_SIZE,
            log_size: 8192,
            heap_offset: HEADER_SIZE + 8192,
            heap_size: (1 << 20) - HEADER_SIZE - 8192,
            root: Oid::new(HEADER_SIZE + 8192 + 16, ROOT_TYPE_NUM),
            root_size: 32,
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = sample();
        let decoded = PoolHeader::decode(&header.encode()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = sample().encode();
        bytes[0] = b'X';
        assert!(PoolHeader::decode(&bytes).is_err());
    }

    #[test]
    fn flipped_bit_fails_checksum() {
        let mut bytes = sample().encode();
        bytes[100] ^= 0x01;
        let err = PoolHeader::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn future_major_version_rejected() {
        let mut header = sample();
        header.format_version = (FORMAT_MAJOR + 1, 0);
        let err = PoolHeader::decode(&header.encode()).unwrap_err();
        assert!(err.to_string().contains("incompatible"));
    }

    #[test]
    fn layout_limits() {
        assert!(PoolHeader::validate_layout("recovery").is_ok());
        assert!(PoolHeader::validate_layout(&"x".repeat(MAX_LAYOUT_LEN)).is_ok());
        assert!(PoolHeader::validate_layout(&"x".repeat(MAX_LAYOUT_LEN + 1)).is_err());
        assert!(PoolHeader::validate_layout("a\0b").is_err());
    }

    #[test]
    fn longest_layout_roundtrips() {
        let mut header = sample();
        header.layout = "L".repeat(MAX_LAYOUT_LEN);
        let decoded = PoolHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded.layout, header.layout);
    }

    #[test]
    fn overlapping_regions_rejected() {
        let mut header = sample();
        header.heap_offset = HEADER_SIZE + 100;
        assert!(PoolHeader::decode(&header.encode()).is_err());
    }
}
