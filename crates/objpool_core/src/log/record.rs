//! Undo record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::Oid;

/// Size of the fixed record envelope: kind (1) + reserved (3) + length (4).
pub const RECORD_HEADER_SIZE: usize = 8;

/// Size of the trailing checksum.
pub const RECORD_CRC_SIZE: usize = 4;

/// Records start on 8-byte boundaries inside the log.
pub const RECORD_ALIGN: usize = 8;

/// Kind of undo record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UndoRecordKind {
    /// Pre-mutation copy of a byte range.
    Snapshot = 1,
    /// An object allocated by the transaction.
    Alloc = 2,
    /// An object whose free is deferred to commit.
    Free = 3,
}

impl UndoRecordKind {
    /// Converts a byte to a record kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Snapshot),
            2 => Some(Self::Alloc),
            3 => Some(Self::Free),
            _ => None,
        }
    }

    /// Converts the record kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One entry of the undo log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoRecord {
    /// Bytes of `oid` at `offset` as they were before the transaction.
    Snapshot {
        /// Object the bytes belong to.
        oid: Oid,
        /// Byte offset inside the object.
        offset: u64,
        /// The saved bytes.
        data: Vec<u8>,
    },

    /// Allocation intent. Rollback frees the object.
    Alloc {
        /// The new object.
        oid: Oid,
    },

    /// Deferred free intent. Commit frees the object, rollback discards it.
    Free {
        /// The object to free.
        oid: Oid,
    },
}

impl UndoRecord {
    /// Largest snapshot payload a single record can carry.
    pub const MAX_SNAPSHOT_LEN: usize = u32::MAX as usize - 32;

    /// Returns the record kind.
    #[must_use]
    pub fn kind(&self) -> UndoRecordKind {
        match self {
            Self::Snapshot { .. } => UndoRecordKind::Snapshot,
            Self::Alloc { .. } => UndoRecordKind::Alloc,
            Self::Free { .. } => UndoRecordKind::Free,
        }
    }

    /// Returns the object the record refers to.
    #[must_use]
    pub fn oid(&self) -> Oid {
        match self {
            Self::Snapshot { oid, .. } | Self::Alloc { oid } | Self::Free { oid } => *oid,
        }
    }

    /// Returns the size of the record once framed and padded in the log.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        framed_len(self.payload_len()) as u64
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Snapshot { data, .. } => Oid::ENCODED_SIZE + 8 + 4 + data.len(),
            Self::Alloc { .. } | Self::Free { .. } => Oid::ENCODED_SIZE,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot exceeds [`Self::MAX_SNAPSHOT_LEN`].
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.payload_len());
        match self {
            Self::Snapshot { oid, offset, data } => {
                if data.len() > Self::MAX_SNAPSHOT_LEN {
                    return Err(CoreError::invalid_argument(format!(
                        "snapshot of {} bytes exceeds maximum of {} bytes",
                        data.len(),
                        Self::MAX_SNAPSHOT_LEN
                    )));
                }
                buf.extend_from_slice(&oid.to_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
                buf.extend_from_slice(data);
            }
            Self::Alloc { oid } | Self::Free { oid } => {
                buf.extend_from_slice(&oid.to_bytes());
            }
        }
        Ok(buf)
    }

    /// Serializes the full record: envelope, payload, checksum and padding.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let mut buf = Vec::with_capacity(framed_len(payload.len()));
        buf.push(self.kind().as_byte());
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&payload);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.resize(framed_len(payload.len()), 0);
        Ok(buf)
    }

    /// Deserializes a record from its kind and payload.
    pub fn decode_payload(kind: UndoRecordKind, payload: &[u8]) -> CoreResult<Self> {
        if payload.len() < Oid::ENCODED_SIZE {
            return Err(CoreError::consistency("undo record payload truncated"));
        }
        let oid = Oid::from_slice(&payload[..Oid::ENCODED_SIZE])
            .ok_or_else(|| CoreError::consistency("invalid oid in undo record"))?;
        let rest = &payload[Oid::ENCODED_SIZE..];

        match kind {
            UndoRecordKind::Snapshot => {
                if rest.len() < 12 {
                    return Err(CoreError::consistency("snapshot record truncated"));
                }
                let mut offset = [0u8; 8];
                offset.copy_from_slice(&rest[0..8]);
                let mut len = [0u8; 4];
                len.copy_from_slice(&rest[8..12]);
                let len = u32::from_le_bytes(len) as usize;
                let data = &rest[12..];
                if data.len() != len {
                    return Err(CoreError::consistency(format!(
                        "snapshot length mismatch: header says {len} bytes, payload has {}",
                        data.len()
                    )));
                }
                Ok(Self::Snapshot {
                    oid,
                    offset: u64::from_le_bytes(offset),
                    data: data.to_vec(),
                })
            }
            UndoRecordKind::Alloc | UndoRecordKind::Free => {
                if !rest.is_empty() {
                    return Err(CoreError::consistency(format!(
                        "trailing bytes in {kind:?} record: {}",
                        rest.len()
                    )));
                }
                if kind == UndoRecordKind::Alloc {
                    Ok(Self::Alloc { oid })
                } else {
                    Ok(Self::Free { oid })
                }
            }
        }
    }
}

/// Size of a record with a `payload_len` byte payload, rounded up to
/// [`RECORD_ALIGN`].
#[must_use]
pub const fn framed_len(payload_len: usize) -> usize {
    let raw = RECORD_HEADER_SIZE + payload_len + RECORD_CRC_SIZE;
    (raw + RECORD_ALIGN - 1) / RECORD_ALIGN * RECORD_ALIGN
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, table built at compile time
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
