//! Core type definitions for objpool.

use serde::Serialize;
use std::fmt;

/// Type number reserved for the root object.
pub const ROOT_TYPE_NUM: u32 = u32::MAX;

/// Unique identifier for a transaction.
///
/// Transaction IDs are persisted in the undo log header, increase
/// monotonically across reopen, and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next transaction ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Persistent reference to an object inside a pool.
///
/// An oid is the pool-relative offset of the object's first data byte plus
/// the type number it was allocated with. Offset 0 is the pool header, so it
/// can never name an object and serves as the null reference.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Oid {
    offset: u64,
    type_num: u32,
}

impl Oid {
    /// The null reference.
    pub const NULL: Self = Self {
        offset: 0,
        type_num: 0,
    };

    /// Size of an oid stored inside the pool.
    pub const ENCODED_SIZE: usize = 16;

    /// Creates an oid from its parts.
    #[must_use]
    pub const fn new(offset: u64, type_num: u32) -> Self {
        Self { offset, type_num }
    }

    /// Returns the pool-relative offset of the object data.
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.offset
    }

    /// Returns the type number the object was allocated with.
    #[must_use]
    pub const fn type_num(self) -> u32 {
        self.type_num
    }

    /// Returns true for the null reference.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.offset == 0
    }

    /// Encodes the oid as stored in the pool.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::ENCODED_SIZE] {
        let mut buf = [0u8; Self::ENCODED_SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..12].copy_from_slice(&self.type_num.to_le_bytes());
        buf
    }

    /// Decodes an oid from its stored form.
    ///
    /// Returns `None` if the slice is not exactly 16 bytes. Any oid with a
    /// zero offset decodes as [`Oid::NULL`].
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        if slice.len() != Self::ENCODED_SIZE {
            return None;
        }
        let mut offset = [0u8; 8];
        offset.copy_from_slice(&slice[0..8]);
        let mut type_num = [0u8; 4];
        type_num.copy_from_slice(&slice[8..12]);

        let offset = u64::from_le_bytes(offset);
        if offset == 0 {
            return Some(Self::NULL);
        }
        Some(Self::new(offset, u32::from_le_bytes(type_num)))
    }
}

impl Default for Oid {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Oid(null)")
        } else {
            write!(f, "Oid({:#x}, type {})", self.offset, self.type_num)
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "oid:null")
        } else {
            write!(f, "oid:{:#x}/{}", self.offset, self.type_num)
        }
    }
}

/// Describes a kind of object the allocator can hand out.
///
/// ```rust
/// use objpool_core::ObjectType;
///
/// const FOO: ObjectType = ObjectType::new(1, 4);
/// assert_eq!(FOO.size(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectType {
    type_num: u32,
    size: u64,
}

impl ObjectType {
    /// Creates an object type with a type number and data size in bytes.
    #[must_use]
    pub const fn new(type_num: u32, size: u64) -> Self {
        Self { type_num, size }
    }

    /// Returns the type number.
    #[must_use]
    pub const fn type_num(self) -> u32 {
        self.type_num
    }

    /// Returns the requested data size.
    #[must_use]
    pub const fn size(self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_oid() {
        assert!(Oid::NULL.is_null());
        assert!(Oid::default().is_null());
        assert!(!Oid::new(4096, 1).is_null());
    }

    #[test]
    fn oid_roundtrip() {
        let oid = Oid::new(0x1_0040, 7);
        let bytes = oid.to_bytes();
        assert_eq!(Oid::from_slice(&bytes), Some(oid));
    }

    #[test]
    fn zero_offset_decodes_as_null() {
        let mut bytes = [0u8; 16];
        bytes[8] = 9;
        assert_eq!(Oid::from_slice(&bytes), Some(Oid::NULL));
    }

    #[test]
    fn oid_from_wrong_length() {
        assert_eq!(Oid::from_slice(&[0u8; 8]), None);
    }

    #[test]
    fn oid_equality_is_by_identifier() {
        assert_eq!(Oid::new(64, 1), Oid::new(64, 1));
        assert_ne!(Oid::new(64, 1), Oid::new(80, 1));
    }

    #[test]
    fn transaction_id_ordering() {
        let a = TransactionId::new(1);
        assert!(a < a.next());
        assert_eq!(a.next().as_u64(), 2);
        assert_eq!(a.to_string(), "txn:1");
    }
}
