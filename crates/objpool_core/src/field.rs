//! Typed field descriptors for objects stored in a pool.
//!
//! A [`Field`] names a fixed-size value at a byte offset inside an object.
//! Values are stored little-endian.
//!
//! ```rust
//! use objpool_core::{Field, Oid};
//!
//! // struct root { lock: [u8; 8], foo: Oid }
//! const ROOT_FOO: Field<Oid> = Field::new(8);
//! // struct foo { bar: i32 }
//! const FOO_BAR: Field<i32> = Field::new(0);
//! assert_eq!(ROOT_FOO.len(), 16);
//! assert_eq!(FOO_BAR.len(), 4);
//! ```

use crate::types::Oid;
use std::fmt;
use std::marker::PhantomData;

/// A value with a fixed-size encoding inside the pool.
pub trait FieldValue: Sized + Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Appends the encoded value to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Decodes a value from exactly `SIZE` bytes.
    fn decode(bytes: &[u8]) -> Option<Self>;
}

macro_rules! impl_field_value_le {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FieldValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(&self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Option<Self> {
                    let array = bytes.try_into().ok()?;
                    Some(<$ty>::from_le_bytes(array))
                }
            }
        )*
    };
}

impl_field_value_le!(u8, u16, u32, u64, i32, i64);

impl FieldValue for Oid {
    const SIZE: usize = Oid::ENCODED_SIZE;

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_bytes());
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        Oid::from_slice(bytes)
    }
}

/// A typed value at a fixed offset inside an object.
pub struct Field<V> {
    offset: u64,
    _value: PhantomData<fn() -> V>,
}

impl<V: FieldValue> Field<V> {
    /// Creates a field at `offset` bytes from the start of the object.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self {
            offset,
            _value: PhantomData,
        }
    }

    /// Returns the byte offset within the object.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the encoded size of the field.
    #[must_use]
    pub const fn len(&self) -> u64 {
        V::SIZE as u64
    }

    /// Fields always have a non-zero size.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        V::SIZE == 0
    }
}

impl<V> Clone for Field<V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<V> Copy for Field<V> {}

impl<V> fmt::Debug for Field<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("offset", &self.offset)
            .field("type", &std::any::type_name::<V>())
            .finish()
    }
}
