//! # objpool Storage
//!
//! Durable byte-addressable storage for objpool pools.
//!
//! A backend models a fixed-size region of durable memory. Writes land in
//! place and become durable only once the covering range has been passed to
//! [`StorageBackend::persist`]. Backends never interpret the bytes they hold;
//! the pool header, undo log and heap formats all live in `objpool_core`.
//!
//! ## Design Principles
//!
//! - The size is fixed when the backend is created
//! - `write_at` is in-place; there is no append
//! - `persist` is the durability barrier
//! - Aligned 8-byte writes followed by `persist` are failure-atomic
//! - Must be `Send + Sync`
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral pools
//! - [`FileBackend`] - For persistent pools using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use objpool_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new(64);
//! backend.write_at(8, b"hello").unwrap();
//! backend.persist(8, 5).unwrap();
//! assert_eq!(backend.read_at(8, 5).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
