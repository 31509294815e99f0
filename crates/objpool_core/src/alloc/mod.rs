//! Persistent object allocator.
//!
//! The heap is a chain of blocks, each led by a 16-byte header. An oid
//! points just past the header. Allocation is split in two steps so the
//! transaction manager can log its intent in between:
//!
//! 1. `reserve` picks a free block; nothing changes on disk except possibly
//!    the merge of free neighbours
//! 2. `publish` zeroes the data and flips the header to allocated
//!
//! A crash anywhere leaves a valid chain, and freeing the named oid during
//! rollback is correct whether or not publish completed.

mod audit;
mod block;
mod heap;

pub use audit::{HeapAudit, ReachabilityAudit};
pub use block::{BlockHeader, BLOCK_ALIGN, BLOCK_HEADER_SIZE, MIN_BLOCK_SIZE};
pub(crate) use block::{align_down, align_up};
pub(crate) use heap::{walk, Heap};
