//! Undo log for crash-consistent transactions.
//!
//! Every transaction records enough to undo itself before touching the pool.
//! The log lives at a fixed offset inside the pool so recovery can find it
//! without any volatile state.
//!
//! ## Layout
//!
//! ```text
//! | state (8) | record_count (8) | txid (8) | lock_id (8) | reserved (32) |
//! | record | record | ...
//! ```
//!
//! Each record is framed as
//!
//! ```text
//! | kind (1) | reserved (3) | length (4) | payload (N) | crc32 (4) | pad to 8 |
//! ```
//!
//! ## Invariants
//!
//! - A record is persisted before the count that makes it visible
//! - The count is a single 8-byte word, so a record is either counted or not
//! - Counted records that fail their checksum are fatal; nothing is repaired
//! - Clearing writes the count, then the state; both orders of crash recover

mod iterator;
mod record;
mod writer;

pub use record::{compute_crc32, UndoRecord, UndoRecordKind};
pub use writer::{LogHeader, LogState, LOG_HEADER_SIZE};
pub(crate) use writer::UndoLog;
