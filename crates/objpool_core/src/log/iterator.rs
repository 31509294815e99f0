//! Iteration over the counted records of an undo log.
//!
//! Only the first `record_count` records are ever read: bytes past them may
//! hold a half-written record from a crash and are ignored. Every counted
//! record must decode and pass its checksum, otherwise iteration stops with
//! `ConsistencyCheckFailed`.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{
    compute_crc32, framed_len, UndoRecord, UndoRecordKind, RECORD_HEADER_SIZE,
};
use crate::space::PoolSpace;

/// Read position over a run of counted records.
///
/// The cursor does not borrow the pool space, so callers can interleave
/// reads with their own writes.
#[derive(Debug, Clone)]
pub(crate) struct LogCursor {
    pos: u64,
    end: u64,
    remaining: u64,
}

impl LogCursor {
    pub(crate) fn new(start: u64, end: u64, count: u64) -> Self {
        Self {
            pos: start,
            end,
            remaining: count,
        }
    }

    /// Offset just past the last record read.
    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    /// Reads the next record, or `None` once all counted records are read.
    pub(crate) fn next_record(&mut self, space: &PoolSpace) -> CoreResult<Option<UndoRecord>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if self.pos + RECORD_HEADER_SIZE as u64 > self.end {
            return Err(CoreError::consistency(format!(
                "undo record at {:#x} overruns the log ({} records still counted)",
                self.pos, self.remaining
            )));
        }

        let envelope = space.read(self.pos, RECORD_HEADER_SIZE)?;
        let kind = UndoRecordKind::from_byte(envelope[0]).ok_or_else(|| {
            CoreError::consistency(format!(
                "unknown undo record kind {} at {:#x}",
                envelope[0], self.pos
            ))
        })?;
        let mut len = [0u8; 4];
        len.copy_from_slice(&envelope[4..8]);
        let payload_len = u32::from_le_bytes(len) as usize;

        let total = framed_len(payload_len) as u64;
        if self.pos + total > self.end {
            return Err(CoreError::consistency(format!(
                "undo record at {:#x} of {total} bytes overruns the log",
                self.pos
            )));
        }

        let bytes = space.read(self.pos, RECORD_HEADER_SIZE + payload_len + 4)?;
        let crc_at = RECORD_HEADER_SIZE + payload_len;
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&bytes[crc_at..crc_at + 4]);
        let stored = u32::from_le_bytes(stored);
        let computed = compute_crc32(&bytes[..crc_at]);
        if stored != computed {
            return Err(CoreError::consistency(format!(
                "undo record checksum mismatch at {:#x}: stored {stored:08x}, computed {computed:08x}",
                self.pos
            )));
        }

        let record = UndoRecord::decode_payload(kind, &bytes[RECORD_HEADER_SIZE..crc_at])?;
        self.pos += total;
        self.remaining -= 1;
        Ok(Some(record))
    }
}

/// Iterator over the counted records of an undo log, in append order.
///
/// Restartable: each call to [`crate::log::UndoLog::iter`] starts over from
/// the first record. The iterator fuses after the first error.
pub struct UndoLogIter<'a> {
    space: &'a PoolSpace,
    cursor: LogCursor,
    finished: bool,
}

impl<'a> UndoLogIter<'a> {
    pub(crate) fn new(space: &'a PoolSpace, cursor: LogCursor) -> Self {
        Self {
            space,
            cursor,
            finished: false,
        }
    }
}

impl Iterator for UndoLogIter<'_> {
    type Item = CoreResult<UndoRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.cursor.next_record(self.space) {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Oid;
    use objpool_storage::InMemoryBackend;

    fn space_with(records: &[UndoRecord]) -> (PoolSpace, u64) {
        let mut space = PoolSpace::new(Box::new(InMemoryBackend::new(1024)));
        let mut pos = 0;
        for record in records {
            let bytes = record.encode().unwrap();
            space.write(pos, &bytes).unwrap();
            pos += bytes.len() as u64;
        }
        (space, pos)
    }

    #[test]
    fn reads_only_counted_records() {
        let records = vec![
            UndoRecord::Alloc {
                oid: Oid::new(0x100, 1),
            },
            UndoRecord::Free {
                oid: Oid::new(0x200, 1),
            },
        ];
        let (space, _) = space_with(&records);

        let read: Vec<_> = UndoLogIter::new(&space, LogCursor::new(0, 1024, 1))
            .collect::<CoreResult<_>>()
            .unwrap();
        assert_eq!(read, records[..1].to_vec());
    }

    #[test]
    fn cursor_tracks_position() {
        let records = vec![UndoRecord::Snapshot {
            oid: Oid::new(0x100, 1),
            offset: 0,
            data: vec![9; 10],
        }];
        let (space, end) = space_with(&records);

        let mut cursor = LogCursor::new(0, 1024, 1);
        assert!(cursor.next_record(&space).unwrap().is_some());
        assert_eq!(cursor.position(), end);
        assert!(cursor.next_record(&space).unwrap().is_none());
    }

    #[test]
    fn corrupted_record_is_fatal() {
        let records = vec![UndoRecord::Alloc {
            oid: Oid::new(0x100, 1),
        }];
        let (mut space, _) = space_with(&records);
        space.write(10, &[0xFF]).unwrap();

        let mut iter = UndoLogIter::new(&space, LogCursor::new(0, 1024, 1));
        assert!(matches!(
            iter.next(),
            Some(Err(CoreError::ConsistencyCheckFailed { .. }))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn count_beyond_written_records_is_fatal() {
        let (space, _) = space_with(&[]);
        let mut cursor = LogCursor::new(0, 1024, 1);
        // zeroed bytes decode as kind 0
        assert!(cursor.next_record(&space).is_err());
    }

    #[test]
    fn record_overrunning_region_is_fatal() {
        let records = vec![UndoRecord::Alloc {
            oid: Oid::new(0x100, 1),
        }];
        let (space, _) = space_with(&records);
        let mut cursor = LogCursor::new(0, 16, 1);
        assert!(cursor.next_record(&space).is_err());
    }
}
