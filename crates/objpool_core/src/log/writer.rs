//! Undo log region management.

use crate::error::{CoreError, CoreResult};
use crate::log::iterator::{LogCursor, UndoLogIter};
use crate::log::record::UndoRecord;
use crate::space::PoolSpace;
use crate::types::TransactionId;
use serde::Serialize;
use tracing::debug;

/// Size of the log header at the start of the log region.
pub const LOG_HEADER_SIZE: u64 = 64;

const STATE_OFFSET: u64 = 0;
const COUNT_OFFSET: u64 = 8;
const TXID_OFFSET: u64 = 16;
const LOCK_ID_OFFSET: u64 = 24;

/// Persistent state word of the undo log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogState {
    /// No transaction in flight; records are meaningless.
    None,
    /// A transaction is in flight; recovery rolls it back.
    Active,
    /// A transaction passed its commit point; recovery rolls it forward.
    Committed,
}

impl LogState {
    fn from_word(word: u64) -> Option<Self> {
        match word {
            0 => Some(Self::None),
            1 => Some(Self::Active),
            2 => Some(Self::Committed),
            _ => None,
        }
    }

    const fn as_word(self) -> u64 {
        match self {
            Self::None => 0,
            Self::Active => 1,
            Self::Committed => 2,
        }
    }
}

/// Decoded undo log header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogHeader {
    /// Log state.
    pub state: LogState,
    /// Number of records appended since `begin`.
    pub record_count: u64,
    /// Id of the last transaction to begin.
    pub txid: TransactionId,
    /// Id of the lock held by that transaction, 0 for none.
    pub lock_id: u64,
}

/// The undo log: a fixed region holding a 64-byte header followed by
/// 8-byte aligned records.
///
/// A record is appended by writing and persisting its bytes, then writing
/// and persisting the 8-byte record count. A crash between the two leaves a
/// record past the count, which is never read.
#[derive(Debug)]
pub(crate) struct UndoLog {
    offset: u64,
    size: u64,
    count: u64,
    /// Next free byte; volatile, rebuilt on load.
    tail: u64,
}

impl UndoLog {
    /// Writes an empty log header over `[offset, offset + size)`.
    pub(crate) fn format(space: &mut PoolSpace, offset: u64, size: u64) -> CoreResult<Self> {
        if size <= LOG_HEADER_SIZE {
            return Err(CoreError::invalid_argument(format!(
                "undo log of {size} bytes has no room for records"
            )));
        }
        space.zero_persist(offset, LOG_HEADER_SIZE)?;
        Ok(Self::empty(offset, size))
    }

    /// Loads an existing log and positions the write cursor after its last
    /// counted record.
    ///
    /// A stale record count under a `None` state is reset to zero.
    pub(crate) fn load(space: &mut PoolSpace, offset: u64, size: u64) -> CoreResult<Self> {
        let header = Self::read_header(space, offset)?;
        let mut log = Self::empty(offset, size);

        if header.state == LogState::None {
            if header.record_count != 0 {
                debug!(count = header.record_count, "resetting stale undo log count");
                space.write_u64_persist(offset + COUNT_OFFSET, 0)?;
            }
            return Ok(log);
        }

        let mut cursor = log.cursor(header.record_count);
        while cursor.next_record(space)?.is_some() {}
        log.count = header.record_count;
        log.tail = cursor.position();
        Ok(log)
    }

    /// Reads the log header without modifying anything.
    pub(crate) fn read_header(space: &PoolSpace, offset: u64) -> CoreResult<LogHeader> {
        let word = space.read_u64(offset + STATE_OFFSET)?;
        let state = LogState::from_word(word)
            .ok_or_else(|| CoreError::consistency(format!("invalid undo log state {word}")))?;
        Ok(LogHeader {
            state,
            record_count: space.read_u64(offset + COUNT_OFFSET)?,
            txid: TransactionId::new(space.read_u64(offset + TXID_OFFSET)?),
            lock_id: space.read_u64(offset + LOCK_ID_OFFSET)?,
        })
    }

    /// Reads the header and every counted record without modifying the
    /// pool. A `None` state yields no records whatever the count says.
    pub(crate) fn inspect(
        space: &PoolSpace,
        offset: u64,
        size: u64,
    ) -> CoreResult<(LogHeader, Vec<UndoRecord>)> {
        let header = Self::read_header(space, offset)?;
        if header.state == LogState::None {
            return Ok((header, Vec::new()));
        }
        let log = Self::empty(offset, size);
        let records = UndoLogIter::new(space, log.cursor(header.record_count))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((header, records))
    }

    fn empty(offset: u64, size: u64) -> Self {
        Self {
            offset,
            size,
            count: 0,
            tail: offset + LOG_HEADER_SIZE,
        }
    }

    fn cursor(&self, count: u64) -> LogCursor {
        LogCursor::new(self.offset + LOG_HEADER_SIZE, self.offset + self.size, count)
    }

    pub(crate) fn header(&self, space: &PoolSpace) -> CoreResult<LogHeader> {
        Self::read_header(space, self.offset)
    }

    /// Iterates the counted records in append order.
    pub(crate) fn iter<'a>(&self, space: &'a PoolSpace) -> UndoLogIter<'a> {
        UndoLogIter::new(space, self.cursor(self.count))
    }

    /// Reads every counted record.
    pub(crate) fn records(&self, space: &PoolSpace) -> CoreResult<Vec<UndoRecord>> {
        self.iter(space).collect()
    }

    #[cfg(test)]
    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    /// Bytes still available for records.
    pub(crate) fn available(&self) -> u64 {
        self.offset + self.size - self.tail
    }

    /// Bytes available for records in an empty log.
    pub(crate) fn capacity(&self) -> u64 {
        self.size - LOG_HEADER_SIZE
    }

    /// Marks the log ACTIVE for transaction `txid`.
    pub(crate) fn begin(
        &mut self,
        space: &mut PoolSpace,
        txid: TransactionId,
        lock_id: u64,
    ) -> CoreResult<()> {
        if self.count != 0 {
            return Err(CoreError::consistency(
                "undo log must be empty before a transaction begins",
            ));
        }
        space.write_u64_persist(self.offset + TXID_OFFSET, txid.as_u64())?;
        space.write_u64_persist(self.offset + LOCK_ID_OFFSET, lock_id)?;
        space.write_u64_persist(self.offset + STATE_OFFSET, LogState::Active.as_word())
    }

    /// Durably appends one record.
    pub(crate) fn append(&mut self, space: &mut PoolSpace, record: &UndoRecord) -> CoreResult<()> {
        let needed = record.encoded_len();
        let available = self.available();
        if needed > available {
            return Err(CoreError::LogExhausted { needed, available });
        }

        let bytes = record.encode()?;
        space.write_persist(self.tail, &bytes)?;
        space.write_u64_persist(self.offset + COUNT_OFFSET, self.count + 1)?;

        self.count += 1;
        self.tail += needed;
        debug!(kind = ?record.kind(), oid = %record.oid(), count = self.count, "undo record appended");
        Ok(())
    }

    /// Persists the commit point.
    pub(crate) fn mark_committed(&mut self, space: &mut PoolSpace) -> CoreResult<()> {
        space.write_u64_persist(self.offset + STATE_OFFSET, LogState::Committed.as_word())
    }

    /// Marks the log empty: count first, then state.
    pub(crate) fn clear(&mut self, space: &mut PoolSpace) -> CoreResult<()> {
        space.write_u64_persist(self.offset + COUNT_OFFSET, 0)?;
        space.write_u64_persist(self.offset + STATE_OFFSET, LogState::None.as_word())?;
        self.count = 0;
        self.tail = self.offset + LOG_HEADER_SIZE;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Oid;
    use objpool_storage::InMemoryBackend;

    const LOG_AT: u64 = 64;
    const LOG_SIZE: u64 = 512;

    fn setup() -> (PoolSpace, UndoLog) {
        let mut space = PoolSpace::new(Box::new(InMemoryBackend::new(1024)));
        let log = UndoLog::format(&mut space, LOG_AT, LOG_SIZE).unwrap();
        (space, log)
    }

    fn alloc(n: u64) -> UndoRecord {
        UndoRecord::Alloc {
            oid: Oid::new(0x1000 + n * 16, 1),
        }
    }

    #[test]
    fn fresh_log_is_empty() {
        let (space, log) = setup();
        let header = log.header(&space).unwrap();
        assert_eq!(header.state, LogState::None);
        assert_eq!(header.record_count, 0);
        assert_eq!(log.available(), LOG_SIZE - LOG_HEADER_SIZE);
        assert_eq!(log.capacity(), LOG_SIZE - LOG_HEADER_SIZE);
    }

    #[test]
    fn begin_append_clear() {
        let (mut space, mut log) = setup();
        log.begin(&mut space, TransactionId::new(7), 3).unwrap();
        log.append(&mut space, &alloc(1)).unwrap();
        log.append(&mut space, &alloc(2)).unwrap();

        let header = log.header(&space).unwrap();
        assert_eq!(header.state, LogState::Active);
        assert_eq!(header.record_count, 2);
        assert_eq!(header.txid, TransactionId::new(7));
        assert_eq!(header.lock_id, 3);
        assert_eq!(log.records(&space).unwrap(), vec![alloc(1), alloc(2)]);

        log.clear(&mut space).unwrap();
        let header = log.header(&space).unwrap();
        assert_eq!(header.state, LogState::None);
        assert_eq!(header.record_count, 0);
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn reload_restores_tail() {
        let (mut space, mut log) = setup();
        log.begin(&mut space, TransactionId::new(1), 0).unwrap();
        log.append(&mut space, &alloc(1)).unwrap();
        let available = log.available();

        let reloaded = UndoLog::load(&mut space, LOG_AT, LOG_SIZE).unwrap();
        assert_eq!(reloaded.count(), 1);
        assert_eq!(reloaded.available(), available);
    }

    #[test]
    fn exhausted_log_rejects_record() {
        let (mut space, mut log) = setup();
        log.begin(&mut space, TransactionId::new(1), 0).unwrap();
        let big = UndoRecord::Snapshot {
            oid: Oid::new(0x1000, 1),
            offset: 0,
            data: vec![0; LOG_SIZE as usize],
        };
        let err = log.append(&mut space, &big).unwrap_err();
        assert!(matches!(err, CoreError::LogExhausted { .. }));
        assert_eq!(log.count(), 0);
    }

    #[test]
    fn stale_count_under_none_is_reset() {
        let (mut space, _) = setup();
        space.write_u64_persist(LOG_AT + COUNT_OFFSET, 5).unwrap();

        let log = UndoLog::load(&mut space, LOG_AT, LOG_SIZE).unwrap();
        assert_eq!(log.count(), 0);
        assert_eq!(log.header(&space).unwrap().record_count, 0);
    }

    #[test]
    fn invalid_state_word() {
        let (mut space, _) = setup();
        space.write_u64_persist(LOG_AT, 9).unwrap();
        assert!(UndoLog::load(&mut space, LOG_AT, LOG_SIZE).is_err());
    }

    #[test]
    fn commit_point() {
        let (mut space, mut log) = setup();
        log.begin(&mut space, TransactionId::new(1), 0).unwrap();
        log.mark_committed(&mut space).unwrap();
        assert_eq!(log.header(&space).unwrap().state, LogState::Committed);
    }
}
