//! Transaction manager.

use crate::alloc::Heap;
use crate::error::{CoreError, CoreResult};
use crate::field::{Field, FieldValue};
use crate::header::PoolHeader;
use crate::log::{LogHeader, UndoLog, UndoRecord};
use crate::space::PoolSpace;
use crate::stats::PoolStats;
use crate::transaction::lock::TxLockGuard;
use crate::transaction::state::{ActiveTx, TxState};
use crate::types::{ObjectType, Oid, TransactionId, ROOT_TYPE_NUM};
use std::sync::Arc;
use std::thread::ThreadId;
use tracing::{debug, error, warn};

/// What a rollback did, for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RollbackSummary {
    pub(crate) snapshots_restored: u64,
    pub(crate) allocations_undone: u64,
    pub(crate) frees_discarded: u64,
}

/// Owns the pool's mutable state and runs the transaction state machine.
///
/// Every undo-logged mutation goes through here. The manager guarantees:
/// - At most one transaction is active
/// - No byte of a pre-existing object is written before it is logged
/// - Deferred frees run only after the commit point is durable
/// - A failed rollback or a failure after the commit point blocks new
///   transactions until recovery runs
pub(crate) struct TransactionManager {
    space: PoolSpace,
    heap: Heap,
    log: UndoLog,
    root: Oid,
    state: TxState,
    active: Option<ActiveTx>,
    last_txid: TransactionId,
    needs_recovery: bool,
    stats: Arc<PoolStats>,
}

impl TransactionManager {
    /// Builds a manager over a freshly formatted pool.
    pub(crate) fn new(
        space: PoolSpace,
        heap: Heap,
        log: UndoLog,
        root: Oid,
        stats: Arc<PoolStats>,
    ) -> Self {
        Self {
            space,
            heap,
            log,
            root,
            state: TxState::None,
            active: None,
            last_txid: TransactionId::new(0),
            needs_recovery: false,
            stats,
        }
    }

    /// Rebuilds the volatile heap index and log cursor of an existing pool.
    pub(crate) fn load(
        mut space: PoolSpace,
        header: &PoolHeader,
        stats: Arc<PoolStats>,
    ) -> CoreResult<Self> {
        let heap = Heap::load(&space, header.heap_offset, header.heap_offset + header.heap_size)?;
        let log = UndoLog::load(&mut space, header.log_offset, header.log_size)?;
        let last_txid = log.header(&space)?.txid;
        Ok(Self {
            space,
            heap,
            log,
            root: header.root,
            state: TxState::None,
            active: None,
            last_txid,
            needs_recovery: false,
            stats,
        })
    }

    /// Re-reads the heap chain and log from the pool, discarding any
    /// volatile state. Only valid with no transaction active.
    pub(crate) fn reload(&mut self, header: &PoolHeader) -> CoreResult<()> {
        self.heap = Heap::load(
            &self.space,
            header.heap_offset,
            header.heap_offset + header.heap_size,
        )?;
        self.log = UndoLog::load(&mut self.space, header.log_offset, header.log_size)?;
        Ok(())
    }

    pub(crate) fn into_space(self) -> PoolSpace {
        self.space
    }

    pub(crate) fn space(&self) -> &PoolSpace {
        &self.space
    }

    pub(crate) fn space_mut(&mut self) -> &mut PoolSpace {
        &mut self.space
    }

    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn stats(&self) -> &PoolStats {
        &self.stats
    }

    pub(crate) fn state(&self) -> TxState {
        self.state
    }

    pub(crate) fn log_header(&self) -> CoreResult<LogHeader> {
        self.log.header(&self.space)
    }

    pub(crate) fn log_capacity(&self) -> u64 {
        self.log.capacity()
    }

    pub(crate) fn needs_recovery(&self) -> bool {
        self.needs_recovery
    }

    pub(crate) fn set_needs_recovery(&mut self, value: bool) {
        self.needs_recovery = value;
    }

    /// Returns the thread that began the active transaction.
    pub(crate) fn active_owner(&self) -> Option<ThreadId> {
        self.active.as_ref().map(|tx| tx.owner)
    }

    pub(crate) fn is_active(&self, id: TransactionId) -> bool {
        self.active.as_ref().is_some_and(|tx| tx.id == id)
    }

    fn check_active(&self, id: TransactionId) -> CoreResult<()> {
        if self.is_active(id) {
            Ok(())
        } else {
            Err(CoreError::TransactionNotActive)
        }
    }

    // === Transaction operations ===

    /// Starts a transaction. `lock`, if any, is already held by the caller.
    pub(crate) fn begin(&mut self, lock: Option<TxLockGuard>) -> CoreResult<TransactionId> {
        if self.needs_recovery {
            return Err(CoreError::RecoveryRequired);
        }
        if self.active.is_some() {
            return Err(CoreError::AlreadyActive);
        }

        let txid = self.last_txid.next();
        let lock_id = lock.as_ref().map_or(0, TxLockGuard::id);
        self.log.begin(&mut self.space, txid, lock_id)?;

        self.last_txid = txid;
        self.active = Some(ActiveTx::new(txid, lock));
        self.state = TxState::Active;
        self.stats.record_transaction_start();
        debug!(%txid, lock_id, "transaction started");
        Ok(txid)
    }

    /// Snapshots `[offset, offset + len)` of `oid` unless already logged.
    pub(crate) fn add_range(
        &mut self,
        id: TransactionId,
        oid: Oid,
        offset: u64,
        len: u64,
    ) -> CoreResult<()> {
        self.check_active(id)?;
        let start = self.heap.check_range(oid, offset, len)?;
        let result = self.snapshot(oid, start, start + len);
        self.abort_on_exhaustion(id, result)
    }

    /// Snapshots every byte of `oid`.
    pub(crate) fn add_object(&mut self, id: TransactionId, oid: Oid) -> CoreResult<()> {
        self.check_active(id)?;
        let len = self.heap.block(oid)?.data_size();
        self.add_range(id, oid, 0, len)
    }

    /// Logs the parts of `[start, end)` no earlier snapshot covers.
    fn snapshot(&mut self, oid: Oid, start: u64, end: u64) -> CoreResult<()> {
        let Some(tx) = self.active.as_mut() else {
            return Err(CoreError::TransactionNotActive);
        };
        if tx.fresh.covers(start, end) {
            return Ok(());
        }

        for (gap_start, gap_end) in tx.logged.gaps(start, end) {
            let len = gap_end - gap_start;
            let data = self.space.read(gap_start, len as usize)?;
            let record = UndoRecord::Snapshot {
                oid,
                offset: gap_start - oid.offset(),
                data,
            };
            self.log.append(&mut self.space, &record)?;
            tx.logged.insert(gap_start, gap_end);
            self.stats.record_snapshot(len);
        }
        Ok(())
    }

    /// Writes `data` into a logged or freshly allocated range.
    pub(crate) fn write(
        &mut self,
        id: TransactionId,
        oid: Oid,
        offset: u64,
        data: &[u8],
    ) -> CoreResult<()> {
        let start = self.write_unpersisted(id, oid, offset, data)?;
        if let Some(tx) = self.active.as_mut() {
            tx.dirty.insert(start, start + data.len() as u64);
        }
        Ok(())
    }

    fn write_unpersisted(
        &mut self,
        id: TransactionId,
        oid: Oid,
        offset: u64,
        data: &[u8],
    ) -> CoreResult<u64> {
        self.check_active(id)?;
        let len = data.len() as u64;
        let start = self.heap.check_range(oid, offset, len)?;
        let may_write = self
            .active
            .as_ref()
            .is_some_and(|tx| tx.may_write(start, start + len));
        if !may_write {
            return Err(CoreError::UnloggedWrite { offset: start, len });
        }
        self.space.write(start, data)?;
        Ok(start)
    }

    /// Snapshots, writes and persists one typed field.
    pub(crate) fn set<V: FieldValue>(
        &mut self,
        id: TransactionId,
        oid: Oid,
        field: Field<V>,
        value: V,
    ) -> CoreResult<()> {
        self.add_range(id, oid, field.offset(), field.len())?;
        let mut buf = Vec::with_capacity(V::SIZE);
        value.encode(&mut buf);
        let start = self.write_unpersisted(id, oid, field.offset(), &buf)?;
        self.space.persist(start, field.len())
    }

    /// Allocates a zeroed object whose allocation rollback undoes.
    pub(crate) fn allocate(&mut self, id: TransactionId, ty: ObjectType) -> CoreResult<Oid> {
        self.check_active(id)?;
        if ty.type_num() == ROOT_TYPE_NUM {
            return Err(CoreError::invalid_argument(
                "type number is reserved for the root object",
            ));
        }
        if ty.size() == 0 {
            return Err(CoreError::invalid_argument("object size must be non-zero"));
        }
        let result = self.allocate_logged(ty);
        self.abort_on_exhaustion(id, result)
    }

    fn allocate_logged(&mut self, ty: ObjectType) -> CoreResult<Oid> {
        let reservation = self.heap.reserve(&mut self.space, ty.size())?;
        let record = UndoRecord::Alloc {
            oid: reservation.oid(ty.type_num()),
        };
        if let Err(e) = self.log.append(&mut self.space, &record) {
            self.heap.unreserve(reservation);
            return Err(e);
        }

        let oid = self
            .heap
            .publish(&mut self.space, reservation, ty.type_num())?;
        let size = self.heap.block(oid)?.data_size();
        if let Some(tx) = self.active.as_mut() {
            tx.fresh.insert(oid.offset(), oid.offset() + size);
        }
        self.stats.record_allocation();
        debug!(%oid, size, "object allocated");
        Ok(oid)
    }

    /// Queues `oid` to be freed when the transaction commits.
    pub(crate) fn free(&mut self, id: TransactionId, oid: Oid) -> CoreResult<()> {
        self.check_active(id)?;
        self.heap.block(oid)?;
        if oid == self.root {
            return Err(CoreError::invalid_argument("the root object cannot be freed"));
        }
        if self.active.as_ref().is_some_and(|tx| tx.frees.contains(&oid)) {
            return Ok(());
        }

        let result = self.log.append(&mut self.space, &UndoRecord::Free { oid });
        self.abort_on_exhaustion(id, result)?;
        if let Some(tx) = self.active.as_mut() {
            tx.frees.push(oid);
        }
        debug!(%oid, "free deferred to commit");
        Ok(())
    }

    /// Makes the transaction durable and executes its deferred frees.
    pub(crate) fn commit(&mut self, id: TransactionId) -> CoreResult<()> {
        self.check_active(id)?;
        self.state = TxState::Committing;

        if let Err(e) = self.persist_dirty() {
            warn!(txid = %id, error = %e, "commit failed before commit point, rolling back");
            self.abort_after_failed_commit(id);
            return Err(e);
        }
        if let Err(e) = self.log.mark_committed(&mut self.space) {
            warn!(txid = %id, error = %e, "commit point not reached, rolling back");
            self.abort_after_failed_commit(id);
            return Err(e);
        }

        let frees = self
            .active
            .as_mut()
            .map(|tx| std::mem::take(&mut tx.frees))
            .unwrap_or_default();
        let result = self.finish_commit(&frees);

        // Dropping the transaction releases its lock.
        self.active = None;
        self.state = TxState::None;
        match result {
            Ok(()) => {
                self.stats.record_transaction_commit();
                debug!(txid = %id, frees = frees.len(), "transaction committed");
                Ok(())
            }
            Err(e) => {
                error!(txid = %id, error = %e, "commit failed after commit point; recovery required");
                self.needs_recovery = true;
                Err(e)
            }
        }
    }

    fn persist_dirty(&mut self) -> CoreResult<()> {
        let Some(tx) = self.active.as_ref() else {
            return Ok(());
        };
        for (start, end) in tx.dirty.iter() {
            self.space.persist(start, end - start)?;
        }
        Ok(())
    }

    fn finish_commit(&mut self, frees: &[Oid]) -> CoreResult<()> {
        for &oid in frees {
            if self.heap.free_if_allocated(&mut self.space, oid)? {
                self.stats.record_free();
            }
        }
        self.log.clear(&mut self.space)
    }

    /// Rolls the transaction back.
    pub(crate) fn abort(&mut self, id: TransactionId) -> CoreResult<()> {
        self.check_active(id)?;
        self.abort_active()
    }

    /// Rolls back whatever transaction is active and releases it.
    fn abort_active(&mut self) -> CoreResult<()> {
        let Some(txid) = self.active.as_ref().map(|tx| tx.id) else {
            return Err(CoreError::TransactionNotActive);
        };
        self.state = TxState::Aborting;
        let result = self
            .rollback_log()
            .and_then(|summary| self.log.clear(&mut self.space).map(|()| summary));

        self.active = None;
        self.state = TxState::None;
        self.stats.record_transaction_abort();
        match result {
            Ok(summary) => {
                debug!(
                    %txid,
                    restored = summary.snapshots_restored,
                    undone = summary.allocations_undone,
                    "transaction aborted"
                );
                Ok(())
            }
            Err(e) => {
                error!(%txid, error = %e, "rollback failed; recovery required");
                self.needs_recovery = true;
                Err(e)
            }
        }
    }

    fn abort_after_failed_commit(&mut self, id: TransactionId) {
        if let Err(abort_err) = self.abort_active() {
            error!(txid = %id, error = %abort_err, "rollback after failed commit failed");
        }
    }

    /// Aborts the transaction if `result` is a resource exhaustion error.
    fn abort_on_exhaustion<T>(&mut self, id: TransactionId, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(e) = &result {
            if e.is_exhaustion() && self.is_active(id) {
                warn!(txid = %id, error = %e, "aborting transaction");
                if let Err(abort_err) = self.abort_active() {
                    error!(txid = %id, error = %abort_err, "automatic abort failed");
                }
            }
        }
        result
    }

    // === Log replay, shared with recovery ===

    /// Applies the undo log in reverse: restores snapshots, frees
    /// allocations, drops deferred frees. Does not clear the log.
    pub(crate) fn rollback_log(&mut self) -> CoreResult<RollbackSummary> {
        let records = self.log.records(&self.space)?;
        let mut summary = RollbackSummary::default();

        for record in records.iter().rev() {
            match record {
                UndoRecord::Snapshot { oid, offset, data } => {
                    let start = self.replay_target(*oid, *offset, data.len() as u64)?;
                    self.space.write_persist(start, data)?;
                    summary.snapshots_restored += 1;
                }
                UndoRecord::Alloc { oid } => {
                    self.replay_target(*oid, 0, 0)?;
                    if self.heap.free_if_allocated(&mut self.space, *oid)? {
                        summary.allocations_undone += 1;
                    }
                }
                UndoRecord::Free { .. } => summary.frees_discarded += 1,
            }
        }
        Ok(summary)
    }

    /// Executes the deferred frees of a committed log. Does not clear it.
    pub(crate) fn roll_forward(&mut self) -> CoreResult<u64> {
        let records = self.log.records(&self.space)?;
        let mut applied = 0;
        for record in &records {
            if let UndoRecord::Free { oid } = record {
                self.replay_target(*oid, 0, 0)?;
                if self.heap.free_if_allocated(&mut self.space, *oid)? {
                    self.stats.record_free();
                    applied += 1;
                }
            }
        }
        Ok(applied)
    }

    pub(crate) fn clear_log(&mut self) -> CoreResult<()> {
        self.log.clear(&mut self.space)
    }

    /// Checks that a logged target lies inside the heap.
    fn replay_target(&self, oid: Oid, offset: u64, len: u64) -> CoreResult<u64> {
        let start = oid.offset().checked_add(offset);
        match start {
            Some(start) if !oid.is_null() && self.heap.contains(start, len) => Ok(start),
            _ => Err(CoreError::consistency(format!(
                "undo record targets {oid} + {offset} ({len} bytes) outside the heap"
            ))),
        }
    }

    // === Reads ===

    pub(crate) fn read(&self, oid: Oid, offset: u64, len: u64) -> CoreResult<Vec<u8>> {
        let start = self.heap.check_range(oid, offset, len)?;
        self.space.read(start, len as usize)
    }

    pub(crate) fn get<V: FieldValue>(&self, oid: Oid, field: Field<V>) -> CoreResult<V> {
        let bytes = self.read(oid, field.offset(), field.len())?;
        V::decode(&bytes).ok_or_else(|| {
            CoreError::invalid_reference(oid.offset() + field.offset(), "field decode failed")
        })
    }

    /// Persists an arbitrary range of the pool.
    pub(crate) fn persist(&mut self, offset: u64, len: u64) -> CoreResult<()> {
        let size = self.space.size()?;
        match offset.checked_add(len) {
            Some(end) if end <= size => self.space.persist(offset, len),
            _ => Err(CoreError::invalid_argument(format!(
                "persist range {offset:#x}+{len} exceeds pool of {size} bytes"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::align_up;
    use crate::log::LogState;
    use objpool_storage::InMemoryBackend;

    const LOG_AT: u64 = 64;
    const LOG_SIZE: u64 = 1024;
    const HEAP_AT: u64 = LOG_AT + LOG_SIZE;
    const POOL: u64 = HEAP_AT + 4096;
    const COUNTER: Field<u64> = Field::new(0);

    fn setup() -> (TransactionManager, Oid) {
        let mut space = PoolSpace::new(Box::new(InMemoryBackend::new(POOL as usize)));
        let log = UndoLog::format(&mut space, LOG_AT, LOG_SIZE).unwrap();
        let mut heap = Heap::format(&mut space, align_up(HEAP_AT), POOL).unwrap();
        let reservation = heap.reserve(&mut space, 64).unwrap();
        let root = heap.publish(&mut space, reservation, ROOT_TYPE_NUM).unwrap();
        let manager = TransactionManager::new(space, heap, log, root, Arc::new(PoolStats::new()));
        (manager, root)
    }

    #[test]
    fn commit_keeps_writes() {
        let (mut m, root) = setup();
        let id = m.begin(None).unwrap();
        m.set(id, root, COUNTER, 10).unwrap();
        m.commit(id).unwrap();

        assert_eq!(m.get(root, COUNTER).unwrap(), 10);
        assert_eq!(m.state(), TxState::None);
        assert_eq!(m.log_header().unwrap().state, LogState::None);
    }

    #[test]
    fn abort_restores_snapshots() {
        let (mut m, root) = setup();
        let id = m.begin(None).unwrap();
        m.set(id, root, COUNTER, 5).unwrap();
        m.commit(id).unwrap();

        let id = m.begin(None).unwrap();
        m.set(id, root, COUNTER, 10).unwrap();
        m.set(id, root, COUNTER, 11).unwrap();
        m.abort(id).unwrap();
        assert_eq!(m.get(root, COUNTER).unwrap(), 5);
    }

    #[test]
    fn overlapping_ranges_log_only_gaps() {
        let (mut m, root) = setup();
        let id = m.begin(None).unwrap();
        m.add_range(id, root, 0, 8).unwrap();
        m.add_range(id, root, 4, 8).unwrap();
        m.add_range(id, root, 0, 12).unwrap();
        assert_eq!(m.stats().snapshots_logged(), 2);
        assert_eq!(m.stats().snapshot_bytes(), 12);
        m.abort(id).unwrap();
    }

    #[test]
    fn unlogged_write_is_refused() {
        let (mut m, root) = setup();
        let id = m.begin(None).unwrap();
        m.add_range(id, root, 0, 4).unwrap();
        let err = m.write(id, root, 0, &[1; 8]).unwrap_err();
        assert!(matches!(err, CoreError::UnloggedWrite { len: 8, .. }));
        m.write(id, root, 0, &[1; 4]).unwrap();
        m.commit(id).unwrap();
    }

    #[test]
    fn fresh_objects_are_not_snapshotted() {
        let (mut m, _) = setup();
        let id = m.begin(None).unwrap();
        let oid = m.allocate(id, ObjectType::new(1, 32)).unwrap();
        let before = m.stats().snapshots_logged();
        m.add_range(id, oid, 0, 32).unwrap();
        m.write(id, oid, 0, &[7; 32]).unwrap();
        assert_eq!(m.stats().snapshots_logged(), before);
        m.commit(id).unwrap();
        assert_eq!(m.read(oid, 0, 32).unwrap(), vec![7; 32]);
    }

    #[test]
    fn abort_undoes_allocation() {
        let (mut m, _) = setup();
        let id = m.begin(None).unwrap();
        let oid = m.allocate(id, ObjectType::new(1, 32)).unwrap();
        m.abort(id).unwrap();
        assert!(m.heap().block(oid).is_err());
    }

    #[test]
    fn free_is_deferred_until_commit() {
        let (mut m, _) = setup();
        let id = m.begin(None).unwrap();
        let oid = m.allocate(id, ObjectType::new(1, 16)).unwrap();
        m.commit(id).unwrap();

        let id = m.begin(None).unwrap();
        m.free(id, oid).unwrap();
        assert!(m.heap().block(oid).is_ok());
        m.abort(id).unwrap();
        assert!(m.heap().block(oid).is_ok());

        let id = m.begin(None).unwrap();
        m.free(id, oid).unwrap();
        m.free(id, oid).unwrap();
        m.commit(id).unwrap();
        assert!(m.heap().block(oid).is_err());
        assert_eq!(m.stats().frees(), 1);
    }

    #[test]
    fn root_cannot_be_freed() {
        let (mut m, root) = setup();
        let id = m.begin(None).unwrap();
        assert!(matches!(
            m.free(id, root),
            Err(CoreError::InvalidArgument { .. })
        ));
        m.abort(id).unwrap();
    }

    #[test]
    fn second_begin_is_refused() {
        let (mut m, _) = setup();
        let id = m.begin(None).unwrap();
        assert!(matches!(m.begin(None), Err(CoreError::AlreadyActive)));
        m.commit(id).unwrap();
        assert!(m.commit(id).is_err());
    }

    #[test]
    fn log_exhaustion_aborts() {
        let (mut m, root) = setup();
        let id = m.begin(None).unwrap();
        m.set(id, root, COUNTER, 5).unwrap();
        m.commit(id).unwrap();

        let id = m.begin(None).unwrap();
        m.set(id, root, COUNTER, 6).unwrap();
        let big = m.allocate(id, ObjectType::new(1, 2048)).unwrap();
        m.commit(id).unwrap();

        let id = m.begin(None).unwrap();
        m.set(id, root, COUNTER, 7).unwrap();
        let err = m.add_range(id, big, 0, 2048).unwrap_err();
        assert!(matches!(err, CoreError::LogExhausted { .. }));
        assert!(!m.is_active(id));
        assert_eq!(m.get(root, COUNTER).unwrap(), 6);
        assert!(matches!(
            m.set(id, root, COUNTER, 8),
            Err(CoreError::TransactionNotActive)
        ));
    }

    #[test]
    fn heap_exhaustion_aborts() {
        let (mut m, root) = setup();
        let id = m.begin(None).unwrap();
        m.set(id, root, COUNTER, 3).unwrap();
        let err = m.allocate(id, ObjectType::new(1, POOL)).unwrap_err();
        assert!(matches!(err, CoreError::HeapExhausted { .. }));
        assert!(!m.is_active(id));
        assert_eq!(m.get(root, COUNTER).unwrap(), 0);
    }

    #[test]
    fn transaction_ids_increase() {
        let (mut m, _) = setup();
        let a = m.begin(None).unwrap();
        m.abort(a).unwrap();
        let b = m.begin(None).unwrap();
        assert!(b > a);
        assert_eq!(m.log_header().unwrap().txid, b);
        m.commit(b).unwrap();
    }

    #[test]
    fn reserved_type_number_rejected() {
        let (mut m, _) = setup();
        let id = m.begin(None).unwrap();
        assert!(m.allocate(id, ObjectType::new(ROOT_TYPE_NUM, 8)).is_err());
        assert!(m.allocate(id, ObjectType::new(1, 0)).is_err());
        assert!(m.is_active(id));
        m.abort(id).unwrap();
    }
}
