//! Application-facing transaction handle.

use crate::error::CoreResult;
use crate::field::{Field, FieldValue};
use crate::pool::Pool;
use crate::types::{ObjectType, Oid, TransactionId};
use std::fmt;
use std::marker::PhantomData;
use tracing::{error, warn};

/// An active transaction on a [`Pool`].
///
/// Obtained from [`Pool::begin`] or inside [`Pool::transaction`]. Every
/// mutation of a pre-existing object must be preceded by
/// [`add_range`](Self::add_range) (or made with [`set`](Self::set), which
/// does both). Objects from [`allocate`](Self::allocate) can be written
/// freely until the transaction ends.
///
/// Dropping a handle without committing aborts the transaction. After
/// an abort caused by `LogExhausted` or `HeapExhausted` the handle is inert
/// and every call returns `TransactionNotActive`.
///
/// A handle stays on the thread that began it, so a nested
/// [`Pool::begin`] from that thread is refused instead of waiting on a
/// lock the handle already holds:
///
/// ```compile_fail
/// use objpool_core::Transaction;
///
/// fn assert_send<T: Send>() {}
/// assert_send::<Transaction<'static>>();
/// ```
///
/// ```rust
/// use objpool_core::{Config, Field, ObjectType, Oid, Pool};
/// use objpool_storage::InMemoryBackend;
///
/// const ROOT_FOO: Field<Oid> = Field::new(0);
/// const FOO_BAR: Field<i32> = Field::new(0);
/// const FOO: ObjectType = ObjectType::new(1, 4);
///
/// let config = Config::default().pool_size(1 << 20).log_size(8192);
/// let backend = Box::new(InMemoryBackend::new(config.pool_size as usize));
/// let pool = Pool::create_with_backend(backend, "example", &config).unwrap();
/// let root = pool.root();
///
/// let mut tx = pool.begin(None).unwrap();
/// let foo = tx.allocate(FOO).unwrap();
/// tx.set(foo, FOO_BAR, 5).unwrap();
/// tx.set(root, ROOT_FOO, foo).unwrap();
/// tx.commit().unwrap();
///
/// assert_eq!(pool.get(foo, FOO_BAR).unwrap(), 5);
/// ```
pub struct Transaction<'p> {
    pool: &'p Pool,
    id: TransactionId,
    finished: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'p> Transaction<'p> {
    pub(crate) fn new(pool: &'p Pool, id: TransactionId) -> Self {
        Self {
            pool,
            id,
            finished: false,
            _not_send: PhantomData,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns true while this transaction is the pool's active one.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.finished && self.pool.manager().is_active(self.id)
    }

    /// Saves `[offset, offset + len)` of `oid` so the transaction can modify
    /// it in place. Bytes already saved by this transaction are not saved
    /// again.
    pub fn add_range(&mut self, oid: Oid, offset: u64, len: u64) -> CoreResult<()> {
        self.pool.manager().add_range(self.id, oid, offset, len)
    }

    /// Saves the whole object.
    pub fn add_object(&mut self, oid: Oid) -> CoreResult<()> {
        self.pool.manager().add_object(self.id, oid)
    }

    /// Writes `data` at `offset` inside `oid`.
    ///
    /// Fails with `UnloggedWrite` unless the range was added to the
    /// transaction or belongs to an object it allocated. The bytes are
    /// persisted at commit.
    pub fn write(&mut self, oid: Oid, offset: u64, data: &[u8]) -> CoreResult<()> {
        self.pool.manager().write(self.id, oid, offset, data)
    }

    /// Saves, writes and persists one field.
    pub fn set<V: FieldValue>(&mut self, oid: Oid, field: Field<V>, value: V) -> CoreResult<()> {
        self.pool.manager().set(self.id, oid, field, value)
    }

    /// Reads a field, including this transaction's uncommitted writes.
    pub fn get<V: FieldValue>(&self, oid: Oid, field: Field<V>) -> CoreResult<V> {
        self.pool.manager().get(oid, field)
    }

    /// Allocates a zeroed object. Abort or a crash before commit frees it.
    pub fn allocate(&mut self, ty: ObjectType) -> CoreResult<Oid> {
        self.pool.manager().allocate(self.id, ty)
    }

    /// Frees `oid` when the transaction commits. Until then it stays valid.
    pub fn free(&mut self, oid: Oid) -> CoreResult<()> {
        self.pool.manager().free(self.id, oid)
    }

    /// Commits the transaction.
    pub fn commit(mut self) -> CoreResult<()> {
        self.finished = true;
        self.pool.manager().commit(self.id)
    }

    /// Rolls the transaction back.
    pub fn abort(mut self) -> CoreResult<()> {
        self.finished = true;
        self.pool.manager().abort(self.id)
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut manager = self.pool.manager();
        if manager.is_active(self.id) {
            warn!(txid = %self.id, "transaction dropped without commit, aborting");
            if let Err(e) = manager.abort(self.id) {
                error!(txid = %self.id, error = %e, "abort on drop failed");
            }
        }
    }
}
