//! Pool handle: creation, open with recovery, transactions and reads.

use crate::alloc::{
    align_down, align_up, Heap, HeapAudit, ReachabilityAudit, BLOCK_HEADER_SIZE,
};
use crate::check::{self, CheckReport};
use crate::config::{Config, MIN_LOG_SIZE};
use crate::error::{CoreError, CoreResult};
use crate::field::{Field, FieldValue};
use crate::header::{PoolHeader, FORMAT_MAJOR, FORMAT_MINOR, HEADER_SIZE};
use crate::log::{LogHeader, UndoLog};
use crate::recovery::{self, RecoveryReport};
use crate::space::PoolSpace;
use crate::stats::PoolStats;
use crate::transaction::{Transaction, TransactionManager, TxLock, TxState};
use crate::types::{Oid, ROOT_TYPE_NUM};
use objpool_storage::{FileBackend, StorageBackend, StorageError};
use parking_lot::{Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};
use uuid::Uuid;

const IN_MEMORY: &str = "<backend>";

/// An open pool.
///
/// `Pool` is the entry point of objpool. It provides:
/// - Pool creation and open, with crash recovery before the handle is returned
/// - Undo-logged transactions
/// - Reads of objects and fields
/// - Heap audits and consistency checks
///
/// # Creating and opening
///
/// ```rust,ignore
/// use objpool_core::Pool;
/// use std::path::Path;
///
/// let pool = Pool::create(Path::new("app.pool"), "my-layout", 8 << 20, 0o600)?;
/// pool.close()?;
///
/// // Recovery of an interrupted transaction happens here.
/// let pool = Pool::open(Path::new("app.pool"), "my-layout")?;
/// ```
///
/// # Concurrency
///
/// `Pool` is `Send + Sync`. One transaction is active at a time; a
/// [`TxLock`] passed to [`Pool::begin`] makes concurrent callers wait their
/// turn instead of failing with `AlreadyActive`.
pub struct Pool {
    manager: Mutex<TransactionManager>,
    header: PoolHeader,
    stats: Arc<PoolStats>,
    recovery: RecoveryReport,
    path: Option<PathBuf>,
}

/// Region placement computed at creation.
struct Geometry {
    log_offset: u64,
    log_size: u64,
    heap_offset: u64,
    heap_end: u64,
}

impl Geometry {
    fn compute(pool_size: u64, config: &Config) -> Result<Self, String> {
        if config.root_size == 0 {
            return Err("root object size must be non-zero".to_string());
        }
        let log_size = config.log_size.div_ceil(8) * 8;
        if log_size < MIN_LOG_SIZE {
            return Err(format!(
                "undo log of {log_size} bytes is below the minimum of {MIN_LOG_SIZE}"
            ));
        }
        let log_offset = HEADER_SIZE;
        let heap_offset = align_up(log_offset + log_size);
        let heap_end = align_down(pool_size);
        let root_block = config.root_size.saturating_add(BLOCK_HEADER_SIZE);
        if heap_end <= heap_offset || heap_end - heap_offset < root_block {
            return Err(format!(
                "pool of {pool_size} bytes is too small for a {log_size} byte log and a \
                 {} byte root object",
                config.root_size
            ));
        }
        Ok(Self {
            log_offset,
            log_size,
            heap_offset,
            heap_end,
        })
    }
}

impl Pool {
    // === Creation ===

    /// Creates a pool file of `pool_size` bytes with the given permissions.
    ///
    /// # Errors
    ///
    /// Returns `PoolCreateFailed` if the file exists, the layout is invalid,
    /// or the size cannot hold the header, log and root object.
    pub fn create(path: &Path, layout: &str, pool_size: u64, mode: u32) -> CoreResult<Self> {
        let config = Config::default().pool_size(pool_size).mode(mode);
        Self::create_with_config(path, layout, &config)
    }

    /// Creates a pool file using `config` for geometry and durability.
    pub fn create_with_config(path: &Path, layout: &str, config: &Config) -> CoreResult<Self> {
        let shown = path.display().to_string();
        PoolHeader::validate_layout(layout)
            .map_err(|e| CoreError::pool_create_failed(&shown, e.to_string()))?;

        let mut backend = FileBackend::create(path, config.pool_size, config.mode)
            .map_err(|e| CoreError::pool_create_failed(&shown, e.to_string()))?;
        backend
            .lock_exclusive()
            .map_err(|e| CoreError::pool_create_failed(&shown, e.to_string()))?;
        backend.set_sync_on_persist(config.sync_on_persist);

        match Self::format(Box::new(backend), layout, config, Some(path.to_path_buf())) {
            Ok(pool) => Ok(pool),
            Err(e) => {
                if let Err(remove_err) = std::fs::remove_file(path) {
                    error!(path = %shown, error = %remove_err, "could not remove partial pool");
                }
                Err(e)
            }
        }
    }

    /// Creates a pool on an arbitrary backend. The backend's size is the
    /// pool size; `config.pool_size` is ignored.
    pub fn create_with_backend(
        backend: Box<dyn StorageBackend>,
        layout: &str,
        config: &Config,
    ) -> CoreResult<Self> {
        PoolHeader::validate_layout(layout)
            .map_err(|e| CoreError::pool_create_failed(IN_MEMORY, e.to_string()))?;
        Self::format(backend, layout, config, None)
    }

    fn format(
        backend: Box<dyn StorageBackend>,
        layout: &str,
        config: &Config,
        path: Option<PathBuf>,
    ) -> CoreResult<Self> {
        let shown = display_path(path.as_deref());
        let mut space = PoolSpace::new(backend);
        let pool_size = space.size()?;
        let geometry = Geometry::compute(pool_size, config)
            .map_err(|reason| CoreError::pool_create_failed(&shown, reason))?;

        let create = |space: &mut PoolSpace| -> CoreResult<(PoolHeader, Heap, UndoLog)> {
            // A stale header must not survive a half-finished format.
            space.zero_persist(0, HEADER_SIZE)?;
            let log = UndoLog::format(space, geometry.log_offset, geometry.log_size)?;
            let mut heap = Heap::format(space, geometry.heap_offset, geometry.heap_end)?;
            let reservation = heap.reserve(space, config.root_size)?;
            let root = heap.publish(space, reservation, ROOT_TYPE_NUM)?;

            let header = PoolHeader {
                format_version: (FORMAT_MAJOR, FORMAT_MINOR),
                uuid: Uuid::new_v4(),
                layout: layout.to_string(),
                pool_size,
                log_offset: geometry.log_offset,
                log_size: geometry.log_size,
                heap_offset: geometry.heap_offset,
                heap_size: geometry.heap_end - geometry.heap_offset,
                root,
                root_size: config.root_size,
            };
            header.write(space)?;
            space.sync()?;
            Ok((header, heap, log))
        };
        let (header, heap, log) =
            create(&mut space).map_err(|e| CoreError::pool_create_failed(&shown, e.to_string()))?;

        info!(path = %shown, layout, uuid = %header.uuid, pool_size, "pool created");
        let stats = Arc::new(PoolStats::new());
        let manager = TransactionManager::new(space, heap, log, header.root, Arc::clone(&stats));
        Ok(Self {
            manager: Mutex::new(manager),
            header,
            stats,
            recovery: RecoveryReport::Clean,
            path,
        })
    }

    // === Open ===

    /// Opens a pool file, checking its layout and recovering any
    /// interrupted transaction.
    ///
    /// # Errors
    ///
    /// - `PoolOpenFailed` if the file is missing, locked by another handle,
    ///   not a pool, or created with another layout
    /// - `ConsistencyCheckFailed` if the heap or undo log is corrupt
    pub fn open(path: &Path, layout: &str) -> CoreResult<Self> {
        Self::open_with_config(path, layout, &Config::default())
    }

    /// Opens a pool file with custom durability settings.
    pub fn open_with_config(path: &Path, layout: &str, config: &Config) -> CoreResult<Self> {
        let shown = path.display().to_string();
        let mut backend = FileBackend::open(path)
            .map_err(|e| CoreError::pool_open_failed(&shown, e.to_string()))?;
        backend.lock_exclusive().map_err(|e| match e {
            StorageError::Locked => {
                CoreError::pool_open_failed(&shown, "pool is in use by another handle")
            }
            other => CoreError::pool_open_failed(&shown, other.to_string()),
        })?;
        backend.set_sync_on_persist(config.sync_on_persist);
        Self::load(Box::new(backend), layout, Some(path.to_path_buf()))
    }

    /// Opens a pool held by an arbitrary backend.
    pub fn open_with_backend(backend: Box<dyn StorageBackend>, layout: &str) -> CoreResult<Self> {
        Self::load(backend, layout, None)
    }

    fn load(
        backend: Box<dyn StorageBackend>,
        layout: &str,
        path: Option<PathBuf>,
    ) -> CoreResult<Self> {
        let shown = display_path(path.as_deref());
        let space = PoolSpace::new(backend);
        let header = PoolHeader::read(&space)
            .map_err(|e| CoreError::pool_open_failed(&shown, e.to_string()))?;
        if header.layout != layout {
            return Err(CoreError::pool_open_failed(
                &shown,
                format!(
                    "layout mismatch: pool has {:?}, expected {layout:?}",
                    header.layout
                ),
            ));
        }

        let stats = Arc::new(PoolStats::new());
        let mut manager = TransactionManager::load(space, &header, Arc::clone(&stats))?;
        let recovery = recovery::recover(&mut manager)?;
        manager.heap().block(header.root).map_err(|e| {
            CoreError::consistency(format!("root object {} is unusable: {e}", header.root))
        })?;

        info!(path = %shown, layout, uuid = %header.uuid, %recovery, "pool opened");
        Ok(Self {
            manager: Mutex::new(manager),
            header,
            stats,
            recovery,
            path,
        })
    }

    /// Checks the pool file at `path` without opening it and reports
    /// whether it is consistent and was created with `layout`.
    #[must_use]
    pub fn validate(path: &Path, layout: &str) -> bool {
        match check::check_path(path, Some(layout)) {
            Ok(report) => {
                for problem in &report.problems {
                    debug!(path = %path.display(), problem, "validation problem");
                }
                report.is_ok()
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "validation failed");
                false
            }
        }
    }

    /// Flushes the pool and closes it. Dropping a pool also closes it.
    pub fn close(self) -> CoreResult<()> {
        let mut manager = self.manager.into_inner();
        manager.space_mut().sync()?;
        info!(path = %display_path(self.path.as_deref()), "pool closed");
        Ok(())
    }

    /// Closes the pool and returns its backend.
    #[must_use]
    pub fn into_backend(self) -> Box<dyn StorageBackend> {
        self.manager.into_inner().into_space().into_backend()
    }

    pub(crate) fn manager(&self) -> MutexGuard<'_, TransactionManager> {
        self.manager.lock()
    }

    // === Transactions ===

    /// Begins a transaction, holding `lock` until it commits or aborts.
    ///
    /// # Errors
    ///
    /// - `AlreadyActive` if a transaction is active on this pool. With a
    ///   lock, a transaction started by another thread with the same lock
    ///   is waited for instead; one started by this thread fails at once
    /// - `RecoveryRequired` after a failed commit or abort
    pub fn begin(&self, lock: Option<&TxLock>) -> CoreResult<Transaction<'_>> {
        {
            let manager = self.manager();
            if manager.active_owner() == Some(thread::current().id()) {
                return Err(CoreError::AlreadyActive);
            }
            if manager.needs_recovery() {
                return Err(CoreError::RecoveryRequired);
            }
        }

        // Wait for the lock without holding the pool state.
        let guard = lock.map(TxLock::acquire);
        let id = self.manager().begin(guard)?;
        Ok(Transaction::new(self, id))
    }

    /// Executes a function within a transaction.
    ///
    /// If the function returns `Ok`, the transaction is committed.
    /// If it returns `Err`, the transaction is aborted.
    pub fn transaction<F, T>(&self, lock: Option<&TxLock>, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let mut tx = self.begin(lock)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if tx.is_active() {
                    if let Err(abort_err) = tx.abort() {
                        error!(error = %abort_err, "abort after failed transaction body failed");
                    }
                }
                Err(e)
            }
        }
    }

    /// Re-runs recovery from the persistent log. Needed after a failed
    /// commit or abort left the pool in `RecoveryRequired`.
    pub fn recover(&self) -> CoreResult<RecoveryReport> {
        let mut manager = self.manager();
        if manager.active_owner().is_some() {
            return Err(CoreError::AlreadyActive);
        }
        manager.reload(&self.header)?;
        recovery::recover(&mut manager)
    }

    // === Reads ===

    /// Returns the root object.
    #[must_use]
    pub fn root(&self) -> Oid {
        self.header.root
    }

    /// Reads a field of `oid`.
    pub fn get<V: FieldValue>(&self, oid: Oid, field: Field<V>) -> CoreResult<V> {
        self.manager().get(oid, field)
    }

    /// Reads `len` bytes at `offset` inside `oid`.
    pub fn read(&self, oid: Oid, offset: u64, len: u64) -> CoreResult<Vec<u8>> {
        self.manager().read(oid, offset, len)
    }

    /// Returns the type number `oid` was allocated with.
    pub fn type_num(&self, oid: Oid) -> CoreResult<u32> {
        Ok(self.manager().heap().block(oid)?.type_num)
    }

    /// Returns the usable size of `oid`, which may exceed the requested size.
    pub fn object_size(&self, oid: Oid) -> CoreResult<u64> {
        Ok(self.manager().heap().block(oid)?.data_size())
    }

    /// Persists `[offset, offset + len)` of the pool.
    pub fn persist(&self, offset: u64, len: u64) -> CoreResult<()> {
        self.manager().persist(offset, len)
    }

    // === Inspection ===

    /// Returns the pool header.
    #[must_use]
    pub fn header(&self) -> &PoolHeader {
        &self.header
    }

    /// Returns the layout signature.
    #[must_use]
    pub fn layout(&self) -> &str {
        &self.header.layout
    }

    /// Returns the pool file path, if the pool lives in a file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns pool statistics.
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Returns what recovery did when the pool was opened.
    #[must_use]
    pub fn recovery_report(&self) -> RecoveryReport {
        self.recovery
    }

    /// Returns the transaction state.
    #[must_use]
    pub fn tx_state(&self) -> TxState {
        self.manager().state()
    }

    /// Returns the undo log header.
    pub fn log_header(&self) -> CoreResult<LogHeader> {
        self.manager().log_header()
    }

    /// Returns the bytes available for records in an empty undo log.
    #[must_use]
    pub fn log_capacity(&self) -> u64 {
        self.manager().log_capacity()
    }

    /// Walks the heap and checks it against the allocator's index.
    pub fn audit(&self) -> CoreResult<HeapAudit> {
        let manager = self.manager();
        manager.heap().audit(manager.space())
    }

    /// Compares allocated objects with the oids the application can reach.
    /// The root is always reachable.
    #[must_use]
    pub fn audit_reachable(&self, reachable: &[Oid]) -> ReachabilityAudit {
        self.manager().heap().audit_reachable(self.header.root, reachable)
    }

    /// Runs the read-only consistency check on the open pool, plus a
    /// comparison of the heap with the allocator's index.
    pub fn check(&self) -> CoreResult<CheckReport> {
        let manager = self.manager();
        let mut report = check::check_space(manager.space(), Some(&self.header.layout))?;
        if let Err(e) = manager.heap().audit(manager.space()) {
            report.problems.push(e.to_string());
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("path", &self.path)
            .field("layout", &self.header.layout)
            .field("uuid", &self.header.uuid)
            .field("root", &self.header.root)
            .finish_non_exhaustive()
    }
}

fn display_path(path: Option<&Path>) -> String {
    path.map_or_else(|| IN_MEMORY.to_string(), |p| p.display().to_string())
}
