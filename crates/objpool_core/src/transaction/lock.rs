//! Caller-supplied transaction lock.

use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// A lock a transaction can hold from `begin` until commit or abort
/// completes.
///
/// Clones share the same lock. Transactions started with the same lock are
/// totally ordered: a second `begin` blocks until the first transaction has
/// finished.
///
/// ```rust
/// use objpool_core::TxLock;
///
/// let lock = TxLock::new();
/// let shared = lock.clone();
/// assert_eq!(lock.id(), shared.id());
/// assert!(!lock.is_locked());
/// ```
#[derive(Clone)]
pub struct TxLock {
    id: u64,
    inner: Arc<Mutex<()>>,
}

impl TxLock {
    /// Creates a new, unlocked lock with a process-unique id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the id recorded in the undo log of transactions holding
    /// this lock.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true if some transaction currently holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Blocks until the lock is free and takes it.
    pub(crate) fn acquire(&self) -> TxLockGuard {
        TxLockGuard {
            id: self.id,
            _guard: self.inner.lock_arc(),
        }
    }
}

impl Default for TxLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TxLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxLock")
            .field("id", &self.id)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Ownership of a [`TxLock`], released on drop.
pub(crate) struct TxLockGuard {
    id: u64,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl TxLockGuard {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for TxLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxLockGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ids_are_unique() {
        assert_ne!(TxLock::new().id(), TxLock::new().id());
    }

    #[test]
    fn guard_releases_on_drop() {
        let lock = TxLock::new();
        let guard = lock.acquire();
        assert!(lock.is_locked());
        assert_eq!(guard.id(), lock.id());
        drop(guard);
        assert!(!lock.is_locked());
    }

    #[test]
    fn second_acquire_waits() {
        let lock = TxLock::new();
        let guard = lock.acquire();

        let shared = lock.clone();
        let waiter = thread::spawn(move || {
            let _guard = shared.acquire();
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.join().unwrap();
        assert!(!lock.is_locked());
    }
}
