//! Test fixtures and pool helpers.
//!
//! Provides convenience functions for setting up test pools.

use objpool_core::{Config, Pool};
use objpool_storage::InMemoryBackend;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Layout used by fixture pools.
pub const TEST_LAYOUT: &str = "objpool-test";

/// Configuration used by fixture pools: 256 KB with a 16 KB log, no fsync.
pub fn test_config() -> Config {
    Config::default()
        .pool_size(256 * 1024)
        .log_size(16 * 1024)
        .sync_on_persist(false)
}

/// A test pool with automatic cleanup.
pub struct TestPool {
    /// The pool instance.
    pub pool: Pool,
    path: Option<PathBuf>,
    /// Kept alive so the directory outlives the pool.
    _temp_dir: Option<TempDir>,
}

impl TestPool {
    /// Creates an in-memory test pool.
    pub fn memory() -> Self {
        Self::memory_with(&test_config())
    }

    /// Creates an in-memory test pool with a custom configuration.
    pub fn memory_with(config: &Config) -> Self {
        let backend = InMemoryBackend::new(config.pool_size as usize);
        let pool = Pool::create_with_backend(Box::new(backend), TEST_LAYOUT, config)
            .expect("Failed to create in-memory pool");
        Self {
            pool,
            path: None,
            _temp_dir: None,
        }
    }

    /// Creates a file-backed test pool in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("test.pool");
        let pool = Pool::create_with_config(&path, TEST_LAYOUT, &test_config())
            .expect("Failed to create file pool");
        Self {
            pool,
            path: Some(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the pool path if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Closes and reopens the pool, running recovery.
    pub fn reopen(self) -> Self {
        let Self {
            pool,
            path,
            _temp_dir,
        } = self;
        let pool = match &path {
            Some(path) => {
                pool.close().expect("Failed to close pool");
                Pool::open_with_config(path, TEST_LAYOUT, &test_config())
                    .expect("Failed to reopen file pool")
            }
            None => Pool::open_with_backend(pool.into_backend(), TEST_LAYOUT)
                .expect("Failed to reopen in-memory pool"),
        };
        Self {
            pool,
            path,
            _temp_dir,
        }
    }
}

impl std::ops::Deref for TestPool {
    type Target = Pool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

/// Runs a test with a temporary in-memory pool.
///
/// # Example
///
/// ```rust,ignore
/// use objpool_testkit::with_temp_pool;
///
/// #[test]
/// fn my_test() {
///     with_temp_pool(|pool| {
///         let root = pool.root();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_temp_pool<F, R>(f: F) -> R
where
    F: FnOnce(&Pool) -> R,
{
    let test_pool = TestPool::memory();
    f(&test_pool.pool)
}

/// Runs a test with a temporary file-based pool.
pub fn with_file_pool<F, R>(f: F) -> R
where
    F: FnOnce(&Pool, &Path) -> R,
{
    let test_pool = TestPool::file();
    let path = test_pool
        .path()
        .expect("File pool should have a path")
        .to_path_buf();
    f(&test_pool.pool, &path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use objpool_core::Field;

    const COUNTER: Field<u64> = Field::new(0);

    #[test]
    fn memory_pool_survives_reopen() {
        let pool = TestPool::memory();
        let root = pool.root();
        pool.transaction(None, |tx| tx.set(root, COUNTER, 3)).unwrap();

        let pool = pool.reopen();
        assert_eq!(pool.get(root, COUNTER).unwrap(), 3);
    }

    #[test]
    fn file_pool_survives_reopen() {
        let pool = TestPool::file();
        assert!(pool.path().is_some());
        let root = pool.root();
        pool.transaction(None, |tx| tx.set(root, COUNTER, 4)).unwrap();

        let pool = pool.reopen();
        assert_eq!(pool.get(root, COUNTER).unwrap(), 4);
    }

    #[test]
    fn with_file_pool_validates() {
        with_file_pool(|pool, path| {
            assert!(path.exists());
            assert!(pool.check().unwrap().is_ok());
        });
    }
}
