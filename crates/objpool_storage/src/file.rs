//! File-based storage backend for persistent pools.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based storage backend.
///
/// The file is sized once at creation and never grows or shrinks.
///
/// # Durability
///
/// - `persist()` calls `File::sync_data()` when `sync_on_persist` is set,
///   otherwise it only pushes buffered bytes to the OS
/// - `sync()` always calls `File::sync_all()`
///
/// # Locking
///
/// [`FileBackend::lock_exclusive`] takes an advisory lock on the file that
/// is held until the backend is dropped. Read-only inspection (for example
/// pool validation) can skip it.
///
/// # Example
///
/// ```no_run
/// use objpool_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::create(Path::new("pool.obj"), 1 << 20, 0o600).unwrap();
/// backend.write_at(0, b"persistent data").unwrap();
/// backend.persist(0, 15).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
    sync_on_persist: bool,
    locked: bool,
}

impl FileBackend {
    /// Creates a new zero-filled file of `size` bytes.
    ///
    /// `mode` sets the Unix permission bits of the new file and is ignored
    /// on other platforms.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::AlreadyExists`] if the file exists, or an I/O
    /// error if it cannot be created or sized.
    pub fn create(path: &Path, size: u64, mode: u32) -> StorageResult<Self> {
        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = match options.open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.set_len(size)?;
        file.sync_all()?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
            sync_on_persist: true,
            locked: false,
        })
    }

    /// Opens an existing file. Its current length becomes the fixed size.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size,
            sync_on_persist: true,
            locked: false,
        })
    }

    /// Sets whether `persist` issues `sync_data` (default) or only a flush.
    pub fn set_sync_on_persist(&mut self, value: bool) {
        self.sync_on_persist = value;
    }

    /// Acquires an exclusive advisory lock on the file without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another handle holds the lock.
    pub fn lock_exclusive(&mut self) -> StorageResult<()> {
        if self.locked {
            return Ok(());
        }
        let file = self.file.lock();
        if file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }
        drop(file);
        self.locked = true;
        Ok(())
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        StorageError::check_bounds(offset, len, self.size)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        StorageError::check_bounds(offset, data.len(), self.size)?;
        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn persist(&mut self, offset: u64, len: usize) -> StorageResult<()> {
        StorageError::check_bounds(offset, len, self.size)?;
        let mut file = self.file.lock();
        file.flush()?;
        if self.sync_on_persist {
            file.sync_data()?;
        }
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if self.locked {
            let _ = FileExt::unlock(&*self.file.lock());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.obj");

        let backend = FileBackend::create(&path, 4096, 0o600).unwrap();
        assert_eq!(backend.size().unwrap(), 4096);
        assert!(path.exists());
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 4096);
    }

    #[test]
    fn file_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.obj");

        FileBackend::create(&path, 64, 0o600).unwrap();
        let result = FileBackend::create(&path, 64, 0o600);
        assert!(matches!(result, Err(StorageError::AlreadyExists(_))));
    }

    #[cfg(unix)]
    #[test]
    fn file_create_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.obj");
        FileBackend::create(&path, 64, 0o600).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.obj");

        let mut backend = FileBackend::create(&path, 64, 0o600).unwrap();
        backend.write_at(10, b"hello world").unwrap();
        assert_eq!(backend.read_at(10, 11).unwrap(), b"hello world");
        assert_eq!(backend.read_at(0, 10).unwrap(), vec![0; 10]);
    }

    #[test]
    fn file_write_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.obj");

        let mut backend = FileBackend::create(&path, 16, 0o600).unwrap();
        let result = backend.write_at(12, b"hello");
        assert!(matches!(result, Err(StorageError::OutOfBounds { .. })));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.obj");

        {
            let mut backend = FileBackend::create(&path, 64, 0o600).unwrap();
            backend.write_at(0, b"persistent data").unwrap();
            backend.persist(0, 15).unwrap();
        }

        {
            let backend = FileBackend::open(&path).unwrap();
            assert_eq!(backend.size().unwrap(), 64);
            assert_eq!(backend.read_at(0, 15).unwrap(), b"persistent data");
        }
    }

    #[test]
    fn file_open_missing_fails() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open(&dir.path().join("missing.obj"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn file_exclusive_lock_conflicts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.obj");

        let mut first = FileBackend::create(&path, 64, 0o600).unwrap();
        first.lock_exclusive().unwrap();

        let mut second = FileBackend::open(&path).unwrap();
        assert!(matches!(second.lock_exclusive(), Err(StorageError::Locked)));

        drop(first);
        assert!(second.lock_exclusive().is_ok());
    }

    #[test]
    fn file_persist_without_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.obj");

        let mut backend = FileBackend::create(&path, 64, 0o600).unwrap();
        backend.set_sync_on_persist(false);
        backend.write_at(0, b"data").unwrap();
        assert!(backend.persist(0, 4).is_ok());
        assert!(backend.sync().is_ok());
    }

    #[test]
    fn file_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pool.obj");

        let backend = FileBackend::create(&path, 8, 0o600).unwrap();
        assert_eq!(backend.path(), path);
    }
}
