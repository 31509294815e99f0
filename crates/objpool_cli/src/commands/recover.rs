//! Recover command implementation.

use objpool_core::recover_backend;
use objpool_storage::{FileBackend, StorageBackend};
use std::path::Path;
use tracing::info;

/// Runs crash recovery on the pool at `path` without checking its layout.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut backend = FileBackend::open(path)?;
    backend.lock_exclusive()?;

    let (report, mut backend) = recover_backend(Box::new(backend))?;
    backend.sync()?;

    info!(path = %path.display(), %report, "recovery finished");
    println!("{}: {report}", path.display());
    Ok(())
}
