//! Create command implementation.

use super::format_size;
use objpool_core::{Config, Pool};
use std::path::Path;
use tracing::info;

/// Runs the create command.
pub fn run(
    path: &Path,
    layout: &str,
    size: u64,
    log_size: u64,
    root_size: u64,
    mode: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default()
        .pool_size(size)
        .log_size(log_size)
        .root_size(root_size)
        .mode(mode);
    let pool = Pool::create_with_config(path, layout, &config)?;
    let header = pool.header().clone();
    pool.close()?;

    info!(path = %path.display(), "pool created");
    println!("Created pool {}", path.display());
    println!("  Layout: {}", header.layout);
    println!("  UUID:   {}", header.uuid);
    println!("  Size:   {}", format_size(header.pool_size));
    println!("  Log:    {}", format_size(header.log_size));
    println!("  Heap:   {}", format_size(header.heap_size));
    println!("  Root:   {}", header.root);
    Ok(())
}
