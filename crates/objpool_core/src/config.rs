//! Pool configuration.

/// Smallest undo log region accepted at pool creation.
pub const MIN_LOG_SIZE: u64 = 256;

/// Configuration for creating or opening a pool.
///
/// Geometry fields (`pool_size`, `log_size`, `root_size`) only matter at
/// creation; an existing pool's geometry comes from its header.
#[derive(Debug, Clone)]
pub struct Config {
    /// Total size of a new pool in bytes.
    pub pool_size: u64,

    /// Size of the undo log region in bytes.
    pub log_size: u64,

    /// Size of the root object in bytes.
    pub root_size: u64,

    /// Unix permission bits for a new pool file.
    pub mode: u32,

    /// Whether `persist` on a file pool issues `fdatasync` (safer but slower).
    pub sync_on_persist: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 8 * 1024 * 1024, // 8 MB
            log_size: 256 * 1024,       // 256 KB
            root_size: 64,
            mode: 0o600,
            sync_on_persist: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total pool size.
    #[must_use]
    pub const fn pool_size(mut self, size: u64) -> Self {
        self.pool_size = size;
        self
    }

    /// Sets the undo log size.
    #[must_use]
    pub const fn log_size(mut self, size: u64) -> Self {
        self.log_size = size;
        self
    }

    /// Sets the root object size.
    #[must_use]
    pub const fn root_size(mut self, size: u64) -> Self {
        self.root_size = size;
        self
    }

    /// Sets the file permission bits used at creation.
    #[must_use]
    pub const fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Sets whether every persist is followed by `fdatasync`.
    #[must_use]
    pub const fn sync_on_persist(mut self, value: bool) -> Self {
        self.sync_on_persist = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.mode, 0o600);
        assert!(config.sync_on_persist);
        assert!(config.log_size >= MIN_LOG_SIZE);
        assert!(config.pool_size > config.log_size);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .pool_size(1 << 20)
            .log_size(4096)
            .root_size(128)
            .mode(0o644)
            .sync_on_persist(false);

        assert_eq!(config.pool_size, 1 << 20);
        assert_eq!(config.log_size, 4096);
        assert_eq!(config.root_size, 128);
        assert_eq!(config.mode, 0o644);
        assert!(!config.sync_on_persist);
    }
}
