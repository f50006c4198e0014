//! Sled store configuration.

use std::path::PathBuf;

/// Default sled page cache capacity in bytes.
pub const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

/// Configuration for the sled-backed store.
#[derive(Debug, Clone)]
pub struct SledStoreConfig {
    /// Path to the database directory.
    pub path: PathBuf,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Enable zstd compression.
    pub compression: bool,

    /// Temporary database (deleted on drop).
    pub temporary: bool,

    /// Flush to disk before a commit returns.
    pub flush_on_commit: bool,
}

impl Default for SledStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./quarry_data"),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            compression: true,
            temporary: false,
            flush_on_commit: true,
        }
    }
}

impl SledStoreConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::from(""),
            temporary: true,
            flush_on_commit: false,
            ..Default::default()
        }
    }

    /// Set the page cache capacity.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Set whether commits wait for a flush.
    pub fn with_flush_on_commit(mut self, flush: bool) -> Self {
        self.flush_on_commit = flush;
        self
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(self.compression);

        if self.temporary {
            config.temporary(true)
        } else {
            config.path(&self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SledStoreConfig::new("/tmp/quarry");
        assert_eq!(config.path, PathBuf::from("/tmp/quarry"));
        assert!(config.flush_on_commit);
        assert!(!config.temporary);
    }

    #[test]
    fn test_temporary() {
        let config = SledStoreConfig::temporary().with_cache_capacity(1024);
        assert!(config.temporary);
        assert!(!config.flush_on_commit);
        assert_eq!(config.cache_capacity, 1024);
    }
}
