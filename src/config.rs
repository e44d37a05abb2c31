//! Configuration for pagelog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WalError};

const ONE_MB: u64 = 1024 * 1024;

/// Main configuration for a write-ahead log instance
#[derive(Debug, Clone)]
pub struct WalConfig {
    // -------------------------------------------------------------------------
    // Location
    // -------------------------------------------------------------------------
    /// Directory holding the segments and the master record file
    /// Internal structure:
    ///   {wal_dir}/
    ///     ├── {storage_name}.0.wal   (segment 0)
    ///     ├── {storage_name}.1.wal   (segment 1)
    ///     └── {storage_name}.wmr     (master record)
    pub wal_dir: PathBuf,

    /// Storage name, used as the prefix of every WAL file
    pub storage_name: String,

    /// Only pick up segments whose prefix matches `storage_name`
    pub filter_wal_files: bool,

    // -------------------------------------------------------------------------
    // Size Limits
    // -------------------------------------------------------------------------
    /// Segment size (logical bytes) after which rotation is requested
    pub max_segment_size: u64,

    /// Total log size after which full checkpoint listeners are notified
    pub wal_size_limit: u64,

    /// Free disk space below which low disk space listeners are notified
    pub free_space_limit: u64,

    // -------------------------------------------------------------------------
    // Background Writing
    // -------------------------------------------------------------------------
    /// Pending tail pages that trigger an early background write
    pub max_pages_cache_size: usize,

    /// Interval between periodic background writes
    pub commit_delay: Duration,

    /// Idle time after which a segment's file handle is closed
    pub file_ttl: Duration,

    // -------------------------------------------------------------------------
    // Timeouts
    // -------------------------------------------------------------------------
    /// Deadline for background threads to stop on close
    pub shutdown_timeout: Duration,

    /// Deadline for a writer blocked on a pending segment rotation
    pub rotation_wait_timeout: Duration,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            wal_dir: PathBuf::from("./pagelog_data"),
            storage_name: "storage".to_string(),
            filter_wal_files: true,
            max_segment_size: 128 * ONE_MB,
            wal_size_limit: 4096 * ONE_MB,
            free_space_limit: 256 * ONE_MB,
            max_pages_cache_size: 3000,
            commit_delay: Duration::from_millis(1000),
            file_ttl: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            rotation_wait_timeout: Duration::from_secs(60),
        }
    }
}

impl WalConfig {
    /// Create a new config builder
    pub fn builder() -> WalConfigBuilder {
        WalConfigBuilder::default()
    }

    /// Number of segments the log is expected to keep at its size limit
    pub fn preferred_segment_count(&self) -> u64 {
        self.wal_size_limit / self.max_segment_size.max(1)
    }

    /// Reject configurations the log cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.storage_name.trim().is_empty() {
            return Err(WalError::Config("storage name must not be empty".to_string()));
        }
        if self.max_segment_size == 0 {
            return Err(WalError::Config("max segment size must be positive".to_string()));
        }
        if self.wal_size_limit == 0 {
            return Err(WalError::Config("WAL size limit must be positive".to_string()));
        }
        if self.commit_delay.is_zero() {
            return Err(WalError::Config("commit delay must be positive".to_string()));
        }
        if self.file_ttl.is_zero() {
            return Err(WalError::Config("file TTL must be positive".to_string()));
        }
        Ok(())
    }
}

/// Builder for WalConfig
#[derive(Default)]
pub struct WalConfigBuilder {
    config: WalConfig,
}

impl WalConfigBuilder {
    /// Set the WAL directory
    pub fn wal_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.wal_dir = path.into();
        self
    }

    /// Set the storage name used to name WAL files
    pub fn storage_name(mut self, name: impl Into<String>) -> Self {
        self.config.storage_name = name.into();
        self
    }

    /// Accept any `<name>.<order>.wal` file instead of only this storage's
    pub fn filter_wal_files(mut self, filter: bool) -> Self {
        self.config.filter_wal_files = filter;
        self
    }

    /// Set the segment size that triggers rotation (in bytes)
    pub fn max_segment_size(mut self, size: u64) -> Self {
        self.config.max_segment_size = size;
        self
    }

    /// Set the total log size that requests a full checkpoint (in bytes)
    pub fn wal_size_limit(mut self, size: u64) -> Self {
        self.config.wal_size_limit = size;
        self
    }

    /// Set the free disk space floor (in bytes)
    pub fn free_space_limit(mut self, size: u64) -> Self {
        self.config.free_space_limit = size;
        self
    }

    /// Set the number of pending pages that forces a background write
    pub fn max_pages_cache_size(mut self, pages: usize) -> Self {
        self.config.max_pages_cache_size = pages;
        self
    }

    /// Set the periodic background write interval
    pub fn commit_delay(mut self, delay: Duration) -> Self {
        self.config.commit_delay = delay;
        self
    }

    /// Set the idle time after which segment files are closed
    pub fn file_ttl(mut self, ttl: Duration) -> Self {
        self.config.file_ttl = ttl;
        self
    }

    /// Set the shutdown deadline for background threads
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Set the deadline for waiting on a pending rotation
    pub fn rotation_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.rotation_wait_timeout = timeout;
        self
    }

    pub fn build(self) -> WalConfig {
        self.config
    }
}
