//! Configuration for Keystone
//!
//! Centralized configuration with sensible defaults. Every policy knob the
//! core consults at runtime (group commit, lock timeouts, checkpoint
//! triggers) lives here.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{KeystoneError, Result};

/// Main configuration for a Keystone instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log             (write-ahead log)
    ///     ├── checkpoint.master   (location of the last complete checkpoint)
    ///     └── items.db            (item store snapshot)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Log Configuration
    // -------------------------------------------------------------------------
    /// Bytes of buffered log records that force a flush from `append`
    pub log_buffer_capacity: usize,

    /// How long a flush leader waits for more records before fsync.
    /// Zero means flush immediately.
    pub group_commit_window: Duration,

    // -------------------------------------------------------------------------
    // Locking Configuration
    // -------------------------------------------------------------------------
    /// Maximum time a transaction waits for a single lock
    pub lock_timeout: Option<Duration>,

    /// Two-phase locking flavour
    pub locking_policy: LockingPolicy,

    // -------------------------------------------------------------------------
    // Checkpoint Configuration
    // -------------------------------------------------------------------------
    /// Checkpoint after a commit once this many log bytes were appended
    pub checkpoint_log_bytes: Option<u64>,

    /// Checkpoint from a background thread at this interval
    pub checkpoint_interval: Option<Duration>,

    /// Drop log records no longer needed after each checkpoint
    pub truncate_log_on_checkpoint: bool,

    /// Take a checkpoint right after startup recovery
    pub checkpoint_after_recovery: bool,
}

/// Lock release discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockingPolicy {
    /// All locks are released together at commit or abort
    Strict,

    /// Locks may be released early; no lock may be acquired afterwards
    Basic,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./keystone_data"),
            log_buffer_capacity: 1024 * 1024, // 1 MB
            group_commit_window: Duration::ZERO,
            lock_timeout: None,
            locking_policy: LockingPolicy::Strict,
            checkpoint_log_bytes: Some(16 * 1024 * 1024), // 16 MB
            checkpoint_interval: None,
            truncate_log_on_checkpoint: true,
            checkpoint_after_recovery: true,
        }
    }
}

impl Config {
    pub const WAL_FILENAME: &'static str = "wal.log";
    pub const MASTER_FILENAME: &'static str = "checkpoint.master";
    pub const STORE_FILENAME: &'static str = "items.db";

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Path of the write-ahead log
    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(Self::WAL_FILENAME)
    }

    /// Path of the checkpoint master file
    pub fn master_path(&self) -> PathBuf {
        self.data_dir.join(Self::MASTER_FILENAME)
    }

    /// Path of the item store snapshot
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(Self::STORE_FILENAME)
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.log_buffer_capacity == 0 {
            return Err(KeystoneError::Config(
                "log_buffer_capacity must be greater than zero".to_string(),
            ));
        }
        if self.checkpoint_log_bytes == Some(0) {
            return Err(KeystoneError::Config(
                "checkpoint_log_bytes must be greater than zero".to_string(),
            ));
        }
        if matches!(self.checkpoint_interval, Some(d) if d.is_zero()) {
            return Err(KeystoneError::Config(
                "checkpoint_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all files)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the log buffer capacity (in bytes)
    pub fn log_buffer_capacity(mut self, bytes: usize) -> Self {
        self.config.log_buffer_capacity = bytes;
        self
    }

    /// Set the group commit window
    pub fn group_commit_window(mut self, window: Duration) -> Self {
        self.config.group_commit_window = window;
        self
    }

    /// Set the per-lock wait timeout
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.config.lock_timeout = Some(timeout);
        self
    }

    /// Set the locking policy
    pub fn locking_policy(mut self, policy: LockingPolicy) -> Self {
        self.config.locking_policy = policy;
        self
    }

    /// Set (or disable) the log-size checkpoint trigger
    pub fn checkpoint_log_bytes(mut self, bytes: Option<u64>) -> Self {
        self.config.checkpoint_log_bytes = bytes;
        self
    }

    /// Set the background checkpoint interval
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.config.checkpoint_interval = Some(interval);
        self
    }

    /// Enable or disable log truncation after checkpoints
    pub fn truncate_log_on_checkpoint(mut self, enabled: bool) -> Self {
        self.config.truncate_log_on_checkpoint = enabled;
        self
    }

    /// Enable or disable the post-recovery checkpoint
    pub fn checkpoint_after_recovery(mut self, enabled: bool) -> Self {
        self.config.checkpoint_after_recovery = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
