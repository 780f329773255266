//! Engine Module
//!
//! Wires the components together over one data directory.
//!
//! ## Responsibilities
//! - Open the log (repairing a torn tail) and the item store
//! - Run crash recovery before any transaction is admitted
//! - Own the transaction manager and the background checkpointer
//! - Shut down cleanly on `close`
//!
//! Dropping an `Engine` without calling `close` behaves like a crash:
//! buffered log records and un-checkpointed item changes are lost, and the
//! next `open` recovers them from the log.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::lock::LockManager;
use crate::recovery::{RecoveryManager, RecoveryReport};
use crate::store::{FileStore, ItemStore};
use crate::txn::{CheckpointStats, Checkpointer, TransactionManager, TxnId, TxnOptions};
use crate::wal::{LogManager, LogOptions, Lsn, ScanReport};

/// A transactional item store rooted at `Config::data_dir`
pub struct Engine {
    /// Declared first so it stops before the manager it drives is dropped
    checkpointer: Option<Checkpointer>,

    txns: Arc<TransactionManager>,
    log: Arc<LogManager>,
    locks: Arc<LockManager>,
    store: Arc<FileStore>,

    config: Config,
    log_scan: ScanReport,
    recovery: RecoveryReport,
}

impl Engine {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Open the log, cutting off a torn tail
    /// 3. Open the item store
    /// 4. Recover
    /// 5. Optionally checkpoint, then start the background checkpointer
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Step 1: Create data directory if it doesn't exist
        fs::create_dir_all(&config.data_dir)?;

        // Step 2: Open the log
        let (log, log_scan) = LogManager::open(&config.wal_path(), LogOptions::from(&config))?;
        let log = Arc::new(log);
        if log_scan.was_truncated {
            tracing::warn!(
                valid_bytes = log_scan.valid_bytes,
                last_lsn = log_scan.last_lsn,
                "log had an incomplete tail"
            );
        }

        // Step 3: Open the item store
        let store = Arc::new(FileStore::open(&config.store_path())?);
        let dyn_store: Arc<dyn ItemStore> = store.clone();

        // Step 4: Recover
        let recovery =
            RecoveryManager::new(Arc::clone(&log), Arc::clone(&dyn_store), &config.master_path())
                .recover()?;

        // Step 5: Transaction manager
        let locks = Arc::new(LockManager::new());
        let txns = Arc::new(TransactionManager::new(
            Arc::clone(&log),
            Arc::clone(&locks),
            dyn_store,
            TxnOptions::from(&config),
            recovery.next_txn_id,
        ));

        if config.checkpoint_after_recovery {
            txns.checkpoint()?;
        }

        // Step 6: Background checkpointer
        let checkpointer = match config.checkpoint_interval {
            Some(interval) => Some(Checkpointer::spawn(Arc::downgrade(&txns), interval)?),
            None => None,
        };

        tracing::info!(
            data_dir = %config.data_dir.display(),
            next_lsn = log.next_lsn(),
            next_txn_id = txns.next_txn_id(),
            "engine opened"
        );

        Ok(Self {
            checkpointer,
            txns,
            log,
            locks,
            store,
            config,
            log_scan,
            recovery,
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Stop the checkpointer, take a final checkpoint and force the log
    pub fn close(mut self) -> Result<()> {
        if let Some(checkpointer) = self.checkpointer.take() {
            checkpointer.stop();
        }
        self.txns.checkpoint()?;
        self.log.flush_all()?;
        tracing::info!(data_dir = %self.config.data_dir.display(), "engine closed");
        Ok(())
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub fn begin(&self) -> Result<TxnId> {
        self.txns.begin()
    }

    pub fn read(&self, txn_id: TxnId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.txns.read(txn_id, key)
    }

    pub fn write(&self, txn_id: TxnId, key: &[u8], value: &[u8]) -> Result<()> {
        self.txns.write(txn_id, key, value)
    }

    pub fn delete(&self, txn_id: TxnId, key: &[u8]) -> Result<()> {
        self.txns.delete(txn_id, key)
    }

    pub fn commit(&self, txn_id: TxnId) -> Result<Lsn> {
        self.txns.commit(txn_id)
    }

    pub fn abort(&self, txn_id: TxnId) -> Result<()> {
        self.txns.abort(txn_id)
    }

    pub fn unlock(&self, txn_id: TxnId, key: &[u8]) -> Result<()> {
        self.txns.unlock(txn_id, key)
    }

    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        self.txns.checkpoint()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.txns
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// What the log scan found on open
    pub fn log_scan_report(&self) -> &ScanReport {
        &self.log_scan
    }

    /// What recovery did on open
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }
}
