//! Transaction Manager
//!
//! ## Concurrency Model
//!
//! - Each transaction is driven by one thread at a time; many transactions
//!   run concurrently.
//! - Lock waits happen with no internal mutex or gate held.
//! - Every log append made on behalf of a transaction holds the read side
//!   of `gate`; `checkpoint` takes the write side, so a checkpoint sees
//!   either all or none of an operation's records.
//! - Locks are acquired before the gate, never while holding it.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::config::{Config, LockingPolicy};
use crate::error::{KeystoneError, Result};
use crate::lock::{LockGrant, LockManager, LockMode};
use crate::recovery::CheckpointMaster;
use crate::store::{ItemKey, ItemStore};
use crate::wal::{ActiveTxn, CheckpointData, LogManager, Lsn, RecordKind};
use super::{CheckpointStats, Transaction, TxnId, TxnState, UndoEntry};

/// Policy knobs consulted by the transaction manager
#[derive(Debug, Clone)]
pub struct TxnOptions {
    pub lock_timeout: Option<Duration>,
    pub locking_policy: LockingPolicy,
    /// Checkpoint after a commit once this many log bytes were appended
    pub checkpoint_log_bytes: Option<u64>,
    pub truncate_log_on_checkpoint: bool,
    pub master_path: PathBuf,
}

impl From<&Config> for TxnOptions {
    fn from(config: &Config) -> Self {
        Self {
            lock_timeout: config.lock_timeout,
            locking_policy: config.locking_policy,
            checkpoint_log_bytes: config.checkpoint_log_bytes,
            truncate_log_on_checkpoint: config.truncate_log_on_checkpoint,
            master_path: config.master_path(),
        }
    }
}

/// Coordinates transactions over a shared log, lock table and item store
pub struct TransactionManager {
    log: Arc<LogManager>,
    locks: Arc<LockManager>,
    store: Arc<dyn ItemStore>,
    options: TxnOptions,

    txns: Mutex<HashMap<TxnId, Transaction>>,
    next_txn_id: AtomicU64,
    next_start_order: AtomicU64,

    /// Items updated since the last checkpoint
    dirty: Mutex<BTreeSet<ItemKey>>,

    /// Read side: log appends of ordinary operations. Write side: checkpoint.
    gate: RwLock<()>,

    /// Serializes checkpoints
    checkpoint_lock: Mutex<()>,
}

impl TransactionManager {
    /// Create a manager handing out ids from `next_txn_id`
    pub fn new(
        log: Arc<LogManager>,
        locks: Arc<LockManager>,
        store: Arc<dyn ItemStore>,
        options: TxnOptions,
        next_txn_id: TxnId,
    ) -> Self {
        Self {
            log,
            locks,
            store,
            options,
            txns: Mutex::new(HashMap::new()),
            next_txn_id: AtomicU64::new(next_txn_id.max(1)),
            next_start_order: AtomicU64::new(1),
            dirty: Mutex::new(BTreeSet::new()),
            gate: RwLock::new(()),
            checkpoint_lock: Mutex::new(()),
        }
    }

    // =========================================================================
    // Transaction Lifecycle
    // =========================================================================

    /// Start a transaction
    pub fn begin(&self) -> Result<TxnId> {
        let _gate = self.gate.read();

        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let start_order = self.next_start_order.fetch_add(1, Ordering::SeqCst);
        let lsn = self.log.append(txn_id, RecordKind::Begin)?;

        self.txns
            .lock()
            .insert(txn_id, Transaction::new(txn_id, start_order, lsn));

        tracing::debug!(txn_id, lsn, "transaction started");
        Ok(txn_id)
    }

    /// Commit; returns the LSN of the `Commit` record.
    ///
    /// When this returns the commit is durable.
    pub fn commit(&self, txn_id: TxnId) -> Result<Lsn> {
        let lsn = {
            let _gate = self.gate.read();
            {
                let mut txns = self.txns.lock();
                let txn = Self::active_mut(&mut txns, txn_id, "commit")?;
                txn.state = TxnState::Committing;
            }
            let lsn = self.log.append(txn_id, RecordKind::Commit)?;
            if let Some(txn) = self.txns.lock().get_mut(&txn_id) {
                txn.lsns.push(lsn);
            }
            lsn
        };

        // Durability point
        self.log.flush(lsn)?;

        let released = self.locks.release_all(txn_id);
        if let Some(mut txn) = self.txns.lock().remove(&txn_id) {
            txn.state = TxnState::Committed;
            tracing::debug!(
                txn_id,
                commit_lsn = lsn,
                records = txn.lsns.len(),
                locks_released = released,
                "transaction committed"
            );
        }

        self.maybe_checkpoint();
        Ok(lsn)
    }

    /// Roll back an active transaction
    pub fn abort(&self, txn_id: TxnId) -> Result<()> {
        {
            let mut txns = self.txns.lock();
            Self::active_mut(&mut txns, txn_id, "abort")?;
        }
        self.rollback(txn_id)
    }

    // =========================================================================
    // Data Operations
    // =========================================================================

    /// Read an item under a shared lock
    pub fn read(&self, txn_id: TxnId, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.lock(txn_id, key, LockMode::Shared)?;
        self.store.get(key)
    }

    /// Set an item under an exclusive lock
    pub fn write(&self, txn_id: TxnId, key: &[u8], value: &[u8]) -> Result<()> {
        self.update(txn_id, key, Some(value.to_vec()))
    }

    /// Remove an item under an exclusive lock
    pub fn delete(&self, txn_id: TxnId, key: &[u8]) -> Result<()> {
        self.update(txn_id, key, None)
    }

    fn update(&self, txn_id: TxnId, key: &[u8], after: Option<Vec<u8>>) -> Result<()> {
        self.lock(txn_id, key, LockMode::Exclusive)?;

        let _gate = self.gate.read();

        let before = self.store.get(key)?;
        let lsn = self.log.append(
            txn_id,
            RecordKind::Update {
                key: key.to_vec(),
                before: before.clone(),
                after: after.clone(),
            },
        )?;
        self.store.put(key, after)?;
        self.dirty.lock().insert(key.to_vec());

        if let Some(txn) = self.txns.lock().get_mut(&txn_id) {
            txn.lsns.push(lsn);
            txn.undo.push(UndoEntry {
                lsn,
                key: key.to_vec(),
                before,
            });
        }

        tracing::trace!(txn_id, lsn, key = %String::from_utf8_lossy(key), "update logged");
        Ok(())
    }

    // =========================================================================
    // Locking
    // =========================================================================

    /// Release one lock before the transaction ends.
    ///
    /// Only allowed under basic two-phase locking; afterwards the
    /// transaction may not acquire any further lock.
    pub fn unlock(&self, txn_id: TxnId, key: &[u8]) -> Result<()> {
        if self.options.locking_policy == LockingPolicy::Strict {
            return Err(KeystoneError::ProtocolViolation(format!(
                "transaction {} cannot release locks before it ends under strict two-phase locking",
                txn_id
            )));
        }

        let mut txns = self.txns.lock();
        let txn = Self::active_mut(&mut txns, txn_id, "unlock")?;
        if !txn.locks.remove(key) {
            return Err(KeystoneError::ProtocolViolation(format!(
                "transaction {} holds no lock on {}",
                txn_id,
                String::from_utf8_lossy(key)
            )));
        }
        txn.shrinking = true;
        drop(txns);

        self.locks.release(txn_id, key);
        tracing::debug!(txn_id, key = %String::from_utf8_lossy(key), "lock released early");
        Ok(())
    }

    fn lock(&self, txn_id: TxnId, key: &[u8], mode: LockMode) -> Result<()> {
        let start_order = {
            let mut txns = self.txns.lock();
            let txn = Self::active_mut(&mut txns, txn_id, "lock")?;
            if txn.shrinking {
                let held = self.locks.mode_held(txn_id, key);
                if held.is_some_and(|held| held.covers(mode)) {
                    return Ok(());
                }
                return Err(KeystoneError::ProtocolViolation(format!(
                    "transaction {} requested a lock after releasing one",
                    txn_id
                )));
            }
            txn.start_order
        };

        let deadline = self.options.lock_timeout.map(|timeout| Instant::now() + timeout);
        match self.locks.acquire(txn_id, start_order, key, mode, deadline) {
            Ok(grant) => {
                if grant == LockGrant::Granted {
                    if let Some(txn) = self.txns.lock().get_mut(&txn_id) {
                        txn.locks.insert(key.to_vec());
                    }
                }
                Ok(())
            }
            Err(err) if err.is_retryable() => {
                tracing::debug!(txn_id, error = %err, "aborting transaction");
                self.rollback(txn_id)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    /// Undo every update newest first, logging a compensation for each
    fn rollback(&self, txn_id: TxnId) -> Result<()> {
        let undo = {
            let mut txns = self.txns.lock();
            let txn = Self::active_mut(&mut txns, txn_id, "abort")?;
            txn.state = TxnState::Aborting;
            std::mem::take(&mut txn.undo)
        };

        let finished = {
            let _gate = self.gate.read();
            for entry in undo.iter().rev() {
                self.log.append(
                    txn_id,
                    RecordKind::Compensation {
                        key: entry.key.clone(),
                        restored: entry.before.clone(),
                        undoes: entry.lsn,
                    },
                )?;
                self.store.put(&entry.key, entry.before.clone())?;
                self.dirty.lock().insert(entry.key.clone());
            }
            self.log.append(txn_id, RecordKind::Abort)?;
            // A checkpoint must not list a transaction whose Abort it follows
            self.txns.lock().remove(&txn_id)
        };

        let released = self.locks.release_all(txn_id);
        if let Some(mut txn) = finished {
            txn.state = TxnState::Aborted;
            tracing::debug!(
                txn_id,
                updates_undone = undo.len(),
                locks_released = released,
                "transaction aborted"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Checkpoints
    // =========================================================================

    /// Take a checkpoint.
    ///
    /// Pauses log appends from every other operation for its duration.
    pub fn checkpoint(&self) -> Result<CheckpointStats> {
        let _running = self.checkpoint_lock.lock();
        self.checkpoint_locked()
    }

    fn maybe_checkpoint(&self) {
        let Some(threshold) = self.options.checkpoint_log_bytes else {
            return;
        };
        if self.log.bytes_since_checkpoint() < threshold {
            return;
        }
        // Someone else is already checkpointing
        let Some(_running) = self.checkpoint_lock.try_lock() else {
            return;
        };
        if let Err(e) = self.checkpoint_locked() {
            tracing::error!(error = %e, "size-triggered checkpoint failed");
        }
    }

    fn checkpoint_locked(&self) -> Result<CheckpointStats> {
        let _gate = self.gate.write();

        // Step 1: Everything before the checkpoint is on disk
        self.log.flush_all()?;

        // Step 2: Begin record, then the store
        let begin_lsn = self.log.append(0, RecordKind::CheckpointBegin)?;
        self.store.flush()?;

        // Step 3: End record with the active transactions and dirty items.
        // A committing transaction already has its Commit record.
        let mut active: Vec<ActiveTxn> = self
            .txns
            .lock()
            .values()
            .filter(|txn| txn.state != TxnState::Committing)
            .map(|txn| ActiveTxn {
                txn_id: txn.id,
                first_lsn: txn.first_lsn,
            })
            .collect();
        active.sort_by_key(|txn| txn.txn_id);
        let dirty: Vec<ItemKey> = self.dirty.lock().iter().cloned().collect();
        let next_txn_id = self.next_txn_id.load(Ordering::SeqCst);

        let end_lsn = self.log.append(
            0,
            RecordKind::CheckpointEnd(CheckpointData {
                begin_lsn,
                active: active.clone(),
                dirty: dirty.clone(),
                next_txn_id,
            }),
        )?;
        self.log.flush(end_lsn)?;

        // Step 4: Point recovery at the new checkpoint
        CheckpointMaster {
            begin_lsn,
            end_lsn,
            next_txn_id,
        }
        .write(&self.options.master_path)?;

        self.dirty.lock().clear();
        self.log.reset_checkpoint_counter();

        // Step 5: Drop records no longer needed
        let mut records_truncated = 0;
        if self.options.truncate_log_on_checkpoint {
            let cutoff = active
                .iter()
                .map(|txn| txn.first_lsn)
                .fold(begin_lsn, Lsn::min);
            records_truncated = self.log.truncate_before(cutoff)?;
        }

        let stats = CheckpointStats {
            begin_lsn,
            end_lsn,
            active_txns: active.len(),
            dirty_items: dirty.len(),
            records_truncated,
        };
        tracing::info!(
            begin_lsn,
            end_lsn,
            active = stats.active_txns,
            dirty = stats.dirty_items,
            truncated = records_truncated,
            "checkpoint complete"
        );
        Ok(stats)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// State of a live transaction; `None` once it has finished
    pub fn state(&self, txn_id: TxnId) -> Option<TxnState> {
        self.txns.lock().get(&txn_id).map(|txn| txn.state)
    }

    /// Live transactions, sorted
    pub fn active_transactions(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self.txns.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// LSNs produced so far by a live transaction
    pub fn lsns(&self, txn_id: TxnId) -> Option<Vec<Lsn>> {
        self.txns.lock().get(&txn_id).map(|txn| txn.lsns.clone())
    }

    /// Items updated since the last checkpoint
    pub fn dirty_items(&self) -> Vec<ItemKey> {
        self.dirty.lock().iter().cloned().collect()
    }

    /// Id the next `begin` will hand out
    pub fn next_txn_id(&self) -> TxnId {
        self.next_txn_id.load(Ordering::SeqCst)
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    fn active_mut<'a>(
        txns: &'a mut HashMap<TxnId, Transaction>,
        txn_id: TxnId,
        op: &str,
    ) -> Result<&'a mut Transaction> {
        match txns.get_mut(&txn_id) {
            Some(txn) if txn.state == TxnState::Active => Ok(txn),
            Some(txn) => Err(KeystoneError::ProtocolViolation(format!(
                "cannot {} transaction {} in state {:?}",
                op, txn_id, txn.state
            ))),
            None => Err(KeystoneError::ProtocolViolation(format!(
                "cannot {} unknown transaction {}",
                op, txn_id
            ))),
        }
    }
}
