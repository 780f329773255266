//! Recovery Manager
//!
//! Runs analysis, redo and undo over the log once at startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{KeystoneError, Result};
use crate::store::{ItemKey, ItemStore};
use crate::txn::TxnId;
use crate::wal::{LogManager, Lsn, RecordKind};
use super::analysis::Analysis;
use super::CheckpointMaster;

/// Outcome of a recovery run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Checkpoint recovery started from, if any
    pub checkpoint: Option<CheckpointMaster>,

    /// First LSN read by analysis and redo
    pub start_lsn: Lsn,

    /// Records seen by the analysis pass
    pub records_scanned: u64,

    /// Updates and compensations reapplied by redo
    pub records_redone: u64,

    /// Transactions that committed in the scanned range
    pub committed: usize,

    /// Transactions rolled back by undo, sorted
    pub losers: Vec<TxnId>,

    /// Updates reversed by undo
    pub updates_undone: u64,

    /// Items touched since the checkpoint
    pub dirty_items: usize,

    /// First transaction id safe to hand out
    pub next_txn_id: TxnId,
}

/// A loser update still waiting to be undone
struct PendingUndo {
    lsn: Lsn,
    txn_id: TxnId,
    key: ItemKey,
    before: Option<Vec<u8>>,
}

/// Restores the item store from the log
pub struct RecoveryManager {
    log: Arc<LogManager>,
    store: Arc<dyn ItemStore>,
    master_path: PathBuf,
}

impl RecoveryManager {
    pub fn new(log: Arc<LogManager>, store: Arc<dyn ItemStore>, master_path: &Path) -> Self {
        Self {
            log,
            store,
            master_path: master_path.to_path_buf(),
        }
    }

    /// Bring the item store to a state containing exactly the effects of
    /// committed transactions.
    ///
    /// Safe to run again after a crash at any point, including during a
    /// previous recovery.
    pub fn recover(&self) -> Result<RecoveryReport> {
        // Step 1: Locate the last complete checkpoint
        let master = CheckpointMaster::read(&self.master_path)?;
        let last_lsn = self.log.last_lsn();
        if let Some(master) = master {
            if master.begin_lsn > master.end_lsn || master.end_lsn > last_lsn {
                return Err(KeystoneError::CorruptLog(format!(
                    "checkpoint master points to LSN {}..{} but the log ends at {}",
                    master.begin_lsn, master.end_lsn, last_lsn
                )));
            }
        }
        let start_lsn = master.map(|m| m.begin_lsn).unwrap_or(0);

        tracing::info!(start_lsn, last_lsn, "recovery started");

        // Step 2: Analysis
        let analysis = Analysis::run(
            self.log.read_from(start_lsn)?,
            master.map(|m| m.end_lsn),
            master.map(|m| m.next_txn_id).unwrap_or(1),
        )?;
        if master.is_some() && !analysis.checkpoint_end_seen {
            return Err(KeystoneError::CorruptLog(format!(
                "checkpoint end record at LSN {} not found",
                master.map(|m| m.end_lsn).unwrap_or_default()
            )));
        }
        tracing::info!(
            records = analysis.records,
            losers = analysis.active.len(),
            dirty = analysis.dirty.len(),
            "analysis complete"
        );

        // Step 3: Redo
        let records_redone = self.redo(start_lsn)?;
        tracing::info!(records_redone, "redo complete");

        // Step 4: Undo
        let updates_undone = self.undo(&analysis)?;
        let losers: Vec<TxnId> = analysis.active.keys().copied().collect();
        if !losers.is_empty() {
            tracing::info!(?losers, updates_undone, "undo complete");
        }

        // Step 5: Make the recovered state durable
        self.log.flush_all()?;
        self.store.flush()?;

        let report = RecoveryReport {
            checkpoint: master,
            start_lsn,
            records_scanned: analysis.records,
            records_redone,
            committed: analysis.committed.len(),
            losers,
            updates_undone,
            dirty_items: analysis.dirty.len(),
            next_txn_id: analysis.next_txn_id,
        };

        tracing::info!(next_txn_id = report.next_txn_id, "recovery finished");
        Ok(report)
    }

    /// Reapply every update and compensation from `start`, winners and losers alike
    fn redo(&self, start: Lsn) -> Result<u64> {
        let mut redone = 0;
        for record in self.log.read_from(start)? {
            let record = record?;
            match record.kind {
                RecordKind::Update { key, after, .. } => {
                    self.store.put(&key, after)?;
                    redone += 1;
                }
                RecordKind::Compensation { key, restored, .. } => {
                    self.store.put(&key, restored)?;
                    redone += 1;
                }
                RecordKind::Begin
                | RecordKind::Commit
                | RecordKind::Abort
                | RecordKind::CheckpointBegin
                | RecordKind::CheckpointEnd(_) => {}
            }
        }
        Ok(redone)
    }

    /// Roll back every loser, newest update first
    fn undo(&self, analysis: &Analysis) -> Result<u64> {
        let Some(from) = analysis.undo_start() else {
            return Ok(0);
        };

        let mut pending = Vec::new();
        let mut compensated = HashSet::new();
        for record in self.log.read_from(from)? {
            let record = record?;
            if !analysis.active.contains_key(&record.txn_id) {
                continue;
            }
            match record.kind {
                RecordKind::Update { key, before, .. } => pending.push(PendingUndo {
                    lsn: record.lsn,
                    txn_id: record.txn_id,
                    key,
                    before,
                }),
                RecordKind::Compensation { undoes, .. } => {
                    compensated.insert(undoes);
                }
                _ => {}
            }
        }

        let mut undone = 0;
        for update in pending.into_iter().rev() {
            if compensated.contains(&update.lsn) {
                continue;
            }
            self.log.append(
                update.txn_id,
                RecordKind::Compensation {
                    key: update.key.clone(),
                    restored: update.before.clone(),
                    undoes: update.lsn,
                },
            )?;
            self.store.put(&update.key, update.before)?;
            undone += 1;
        }

        for &txn_id in analysis.active.keys() {
            self.log.append(txn_id, RecordKind::Abort)?;
        }

        Ok(undone)
    }
}
