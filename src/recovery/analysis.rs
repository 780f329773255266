//! Analysis pass

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::Result;
use crate::store::ItemKey;
use crate::txn::TxnId;
use crate::wal::{LogRecord, Lsn, RecordKind};

/// What the analysis pass learned from the log
#[derive(Debug, Default)]
pub(crate) struct Analysis {
    /// Transactions without a terminal record, with their first LSN
    pub active: BTreeMap<TxnId, Lsn>,
    pub committed: HashSet<TxnId>,
    pub aborted: HashSet<TxnId>,
    pub dirty: BTreeSet<ItemKey>,
    pub records: u64,
    /// Whether the `CheckpointEnd` at this LSN was seen
    pub checkpoint_end_seen: bool,
    pub next_txn_id: TxnId,
}

impl Analysis {
    /// Scan `records` forward. `checkpoint_end` is the end LSN named by the
    /// master file, if any.
    pub fn run<I>(records: I, checkpoint_end: Option<Lsn>, next_txn_id: TxnId) -> Result<Self>
    where
        I: IntoIterator<Item = Result<LogRecord>>,
    {
        let mut analysis = Analysis {
            next_txn_id: next_txn_id.max(1),
            ..Default::default()
        };

        for record in records {
            let record = record?;
            analysis.records += 1;
            analysis.next_txn_id = analysis.next_txn_id.max(record.txn_id + 1);

            match record.kind {
                RecordKind::Begin => {
                    analysis.active.insert(record.txn_id, record.lsn);
                }
                RecordKind::Update { key, .. } | RecordKind::Compensation { key, .. } => {
                    analysis.dirty.insert(key);
                    analysis.active.entry(record.txn_id).or_insert(record.lsn);
                }
                RecordKind::Commit => {
                    analysis.active.remove(&record.txn_id);
                    analysis.committed.insert(record.txn_id);
                }
                RecordKind::Abort => {
                    analysis.active.remove(&record.txn_id);
                    analysis.aborted.insert(record.txn_id);
                }
                RecordKind::CheckpointBegin => {}
                RecordKind::CheckpointEnd(data) => {
                    if checkpoint_end == Some(record.lsn) {
                        analysis.checkpoint_end_seen = true;
                    }
                    for txn in data.active {
                        if analysis.committed.contains(&txn.txn_id) || analysis.aborted.contains(&txn.txn_id) {
                            continue;
                        }
                        let first = analysis.active.entry(txn.txn_id).or_insert(txn.first_lsn);
                        *first = (*first).min(txn.first_lsn);
                    }
                    analysis.dirty.extend(data.dirty);
                    analysis.next_txn_id = analysis.next_txn_id.max(data.next_txn_id);
                }
            }
        }

        Ok(analysis)
    }

    /// Earliest first LSN among the losers
    pub fn undo_start(&self) -> Option<Lsn> {
        self.active.values().copied().min()
    }
}
