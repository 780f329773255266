//! Per-transaction bookkeeping

use std::collections::BTreeSet;

use crate::store::ItemKey;
use crate::wal::Lsn;
use super::TxnId;

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

impl TxnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

/// Enough to reverse one update
#[derive(Debug, Clone)]
pub(crate) struct UndoEntry {
    pub lsn: Lsn,
    pub key: ItemKey,
    pub before: Option<Vec<u8>>,
}

/// In-memory state of a live transaction
#[derive(Debug)]
pub(crate) struct Transaction {
    pub id: TxnId,
    pub state: TxnState,
    /// Larger is younger
    pub start_order: u64,
    /// LSN of the `Begin` record
    pub first_lsn: Lsn,
    /// Every LSN this transaction produced, in order
    pub lsns: Vec<Lsn>,
    /// Keys of locks held, as seen by this transaction
    pub locks: BTreeSet<ItemKey>,
    pub undo: Vec<UndoEntry>,
    /// Set once a lock was released early (basic 2PL)
    pub shrinking: bool,
}

impl Transaction {
    pub fn new(id: TxnId, start_order: u64, first_lsn: Lsn) -> Self {
        Self {
            id,
            state: TxnState::Active,
            start_order,
            first_lsn,
            lsns: vec![first_lsn],
            locks: BTreeSet::new(),
            undo: Vec::new(),
            shrinking: false,
        }
    }
}
