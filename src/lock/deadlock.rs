//! Wait-for graph
//!
//! Edge `a -> b` means transaction `a` is waiting for a lock that `b` holds
//! or has queued ahead of it. Edges are replaced per waiter whenever its
//! blockers change and a cycle search runs from the waiter that gained an
//! edge, so only cycles through that waiter are ever looked for.

use std::collections::{HashMap, HashSet};

use crate::txn::TxnId;

#[derive(Debug, Default)]
pub(crate) struct WaitForGraph {
    edges: HashMap<TxnId, HashSet<TxnId>>,
}

impl WaitForGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Replace the outgoing edges of `waiter`; true if any edge is new
    pub(crate) fn set_edges(&mut self, waiter: TxnId, blockers: HashSet<TxnId>) -> bool {
        if blockers.is_empty() {
            self.edges.remove(&waiter);
            return false;
        }
        let added = match self.edges.get(&waiter) {
            Some(old) => blockers.iter().any(|b| !old.contains(b)),
            None => true,
        };
        self.edges.insert(waiter, blockers);
        added
    }

    /// Drop the outgoing edges of `waiter`
    pub(crate) fn clear(&mut self, waiter: TxnId) {
        self.edges.remove(&waiter);
    }

    /// Transactions `waiter` currently waits for, sorted
    pub(crate) fn blockers(&self, waiter: TxnId) -> Vec<TxnId> {
        self.successors(waiter)
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    /// Find a cycle that passes through `start`.
    ///
    /// Returns the transactions on the cycle, starting with `start`.
    pub(crate) fn find_cycle(&self, start: TxnId) -> Option<Vec<TxnId>> {
        let mut path = vec![start];
        let mut visited = HashSet::from([start]);
        let mut frontier = vec![self.successors(start)];

        while let Some(next) = frontier.last_mut() {
            match next.pop() {
                Some(txn) if txn == start => return Some(path),
                Some(txn) => {
                    if visited.insert(txn) {
                        path.push(txn);
                        frontier.push(self.successors(txn));
                    }
                }
                None => {
                    frontier.pop();
                    path.pop();
                }
            }
        }

        None
    }

    fn successors(&self, txn: TxnId) -> Vec<TxnId> {
        let mut out: Vec<TxnId> = self
            .edges
            .get(&txn)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        out.sort_unstable();
        out
    }
}
