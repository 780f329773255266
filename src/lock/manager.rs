//! Lock Manager
//!
//! Grants shared and exclusive locks on items, queues requests that
//! conflict, and breaks deadlocks by aborting the youngest transaction in a
//! wait-for cycle.
//!
//! ## Grant Rule
//! A request is granted when it is compatible with every other holder and
//! with every request queued ahead of it. Upgrades (a holder asking for a
//! stronger mode) are queued ahead of ordinary waiters but behind earlier
//! upgrades.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{KeystoneError, Result};
use crate::store::ItemKey;
use crate::txn::TxnId;
use super::deadlock::WaitForGraph;
use super::{LockGrant, LockMode};

/// A queued request
#[derive(Debug, Clone, Copy)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    upgrade: bool,
}

/// Lock state of one item
#[derive(Debug, Default)]
struct LockEntry {
    granted: Vec<(TxnId, LockMode)>,
    queue: VecDeque<LockRequest>,
}

impl LockEntry {
    fn held_mode(&self, txn_id: TxnId) -> Option<LockMode> {
        self.granted
            .iter()
            .find(|(holder, _)| *holder == txn_id)
            .map(|(_, mode)| *mode)
    }

    fn position(&self, txn_id: TxnId) -> Option<usize> {
        self.queue.iter().position(|r| r.txn_id == txn_id)
    }

    fn enqueue(&mut self, request: LockRequest) {
        if request.upgrade {
            let at = self.queue.iter().take_while(|r| r.upgrade).count();
            self.queue.insert(at, request);
        } else {
            self.queue.push_back(request);
        }
    }

    /// Transactions standing between the queued request at `pos` and a grant
    fn blockers(&self, pos: usize) -> HashSet<TxnId> {
        let request = self.queue[pos];
        let holders = self
            .granted
            .iter()
            .filter(|(holder, mode)| *holder != request.txn_id && !mode.is_compatible_with(request.mode))
            .map(|(holder, _)| *holder);
        let ahead = self
            .queue
            .iter()
            .take(pos)
            .filter(|r| r.txn_id != request.txn_id && !r.mode.is_compatible_with(request.mode))
            .map(|r| r.txn_id);
        holders.chain(ahead).collect()
    }

    fn grant(&mut self, txn_id: TxnId, mode: LockMode) {
        match self.granted.iter_mut().find(|(holder, _)| *holder == txn_id) {
            Some(slot) => slot.1 = mode,
            None => self.granted.push((txn_id, mode)),
        }
    }

    fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.queue.is_empty()
    }
}

/// Everything guarded by the manager mutex
#[derive(Debug, Default)]
struct LockTable {
    items: HashMap<ItemKey, LockEntry>,
    held: HashMap<TxnId, HashSet<ItemKey>>,
    graph: WaitForGraph,
    /// Waiting transactions chosen to break a deadlock
    victims: HashSet<TxnId>,
    start_orders: HashMap<TxnId, u64>,
}

impl LockTable {
    /// Try to grant the queued request of `txn_id` on `key`
    fn try_grant(&mut self, txn_id: TxnId, key: &[u8]) -> bool {
        let Some(entry) = self.items.get_mut(key) else {
            return false;
        };
        let Some(pos) = entry.position(txn_id) else {
            return false;
        };
        if !entry.blockers(pos).is_empty() {
            return false;
        }
        if let Some(request) = entry.queue.remove(pos) {
            entry.grant(txn_id, request.mode);
        }
        self.held.entry(txn_id).or_default().insert(key.to_vec());
        self.graph.clear(txn_id);
        true
    }

    /// Recompute wait-for edges for every waiter on `key`.
    ///
    /// Returns the waiters that gained an edge.
    fn refresh_edges(&mut self, key: &[u8]) -> Vec<TxnId> {
        let Some(entry) = self.items.get(key) else {
            return Vec::new();
        };
        let mut gained = Vec::new();
        for pos in 0..entry.queue.len() {
            let waiter = entry.queue[pos].txn_id;
            if self.victims.contains(&waiter) {
                continue;
            }
            if self.graph.set_edges(waiter, entry.blockers(pos)) {
                gained.push(waiter);
            }
        }
        gained
    }

    /// Search for cycles from each of `origins` and pick victims.
    ///
    /// Returns true if `requester` itself was chosen.
    fn resolve_deadlocks(&mut self, origins: &[TxnId], requester: Option<TxnId>) -> bool {
        let mut requester_chosen = false;
        for &origin in origins {
            if self.victims.contains(&origin) {
                continue;
            }
            let Some(cycle) = self.graph.find_cycle(origin) else {
                continue;
            };
            let victim = self.youngest(&cycle);
            tracing::debug!(?cycle, victim, "deadlock detected");

            self.graph.clear(victim);
            if Some(victim) == requester {
                requester_chosen = true;
            } else {
                self.victims.insert(victim);
            }
        }
        requester_chosen
    }

    fn youngest(&self, cycle: &[TxnId]) -> TxnId {
        cycle
            .iter()
            .copied()
            .max_by_key(|txn| (self.start_orders.get(txn).copied().unwrap_or(0), *txn))
            .unwrap_or(cycle[0])
    }

    /// Remove the queued request of `txn_id` on `key`
    fn withdraw(&mut self, txn_id: TxnId, key: &[u8]) {
        self.graph.clear(txn_id);
        if let Some(entry) = self.items.get_mut(key) {
            if let Some(pos) = entry.position(txn_id) {
                entry.queue.remove(pos);
            }
            if entry.is_empty() {
                self.items.remove(key);
            }
        }
        self.refresh_edges(key);
    }

    fn release_one(&mut self, txn_id: TxnId, key: &[u8]) -> bool {
        let Some(entry) = self.items.get_mut(key) else {
            return false;
        };
        let before = entry.granted.len();
        entry.granted.retain(|(holder, _)| *holder != txn_id);
        let released = entry.granted.len() != before;
        if entry.is_empty() {
            self.items.remove(key);
        }
        released
    }
}

/// Manager-wide lock table
pub struct LockManager {
    table: Mutex<LockTable>,
    changed: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            changed: Condvar::new(),
        }
    }

    /// Acquire `mode` on `key` for `txn_id`, blocking until granted.
    ///
    /// `start_order` ranks transactions for victim selection (larger is
    /// younger). Fails with `Deadlock` if this transaction is chosen to
    /// break a cycle, and with `LockTimeout` once `deadline` passes. On
    /// failure the request leaves no trace; locks already held are kept.
    pub fn acquire(
        &self,
        txn_id: TxnId,
        start_order: u64,
        key: &[u8],
        mode: LockMode,
        deadline: Option<Instant>,
    ) -> Result<LockGrant> {
        let mut table = self.table.lock();
        table.start_orders.insert(txn_id, start_order);

        let entry = table.items.entry(key.to_vec()).or_default();
        let held = entry.held_mode(txn_id);
        if let Some(held) = held {
            if held.covers(mode) {
                return Ok(LockGrant::AlreadyHeld);
            }
        }

        entry.enqueue(LockRequest {
            txn_id,
            mode,
            upgrade: held.is_some(),
        });

        if table.try_grant(txn_id, key) {
            table.refresh_edges(key);
            return Ok(LockGrant::Granted);
        }

        let gained = table.refresh_edges(key);
        if table.resolve_deadlocks(&gained, Some(txn_id)) {
            table.withdraw(txn_id, key);
            self.changed.notify_all();
            return Err(KeystoneError::Deadlock { txn_id });
        }
        self.changed.notify_all();

        tracing::trace!(txn_id, key = %String::from_utf8_lossy(key), ?mode, "waiting for lock");

        let mut timed_out = false;
        loop {
            if table.victims.remove(&txn_id) {
                table.withdraw(txn_id, key);
                self.changed.notify_all();
                return Err(KeystoneError::Deadlock { txn_id });
            }

            if table.try_grant(txn_id, key) {
                table.refresh_edges(key);
                self.changed.notify_all();
                return Ok(LockGrant::Granted);
            }

            if timed_out {
                table.withdraw(txn_id, key);
                self.changed.notify_all();
                return Err(KeystoneError::LockTimeout {
                    txn_id,
                    key: String::from_utf8_lossy(key).into_owned(),
                });
            }

            match deadline {
                Some(deadline) => {
                    timed_out = self.changed.wait_until(&mut table, deadline).timed_out();
                }
                None => self.changed.wait(&mut table),
            }
        }
    }

    /// Release one lock early; returns whether it was held
    pub fn release(&self, txn_id: TxnId, key: &[u8]) -> bool {
        let mut table = self.table.lock();
        let released = table.release_one(txn_id, key);
        if released {
            if let Some(keys) = table.held.get_mut(&txn_id) {
                keys.remove(key);
            }
            let gained = table.refresh_edges(key);
            table.resolve_deadlocks(&gained, None);
            self.changed.notify_all();
        }
        released
    }

    /// Release every lock held by `txn_id`; returns how many were released
    pub fn release_all(&self, txn_id: TxnId) -> usize {
        let mut table = self.table.lock();
        let keys = table.held.remove(&txn_id).unwrap_or_default();

        let mut released = 0;
        let mut gained = Vec::new();
        for key in &keys {
            if table.release_one(txn_id, key) {
                released += 1;
            }
            gained.extend(table.refresh_edges(key));
        }

        table.graph.clear(txn_id);
        table.victims.remove(&txn_id);
        table.start_orders.remove(&txn_id);
        table.resolve_deadlocks(&gained, None);
        drop(table);

        self.changed.notify_all();
        released
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Current holders of `key`
    pub fn holders(&self, key: &[u8]) -> Vec<(TxnId, LockMode)> {
        self.table
            .lock()
            .items
            .get(key)
            .map(|entry| entry.granted.clone())
            .unwrap_or_default()
    }

    /// Queued requests on `key`, front first
    pub fn waiters(&self, key: &[u8]) -> Vec<(TxnId, LockMode)> {
        self.table
            .lock()
            .items
            .get(key)
            .map(|entry| entry.queue.iter().map(|r| (r.txn_id, r.mode)).collect())
            .unwrap_or_default()
    }

    /// Locks held by `txn_id`, sorted by key
    pub fn locks_held(&self, txn_id: TxnId) -> Vec<(ItemKey, LockMode)> {
        let table = self.table.lock();
        let mut locks: Vec<(ItemKey, LockMode)> = table
            .held
            .get(&txn_id)
            .into_iter()
            .flatten()
            .filter_map(|key| {
                let mode = table.items.get(key)?.held_mode(txn_id)?;
                Some((key.clone(), mode))
            })
            .collect();
        locks.sort_by(|a, b| a.0.cmp(&b.0));
        locks
    }

    /// Mode `txn_id` holds on `key`, if any
    pub fn mode_held(&self, txn_id: TxnId, key: &[u8]) -> Option<LockMode> {
        self.table.lock().items.get(key)?.held_mode(txn_id)
    }

    /// Transactions `txn_id` is currently waiting for
    pub fn waits_for(&self, txn_id: TxnId) -> Vec<TxnId> {
        self.table.lock().graph.blockers(txn_id)
    }

    /// Number of edges in the wait-for graph
    pub fn wait_edges(&self) -> usize {
        self.table.lock().graph.edge_count()
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}
