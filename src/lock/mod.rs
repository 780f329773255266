//! Lock Manager Module
//!
//! Shared/exclusive item locks with FIFO wait queues and deadlock detection.
//!
//! ## Layout
//! ```text
//! ┌──────────────────────── LockManager ────────────────────────┐
//! │  Mutex<LockTable>                                           │
//! │    items:  key ──► LockEntry { granted, queue }             │
//! │    held:   txn ──► { keys }                                 │
//! │    graph:  waiter ──► { blockers }   (wait-for graph)       │
//! │    victims                                                  │
//! │  Condvar  (every waiter re-checks after any change)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The lock manager knows nothing about two-phase locking; the transaction
//! manager decides when a transaction may still acquire locks.

mod deadlock;
mod manager;

pub use manager::LockManager;

/// Lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Read lock; any number of holders
    Shared,
    /// Write lock; excludes every other lock on the item
    Exclusive,
}

impl LockMode {
    /// Check if two lock modes are compatible
    pub fn is_compatible_with(&self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }

    /// Whether holding `self` already satisfies a request for `requested`
    pub fn covers(&self, requested: LockMode) -> bool {
        match self {
            LockMode::Exclusive => true,
            LockMode::Shared => requested == LockMode::Shared,
        }
    }
}

/// Result of a successful `acquire`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockGrant {
    /// The lock (or an upgrade) was granted by this call
    Granted,
    /// The transaction already held a lock at least as strong
    AlreadyHeld,
}
