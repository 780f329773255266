//! # Keystone
//!
//! A transactional storage core with:
//! - Write-ahead logging with group commit for atomicity and durability
//! - Strict two-phase locking with deadlock detection for serializability
//! - ARIES-style crash recovery (analysis, redo, undo)
//! - Quiescent checkpoints that bound recovery and allow log truncation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Engine                               │
//! │        (open → recover → serve transactions → close)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Transaction Manager                         │
//! │     begin / read / write / commit / abort / checkpoint      │
//! └───────┬─────────────────────┬──────────────────────┬────────┘
//!         │                     │                      │
//!         ▼                     ▼                      ▼
//!  ┌─────────────┐       ┌─────────────┐        ┌─────────────┐
//!  │Lock Manager │       │ Log Manager │        │ Item Store  │
//!  │ (2PL, WFG)  │       │ (WAL, LSNs) │        │ (get / put) │
//!  └─────────────┘       └──────┬──────┘        └──────▲──────┘
//!                               │                      │
//!                               ▼                      │
//!                        ┌──────────────┐              │
//!                        │   Recovery   │──────────────┘
//!                        │ (at startup) │
//!                        └──────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod store;
pub mod lock;
pub mod recovery;
pub mod txn;
pub mod engine;

mod fsutil;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, LockingPolicy};
pub use engine::Engine;
pub use error::{KeystoneError, Result};
pub use lock::{LockManager, LockMode};
pub use recovery::{RecoveryManager, RecoveryReport};
pub use store::{FileStore, ItemStore, MemoryStore};
pub use txn::{TransactionManager, TxnId, TxnState};
pub use wal::{LogManager, Lsn};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Keystone
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
