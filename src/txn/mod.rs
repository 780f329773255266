//! Transaction Module
//!
//! Public entry point of the core. Coordinates the lock manager (isolation)
//! with the log manager (atomicity and durability).
//!
//! ## Transaction States
//! ```text
//!            ┌──────────► Committing ──► Committed
//!   Active ──┤
//!            └──────────► Aborting ────► Aborted
//! ```
//! Only `Active` accepts reads and writes. Once `Committing` has begun the
//! transaction can no longer be aborted.

mod checkpoint;
mod manager;
mod transaction;

pub use checkpoint::{CheckpointStats, Checkpointer};
pub use manager::{TransactionManager, TxnOptions};
pub use transaction::TxnState;

pub(crate) use transaction::{Transaction, UndoEntry};

/// Transaction identifier. Id 0 marks system records (checkpoints).
pub type TxnId = u64;
