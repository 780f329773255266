//! Recovery Module
//!
//! Restores a consistent item store after a crash, before any transaction
//! is admitted.
//!
//! ## Passes
//! ```text
//!   checkpoint.master ──► begin LSN
//!                            │
//!   log: ... ───────────────[CKPT_BEGIN ... CKPT_END]──────────── end
//!                            │
//!   1. Analysis  ────────────┼──────────────────────────────────►  losers, dirty items
//!   2. Redo      ────────────┼──────────────────────────────────►  every UPDATE / CLR
//!   3. Undo      ◄───────────┼──────────────────────────────────   loser UPDATEs, newest first
//!                (from the earliest loser BEGIN, may precede the checkpoint)
//! ```
//!
//! Undo logs a compensation record (CLR) for every update it reverses, so
//! a crash during recovery never undoes the same update twice.

mod analysis;
mod manager;
mod master;

pub use manager::{RecoveryManager, RecoveryReport};
pub use master::CheckpointMaster;
