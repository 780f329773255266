//! Write-Ahead Log (WAL) Module
//!
//! Provides atomicity and durability through append-only logging.
//!
//! ## Responsibilities
//! - Assign strictly increasing Log Sequence Numbers (LSN)
//! - Buffer records and force them to disk on commit (group commit)
//! - CRC32 checksums for corruption detection
//! - Cut off a torn tail left by a crash
//! - Lazy, restartable forward scans for recovery
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Record 1                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Record 2                                │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Data is the bincode encoding of `(txn_id, RecordKind)`. The CRC covers
//! the LSN, the length and the data.

mod manager;
mod reader;
mod record;
mod scan;
mod writer;

pub use manager::{LogIterator, LogManager, LogOptions};
pub use reader::{LogReader, LogRecordIter};
pub use record::{
    ActiveTxn, CheckpointData, LogRecord, Lsn, RecordKind, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use scan::{LogScanner, ScanReport};
pub use writer::LogWriter;
