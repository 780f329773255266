//! Log Manager
//!
//! Owns the log tail: assigns LSNs, buffers records, and makes them durable
//! on request.
//!
//! ## Group Commit
//!
//! `append` only buffers. `flush(lsn)` blocks until `lsn` is durable:
//! - The first caller to find no flush in progress becomes the leader. It
//!   optionally sleeps for the group-commit window, takes the whole buffer,
//!   writes it and fsyncs once.
//! - Everyone else waits on a condvar until the durable LSN covers their
//!   target, or becomes the next leader if it does not.
//!
//! ## Failure
//!
//! A failed write or fsync halts the manager. The file may hold a torn
//! tail, so no further append or flush is accepted; the process must
//! restart and let the open-time scan repair the log.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::Config;
use crate::error::{KeystoneError, Result};
use crate::fsutil;
use crate::txn::TxnId;
use super::{
    LogReader, LogRecord, LogScanner, LogWriter, Lsn, RecordKind, ScanReport, HEADER_SIZE,
    MAX_PAYLOAD_SIZE,
};

/// Tuning knobs for the log manager
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Buffered bytes that make `append` flush
    pub buffer_capacity: usize,

    /// Leader wait before fsync
    pub group_commit_window: Duration,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024 * 1024,
            group_commit_window: Duration::ZERO,
        }
    }
}

impl From<&Config> for LogOptions {
    fn from(config: &Config) -> Self {
        Self {
            buffer_capacity: config.log_buffer_capacity,
            group_commit_window: config.group_commit_window,
        }
    }
}

/// Mutable tail state, guarded by `LogManager::state`
struct LogState {
    next_lsn: Lsn,
    buffer: Vec<LogRecord>,
    buffered_bytes: usize,
    /// A leader is writing; only it touches the writer
    flushing: bool,
    bytes_since_checkpoint: u64,
}

/// Append-only, crash-durable log
pub struct LogManager {
    path: PathBuf,
    state: Mutex<LogState>,
    writer: Mutex<LogWriter>,
    /// Signalled whenever a flush finishes (successfully or not)
    flushed: Condvar,
    durable_lsn: AtomicU64,
    halted: AtomicBool,
    options: LogOptions,
}

impl LogManager {
    /// Open or create the log at `path`.
    ///
    /// An existing file is scanned first; a torn final record is cut off.
    pub fn open(path: &Path, options: LogOptions) -> Result<(Self, ScanReport)> {
        let report = if path.exists() {
            LogScanner::repair(path)?
        } else {
            ScanReport::default()
        };

        let writer = LogWriter::open(path)?;

        tracing::debug!(
            path = %path.display(),
            records = report.records_valid,
            last_lsn = report.last_lsn,
            "log opened"
        );

        let manager = Self {
            path: path.to_path_buf(),
            state: Mutex::new(LogState {
                next_lsn: report.last_lsn + 1,
                buffer: Vec::new(),
                buffered_bytes: 0,
                flushing: false,
                bytes_since_checkpoint: 0,
            }),
            writer: Mutex::new(writer),
            flushed: Condvar::new(),
            durable_lsn: AtomicU64::new(report.last_lsn),
            halted: AtomicBool::new(false),
            options,
        };

        Ok((manager, report))
    }

    // =========================================================================
    // Append / Flush
    // =========================================================================

    /// Buffer a record and return its LSN.
    ///
    /// The LSN is a promise, not a durability guarantee; call `flush`.
    /// A record too large to frame is rejected with `Serialization` and
    /// gets no LSN.
    pub fn append(&self, txn_id: TxnId, kind: RecordKind) -> Result<Lsn> {
        self.check_halted()?;

        let mut record = LogRecord::new(0, txn_id, kind);
        let size = record.serialized_size()?;
        if size - HEADER_SIZE > MAX_PAYLOAD_SIZE {
            return Err(KeystoneError::Serialization(format!(
                "Log record too large: {} bytes (max {})",
                size - HEADER_SIZE,
                MAX_PAYLOAD_SIZE
            )));
        }

        let (lsn, over_capacity) = {
            let mut state = self.state.lock();
            let lsn = state.next_lsn;
            state.next_lsn += 1;
            record.lsn = lsn;
            state.buffer.push(record);
            state.buffered_bytes += size;
            state.bytes_since_checkpoint += size as u64;
            (lsn, state.buffered_bytes >= self.options.buffer_capacity)
        };

        if over_capacity {
            self.flush(lsn)?;
        }

        Ok(lsn)
    }

    /// Block until every record with LSN <= `up_to` is on stable storage.
    ///
    /// Targets beyond the tail flush everything appended so far.
    pub fn flush(&self, up_to: Lsn) -> Result<()> {
        if self.durable_lsn() >= up_to {
            return Ok(());
        }

        let mut state = self.state.lock();
        loop {
            self.check_halted()?;
            if self.durable_lsn() >= up_to {
                return Ok(());
            }
            if !state.flushing {
                break;
            }
            self.flushed.wait(&mut state);
        }

        // We are the leader
        state.flushing = true;
        if !self.options.group_commit_window.is_zero() {
            let window = self.options.group_commit_window;
            MutexGuard::unlocked(&mut state, || thread::sleep(window));
        }

        let batch = std::mem::take(&mut state.buffer);
        state.buffered_bytes = 0;

        let result = MutexGuard::unlocked(&mut state, || self.write_batch(&batch));
        state.flushing = false;

        match &result {
            Ok(()) => {
                if let Some(last) = batch.last() {
                    self.durable_lsn.fetch_max(last.lsn, Ordering::AcqRel);
                    if batch.len() > 1 {
                        tracing::trace!(records = batch.len(), durable_lsn = last.lsn, "group flush");
                    }
                }
            }
            Err(e) => self.halt(e),
        }

        drop(state);
        self.flushed.notify_all();
        result
    }

    /// Flush everything appended so far
    pub fn flush_all(&self) -> Result<()> {
        self.flush(self.last_lsn())
    }

    fn write_batch(&self, batch: &[LogRecord]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock();
        for record in batch {
            writer.write_record(record)?;
        }
        writer.sync()
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Lazily iterate over records with LSN >= `start`, in LSN order.
    ///
    /// Durable records come from the file; records still buffered are
    /// snapshotted at call time and follow them. Each call starts a fresh
    /// pass, so a scan can always be restarted.
    pub fn read_from(&self, start: Lsn) -> Result<LogIterator> {
        let (durable_limit, pending) = {
            let mut state = self.state.lock();
            while state.flushing {
                self.flushed.wait(&mut state);
            }
            let pending: VecDeque<LogRecord> = state
                .buffer
                .iter()
                .filter(|record| record.lsn >= start)
                .cloned()
                .collect();
            (self.durable_lsn(), pending)
        };

        let reader = if self.path.exists() {
            Some(LogReader::open(&self.path)?)
        } else {
            None
        };

        Ok(LogIterator {
            reader,
            start,
            durable_limit,
            pending,
        })
    }

    // =========================================================================
    // Truncation
    // =========================================================================

    /// Drop every record with LSN < `cutoff`; returns how many were dropped.
    ///
    /// Buffered records are flushed first. The file is rewritten and renamed
    /// into place, so a crash leaves either the old or the new log.
    pub fn truncate_before(&self, cutoff: Lsn) -> Result<u64> {
        let mut state = self.state.lock();
        while state.flushing {
            self.flushed.wait(&mut state);
        }
        self.check_halted()?;

        let batch = std::mem::take(&mut state.buffer);
        state.buffered_bytes = 0;

        let result = self.write_batch(&batch).and_then(|()| self.rewrite_from(cutoff));
        match &result {
            Ok(dropped) => {
                if let Some(last) = batch.last() {
                    self.durable_lsn.fetch_max(last.lsn, Ordering::AcqRel);
                }
                tracing::debug!(cutoff, dropped, "log truncated");
            }
            Err(e) => self.halt(e),
        }

        drop(state);
        self.flushed.notify_all();
        result
    }

    fn rewrite_from(&self, cutoff: Lsn) -> Result<u64> {
        let mut writer = self.writer.lock();
        let mut dropped = 0u64;

        fsutil::persist_with(&self.path, |out| {
            let mut reader = LogReader::open(&self.path)?;
            while let Some(record) = reader.next_record()? {
                if record.lsn < cutoff {
                    dropped += 1;
                } else {
                    out.write_all(&record.serialize()?)?;
                }
            }
            Ok(())
        })?;

        *writer = LogWriter::open(&self.path)?;
        Ok(dropped)
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Highest LSN known to be on stable storage
    pub fn durable_lsn(&self) -> Lsn {
        self.durable_lsn.load(Ordering::Acquire)
    }

    /// LSN the next append will receive
    pub fn next_lsn(&self) -> Lsn {
        self.state.lock().next_lsn
    }

    /// LSN of the most recent append (0 if none)
    pub fn last_lsn(&self) -> Lsn {
        self.next_lsn() - 1
    }

    /// Bytes appended since the last `reset_checkpoint_counter`
    pub fn bytes_since_checkpoint(&self) -> u64 {
        self.state.lock().bytes_since_checkpoint
    }

    pub fn reset_checkpoint_counter(&self) {
        self.state.lock().bytes_since_checkpoint = 0;
    }

    /// Size of the log file in bytes (excluding buffered records)
    pub fn file_size(&self) -> u64 {
        self.writer.lock().size()
    }

    /// Whether an earlier I/O failure stopped the log
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_halted(&self) -> Result<()> {
        if self.is_halted() {
            return Err(KeystoneError::IoFailure(std::io::Error::other(
                "log manager halted after an earlier write failure",
            )));
        }
        Ok(())
    }

    fn halt(&self, err: &KeystoneError) {
        self.halted.store(true, Ordering::Release);
        tracing::error!(path = %self.path.display(), error = %err, "log write failed, halting log");
    }
}

/// Forward iterator returned by `LogManager::read_from`
pub struct LogIterator {
    reader: Option<LogReader>,
    start: Lsn,
    /// Records on disk beyond this LSN are also in `pending`
    durable_limit: Lsn,
    pending: VecDeque<LogRecord>,
}

impl Iterator for LogIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(reader) = self.reader.as_mut() {
            match reader.next_record() {
                Ok(Some(record)) if record.lsn < self.start => continue,
                Ok(Some(record)) if record.lsn <= self.durable_limit => return Some(Ok(record)),
                Ok(_) => self.reader = None,
                Err(e) => {
                    self.reader = None;
                    self.pending.clear();
                    return Some(Err(e));
                }
            }
        }
        self.pending.pop_front().map(Ok)
    }
}
