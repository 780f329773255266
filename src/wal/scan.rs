//! Log Scan
//!
//! Validates a log file on open and removes a torn tail left by a crash.

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{KeystoneError, Result};
use super::reader::{Frame, LogReader};
use super::Lsn;

/// Checks and repairs log files
pub struct LogScanner;

/// Result of scanning a log file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Number of valid records
    pub records_valid: u64,

    /// Number of records dropped because of a checksum failure (0 or 1)
    pub records_corrupted: u64,

    /// LSN of the first valid record (0 if none)
    pub first_lsn: Lsn,

    /// LSN of the last valid record (0 if none)
    pub last_lsn: Lsn,

    /// Length of the valid prefix of the file
    pub valid_bytes: u64,

    /// Whether bytes after the valid prefix were (or would be) dropped
    pub was_truncated: bool,
}

impl LogScanner {
    /// Scan a log file without modifying it.
    ///
    /// This will:
    /// 1. Read valid records front to back
    /// 2. Stop at a partial frame, or at a damaged frame (bad checksum or
    ///    impossible length) that ends the file
    /// 3. Fail with `CorruptLog` if a damaged frame is followed by more data
    ///    or LSNs stop increasing
    pub fn verify(path: &Path) -> Result<ScanReport> {
        let file_size = std::fs::metadata(path)?.len();
        let mut reader = LogReader::open(path)?;
        let mut report = ScanReport::default();

        loop {
            match reader.next_frame()? {
                Frame::Record { record, len } => {
                    if report.records_valid > 0 && record.lsn <= report.last_lsn {
                        return Err(KeystoneError::CorruptLog(format!(
                            "LSN {} follows LSN {} at offset {}",
                            record.lsn, report.last_lsn, report.valid_bytes
                        )));
                    }
                    if report.records_valid == 0 {
                        report.first_lsn = record.lsn;
                    }
                    report.records_valid += 1;
                    report.last_lsn = record.lsn;
                    report.valid_bytes += len;
                }
                Frame::Eof => break,
                Frame::Partial => {
                    report.was_truncated = true;
                    break;
                }
                Frame::Corrupt { reason, len } => {
                    let frame_end = report.valid_bytes + len;
                    if frame_end < file_size {
                        return Err(KeystoneError::CorruptLog(format!(
                            "{} (offset {}, {} bytes follow)",
                            reason,
                            report.valid_bytes,
                            file_size - frame_end
                        )));
                    }
                    report.records_corrupted += 1;
                    report.was_truncated = true;
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Scan a log file and cut off a torn tail.
    pub fn repair(path: &Path) -> Result<ScanReport> {
        let report = Self::verify(path)?;

        if report.was_truncated {
            tracing::warn!(
                path = %path.display(),
                valid_bytes = report.valid_bytes,
                last_lsn = report.last_lsn,
                corrupted = report.records_corrupted,
                "discarding incomplete log tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(report.valid_bytes)?;
            file.sync_all()?;
        }

        Ok(report)
    }
}
