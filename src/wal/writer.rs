//! Log Writer
//!
//! Appends framed records to the log file. Knows nothing about LSN
//! allocation or buffering; the log manager drives it.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use super::LogRecord;

/// Writes framed records to the end of the log file
pub struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Bytes in the file, including anything still in the BufWriter
    size: u64,
}

impl LogWriter {
    /// Open or create a log file for appending
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            size,
        })
    }

    /// Append one record; returns the number of bytes written
    pub fn write_record(&mut self, record: &LogRecord) -> Result<usize> {
        let bytes = record.serialize()?;
        self.writer.write_all(&bytes)?;
        self.size += bytes.len() as u64;
        Ok(bytes.len())
    }

    /// Push buffered bytes to the OS and fsync them
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Current file size in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
