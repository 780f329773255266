//! Log Reader
//!
//! Reads framed records from the log file, front to back.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::{KeystoneError, Result};
use super::record::FrameHeader;
use super::{LogRecord, HEADER_SIZE, MAX_PAYLOAD_SIZE};

/// Outcome of reading one frame
#[derive(Debug)]
pub(crate) enum Frame {
    /// A complete, valid record occupying `len` bytes
    Record { record: LogRecord, len: u64 },

    /// Clean end of file
    Eof,

    /// The file ends in the middle of a frame
    Partial,

    /// A complete frame that fails validation
    Corrupt { reason: String, len: u64 },
}

/// Reads records sequentially from a log file
pub struct LogReader {
    file: BufReader<File>,
    /// Byte offset of the next frame
    offset: u64,
}

impl LogReader {
    /// Open a log file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            file: BufReader::new(file),
            offset: 0,
        })
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at end of file and also when the file ends inside a
    /// frame (a record still being written). A frame that fails its checksum
    /// or carries an impossible length is an error.
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        match self.next_frame()? {
            Frame::Record { record, .. } => Ok(Some(record)),
            Frame::Eof | Frame::Partial => Ok(None),
            Frame::Corrupt { reason, .. } => Err(KeystoneError::CorruptLog(reason)),
        }
    }

    /// Iterate over the remaining records
    pub fn records(self) -> LogRecordIter {
        LogRecordIter {
            reader: Some(self),
        }
    }

    /// Byte offset of the next unread frame
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        let mut header_buf = [0u8; HEADER_SIZE];
        let read = self.read_fully(&mut header_buf)?;
        if read == 0 {
            return Ok(Frame::Eof);
        }
        if read < HEADER_SIZE {
            return Ok(Frame::Partial);
        }

        let header = FrameHeader::parse(&header_buf);
        if header.len > MAX_PAYLOAD_SIZE {
            // Only the header is known to belong to this frame
            self.offset += HEADER_SIZE as u64;
            return Ok(Frame::Corrupt {
                reason: format!(
                    "payload length {} exceeds maximum {} in frame at offset {}",
                    header.len,
                    MAX_PAYLOAD_SIZE,
                    self.offset - HEADER_SIZE as u64
                ),
                len: HEADER_SIZE as u64,
            });
        }

        let mut payload = vec![0u8; header.len];
        if self.read_fully(&mut payload)? < header.len {
            return Ok(Frame::Partial);
        }

        let len = (HEADER_SIZE + header.len) as u64;
        self.offset += len;

        match LogRecord::from_frame(header, &payload) {
            Ok(record) => Ok(Frame::Record { record, len }),
            Err(e) => Ok(Frame::Corrupt {
                reason: e.to_string(),
                len,
            }),
        }
    }

    /// Read until `buf` is full or EOF; returns bytes read
    fn read_fully(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

/// Iterator over log records
pub struct LogRecordIter {
    reader: Option<LogReader>,
}

impl Iterator for LogRecordIter {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        match reader.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.reader = None;
                None
            }
            Err(e) => {
                self.reader = None;
                Some(Err(e))
            }
        }
    }
}
