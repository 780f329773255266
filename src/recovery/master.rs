//! Checkpoint master file
//!
//! Records where the most recent complete checkpoint lives in the log.
//!
//! ## File Format
//! ```text
//! ┌───────────┬─────────────┬───────────┬─────────┬──────────────┬─────────┐
//! │ "KSCP" (4)│ Version (2) │ Begin (8) │ End (8) │ Next Txn (8) │ CRC (4) │
//! └───────────┴─────────────┴───────────┴─────────┴──────────────┴─────────┘
//! ```

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{KeystoneError, Result};
use crate::fsutil;
use crate::txn::TxnId;
use crate::wal::Lsn;

const MAGIC: &[u8; 4] = b"KSCP";
const VERSION: u16 = 1;
const MASTER_SIZE: usize = 4 + 2 + 8 + 8 + 8 + 4;

/// Location of the last complete checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointMaster {
    /// LSN of the `CheckpointBegin` record
    pub begin_lsn: Lsn,

    /// LSN of the `CheckpointEnd` record
    pub end_lsn: Lsn,

    /// Next transaction id at checkpoint time
    pub next_txn_id: TxnId,
}

impl CheckpointMaster {
    /// Read the master file; `Ok(None)` if there is none yet
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if bytes.len() != MASTER_SIZE {
            return Err(KeystoneError::CorruptLog(format!(
                "checkpoint master has {} bytes, expected {}",
                bytes.len(),
                MASTER_SIZE
            )));
        }

        let (body, mut footer) = bytes.split_at(MASTER_SIZE - 4);
        if crc32fast::hash(body) != footer.get_u32_le() {
            return Err(KeystoneError::CorruptLog(
                "checkpoint master checksum mismatch".to_string(),
            ));
        }
        if &body[0..4] != MAGIC {
            return Err(KeystoneError::CorruptLog(format!(
                "invalid checkpoint master magic: {:?}",
                &body[0..4]
            )));
        }

        let mut cursor = &body[4..];
        let version = cursor.get_u16_le();
        if version != VERSION {
            return Err(KeystoneError::CorruptLog(format!(
                "unsupported checkpoint master version: {}",
                version
            )));
        }

        Ok(Some(Self {
            begin_lsn: cursor.get_u64_le(),
            end_lsn: cursor.get_u64_le(),
            next_txn_id: cursor.get_u64_le(),
        }))
    }

    /// Atomically replace the master file
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut buf = BytesMut::with_capacity(MASTER_SIZE);
        buf.put_slice(MAGIC);
        buf.put_u16_le(VERSION);
        buf.put_u64_le(self.begin_lsn);
        buf.put_u64_le(self.end_lsn);
        buf.put_u64_le(self.next_txn_id);
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);

        fsutil::persist_bytes(path, &buf)
    }
}
