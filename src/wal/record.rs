//! Log record definitions
//!
//! Defines the records written to the log and their on-disk framing.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{KeystoneError, Result};
use crate::store::ItemKey;
use crate::txn::TxnId;

/// Log Sequence Number - strictly increasing, never reused
pub type Lsn = u64;

/// Frame header size: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest payload accepted when decoding (guards against garbage lengths)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// A single record in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Log Sequence Number
    pub lsn: Lsn,

    /// Transaction that produced the record (0 for system records)
    pub txn_id: TxnId,

    /// What happened
    pub kind: RecordKind,
}

/// Kinds of log records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// Transaction started
    Begin,

    /// Item changed from `before` to `after` (`None` = absent)
    Update {
        key: ItemKey,
        before: Option<Vec<u8>>,
        after: Option<Vec<u8>>,
    },

    /// Undo of the update at `undoes`, restoring `restored`
    Compensation {
        key: ItemKey,
        restored: Option<Vec<u8>>,
        undoes: Lsn,
    },

    /// Transaction committed
    Commit,

    /// Transaction rolled back
    Abort,

    /// Checkpoint started
    CheckpointBegin,

    /// Checkpoint finished
    CheckpointEnd(CheckpointData),
}

/// Contents of a `CheckpointEnd` record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointData {
    /// LSN of the matching `CheckpointBegin`
    pub begin_lsn: Lsn,

    /// Transactions active when the checkpoint was taken
    pub active: Vec<ActiveTxn>,

    /// Items that were dirty when the checkpoint was taken
    pub dirty: Vec<ItemKey>,

    /// Next transaction id to hand out
    pub next_txn_id: TxnId,
}

/// An active transaction recorded by a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveTxn {
    pub txn_id: TxnId,

    /// LSN of the transaction's `Begin` record
    pub first_lsn: Lsn,
}

impl RecordKind {
    /// Short upper-case name, used by the admin tool and in logs
    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::Begin => "BEGIN",
            RecordKind::Update { .. } => "UPDATE",
            RecordKind::Compensation { .. } => "CLR",
            RecordKind::Commit => "COMMIT",
            RecordKind::Abort => "ABORT",
            RecordKind::CheckpointBegin => "CHECKPOINT_BEGIN",
            RecordKind::CheckpointEnd(_) => "CHECKPOINT_END",
        }
    }

    /// Commit and abort end a transaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordKind::Commit | RecordKind::Abort)
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub lsn: Lsn,
    pub crc: u32,
    pub len: usize,
}

impl FrameHeader {
    pub(crate) fn parse(mut bytes: &[u8]) -> Self {
        let lsn = bytes.get_u64_le();
        let crc = bytes.get_u32_le();
        let len = bytes.get_u32_le() as usize;
        Self { lsn, crc, len }
    }
}

impl LogRecord {
    /// Create a new record
    pub fn new(lsn: Lsn, txn_id: TxnId, kind: RecordKind) -> Self {
        Self { lsn, txn_id, kind }
    }

    fn payload(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&(self.txn_id, &self.kind))?)
    }

    /// Size of the framed record in bytes
    pub fn serialized_size(&self) -> Result<usize> {
        let payload_len = bincode::serialized_size(&(self.txn_id, &self.kind))? as usize;
        Ok(HEADER_SIZE + payload_len)
    }

    /// CRC32 over LSN, payload length and payload
    pub fn compute_crc(&self) -> Result<u32> {
        let payload = self.payload()?;
        Ok(frame_crc(self.lsn, &payload))
    }

    /// Encode as `[LSN][CRC][Len][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = self.payload()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(KeystoneError::Serialization(format!(
                "Log record too large: {} bytes (max {})",
                payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u64_le(self.lsn);
        buf.put_u32_le(frame_crc(self.lsn, &payload));
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);
        Ok(buf.to_vec())
    }

    /// Decode one framed record, validating length and checksum
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(KeystoneError::CorruptLog(format!(
                "Incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let header = FrameHeader::parse(&bytes[..HEADER_SIZE]);
        if header.len > MAX_PAYLOAD_SIZE {
            return Err(KeystoneError::CorruptLog(format!(
                "Payload length {} exceeds maximum {}",
                header.len, MAX_PAYLOAD_SIZE
            )));
        }

        let end = HEADER_SIZE + header.len;
        if bytes.len() < end {
            return Err(KeystoneError::CorruptLog(format!(
                "Incomplete payload: expected {} bytes, got {}",
                end,
                bytes.len()
            )));
        }

        Self::from_frame(header, &bytes[HEADER_SIZE..end])
    }

    /// Decode a payload whose header was already read
    pub(crate) fn from_frame(header: FrameHeader, payload: &[u8]) -> Result<Self> {
        let actual = frame_crc(header.lsn, payload);
        if actual != header.crc {
            return Err(KeystoneError::CorruptLog(format!(
                "Checksum mismatch at LSN {}: stored {:#010x}, computed {:#010x}",
                header.lsn, header.crc, actual
            )));
        }

        let (txn_id, kind): (TxnId, RecordKind) = bincode::deserialize(payload).map_err(|e| {
            KeystoneError::CorruptLog(format!("Undecodable record at LSN {}: {}", header.lsn, e))
        })?;

        Ok(Self {
            lsn: header.lsn,
            txn_id,
            kind,
        })
    }
}

fn frame_crc(lsn: Lsn, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&lsn.to_le_bytes());
    hasher.update(&(payload.len() as u32).to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
