//! Tests for log record framing
//!
//! These tests verify:
//! - Frame layout (LSN, CRC, length, payload)
//! - CRC32 corruption detection
//! - Truncated and malformed frames

use keystone::wal::{ActiveTxn, CheckpointData, LogRecord, RecordKind, HEADER_SIZE};
use keystone::KeystoneError;

fn update_record(lsn: u64) -> LogRecord {
    LogRecord::new(
        lsn,
        7,
        RecordKind::Update {
            key: b"account:A".to_vec(),
            before: Some(b"1000".to_vec()),
            after: Some(b"800".to_vec()),
        },
    )
}

// =============================================================================
// Framing Tests
// =============================================================================

#[test]
fn test_update_survives_serialization() {
    let record = update_record(12);

    let bytes = record.serialize().unwrap();
    let decoded = LogRecord::deserialize(&bytes).unwrap();

    assert_eq!(decoded, record);
}

#[test]
fn test_checkpoint_end_survives_serialization() {
    let record = LogRecord::new(
        40,
        0,
        RecordKind::CheckpointEnd(CheckpointData {
            begin_lsn: 39,
            active: vec![ActiveTxn { txn_id: 3, first_lsn: 17 }],
            dirty: vec![b"a".to_vec(), b"b".to_vec()],
            next_txn_id: 5,
        }),
    );

    let decoded = LogRecord::deserialize(&record.serialize().unwrap()).unwrap();
    assert_eq!(decoded, record);
}

#[test]
fn test_frame_header_layout() {
    let record = update_record(0x0102_0304_0506_0708);
    let bytes = record.serialize().unwrap();

    assert_eq!(bytes.len(), record.serialized_size().unwrap());
    assert_eq!(&bytes[0..8], &0x0102_0304_0506_0708u64.to_le_bytes());
    assert_eq!(&bytes[8..12], &record.compute_crc().unwrap().to_le_bytes());

    let len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;
    assert_eq!(len, bytes.len() - HEADER_SIZE);
}

#[test]
fn test_absent_images_are_preserved() {
    let record = LogRecord::new(
        3,
        1,
        RecordKind::Update {
            key: b"k".to_vec(),
            before: None,
            after: Some(Vec::new()),
        },
    );

    let decoded = LogRecord::deserialize(&record.serialize().unwrap()).unwrap();
    match decoded.kind {
        RecordKind::Update { before, after, .. } => {
            assert_eq!(before, None);
            assert_eq!(after, Some(Vec::new()));
        }
        other => panic!("unexpected kind {:?}", other),
    }
}

// =============================================================================
// CRC Corruption Detection Tests
// =============================================================================

#[test]
fn test_payload_corruption_detected() {
    let mut bytes = update_record(1).serialize().unwrap();
    if let Some(byte) = bytes.last_mut() {
        *byte ^= 0xFF;
    }

    let result = LogRecord::deserialize(&bytes);
    assert!(matches!(result, Err(KeystoneError::CorruptLog(_))));
}

#[test]
fn test_lsn_corruption_detected() {
    let mut bytes = update_record(1).serialize().unwrap();
    bytes[0] ^= 0x01;

    assert!(matches!(
        LogRecord::deserialize(&bytes),
        Err(KeystoneError::CorruptLog(_))
    ));
}

// =============================================================================
// Truncation Tests
// =============================================================================

#[test]
fn test_truncated_header_rejected() {
    let bytes = update_record(1).serialize().unwrap();

    let result = LogRecord::deserialize(&bytes[..HEADER_SIZE - 1]);
    assert!(matches!(result, Err(KeystoneError::CorruptLog(_))));
}

#[test]
fn test_truncated_payload_rejected() {
    let bytes = update_record(1).serialize().unwrap();

    let result = LogRecord::deserialize(&bytes[..bytes.len() - 2]);
    assert!(matches!(result, Err(KeystoneError::CorruptLog(_))));
}

#[test]
fn test_record_kind_names() {
    assert_eq!(RecordKind::Begin.name(), "BEGIN");
    assert_eq!(update_record(1).kind.name(), "UPDATE");
    assert_eq!(RecordKind::CheckpointBegin.name(), "CHECKPOINT_BEGIN");
    assert!(RecordKind::Commit.is_terminal());
    assert!(RecordKind::Abort.is_terminal());
    assert!(!RecordKind::Begin.is_terminal());
}
