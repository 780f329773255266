//! Tests for recovery over hand-built logs
//!
//! These tests verify:
//! - Updates compensated before a crash are not undone twice
//! - A torn commit record does not count as a commit
//! - A bad checkpoint master file is fatal

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use keystone::recovery::{CheckpointMaster, RecoveryManager};
use keystone::store::{ItemStore, MemoryStore};
use keystone::wal::{LogManager, LogOptions, LogRecord, RecordKind};
use keystone::KeystoneError;

use crate::{master_path, start, temp_dir, wal_path};

fn update(key: &str, after: &str) -> RecordKind {
    RecordKind::Update {
        key: key.as_bytes().to_vec(),
        before: None,
        after: Some(after.as_bytes().to_vec()),
    }
}

/// Append `kinds` for transaction 1 and force them
fn write_log(dir: &Path, kinds: Vec<RecordKind>) {
    let (log, _) = LogManager::open(&wal_path(dir), LogOptions::default()).unwrap();
    for kind in kinds {
        log.append(1, kind).unwrap();
    }
    log.flush_all().unwrap();
}

fn recover_into_memory(dir: &Path) -> keystone::Result<keystone::RecoveryReport> {
    let (log, _) = LogManager::open(&wal_path(dir), LogOptions::default())?;
    let store: Arc<dyn ItemStore> = Arc::new(MemoryStore::new());
    RecoveryManager::new(Arc::new(log), store, &master_path(dir)).recover()
}

#[test]
fn test_crash_during_rollback_resumes_undo() {
    let dir = temp_dir();
    write_log(
        dir.path(),
        vec![
            RecordKind::Begin,
            update("A", "1"),
            update("B", "2"),
            RecordKind::Compensation {
                key: b"B".to_vec(),
                restored: None,
                undoes: 3,
            },
        ],
    );

    let node = start(dir.path(), MemoryStore::new());

    assert_eq!(node.report.losers, vec![1]);
    assert_eq!(node.report.updates_undone, 1);
    assert_eq!(node.get(b"A"), None);
    assert_eq!(node.get(b"B"), None);

    let kinds: Vec<&str> = node
        .log
        .read_from(5)
        .unwrap()
        .map(|r| r.unwrap().kind.name())
        .collect();
    assert_eq!(kinds, vec!["CLR", "ABORT"]);
}

#[test]
fn test_torn_commit_is_not_a_commit() {
    let dir = temp_dir();
    write_log(dir.path(), vec![RecordKind::Begin, update("A", "1")]);

    let commit = LogRecord::new(3, 1, RecordKind::Commit).serialize().unwrap();
    let mut file = OpenOptions::new().append(true).open(wal_path(dir.path())).unwrap();
    file.write_all(&commit[..commit.len() - 1]).unwrap();
    drop(file);

    let node = start(dir.path(), MemoryStore::new());

    assert_eq!(node.report.committed, 0);
    assert_eq!(node.report.losers, vec![1]);
    assert_eq!(node.get(b"A"), None);
}

#[test]
fn test_master_past_end_of_log_is_fatal() {
    let dir = temp_dir();
    write_log(dir.path(), vec![RecordKind::Begin]);
    CheckpointMaster {
        begin_lsn: 50,
        end_lsn: 51,
        next_txn_id: 2,
    }
    .write(&master_path(dir.path()))
    .unwrap();

    assert!(matches!(
        recover_into_memory(dir.path()),
        Err(KeystoneError::CorruptLog(_))
    ));
}

#[test]
fn test_master_without_checkpoint_record_is_fatal() {
    let dir = temp_dir();
    write_log(dir.path(), vec![RecordKind::Begin, RecordKind::Commit]);
    CheckpointMaster {
        begin_lsn: 1,
        end_lsn: 2,
        next_txn_id: 2,
    }
    .write(&master_path(dir.path()))
    .unwrap();

    assert!(matches!(
        recover_into_memory(dir.path()),
        Err(KeystoneError::CorruptLog(_))
    ));
}

#[test]
fn test_damaged_master_is_fatal() {
    let dir = temp_dir();
    write_log(dir.path(), vec![RecordKind::Begin]);
    CheckpointMaster {
        begin_lsn: 1,
        end_lsn: 1,
        next_txn_id: 2,
    }
    .write(&master_path(dir.path()))
    .unwrap();

    let mut bytes = fs::read(master_path(dir.path())).unwrap();
    bytes[8] ^= 0xFF;
    fs::write(master_path(dir.path()), &bytes).unwrap();

    assert!(matches!(
        recover_into_memory(dir.path()),
        Err(KeystoneError::CorruptLog(_))
    ));
}

#[test]
fn test_master_round_trip() {
    let dir = temp_dir();
    let path = master_path(dir.path());
    assert_eq!(CheckpointMaster::read(&path).unwrap(), None);

    let master = CheckpointMaster {
        begin_lsn: 10,
        end_lsn: 11,
        next_txn_id: 4,
    };
    master.write(&path).unwrap();
    assert_eq!(CheckpointMaster::read(&path).unwrap(), Some(master));
}
