//! Tests for recovery after simulated crashes
//!
//! These tests verify:
//! - Committed transactions survive a crash
//! - Uncommitted transactions are rolled back
//! - Aborted transactions stay rolled back
//! - Recovery is idempotent
//! - Checkpoints bound the scan and are honoured

use keystone::store::{ItemStore, MemoryStore};

use crate::{start, temp_dir};

#[test]
fn test_recover_empty_directory() {
    let dir = temp_dir();
    let node = start(dir.path(), MemoryStore::new());

    assert_eq!(node.report.records_scanned, 0);
    assert!(node.report.losers.is_empty());
    assert_eq!(node.report.next_txn_id, 1);
    assert_eq!(node.report.checkpoint, None);
}

#[test]
fn test_committed_transaction_survives_crash() {
    let dir = temp_dir();
    let node = start(dir.path(), MemoryStore::new());

    let t = node.txns.begin().unwrap();
    node.txns.write(t, b"A", b"1000").unwrap();
    node.txns.write(t, b"B", b"500").unwrap();
    node.txns.commit(t).unwrap();

    let store = node.crash();
    assert_eq!(store.snapshot().len(), 0);

    let node = start(dir.path(), store);
    assert_eq!(node.get(b"A"), Some(b"1000".to_vec()));
    assert_eq!(node.get(b"B"), Some(b"500".to_vec()));
    assert_eq!(node.report.committed, 1);
    assert!(node.report.losers.is_empty());
    assert_eq!(node.report.next_txn_id, t + 1);
}

#[test]
fn test_unflushed_transaction_vanishes() {
    let dir = temp_dir();
    let node = start(dir.path(), MemoryStore::new());

    let t = node.txns.begin().unwrap();
    node.txns.write(t, b"A", b"1").unwrap();
    // Never flushed: nothing reached the log file

    let node = start(dir.path(), node.crash());
    assert_eq!(node.get(b"A"), None);
    assert_eq!(node.report.records_scanned, 0);
}

#[test]
fn test_uncommitted_update_is_undone() {
    // T1: A 1000 -> 800 commits; T2: A 800 -> 1100 is durable but never commits
    let dir = temp_dir();
    let node = start(dir.path(), MemoryStore::new());
    let setup = node.txns.begin().unwrap();
    node.txns.write(setup, b"A", b"1000").unwrap();
    node.txns.commit(setup).unwrap();

    let t1 = node.txns.begin().unwrap();
    node.txns.write(t1, b"A", b"800").unwrap();
    node.txns.commit(t1).unwrap();

    let t2 = node.txns.begin().unwrap();
    node.txns.write(t2, b"A", b"1100").unwrap();
    node.log.flush_all().unwrap();
    // Simulate the store having written the uncommitted value out
    node.store.flush().unwrap();

    let node = start(dir.path(), node.crash());

    assert_eq!(node.get(b"A"), Some(b"800".to_vec()));
    assert!(node.report.losers.contains(&t2));
    assert_eq!(node.report.updates_undone, 1);
}

#[test]
fn test_aborted_transaction_stays_aborted() {
    let dir = temp_dir();
    let node = start(dir.path(), MemoryStore::new());

    let setup = node.txns.begin().unwrap();
    node.txns.write(setup, b"A", b"1").unwrap();
    node.txns.commit(setup).unwrap();

    let t = node.txns.begin().unwrap();
    node.txns.write(t, b"A", b"2").unwrap();
    node.txns.abort(t).unwrap();

    let other = node.txns.begin().unwrap();
    node.txns.commit(other).unwrap();

    let node = start(dir.path(), node.crash());

    // Redo replays the update and its compensation
    assert_eq!(node.get(b"A"), Some(b"1".to_vec()));
    assert!(node.report.losers.is_empty());
    assert_eq!(node.report.records_redone, 3);
}

#[test]
fn test_recovery_is_idempotent() {
    let dir = temp_dir();
    let node = start(dir.path(), MemoryStore::new());

    let committed = node.txns.begin().unwrap();
    node.txns.write(committed, b"A", b"kept").unwrap();
    node.txns.commit(committed).unwrap();

    let loser = node.txns.begin().unwrap();
    node.txns.write(loser, b"A", b"lost").unwrap();
    node.txns.write(loser, b"B", b"lost").unwrap();
    node.log.flush_all().unwrap();

    let first = start(dir.path(), node.crash());
    assert_eq!(first.report.losers, vec![loser]);
    assert_eq!(first.report.updates_undone, 2);
    let after_first = first.store.snapshot();
    let next_lsn = first.log.next_lsn();

    let second = start(dir.path(), first.crash());
    assert!(second.report.losers.is_empty());
    assert_eq!(second.report.updates_undone, 0);
    assert_eq!(second.store.snapshot(), after_first);
    assert_eq!(second.log.next_lsn(), next_lsn);
    assert_eq!(second.get(b"A"), Some(b"kept".to_vec()));
    assert_eq!(second.get(b"B"), None);
}

#[test]
fn test_recovery_starts_at_checkpoint() {
    let dir = temp_dir();
    let node = start(dir.path(), MemoryStore::new());

    for i in 0..5 {
        let t = node.txns.begin().unwrap();
        node.txns.write(t, format!("k{}", i).as_bytes(), b"v").unwrap();
        node.txns.commit(t).unwrap();
    }
    let stats = node.txns.checkpoint().unwrap();

    let t = node.txns.begin().unwrap();
    node.txns.write(t, b"late", b"v").unwrap();
    node.txns.commit(t).unwrap();

    let node = start(dir.path(), node.crash());

    assert_eq!(node.report.start_lsn, stats.begin_lsn);
    assert_eq!(node.report.checkpoint.map(|c| c.end_lsn), Some(stats.end_lsn));
    // Checkpoint pair + the late transaction
    assert_eq!(node.report.records_scanned, 5);
    assert_eq!(node.report.records_redone, 1);
    assert_eq!(node.store.snapshot().len(), 6);
}

#[test]
fn test_transaction_active_across_checkpoint_is_undone() {
    let dir = temp_dir();
    let node = start(dir.path(), MemoryStore::new());

    let setup = node.txns.begin().unwrap();
    node.txns.write(setup, b"A", b"old").unwrap();
    node.txns.commit(setup).unwrap();

    let loser = node.txns.begin().unwrap();
    node.txns.write(loser, b"A", b"before-checkpoint").unwrap();

    // The checkpoint flushes the uncommitted value to the store
    node.txns.checkpoint().unwrap();

    node.txns.write(loser, b"B", b"after-checkpoint").unwrap();
    node.log.flush_all().unwrap();

    let store = node.crash();
    assert_eq!(store.snapshot().get(&b"A".to_vec()), Some(&b"before-checkpoint".to_vec()));

    let node = start(dir.path(), store);
    assert_eq!(node.report.losers, vec![loser]);
    assert_eq!(node.report.updates_undone, 2);
    assert_eq!(node.get(b"A"), Some(b"old".to_vec()));
    assert_eq!(node.get(b"B"), None);
}

#[test]
fn test_transaction_ids_continue_after_recovery() {
    let dir = temp_dir();
    let node = start(dir.path(), MemoryStore::new());
    let mut last = 0;
    for _ in 0..3 {
        last = node.txns.begin().unwrap();
        node.txns.commit(last).unwrap();
    }

    let node = start(dir.path(), node.crash());
    assert!(node.txns.begin().unwrap() > last);
}
