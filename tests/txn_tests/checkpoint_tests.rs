//! Tests for checkpoints
//!
//! These tests verify:
//! - The checkpoint record pair and master file
//! - Active transactions and dirty items are recorded
//! - Log truncation keeps what recovery still needs
//! - The size-based trigger
//! - Finished transactions never appear as active

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use keystone::recovery::CheckpointMaster;
use keystone::wal::{ActiveTxn, RecordKind};

use crate::Harness;

#[test]
fn test_checkpoint_writes_master_and_records() {
    let h = Harness::with_options(|o| o.truncate_log_on_checkpoint = false);
    h.put_committed(b"A", b"1");

    let stats = h.txns.checkpoint().unwrap();

    assert_eq!(stats.begin_lsn, 4);
    assert_eq!(stats.end_lsn, 5);
    assert_eq!(stats.active_txns, 0);
    assert_eq!(stats.dirty_items, 1);
    assert_eq!(stats.records_truncated, 0);

    let master = CheckpointMaster::read(&h.master_path()).unwrap().unwrap();
    assert_eq!(master.begin_lsn, 4);
    assert_eq!(master.end_lsn, 5);
    assert_eq!(master.next_txn_id, 2);

    assert!(h.txns.dirty_items().is_empty());
    assert_eq!(h.txns.log_manager().durable_lsn(), 5);
    assert_eq!(h.txns.log_manager().bytes_since_checkpoint(), 0);
}

#[test]
fn test_checkpoint_records_active_transactions() {
    let h = Harness::with_options(|o| o.truncate_log_on_checkpoint = false);

    let t1 = h.txns.begin().unwrap();
    h.txns.write(t1, b"A", b"1").unwrap();
    let t2 = h.txns.begin().unwrap();

    h.txns.checkpoint().unwrap();

    let end = h
        .records()
        .into_iter()
        .find_map(|r| match r.kind {
            RecordKind::CheckpointEnd(data) => Some(data),
            _ => None,
        })
        .unwrap();

    assert_eq!(
        end.active,
        vec![
            ActiveTxn { txn_id: t1, first_lsn: 1 },
            ActiveTxn { txn_id: t2, first_lsn: 3 },
        ]
    );
    assert_eq!(end.dirty, vec![b"A".to_vec()]);
    assert_eq!(end.next_txn_id, 3);
}

#[test]
fn test_truncation_drops_only_unneeded_records() {
    let h = Harness::new();
    h.put_committed(b"A", b"1");
    h.put_committed(b"B", b"2");

    // LSNs 7.. belong to a transaction still running
    let running = h.txns.begin().unwrap();
    h.txns.write(running, b"C", b"3").unwrap();

    let stats = h.txns.checkpoint().unwrap();
    assert_eq!(stats.records_truncated, 6);

    let records = h.records();
    assert_eq!(records.first().unwrap().lsn, 7);
    assert_eq!(records.first().unwrap().txn_id, running);

    // With nothing running, everything before the checkpoint goes
    h.txns.commit(running).unwrap();
    let stats = h.txns.checkpoint().unwrap();
    assert_eq!(h.records().first().unwrap().lsn, stats.begin_lsn);
}

#[test]
fn test_size_triggered_checkpoint() {
    let h = Harness::with_options(|o| o.checkpoint_log_bytes = Some(256));
    assert!(CheckpointMaster::read(&h.master_path()).unwrap().is_none());

    for i in 0..10 {
        h.put_committed(format!("key{}", i).as_bytes(), &[7u8; 64]);
    }

    assert!(CheckpointMaster::read(&h.master_path()).unwrap().is_some());
    assert!(h.txns.log_manager().bytes_since_checkpoint() < 10 * 64);
}

#[test]
fn test_checkpoint_does_not_list_committed_transactions() {
    let h = Harness::with_options(|o| o.truncate_log_on_checkpoint = false);
    let t = h.txns.begin().unwrap();
    h.txns.write(t, b"A", b"1").unwrap();
    h.txns.commit(t).unwrap();

    let stats = h.txns.checkpoint().unwrap();
    assert_eq!(stats.active_txns, 0);
}

#[test]
fn test_checkpoint_never_lists_aborted_transactions() {
    let h = Harness::with_options(|o| o.truncate_log_on_checkpoint = false);
    let done = Arc::new(AtomicBool::new(false));

    let checkpointer = {
        let txns = h.txns.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                txns.checkpoint().unwrap();
            }
        })
    };

    for i in 0..200u32 {
        let t = h.txns.begin().unwrap();
        h.txns.write(t, format!("key{}", i % 8).as_bytes(), b"v").unwrap();
        h.txns.abort(t).unwrap();
    }
    done.store(true, Ordering::Release);
    checkpointer.join().unwrap();

    let records = h.records();
    let mut finished_at: HashMap<u64, u64> = HashMap::new();
    for record in &records {
        if matches!(record.kind, RecordKind::Abort | RecordKind::Commit) {
            finished_at.insert(record.txn_id, record.lsn);
        }
    }
    for record in &records {
        if let RecordKind::CheckpointEnd(data) = &record.kind {
            for active in &data.active {
                if let Some(&end) = finished_at.get(&active.txn_id) {
                    assert!(
                        end > data.begin_lsn,
                        "txn {} ended at {} before checkpoint {}",
                        active.txn_id,
                        end,
                        data.begin_lsn
                    );
                }
            }
        }
    }
}
