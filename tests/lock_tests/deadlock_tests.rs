//! Tests for deadlock detection
//!
//! These tests verify:
//! - The youngest transaction in a cycle is the victim
//! - A victim that is the requester fails immediately
//! - A victim that is already waiting is woken and fails
//! - The survivor proceeds once the victim releases its locks

use std::sync::Arc;
use std::thread;

use keystone::lock::{LockGrant, LockManager, LockMode};
use keystone::KeystoneError;

use crate::eventually;

const A: &[u8] = b"A";
const B: &[u8] = b"B";

#[test]
fn test_requester_is_youngest_victim() {
    let locks = Arc::new(LockManager::new());
    // Start orders: txn 1 is older than txn 2
    locks.acquire(1, 1, A, LockMode::Exclusive, None).unwrap();
    locks.acquire(2, 2, B, LockMode::Exclusive, None).unwrap();

    let older = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || locks.acquire(1, 1, B, LockMode::Exclusive, None))
    };
    eventually(|| locks.waiters(B).len() == 1);

    // Closing the cycle: txn 2 is the youngest and the requester
    let result = locks.acquire(2, 2, A, LockMode::Exclusive, None);
    assert!(matches!(result, Err(KeystoneError::Deadlock { txn_id: 2 })));
    assert!(locks.waiters(A).is_empty());

    // The victim gives up its locks; the survivor completes
    locks.release_all(2);
    assert_eq!(older.join().unwrap().unwrap(), LockGrant::Granted);
    assert_eq!(locks.holders(B), vec![(1, LockMode::Exclusive)]);
    assert_eq!(locks.wait_edges(), 0);
}

#[test]
fn test_waiting_victim_is_woken() {
    let locks = Arc::new(LockManager::new());
    // txn 1 started after txn 2, so it is the younger one
    locks.acquire(1, 20, A, LockMode::Exclusive, None).unwrap();
    locks.acquire(2, 10, B, LockMode::Exclusive, None).unwrap();

    let younger = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || {
            let result = locks.acquire(1, 20, B, LockMode::Exclusive, None);
            if result.is_err() {
                locks.release_all(1);
            }
            result
        })
    };
    eventually(|| locks.waiters(B).len() == 1);

    let older = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || locks.acquire(2, 10, A, LockMode::Exclusive, None))
    };

    let victim_result = younger.join().unwrap();
    assert!(matches!(victim_result, Err(KeystoneError::Deadlock { txn_id: 1 })));

    assert_eq!(older.join().unwrap().unwrap(), LockGrant::Granted);
    assert_eq!(locks.holders(A), vec![(2, LockMode::Exclusive)]);
    assert!(locks.waiters(B).is_empty());
}

#[test]
fn test_upgrade_deadlock_aborts_exactly_one() {
    let locks = Arc::new(LockManager::new());
    locks.acquire(1, 1, A, LockMode::Shared, None).unwrap();
    locks.acquire(2, 2, A, LockMode::Shared, None).unwrap();

    let handles: Vec<_> = [1u64, 2u64]
        .into_iter()
        .map(|txn| {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let result = locks.acquire(txn, txn, A, LockMode::Exclusive, None);
                if result.is_err() {
                    locks.release_all(txn);
                }
                (txn, result)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let failed: Vec<u64> = results
        .iter()
        .filter(|(_, r)| matches!(r, Err(KeystoneError::Deadlock { .. })))
        .map(|(txn, _)| *txn)
        .collect();
    assert_eq!(failed, vec![2]);
    assert_eq!(locks.holders(A), vec![(1, LockMode::Exclusive)]);
}

#[test]
fn test_three_way_cycle() {
    let locks = Arc::new(LockManager::new());
    const C: &[u8] = b"C";
    locks.acquire(1, 1, A, LockMode::Exclusive, None).unwrap();
    locks.acquire(2, 2, B, LockMode::Exclusive, None).unwrap();
    locks.acquire(3, 3, C, LockMode::Exclusive, None).unwrap();

    let first = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || locks.acquire(1, 1, B, LockMode::Exclusive, None))
    };
    eventually(|| locks.waiters(B).len() == 1);

    let second = {
        let locks = Arc::clone(&locks);
        thread::spawn(move || locks.acquire(2, 2, C, LockMode::Exclusive, None))
    };
    eventually(|| locks.waiters(C).len() == 1);

    // txn 3 closes the cycle and is the youngest
    let result = locks.acquire(3, 3, A, LockMode::Exclusive, None);
    assert!(matches!(result, Err(KeystoneError::Deadlock { txn_id: 3 })));

    locks.release_all(3);
    assert_eq!(second.join().unwrap().unwrap(), LockGrant::Granted);
    locks.release_all(2);
    assert_eq!(first.join().unwrap().unwrap(), LockGrant::Granted);
}
