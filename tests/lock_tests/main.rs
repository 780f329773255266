//! Lock manager tests

mod deadlock_tests;

use std::thread;
use std::time::{Duration, Instant};

/// Poll `cond` until it holds, failing the test after a few seconds
pub fn eventually<F: FnMut() -> bool>(mut cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(2));
    }
}
