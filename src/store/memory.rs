//! In-memory item store
//!
//! Keeps a live table plus the image captured by the last `flush`, so tests
//! can simulate a crash by reopening from the durable image.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::Result;
use super::{ItemKey, ItemStore, ItemTable};

/// Item store that lives entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    live: ItemTable,
    durable: Mutex<BTreeMap<ItemKey, Vec<u8>>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// What a restart would find: a fresh store holding the last flushed image
    pub fn crash(&self) -> MemoryStore {
        let durable = self.durable.lock().clone();
        MemoryStore {
            live: ItemTable::from_map(durable.clone()),
            durable: Mutex::new(durable),
        }
    }

    /// Copy of the live contents in key order
    pub fn snapshot(&self) -> BTreeMap<ItemKey, Vec<u8>> {
        self.live.snapshot()
    }
}

impl ItemStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.live.get(key))
    }

    fn put(&self, key: &[u8], value: Option<Vec<u8>>) -> Result<()> {
        self.live.set(key, value);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        *self.durable.lock() = self.live.snapshot();
        Ok(())
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}
