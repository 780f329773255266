//! Item table
//!
//! BTreeMap-based in-memory table with RwLock for concurrency. Both store
//! implementations keep their live values here.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::ItemKey;

/// In-memory map of item values
///
/// ## Concurrency:
/// - `data`: many concurrent readers, exclusive writer
/// - `size`: approximate key + value bytes, updated under the write lock
pub struct ItemTable {
    data: RwLock<BTreeMap<ItemKey, Vec<u8>>>,
    size: AtomicUsize,
}

impl ItemTable {
    /// Create a new empty table
    pub fn new() -> Self {
        Self::from_map(BTreeMap::new())
    }

    /// Build a table from existing contents
    pub fn from_map(map: BTreeMap<ItemKey, Vec<u8>>) -> Self {
        let size = map.iter().map(|(k, v)| k.len() + v.len()).sum();
        Self {
            data: RwLock::new(map),
            size: AtomicUsize::new(size),
        }
    }

    /// Get a value by key (read lock)
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().get(key).cloned()
    }

    /// Set or remove a value (write lock)
    pub fn set(&self, key: &[u8], value: Option<Vec<u8>>) {
        let mut data = self.data.write();
        let old = match value {
            Some(value) => {
                let added = key.len() + value.len();
                self.size.fetch_add(added, Ordering::Relaxed);
                data.insert(key.to_vec(), value)
            }
            None => data.remove(key),
        };
        if let Some(old) = old {
            self.size.fetch_sub(key.len() + old.len(), Ordering::Relaxed);
        }
    }

    /// Copy of the full contents in key order
    pub fn snapshot(&self) -> BTreeMap<ItemKey, Vec<u8>> {
        self.data.read().clone()
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate bytes held (keys + values)
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }
}

impl Default for ItemTable {
    fn default() -> Self {
        Self::new()
    }
}
