//! Item Store Module
//!
//! The persistent home of data items. Redo, undo and transactional writes
//! all mutate items through the `ItemStore` trait; how the store keeps
//! them is its own business.
//!
//! ## Durability Contract
//! - `put` changes the live value only
//! - `flush` makes every live value durable in one step
//! - After a crash the store comes back exactly as of its last `flush`
//!
//! The transaction manager only calls `flush` after forcing the log, so the
//! store never holds a change whose log record could be lost.

mod file;
mod memory;
mod table;

use crate::error::Result;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use table::ItemTable;

/// Opaque key identifying a data item
pub type ItemKey = Vec<u8>;

/// Storage for the current value of every data item
pub trait ItemStore: Send + Sync {
    /// Current value of an item (`None` if absent)
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Set (`Some`) or remove (`None`) an item
    fn put(&self, key: &[u8], value: Option<Vec<u8>>) -> Result<()>;

    /// Make all current values durable
    fn flush(&self) -> Result<()>;

    /// Number of items present
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
