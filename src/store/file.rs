//! File-backed item store
//!
//! Live values are kept in memory; `flush` writes a full snapshot and
//! atomically replaces the previous one.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "KSTN" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [KeyLen: u32][ValLen: u32][Key][Value]                │
//! │   ... repeated for each item, in key order ...          │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (4 bytes)                                        │
//! │   CRC32 of header + data block                          │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;

use crate::error::{KeystoneError, Result};
use crate::fsutil;
use super::{ItemKey, ItemStore, ItemTable};

/// Magic bytes identifying a Keystone item snapshot
const MAGIC: &[u8; 4] = b"KSTN";

/// Current snapshot format version
const VERSION: u16 = 1;

/// Magic (4) + Version (2) + Count (8)
const HEADER_SIZE: usize = 14;

/// CRC32
const FOOTER_SIZE: usize = 4;

/// Item store persisted as a single snapshot file
pub struct FileStore {
    path: PathBuf,
    live: ItemTable,
    /// Serializes concurrent flushes
    flush_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`, loading the last snapshot if there is one
    pub fn open(path: &Path) -> Result<Self> {
        let map = if path.exists() {
            decode_snapshot(&fs::read(path)?)?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), items = map.len(), "item store opened");

        Ok(Self {
            path: path.to_path_buf(),
            live: ItemTable::from_map(map),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the live contents in key order
    pub fn snapshot(&self) -> BTreeMap<ItemKey, Vec<u8>> {
        self.live.snapshot()
    }
}

impl ItemStore for FileStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.live.get(key))
    }

    fn put(&self, key: &[u8], value: Option<Vec<u8>>) -> Result<()> {
        self.live.set(key, value);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock();
        let bytes = encode_snapshot(&self.live.snapshot());
        fsutil::persist_bytes(&self.path, &bytes)
    }

    fn len(&self) -> usize {
        self.live.len()
    }
}

fn encode_snapshot(map: &BTreeMap<ItemKey, Vec<u8>>) -> Vec<u8> {
    let data_len: usize = map.iter().map(|(k, v)| 8 + k.len() + v.len()).sum();
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + data_len + FOOTER_SIZE);

    buf.put_slice(MAGIC);
    buf.put_u16_le(VERSION);
    buf.put_u64_le(map.len() as u64);

    for (key, value) in map {
        buf.put_u32_le(key.len() as u32);
        buf.put_u32_le(value.len() as u32);
        buf.put_slice(key);
        buf.put_slice(value);
    }

    let crc = crc32fast::hash(&buf);
    buf.put_u32_le(crc);
    buf.to_vec()
}

fn decode_snapshot(bytes: &[u8]) -> Result<BTreeMap<ItemKey, Vec<u8>>> {
    if bytes.len() < HEADER_SIZE + FOOTER_SIZE {
        return Err(KeystoneError::Storage(format!(
            "Item snapshot too short: {} bytes",
            bytes.len()
        )));
    }

    let (body, mut footer) = bytes.split_at(bytes.len() - FOOTER_SIZE);
    let stored_crc = footer.get_u32_le();
    if crc32fast::hash(body) != stored_crc {
        return Err(KeystoneError::Storage("Item snapshot checksum mismatch".to_string()));
    }

    if &body[0..4] != MAGIC {
        return Err(KeystoneError::Storage(format!(
            "Invalid item snapshot magic: expected KSTN, got {:?}",
            &body[0..4]
        )));
    }

    let mut cursor = &body[4..];
    let version = cursor.get_u16_le();
    if version != VERSION {
        return Err(KeystoneError::Storage(format!(
            "Unsupported item snapshot version: {}",
            version
        )));
    }

    let count = cursor.get_u64_le();
    let mut map = BTreeMap::new();
    for _ in 0..count {
        if cursor.remaining() < 8 {
            return Err(KeystoneError::Storage("Truncated item entry header".to_string()));
        }
        let key_len = cursor.get_u32_le() as usize;
        let val_len = cursor.get_u32_le() as usize;
        if cursor.remaining() < key_len + val_len {
            return Err(KeystoneError::Storage("Truncated item entry".to_string()));
        }
        let key = cursor[..key_len].to_vec();
        cursor.advance(key_len);
        let value = cursor[..val_len].to_vec();
        cursor.advance(val_len);
        map.insert(key, value);
    }

    if cursor.has_remaining() {
        return Err(KeystoneError::Storage(format!(
            "{} unexpected bytes after {} items",
            cursor.remaining(),
            count
        )));
    }

    Ok(map)
}
