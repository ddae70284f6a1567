//! Memtable - sorted in-memory write absorption buffer.
//!
//! The memtable holds recent writes and tombstones in key order and serves
//! them to reads before the tree is consulted. When it reaches capacity the
//! engine drains it into the tree ("flush").
//!
//! ## Design
//!
//! - Based on crossbeam-skiplist for lock-free concurrent reads
//! - A delete is recorded as an explicit tombstone entry, not a removal;
//!   tombstones are applied to the tree at flush time
//! - Each key appears at most once (last write wins)
//!
//! ## Thread Safety
//!
//! Safe for multiple concurrent readers with a single writer. Readers never
//! observe a partially updated entry. The entry-count bound is maintained by
//! the engine, which serializes writers and flushes as soon as the table is
//! full.

use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A single memtable cell: a key bound to a live value or a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The key.
    pub key: String,
    /// The value, or `None` for a tombstone (pending delete).
    pub value: Option<Vec<u8>>,
}

/// Sorted in-memory buffer of recent writes and tombstones.
///
/// # Example
///
/// ```rust
/// use shardkv::memtable::Memtable;
///
/// let memtable = Memtable::new(1000);
/// memtable.put("key1".to_string(), b"value1".to_vec());
/// assert_eq!(memtable.get("key1"), Some(Some(b"value1".to_vec())));
///
/// memtable.delete("key1".to_string());
/// assert_eq!(memtable.get("key1"), Some(None)); // tombstone
/// ```
pub struct Memtable {
    /// The underlying skiplist; `None` values are tombstones
    data: SkipMap<String, Option<Vec<u8>>>,

    /// Number of entries, tracked separately so `is_full` is O(1)
    len: AtomicUsize,

    /// Entry count at which the table reports full
    capacity: usize,
}

impl Memtable {
    /// Creates a new empty memtable holding up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self { data: SkipMap::new(), len: AtomicUsize::new(0), capacity }
    }

    /// Inserts or overwrites the value for a key at its sorted position.
    pub fn put(&self, key: String, value: Vec<u8>) {
        self.insert_entry(key, Some(value));
    }

    /// Records a tombstone for a key at its sorted position.
    ///
    /// The tombstone shadows any older value for the key, both here and in
    /// the tree, until the next flush applies it as a tree delete.
    pub fn delete(&self, key: String) {
        self.insert_entry(key, None);
    }

    fn insert_entry(&self, key: String, value: Option<Vec<u8>>) {
        let existed = self.data.contains_key(&key);
        self.data.insert(key, value);
        if !existed {
            self.len.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Looks up a key.
    ///
    /// # Returns
    ///
    /// - `None` - the key is not in the memtable (the tree may still have it)
    /// - `Some(None)` - the key was recently deleted (tombstone)
    /// - `Some(Some(value))` - the key has a live value
    pub fn get(&self, key: &str) -> Option<Option<Vec<u8>>> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Returns a snapshot copy of all entries in sorted key order.
    pub fn entries(&self) -> Vec<Entry> {
        self.data
            .iter()
            .map(|entry| Entry { key: entry.key().clone(), value: entry.value().clone() })
            .collect()
    }

    /// Returns the number of entries, tombstones included.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if the memtable contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` once the entry count has reached capacity.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Removes all entries.
    pub fn clear(&self) {
        while self.data.pop_front().is_some() {}
        self.len.store(0, Ordering::Relaxed);
    }
}
