//! Partition router.
//!
//! The router splits the key space across a fixed number of engines by a
//! stable hash of the key and fans operations out to the owning engine.
//! Point operations touch only that engine's lock; whole-store operations
//! (list, clear, stats, close) additionally hold the router-level lock.

use crate::config::Options;
use crate::engine::Engine;
use crate::error::Result;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Aggregated counters across all partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Number of live keys across all partitions.
    pub total_keys: usize,
    /// Number of partitions.
    pub num_partitions: usize,
    /// Entries buffered in memtables across all partitions.
    pub total_memtable_entries: usize,
    /// Combined size of all WAL files in bytes.
    pub total_wal_bytes: u64,
}

/// Fixed-N fan-out over per-partition engines.
///
/// A key always maps to the same partition: the first four bytes of the
/// MD5 digest of the key, read as a big-endian u32, modulo the partition
/// count. The mapping must stay stable across restarts, so the partition
/// count is fixed for the lifetime of a data directory.
///
/// # Example
///
/// ```rust,no_run
/// use shardkv::{Options, Router};
///
/// # fn main() -> Result<(), shardkv::Error> {
/// let store = Router::open("./data", Options::default())?;
///
/// store.put("key1", b"value1")?;
/// assert_eq!(store.get("key1")?, b"value1".to_vec());
///
/// store.delete("key1")?;
/// store.close()?;
/// # Ok(())
/// # }
/// ```
pub struct Router {
    engines: Vec<Engine>,
    guard: RwLock<()>,
}

impl Router {
    /// Opens (or creates) a store at `data_dir` with one engine per
    /// partition, recovering each from its WAL.
    pub fn open<P: AsRef<Path>>(data_dir: P, options: Options) -> Result<Self> {
        options.validate()?;

        let mut engines = Vec::with_capacity(options.num_partitions);
        for id in 0..options.num_partitions {
            engines.push(Engine::open(id, data_dir.as_ref(), &options)?);
        }

        Ok(Self { engines, guard: RwLock::new(()) })
    }

    /// The engine owning `key`.
    fn partition(&self, key: &str) -> &Engine {
        let index = hash_key(key) as usize % self.engines.len();
        &self.engines[index]
    }

    /// Durably writes a key-value pair.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.partition(key).put(key, value)
    }

    /// Looks up a key.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.partition(key).get(key)
    }

    /// Durably deletes a key (blind: succeeds whether or not present).
    pub fn delete(&self, key: &str) -> Result<()> {
        self.partition(key).delete(key)
    }

    /// All live keys across all partitions, in ascending order.
    pub fn list(&self) -> BTreeSet<String> {
        let _guard = self.guard.read();

        let mut keys = BTreeSet::new();
        for engine in &self.engines {
            keys.extend(engine.list());
        }
        keys
    }

    /// Drops all data in every partition.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.guard.write();

        for engine in &self.engines {
            engine.clear()?;
        }
        Ok(())
    }

    /// Aggregated counters across all partitions.
    pub fn stats(&self) -> Stats {
        let _guard = self.guard.read();

        let mut stats = Stats {
            total_keys: 0,
            num_partitions: self.engines.len(),
            total_memtable_entries: 0,
            total_wal_bytes: 0,
        };
        for engine in &self.engines {
            let s = engine.stats();
            stats.total_keys += s.keys;
            stats.total_memtable_entries += s.memtable_entries;
            stats.total_wal_bytes += s.wal_bytes;
        }
        stats
    }

    /// Number of partitions.
    pub fn num_partitions(&self) -> usize {
        self.engines.len()
    }

    /// Stops every engine's flusher and closes every WAL.
    pub fn close(&self) -> Result<()> {
        let _guard = self.guard.write();

        for engine in &self.engines {
            engine.close()?;
        }
        Ok(())
    }
}

/// Stable placement hash: first four bytes of MD5, big-endian.
fn hash_key(key: &str) -> u32 {
    let digest = md5::compute(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_key_deterministic() {
        assert_eq!(hash_key("some key"), hash_key("some key"));
        assert_ne!(hash_key("key-a"), hash_key("key-b"));
    }

    #[test]
    fn test_hash_key_known_values() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(hash_key(""), 0xd41d8cd9);
        // MD5("a") = 0cc175b9c0f1b6a831c399e269772661
        assert_eq!(hash_key("a"), 0x0cc175b9);
    }

    #[test]
    fn test_keys_spread_across_partitions() {
        let n = 16;
        let mut hit = vec![false; n];
        for i in 0..200 {
            hit[hash_key(&format!("key{}", i)) as usize % n] = true;
        }
        // 200 keys over 16 partitions leave no partition empty in any
        // reasonable hash.
        assert!(hit.iter().all(|&h| h));
    }
}
