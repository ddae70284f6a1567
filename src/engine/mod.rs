//! Per-partition storage engine.
//!
//! The engine composes the WAL, memtable, tree, and filter into a
//! linearizable single-writer key-value surface with crash recovery and
//! background flushing.
//!
//! ## Write path
//!
//! Put/Delete append to the WAL and fsync first; only then is the
//! memtable touched, so every acknowledged write survives a crash. A full
//! memtable is flushed into the tree synchronously, still under the write
//! lock.
//!
//! ## Read path
//!
//! Get consults the memtable first (a tombstone there means "deleted",
//! not "unknown"), then falls through to the filter-gated tree.
//!
//! ## Recovery
//!
//! On open the WAL is replayed straight into the tree with the filter
//! gate bypassed; a delete of an absent key during replay is a normal
//! artifact and is ignored.

use crate::config::{FlushErrorPolicy, Options};
use crate::error::{Error, Result};
use crate::memtable::{Entry, Memtable};
use crate::tree::Tree;
use crate::wal::Wal;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

/// Point-in-time counters for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of live keys (tree and memtable combined, tombstones
    /// subtracted).
    pub keys: usize,
    /// Entries currently absorbed in the memtable, tombstones included.
    pub memtable_entries: usize,
    /// Size of the WAL file in bytes.
    pub wal_bytes: u64,
}

/// Mutable state guarded by the engine lock.
struct State {
    wal: Wal,
    memtable: Memtable,
    tree: Tree,
}

struct Shared {
    id: usize,
    options: Options,
    state: RwLock<State>,
}

/// One partition's storage engine.
///
/// All mutators (`put`, `delete`, `clear`, flushes) take the writer side
/// of the engine lock; `get`, `list`, and `stats` take the reader side.
pub struct Engine {
    shared: Arc<Shared>,
    stop_tx: Sender<()>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Opens the engine for partition `id` under `data_dir`, creating
    /// `<data_dir>/partition_<id>/wal.log` as needed, replaying any
    /// existing log, and starting the background flusher.
    pub fn open<P: AsRef<Path>>(id: usize, data_dir: P, options: &Options) -> Result<Self> {
        let dir = data_dir.as_ref().join(format!("partition_{}", id));
        let wal = Wal::open(&dir)?;

        let mut tree = Tree::new(options.max_keys, options.filter_keys, options.filter_fp_rate);
        replay_into(&wal, &mut tree, id)?;

        let shared = Arc::new(Shared {
            id,
            options: options.clone(),
            state: RwLock::new(State {
                wal,
                memtable: Memtable::new(options.memtable_capacity),
                tree,
            }),
        });

        let (stop_tx, stop_rx) = crossbeam_channel::unbounded();
        let ticker = crossbeam_channel::tick(options.flush_interval);
        let flusher_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(format!("shardkv-flush-{}", id))
            .spawn(move || run_flusher(flusher_shared, ticker, stop_rx))?;

        Ok(Self { shared, stop_tx, flusher: Mutex::new(Some(handle)) })
    }

    /// Durably writes a key-value pair.
    pub fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut state = self.shared.state.write();

        // WAL first; a failed append must leave memory untouched.
        state.wal.log_insert(key, value)?;
        state.memtable.put(key.to_string(), value.to_vec());

        if state.memtable.is_full() {
            flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Durably deletes a key.
    ///
    /// Deletes are blind: removing an absent key succeeds, and the WAL
    /// still records it so replay is faithful.
    pub fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.shared.state.write();

        state.wal.log_delete(key)?;
        state.memtable.delete(key.to_string());

        if state.memtable.is_full() {
            flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Looks up a key.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let state = self.shared.state.read();

        match state.memtable.get(key) {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(Error::NotFound),
            None => state.tree.find(key),
        }
    }

    /// All live keys in this partition, in ascending order.
    pub fn list(&self) -> BTreeSet<String> {
        let state = self.shared.state.read();
        list_locked(&state)
    }

    /// Drops all data: truncates the WAL and empties both in-memory
    /// layers. The filter is clean by construction of the new tree.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.shared.state.write();

        state.wal.clear()?;
        state.tree = Tree::new(
            self.shared.options.max_keys,
            self.shared.options.filter_keys,
            self.shared.options.filter_fp_rate,
        );
        state.memtable.clear();
        Ok(())
    }

    /// Drains the memtable into the tree.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.shared.state.write();
        flush_locked(&mut state)
    }

    /// Counters for this partition.
    pub fn stats(&self) -> EngineStats {
        let state = self.shared.state.read();
        EngineStats {
            keys: list_locked(&state).len(),
            memtable_entries: state.memtable.len(),
            wal_bytes: state.wal.size(),
        }
    }

    /// Stops the background flusher and closes the WAL.
    ///
    /// No final flush happens here: the WAL already holds everything the
    /// memtable does, and replay restores it on the next open.
    pub fn close(&self) -> Result<()> {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }

        let state = self.shared.state.read();
        state.wal.close()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        // Best effort: wake the flusher so the thread exits promptly.
        let _ = self.stop_tx.send(());
    }
}

/// Replays the WAL into a fresh tree with the filter gate bypassed.
fn replay_into(wal: &Wal, tree: &mut Tree, id: usize) -> Result<()> {
    tree.set_skip_filter(true);

    let tree_cell = RefCell::new(tree);
    let replayed = Cell::new(0usize);
    let result = wal.replay(
        |key, value| {
            replayed.set(replayed.get() + 1);
            tree_cell.borrow_mut().insert(key, value)
        },
        |key| {
            replayed.set(replayed.get() + 1);
            match tree_cell.borrow_mut().delete(&key) {
                // A delete that outlived its key is a replay artifact.
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            }
        },
    );

    tree_cell.into_inner().set_skip_filter(false);
    result?;

    if replayed.get() > 0 {
        log::info!("partition {}: replayed {} WAL records", id, replayed.get());
    }
    Ok(())
}

/// Applies the memtable snapshot to the tree and empties the table.
/// Caller must hold the write lock.
fn flush_locked(state: &mut State) -> Result<()> {
    let entries = state.memtable.entries();

    state.tree.set_skip_filter(true);
    let result = apply_entries(&mut state.tree, entries);
    state.tree.set_skip_filter(false);
    result?;

    state.memtable.clear();
    Ok(())
}

fn apply_entries(tree: &mut Tree, entries: Vec<Entry>) -> Result<()> {
    for entry in entries {
        match entry.value {
            Some(value) => tree.insert(entry.key, value)?,
            None => match tree.delete(&entry.key) {
                // Tombstone for a key the tree never saw.
                Err(e) if e.is_not_found() => {}
                other => other?,
            },
        }
    }
    Ok(())
}

/// Live keys: the tree's keys with the memtable snapshot applied on top.
fn list_locked(state: &State) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = state.tree.list().into_iter().collect();
    for entry in state.memtable.entries() {
        match entry.value {
            Some(_) => {
                keys.insert(entry.key);
            }
            None => {
                keys.remove(&entry.key);
            }
        }
    }
    keys
}

fn run_flusher(shared: Arc<Shared>, ticker: Receiver<Instant>, stop_rx: Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(ticker) -> _ => {
                let mut state = shared.state.write();
                if state.memtable.is_empty() {
                    continue;
                }
                if let Err(e) = flush_locked(&mut state) {
                    match shared.options.flush_error_policy {
                        FlushErrorPolicy::Abort => {
                            log::error!(
                                "partition {}: background flush failed: {}",
                                shared.id, e
                            );
                            std::process::abort();
                        }
                        FlushErrorPolicy::Stop => {
                            log::error!(
                                "partition {}: background flush failed, stopping flusher: {}",
                                shared.id, e
                            );
                            return;
                        }
                    }
                }
            }
            recv(stop_rx) -> _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_options() -> Options {
        // Long flush interval keeps the background flusher quiet unless a
        // test waits for it on purpose.
        Options::default().num_partitions(1).flush_interval(Duration::from_secs(3600))
    }

    fn open_engine(dir: &TempDir, options: &Options) -> Engine {
        Engine::open(0, dir.path(), options).unwrap()
    }

    #[test]
    fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir, &test_options());

        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();

        assert_eq!(engine.get("a").unwrap(), b"1".to_vec());
        assert_eq!(engine.get("b").unwrap(), b"2".to_vec());
        assert!(engine.get("c").unwrap_err().is_not_found());

        engine.delete("a").unwrap();
        assert!(engine.get("a").unwrap_err().is_not_found());

        engine.close().unwrap();
    }

    #[test]
    fn test_overwrite() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir, &test_options());

        engine.put("k", b"v1").unwrap();
        engine.put("k", b"v2").unwrap();

        assert_eq!(engine.get("k").unwrap(), b"v2".to_vec());
        assert_eq!(engine.list().into_iter().collect::<Vec<_>>(), vec!["k".to_string()]);

        engine.close().unwrap();
    }

    #[test]
    fn test_blind_delete_succeeds() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir, &test_options());

        engine.delete("never-existed").unwrap();
        assert!(engine.get("never-existed").unwrap_err().is_not_found());

        engine.close().unwrap();
    }

    #[test]
    fn test_delete_shadows_flushed_value() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir, &test_options());

        engine.put("k", b"v").unwrap();
        engine.flush().unwrap();

        // The value now lives only in the tree; the tombstone must still
        // shadow it before the next flush.
        engine.delete("k").unwrap();
        assert!(engine.get("k").unwrap_err().is_not_found());
        assert!(engine.list().is_empty());

        // And after the tombstone is applied to the tree.
        engine.flush().unwrap();
        assert!(engine.get("k").unwrap_err().is_not_found());

        engine.close().unwrap();
    }

    #[test]
    fn test_flush_on_full_memtable() {
        let dir = TempDir::new().unwrap();
        let options = test_options().memtable_capacity(10);
        let engine = open_engine(&dir, &options);

        for i in 0..25 {
            engine.put(&format!("key{:02}", i), &[i]).unwrap();
        }

        // At least two synchronous flushes happened; everything is
        // readable regardless of which layer holds it.
        assert!(engine.stats().memtable_entries < 10);
        for i in 0..25 {
            assert_eq!(engine.get(&format!("key{:02}", i)).unwrap(), vec![i]);
        }

        engine.close().unwrap();
    }

    #[test]
    fn test_list_merges_layers() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir, &test_options());

        engine.put("flushed", b"1").unwrap();
        engine.flush().unwrap();
        engine.put("buffered", b"2").unwrap();
        engine.delete("flushed").unwrap();

        let keys: Vec<String> = engine.list().into_iter().collect();
        assert_eq!(keys, vec!["buffered".to_string()]);

        engine.close().unwrap();
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir, &test_options());

        engine.put("a", b"1").unwrap();
        engine.flush().unwrap();
        engine.put("b", b"2").unwrap();

        engine.clear().unwrap();
        assert!(engine.get("a").unwrap_err().is_not_found());
        assert!(engine.get("b").unwrap_err().is_not_found());
        assert!(engine.list().is_empty());
        assert_eq!(engine.stats().wal_bytes, 0);

        // Clear twice equals clear once; the engine stays writable.
        engine.clear().unwrap();
        engine.put("c", b"3").unwrap();
        assert_eq!(engine.get("c").unwrap(), b"3".to_vec());

        engine.close().unwrap();
    }

    #[test]
    fn test_recovery_after_close() {
        let dir = TempDir::new().unwrap();
        let options = test_options();

        {
            let engine = open_engine(&dir, &options);
            engine.put("a", b"1").unwrap();
            engine.put("b", b"2").unwrap();
            engine.delete("a").unwrap();
            engine.close().unwrap();
        }

        let engine = open_engine(&dir, &options);
        assert!(engine.get("a").unwrap_err().is_not_found());
        assert_eq!(engine.get("b").unwrap(), b"2".to_vec());

        engine.close().unwrap();
    }

    #[test]
    fn test_recovery_preserves_overwrites() {
        let dir = TempDir::new().unwrap();
        let options = test_options();

        {
            let engine = open_engine(&dir, &options);
            engine.put("k", b"old").unwrap();
            engine.put("k", b"new").unwrap();
            engine.close().unwrap();
        }

        let engine = open_engine(&dir, &options);
        assert_eq!(engine.get("k").unwrap(), b"new".to_vec());
        engine.close().unwrap();
    }

    #[test]
    fn test_background_flusher_drains_memtable() {
        let dir = TempDir::new().unwrap();
        let options = test_options().flush_interval(Duration::from_millis(50));
        let engine = open_engine(&dir, &options);

        engine.put("k", b"v").unwrap();
        assert_eq!(engine.stats().memtable_entries, 1);

        // Wait for at least one tick.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while engine.stats().memtable_entries > 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(20));
        }

        assert_eq!(engine.stats().memtable_entries, 0);
        assert_eq!(engine.get("k").unwrap(), b"v".to_vec());

        engine.close().unwrap();
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir, &test_options());

        engine.put("a", b"1").unwrap();
        engine.put("b", b"2").unwrap();
        engine.delete("b").unwrap();

        let stats = engine.stats();
        assert_eq!(stats.keys, 1);
        assert_eq!(stats.memtable_entries, 2);
        assert!(stats.wal_bytes > 0);

        engine.close().unwrap();
    }

    #[test]
    fn test_empty_key_and_empty_value() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir, &test_options());

        engine.put("", b"empty key").unwrap();
        engine.put("empty value", b"").unwrap();

        assert_eq!(engine.get("").unwrap(), b"empty key".to_vec());
        assert_eq!(engine.get("empty value").unwrap(), Vec::<u8>::new());

        engine.close().unwrap();
    }
}
