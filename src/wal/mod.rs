//! Write-Ahead Log (WAL) implementation.
//!
//! The WAL is the durable, append-only record of every logical operation
//! accepted by a partition and the sole source of truth for recovery; the
//! tree and memtable are derivable views. Every append is fsynced before
//! the write is acknowledged.
//!
//! ## Record format
//!
//! `[u32 big-endian length][JSON payload]` per record; see [`record`].
//!
//! ## Corruption tolerance
//!
//! A crash mid-append leaves a truncated or undecodable record at the
//! tail. Replay applies every record before the first bad one and
//! discards the rest, without surfacing an error.

pub mod record;

pub use record::{LogRecord, Operation};

use crate::error::{Error, Result};
use parking_lot::Mutex;
use record::HEADER_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Name of the log file within a partition directory.
pub const WAL_FILE_NAME: &str = "wal.log";

/// Append-only log of insert/delete operations for one partition.
///
/// The file handle sits behind a mutex so appends are serialized even if
/// the log is ever driven from outside the engine's write lock.
pub struct Wal {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl Wal {
    /// Opens the log for a partition directory, creating the directory
    /// and an empty `wal.log` if they do not exist.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(dir.as_ref())?;
        let path = dir.as_ref().join(WAL_FILE_NAME);
        let file = Self::open_for_append(&path)?;

        Ok(Self { path, file: Mutex::new(Some(file)) })
    }

    fn open_for_append(path: &Path) -> Result<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }

    /// Appends an insert record and fsyncs.
    pub fn log_insert(&self, key: &str, value: &[u8]) -> Result<()> {
        self.append(&LogRecord::insert(key, value))
    }

    /// Appends a delete record and fsyncs.
    pub fn log_delete(&self, key: &str) -> Result<()> {
        self.append(&LogRecord::delete(key))
    }

    fn append(&self, rec: &LogRecord) -> Result<()> {
        let encoded = rec.encode()?;

        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or_else(|| Error::internal("write-ahead log is closed"))?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        Ok(())
    }

    /// Replays all decodable records in append order.
    ///
    /// `on_insert` and `on_delete` are invoked per record. Replay stops
    /// cleanly at end of file, and stops early (without error) at a
    /// truncated or undecodable record; only physical read errors are
    /// surfaced. When a bad tail is found, the file is cut back to the
    /// end of the last good record so later appends stay replayable.
    pub fn replay<FI, FD>(&self, mut on_insert: FI, mut on_delete: FD) -> Result<()>
    where
        FI: FnMut(String, Vec<u8>) -> Result<()>,
        FD: FnMut(String) -> Result<()>,
    {
        // Hold the append lock so replay observes a stable file.
        let guard = self.file.lock();

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::Io(e)),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        // Byte offset just past the last fully applied record.
        let mut valid_end: u64 = 0;

        loop {
            let mut header = [0u8; HEADER_SIZE];
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                // Clean end of log; a partial header is a crash artifact.
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(Error::Io(e)),
            }

            // Read through `take` so a corrupt length header cannot force
            // a giant allocation; a short payload is a truncated tail.
            let length = u32::from_be_bytes(header) as usize;
            let mut payload = Vec::new();
            let read = (&mut reader).take(length as u64).read_to_end(&mut payload)?;
            if read < length {
                log::warn!("truncated record at tail of {}, discarding", self.path.display());
                break;
            }

            let rec = match LogRecord::decode(&payload) {
                Ok(rec) => rec,
                Err(_) => {
                    log::warn!("undecodable record in {}, discarding tail", self.path.display());
                    break;
                }
            };

            match rec.op {
                Operation::Insert => on_insert(rec.key, rec.value.unwrap_or_default())?,
                Operation::Delete => on_delete(rec.key)?,
            }
            valid_end += (HEADER_SIZE + length) as u64;
        }

        if file_len > valid_end {
            if let Some(file) = guard.as_ref() {
                file.set_len(valid_end)?;
            }
        }

        Ok(())
    }

    /// Truncates the log: closes the file, deletes it, recreates it empty.
    pub fn clear(&self) -> Result<()> {
        let mut guard = self.file.lock();
        guard.take();

        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }

        *guard = Some(Self::open_for_append(&self.path)?);
        Ok(())
    }

    /// Flushes and closes the file handle. Further appends fail.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.file.lock();
        if let Some(file) = guard.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Current size of the log file in bytes.
    pub fn size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
