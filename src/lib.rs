//! # shardkv - An Embedded, Partitioned Key-Value Store
//!
//! shardkv is a crash-recoverable key-value store for single-process
//! applications: durable point lookups, writes, and deletes with
//! low-latency in-memory absorption, no server required.
//!
//! ## Architecture
//!
//! The key space is split across a fixed number of partitions, each owned
//! by an independent storage engine:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Router                              │
//! │              (stable hash fan-out over N engines)           │
//! └───────┬─────────────────────┬─────────────────────┬─────────┘
//!         │                     │                     │
//! ┌───────▼───────┐     ┌───────▼───────┐     ┌───────▼───────┐
//! │   Engine 0    │     │   Engine 1    │ ... │  Engine N-1   │
//! │ ┌───────────┐ │     └───────────────┘     └───────────────┘
//! │ │    WAL    │ │  durable, append-only ground truth
//! │ ├───────────┤ │
//! │ │ Memtable  │ │  sorted buffer of recent writes/tombstones
//! │ ├───────────┤ │
//! │ │  B+ Tree  │ │  long-lived index, receives flushes
//! │ │ + filter  │ │  Bloom filter gates negative lookups
//! │ └───────────┘ │
//! └───────────────┘
//! ```
//!
//! Writes are appended to the WAL and fsynced before they touch memory;
//! on restart each engine replays its log to rebuild the in-memory state,
//! tolerating a torn record at the tail.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use shardkv::{Options, Router};
//!
//! # fn main() -> Result<(), shardkv::Error> {
//! let store = Router::open("./data", Options::default())?;
//!
//! // Write operations
//! store.put("key1", b"value1")?;
//! store.put("key2", b"value2")?;
//!
//! // Read operations
//! let value = store.get("key1")?;
//! println!("Found: {:?}", value);
//!
//! // Delete operations (blind: succeeds even if absent)
//! store.delete("key1")?;
//!
//! store.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod memtable;
pub mod router;
pub mod tree;
pub mod wal;

// Re-exports
pub use config::{FlushErrorPolicy, Options};
pub use engine::Engine;
pub use error::{Error, Result};
pub use router::{Router, Stats};

/// Current version of shardkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
