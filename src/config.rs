//! Configuration options for the shardkv storage engine.

use std::time::Duration;

/// Configuration options for opening a store.
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of partitions the key space is split across.
    /// Must stay constant for the lifetime of a data directory.
    /// Default: 16
    pub num_partitions: usize,

    /// Maximum number of keys per B+ tree node before a split.
    /// Default: 4
    pub max_keys: usize,

    /// Number of entries the memtable absorbs before it is flushed
    /// into the tree.
    /// Default: 1000
    pub memtable_capacity: usize,

    /// Interval between background flush ticks.
    /// Default: 5 seconds
    pub flush_interval: Duration,

    /// Expected number of keys the Bloom filter is sized for.
    /// Default: 1000
    pub filter_keys: usize,

    /// Target false positive rate for the Bloom filter.
    /// Default: 0.01 (1%)
    pub filter_fp_rate: f64,

    /// What the background flusher does when a flush fails.
    /// Default: [`FlushErrorPolicy::Abort`]
    pub flush_error_policy: FlushErrorPolicy,
}

/// Failure mode for the background flusher.
///
/// A failed flush means the tree has drifted from the WAL and the engine
/// can no longer guarantee its durability semantics. Synchronous flushes
/// triggered by a full memtable always surface the error to the caller;
/// this policy only governs the background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushErrorPolicy {
    /// Abort the process.
    Abort,

    /// Log the error and permanently stop background flushing for the
    /// affected partition.
    Stop,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_partitions: 16,
            max_keys: 4,
            memtable_capacity: 1000,
            flush_interval: Duration::from_secs(5),
            filter_keys: 1000,
            filter_fp_rate: 0.01,
            flush_error_policy: FlushErrorPolicy::Abort,
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of partitions.
    pub fn num_partitions(mut self, n: usize) -> Self {
        self.num_partitions = n;
        self
    }

    /// Sets the maximum number of keys per tree node.
    pub fn max_keys(mut self, n: usize) -> Self {
        self.max_keys = n;
        self
    }

    /// Sets the memtable capacity in entries.
    pub fn memtable_capacity(mut self, n: usize) -> Self {
        self.memtable_capacity = n;
        self
    }

    /// Sets the background flush interval.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the flush failure policy.
    pub fn flush_error_policy(mut self, policy: FlushErrorPolicy) -> Self {
        self.flush_error_policy = policy;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if self.num_partitions == 0 {
            return Err(crate::Error::invalid_argument("num_partitions must be > 0"));
        }
        if self.max_keys < 2 {
            return Err(crate::Error::invalid_argument("max_keys must be >= 2"));
        }
        if self.memtable_capacity == 0 {
            return Err(crate::Error::invalid_argument("memtable_capacity must be > 0"));
        }
        if self.flush_interval.is_zero() {
            return Err(crate::Error::invalid_argument("flush_interval must be > 0"));
        }
        if self.filter_keys == 0 {
            return Err(crate::Error::invalid_argument("filter_keys must be > 0"));
        }
        if self.filter_fp_rate <= 0.0 || self.filter_fp_rate >= 1.0 {
            return Err(crate::Error::invalid_argument(
                "filter_fp_rate must be between 0 and 1",
            ));
        }
        Ok(())
    }
}
