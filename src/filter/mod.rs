//! Probabilistic filter guarding negative lookups on the tree.
//!
//! A lookup that the filter rejects never has to descend the tree at all.
//! The filter may claim a key is present when it is not (false positives),
//! but it never denies a key that was added (no false negatives).

pub mod bloom;

pub use bloom::BloomFilter;
