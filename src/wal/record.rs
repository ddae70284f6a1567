//! WAL record format implementation.
//!
//! Each record on disk consists of:
//! - Length (4 bytes, big-endian): length of the payload
//! - Payload (variable): JSON encoding of the logical operation
//!
//! The payload is self-describing: `{"op", "key", "value", "timestamp"}`,
//! with `value` omitted for deletes. The `timestamp` field is reserved; it
//! is always written as 0 and preserved on round-trip.

use crate::error::Result;
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

/// Size of the length prefix preceding each payload.
pub const HEADER_SIZE: usize = 4;

/// The logical operation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// A key was inserted or overwritten.
    #[serde(rename = "INSERT")]
    Insert,
    /// A key was deleted.
    #[serde(rename = "DELETE")]
    Delete,
}

/// A single logical WAL record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// The operation.
    pub op: Operation,
    /// The key the operation applies to.
    pub key: String,
    /// The value, present only for inserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
    /// Reserved; always 0 today.
    pub timestamp: i64,
}

impl LogRecord {
    /// Creates an insert record.
    pub fn insert(key: &str, value: &[u8]) -> Self {
        Self {
            op: Operation::Insert,
            key: key.to_string(),
            value: Some(value.to_vec()),
            timestamp: 0,
        }
    }

    /// Creates a delete record.
    pub fn delete(key: &str) -> Self {
        Self { op: Operation::Delete, key: key.to_string(), value: None, timestamp: 0 }
    }

    /// Encodes the record as a length-prefixed JSON frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(self)?;

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);

        Ok(buf.to_vec())
    }

    /// Decodes a record from a frame payload (without the length prefix).
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
