//! Log Sequence Numbers
//!
//! An LSN is the pair `(segment, position)`: the order of the segment file and
//! the logical offset of the record inside that segment's record stream.
//! Ordering is segment-major, position-minor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WalError};

/// Durable global ordering key for log records
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogSequenceNumber {
    /// Order of the segment holding the record
    pub segment: u64,

    /// Logical offset of the record frame inside the segment
    pub position: u64,
}

impl LogSequenceNumber {
    /// Sentinel meaning "no previous version" (a new or unmodified page)
    pub const ZERO: LogSequenceNumber = LogSequenceNumber {
        segment: 0,
        position: 0,
    };

    /// Serialized size: segment (8) + position (8)
    pub const SERIALIZED_SIZE: usize = 16;

    pub const fn new(segment: u64, position: u64) -> Self {
        Self { segment, position }
    }

    /// Encode as 16 big-endian bytes
    pub fn to_bytes(&self) -> [u8; Self::SERIALIZED_SIZE] {
        let mut out = [0u8; Self::SERIALIZED_SIZE];
        out[0..8].copy_from_slice(&self.segment.to_be_bytes());
        out[8..16].copy_from_slice(&self.position.to_be_bytes());
        out
    }

    /// Decode from 16 big-endian bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SERIALIZED_SIZE {
            return Err(WalError::Corruption(format!(
                "LSN needs {} bytes, got {}",
                Self::SERIALIZED_SIZE,
                bytes.len()
            )));
        }
        let segment = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let position = u64::from_be_bytes(bytes[8..16].try_into().unwrap());
        Ok(Self { segment, position })
    }
}

impl fmt::Display for LogSequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LSN{{segment={}, position={}}}", self.segment, self.position)
    }
}
