//! WAL Records
//!
//! The structural record family and its tagged binary codec.
//!
//! ## Record Encoding
//! ```text
//! ┌─────────┬──────────────────────────────────┐
//! │ Tag (1) │ Body (record specific)           │
//! └─────────┴──────────────────────────────────┘
//! ```
//! Integers are big-endian; an optional LSN is a presence byte followed by
//! 16 LSN bytes when present.
//!
//! | Tag | Record                    | Operation unit | Updates master |
//! |-----|---------------------------|----------------|----------------|
//! | 1   | `AtomicUnitStart`         | yes            | no             |
//! | 2   | `AtomicUnitEnd`           | yes            | no             |
//! | 3   | `PageOperation`           | yes            | no             |
//! | 4   | `FullCheckpointStart`     | no             | yes            |
//! | 5   | `FuzzyCheckpointStart`    | no             | yes            |
//! | 6   | `FuzzyCheckpointEnd`      | no             | no             |
//! | 7   | `CheckpointEnd`           | no             | no             |
//! | 8   | `NonTxOperationPerformed` | no             | no             |

use std::collections::BTreeMap;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalError};
use crate::lsn::LogSequenceNumber;
use crate::po::{PageOperationRecord, PageOperationRegistry};

// =============================================================================
// Record Tags
// =============================================================================

pub const TAG_ATOMIC_UNIT_START: u8 = 1;
pub const TAG_ATOMIC_UNIT_END: u8 = 2;
pub const TAG_PAGE_OPERATION: u8 = 3;
pub const TAG_FULL_CHECKPOINT_START: u8 = 4;
pub const TAG_FUZZY_CHECKPOINT_START: u8 = 5;
pub const TAG_FUZZY_CHECKPOINT_END: u8 = 6;
pub const TAG_CHECKPOINT_END: u8 = 7;
pub const TAG_NON_TX_OPERATION_PERFORMED: u8 = 8;

// =============================================================================
// Operation Identity and Metadata
// =============================================================================

/// Identifier of one atomic operation
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OperationUnitId(pub u64);

impl fmt::Display for OperationUnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Named opaque blobs attached to an atomic operation's end record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicOperationMetadata {
    entries: BTreeMap<String, Vec<u8>>,
}

impl AtomicOperationMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a blob; returns the previous blob with the same name
    pub fn insert(&mut self, name: impl Into<String>, value: Vec<u8>) -> Option<Vec<u8>> {
        self.entries.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<u8>> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

// =============================================================================
// Records
// =============================================================================

/// One structural log record
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    AtomicUnitStart {
        operation_id: OperationUnitId,
        rollback_supported: bool,
    },
    AtomicUnitEnd {
        operation_id: OperationUnitId,
        rollback: bool,
        start_lsn: Option<LogSequenceNumber>,
        metadata: AtomicOperationMetadata,
    },
    PageOperation(PageOperationRecord),
    FullCheckpointStart {
        previous_checkpoint: Option<LogSequenceNumber>,
    },
    FuzzyCheckpointStart {
        previous_checkpoint: Option<LogSequenceNumber>,
        flushed_lsn: Option<LogSequenceNumber>,
    },
    FuzzyCheckpointEnd,
    CheckpointEnd,
    NonTxOperationPerformed,
}

impl WalRecord {
    pub fn tag(&self) -> u8 {
        match self {
            WalRecord::AtomicUnitStart { .. } => TAG_ATOMIC_UNIT_START,
            WalRecord::AtomicUnitEnd { .. } => TAG_ATOMIC_UNIT_END,
            WalRecord::PageOperation(_) => TAG_PAGE_OPERATION,
            WalRecord::FullCheckpointStart { .. } => TAG_FULL_CHECKPOINT_START,
            WalRecord::FuzzyCheckpointStart { .. } => TAG_FUZZY_CHECKPOINT_START,
            WalRecord::FuzzyCheckpointEnd => TAG_FUZZY_CHECKPOINT_END,
            WalRecord::CheckpointEnd => TAG_CHECKPOINT_END,
            WalRecord::NonTxOperationPerformed => TAG_NON_TX_OPERATION_PERFORMED,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WalRecord::AtomicUnitStart { .. } => "AtomicUnitStart",
            WalRecord::AtomicUnitEnd { .. } => "AtomicUnitEnd",
            WalRecord::PageOperation(_) => "PageOperation",
            WalRecord::FullCheckpointStart { .. } => "FullCheckpointStart",
            WalRecord::FuzzyCheckpointStart { .. } => "FuzzyCheckpointStart",
            WalRecord::FuzzyCheckpointEnd => "FuzzyCheckpointEnd",
            WalRecord::CheckpointEnd => "CheckpointEnd",
            WalRecord::NonTxOperationPerformed => "NonTxOperationPerformed",
        }
    }

    /// Atomic operation this record belongs to, if any
    pub fn operation_id(&self) -> Option<OperationUnitId> {
        match self {
            WalRecord::AtomicUnitStart { operation_id, .. }
            | WalRecord::AtomicUnitEnd { operation_id, .. } => Some(*operation_id),
            WalRecord::PageOperation(record) => Some(record.operation_id),
            _ => None,
        }
    }

    pub fn is_operation_unit_record(&self) -> bool {
        self.operation_id().is_some()
    }

    pub fn is_atomic_unit_start(&self) -> bool {
        matches!(self, WalRecord::AtomicUnitStart { .. })
    }

    pub fn is_atomic_unit_end(&self) -> bool {
        matches!(self, WalRecord::AtomicUnitEnd { .. })
    }

    /// Checkpoint start records move the master record
    pub fn updates_master_record(&self) -> bool {
        matches!(
            self,
            WalRecord::FullCheckpointStart { .. } | WalRecord::FuzzyCheckpointStart { .. }
        )
    }
}

// =============================================================================
// Codec
// =============================================================================

fn put_optional_lsn(out: &mut BytesMut, lsn: Option<LogSequenceNumber>) {
    match lsn {
        Some(lsn) => {
            out.put_u8(1);
            out.put_slice(&lsn.to_bytes());
        }
        None => out.put_u8(0),
    }
}

fn get_optional_lsn(buf: &mut Bytes) -> Result<Option<LogSequenceNumber>> {
    need(buf, 1, "LSN presence flag")?;
    match buf.get_u8() {
        0 => Ok(None),
        1 => {
            need(buf, LogSequenceNumber::SERIALIZED_SIZE, "LSN")?;
            let bytes = buf.split_to(LogSequenceNumber::SERIALIZED_SIZE);
            Ok(Some(LogSequenceNumber::from_bytes(&bytes)?))
        }
        other => Err(WalError::Corruption(format!(
            "invalid LSN presence flag {}",
            other
        ))),
    }
}

fn get_bool(buf: &mut Bytes, what: &str) -> Result<bool> {
    need(buf, 1, what)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(WalError::Corruption(format!("invalid {} flag {}", what, other))),
    }
}

fn need(buf: &Bytes, len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(WalError::Corruption(format!(
            "truncated record: {} needs {} bytes, {} left",
            what,
            len,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Encodes and decodes `WalRecord`s, resolving page operations through a registry
#[derive(Debug, Clone, Default)]
pub struct RecordCodec {
    registry: PageOperationRegistry,
}

impl RecordCodec {
    pub fn new(registry: PageOperationRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PageOperationRegistry {
        &self.registry
    }

    pub fn encode(&self, record: &WalRecord) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(64);
        out.put_u8(record.tag());

        match record {
            WalRecord::AtomicUnitStart {
                operation_id,
                rollback_supported,
            } => {
                out.put_u64(operation_id.0);
                out.put_u8(*rollback_supported as u8);
            }
            WalRecord::AtomicUnitEnd {
                operation_id,
                rollback,
                start_lsn,
                metadata,
            } => {
                out.put_u64(operation_id.0);
                out.put_u8(*rollback as u8);
                put_optional_lsn(&mut out, *start_lsn);
                let blob = metadata.to_bytes()?;
                out.put_u32(blob.len() as u32);
                out.put_slice(&blob);
            }
            WalRecord::PageOperation(po) => {
                out.reserve(po.encoded_size());
                po.encode(&mut out);
            }
            WalRecord::FullCheckpointStart {
                previous_checkpoint,
            } => {
                put_optional_lsn(&mut out, *previous_checkpoint);
            }
            WalRecord::FuzzyCheckpointStart {
                previous_checkpoint,
                flushed_lsn,
            } => {
                put_optional_lsn(&mut out, *previous_checkpoint);
                put_optional_lsn(&mut out, *flushed_lsn);
            }
            WalRecord::FuzzyCheckpointEnd
            | WalRecord::CheckpointEnd
            | WalRecord::NonTxOperationPerformed => {}
        }

        Ok(out.freeze())
    }

    pub fn decode(&self, data: &[u8]) -> Result<WalRecord> {
        let mut buf = Bytes::copy_from_slice(data);
        need(&buf, 1, "record tag")?;

        let record = match buf.get_u8() {
            TAG_ATOMIC_UNIT_START => {
                need(&buf, 8, "operation id")?;
                let operation_id = OperationUnitId(buf.get_u64());
                let rollback_supported = get_bool(&mut buf, "rollback supported")?;
                WalRecord::AtomicUnitStart {
                    operation_id,
                    rollback_supported,
                }
            }
            TAG_ATOMIC_UNIT_END => {
                need(&buf, 8, "operation id")?;
                let operation_id = OperationUnitId(buf.get_u64());
                let rollback = get_bool(&mut buf, "rollback")?;
                let start_lsn = get_optional_lsn(&mut buf)?;
                need(&buf, 4, "metadata length")?;
                let len = buf.get_u32() as usize;
                need(&buf, len, "metadata")?;
                let metadata = AtomicOperationMetadata::from_bytes(&buf.split_to(len))?;
                WalRecord::AtomicUnitEnd {
                    operation_id,
                    rollback,
                    start_lsn,
                    metadata,
                }
            }
            TAG_PAGE_OPERATION => {
                WalRecord::PageOperation(PageOperationRecord::decode(&mut buf, &self.registry)?)
            }
            TAG_FULL_CHECKPOINT_START => WalRecord::FullCheckpointStart {
                previous_checkpoint: get_optional_lsn(&mut buf)?,
            },
            TAG_FUZZY_CHECKPOINT_START => {
                let previous_checkpoint = get_optional_lsn(&mut buf)?;
                let flushed_lsn = get_optional_lsn(&mut buf)?;
                WalRecord::FuzzyCheckpointStart {
                    previous_checkpoint,
                    flushed_lsn,
                }
            }
            TAG_FUZZY_CHECKPOINT_END => WalRecord::FuzzyCheckpointEnd,
            TAG_CHECKPOINT_END => WalRecord::CheckpointEnd,
            TAG_NON_TX_OPERATION_PERFORMED => WalRecord::NonTxOperationPerformed,
            other => {
                return Err(WalError::Corruption(format!("unknown record tag {}", other)));
            }
        };

        if buf.has_remaining() {
            return Err(WalError::Corruption(format!(
                "{} trailing bytes after {} record",
                buf.remaining(),
                record.name()
            )));
        }
        Ok(record)
    }
}
