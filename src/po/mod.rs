//! Page Operations
//!
//! Redo/undo descriptors of primitive page mutations.
//!
//! ## Responsibilities
//! - `PageImage`: byte-addressable view of one page
//! - `PageOperation`: a versioned, tagged mutation with `redo` and `undo`
//! - `PageOperationRegistry`: decoders keyed by kind tag
//! - `PageOperationRecord`: an operation bound to its page and atomic unit
//!
//! ## Operation Frame
//! ```text
//! ┌──────────┬─────────────┬──────────────────┬─────────┐
//! │ Kind (1) │ Version (1) │ Payload Len (4)  │ Payload │
//! └──────────┴─────────────┴──────────────────┴─────────┘
//! ```
//!
//! Every operation satisfies `undo(redo(p)) == p` and
//! `redo(undo(redo(p))) == redo(p)`.

pub mod cell_page;
mod ops;

use std::collections::HashMap;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WalError};
use crate::lsn::LogSequenceNumber;
use crate::wal::OperationUnitId;

pub use ops::{
    decode_leaf_entry, encode_leaf_entry, AddLeafEntryPO, InsertCellPO, RemoveCellPO,
    SetFieldPO, UpdateCellPO, WriteBytesPO,
};

/// Size of the frame header: kind + version + payload length
pub const OPERATION_HEADER_SIZE: usize = 1 + 1 + 4;

// =============================================================================
// Page Image
// =============================================================================

/// Byte-addressable view of one page
pub trait PageImage {
    fn page_size(&self) -> usize;

    /// Copy `len` bytes starting at `offset`
    fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// Overwrite bytes starting at `offset`
    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()>;
}

pub(crate) fn check_bounds(page_size: usize, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= page_size => Ok(()),
        _ => Err(WalError::PageOperation(format!(
            "range {}..{} is outside a page of {} bytes",
            offset,
            offset.saturating_add(len),
            page_size
        ))),
    }
}

impl PageImage for [u8] {
    fn page_size(&self) -> usize {
        self.len()
    }

    fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        check_bounds(self.len(), offset, len)?;
        Ok(self[offset..offset + len].to_vec())
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(self.len(), offset, data.len())?;
        self[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

impl PageImage for Vec<u8> {
    fn page_size(&self) -> usize {
        self.as_slice().page_size()
    }

    fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.as_slice().read_bytes(offset, len)
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.as_mut_slice().write_bytes(offset, data)
    }
}

// =============================================================================
// Page Operation
// =============================================================================

/// A primitive, reversible page mutation
pub trait PageOperation: fmt::Debug + Send + Sync {
    /// Registry tag of this operation
    fn kind(&self) -> u8;

    /// Payload format version
    fn version(&self) -> u8 {
        1
    }

    /// Apply the mutation; fails if the page is not in the expected pre-state
    fn redo(&self, page: &mut dyn PageImage) -> Result<()>;

    /// Revert the mutation; fails if the page is not in the expected post-state
    fn undo(&self, page: &mut dyn PageImage) -> Result<()>;

    fn payload_size(&self) -> usize;

    fn write_payload(&self, out: &mut BytesMut);

    fn clone_box(&self) -> Box<dyn PageOperation>;
}

impl Clone for Box<dyn PageOperation> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

fn payload_bytes(operation: &dyn PageOperation) -> Bytes {
    let mut out = BytesMut::with_capacity(operation.payload_size());
    operation.write_payload(&mut out);
    out.freeze()
}

/// Check that at least `needed` bytes remain before reading a field
pub(crate) fn ensure_remaining(buf: &impl Buf, needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(WalError::Corruption(format!(
            "truncated {}: need {} bytes, {} left",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

/// Write a u32 length-prefixed byte string
pub(crate) fn put_blob(out: &mut BytesMut, data: &[u8]) {
    out.put_u32(data.len() as u32);
    out.put_slice(data);
}

/// Read a u32 length-prefixed byte string
pub(crate) fn get_blob(buf: &mut Bytes, what: &str) -> Result<Vec<u8>> {
    ensure_remaining(buf, 4, what)?;
    let len = buf.get_u32() as usize;
    ensure_remaining(buf, len, what)?;
    Ok(buf.split_to(len).to_vec())
}

// =============================================================================
// Registry
// =============================================================================

/// Decoder for one operation kind: `(version, payload) -> operation`
pub type PageOperationDecoder = fn(u8, &mut Bytes) -> Result<Box<dyn PageOperation>>;

/// Decoders keyed by operation kind
#[derive(Clone)]
pub struct PageOperationRegistry {
    decoders: HashMap<u8, PageOperationDecoder>,
}

impl PageOperationRegistry {
    /// Registry with no kinds at all
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registry with every built-in kind
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.decoders.insert(WriteBytesPO::KIND, WriteBytesPO::decode);
        registry.decoders.insert(SetFieldPO::KIND, SetFieldPO::decode);
        registry.decoders.insert(InsertCellPO::KIND, InsertCellPO::decode);
        registry.decoders.insert(RemoveCellPO::KIND, RemoveCellPO::decode);
        registry.decoders.insert(UpdateCellPO::KIND, UpdateCellPO::decode);
        registry.decoders.insert(AddLeafEntryPO::KIND, AddLeafEntryPO::decode);
        registry
    }

    /// Add a decoder for a new kind
    pub fn register(&mut self, kind: u8, decoder: PageOperationDecoder) -> Result<()> {
        if self.decoders.contains_key(&kind) {
            return Err(WalError::ProtocolViolation(format!(
                "page operation kind {} is already registered",
                kind
            )));
        }
        self.decoders.insert(kind, decoder);
        Ok(())
    }

    pub fn contains(&self, kind: u8) -> bool {
        self.decoders.contains_key(&kind)
    }

    /// Decode a payload of a known kind
    pub fn decode(&self, kind: u8, version: u8, payload: &mut Bytes) -> Result<Box<dyn PageOperation>> {
        let decoder = self
            .decoders
            .get(&kind)
            .ok_or(WalError::UnknownPageOperation(kind))?;
        decoder(version, payload)
    }

    /// Write `[kind][version][len][payload]`
    pub fn encode_framed(operation: &dyn PageOperation, out: &mut BytesMut) {
        let payload = payload_bytes(operation);
        out.put_u8(operation.kind());
        out.put_u8(operation.version());
        out.put_u32(payload.len() as u32);
        out.put_slice(&payload);
    }

    /// Read one framed operation
    pub fn decode_framed(&self, buf: &mut Bytes) -> Result<Box<dyn PageOperation>> {
        ensure_remaining(buf, OPERATION_HEADER_SIZE, "page operation header")?;
        let kind = buf.get_u8();
        let version = buf.get_u8();
        let len = buf.get_u32() as usize;
        ensure_remaining(buf, len, "page operation payload")?;

        let mut payload = buf.split_to(len);
        let operation = self.decode(kind, version, &mut payload)?;
        if payload.has_remaining() {
            return Err(WalError::Corruption(format!(
                "{} trailing bytes after page operation of kind {}",
                payload.remaining(),
                kind
            )));
        }
        Ok(operation)
    }
}

impl Default for PageOperationRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for PageOperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<u8> = self.decoders.keys().copied().collect();
        kinds.sort_unstable();
        f.debug_struct("PageOperationRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

// =============================================================================
// Page Operation Record
// =============================================================================

/// Identity of one page: owning file and page index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub file_id: u64,
    pub page_index: u64,
}

impl PageKey {
    pub const fn new(file_id: u64, page_index: u64) -> Self {
        Self { file_id, page_index }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {}:{}", self.file_id, self.page_index)
    }
}

/// A page operation bound to the page and atomic unit it belongs to
#[derive(Debug, Clone)]
pub struct PageOperationRecord {
    pub page: PageKey,
    pub operation_id: OperationUnitId,
    /// Page LSN before this operation was applied
    pub initial_lsn: LogSequenceNumber,
    pub operation: Box<dyn PageOperation>,
}

impl PageOperationRecord {
    pub fn new(
        page: PageKey,
        operation_id: OperationUnitId,
        initial_lsn: LogSequenceNumber,
        operation: Box<dyn PageOperation>,
    ) -> Self {
        Self {
            page,
            operation_id,
            initial_lsn,
            operation,
        }
    }

    pub fn redo(&self, page: &mut dyn PageImage) -> Result<()> {
        self.operation.redo(page)
    }

    pub fn undo(&self, page: &mut dyn PageImage) -> Result<()> {
        self.operation.undo(page)
    }

    /// Serialized size of the record body
    pub fn encoded_size(&self) -> usize {
        8 + 8 + 8 + LogSequenceNumber::SERIALIZED_SIZE
            + OPERATION_HEADER_SIZE
            + self.operation.payload_size()
    }

    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u64(self.page.file_id);
        out.put_u64(self.page.page_index);
        out.put_u64(self.operation_id.0);
        out.put_slice(&self.initial_lsn.to_bytes());
        PageOperationRegistry::encode_framed(self.operation.as_ref(), out);
    }

    pub fn decode(buf: &mut Bytes, registry: &PageOperationRegistry) -> Result<Self> {
        ensure_remaining(buf, 24 + LogSequenceNumber::SERIALIZED_SIZE, "page operation record")?;
        let file_id = buf.get_u64();
        let page_index = buf.get_u64();
        let operation_id = OperationUnitId(buf.get_u64());
        let initial_lsn = LogSequenceNumber::from_bytes(&buf.split_to(LogSequenceNumber::SERIALIZED_SIZE))?;
        let operation = registry.decode_framed(buf)?;

        Ok(Self {
            page: PageKey::new(file_id, page_index),
            operation_id,
            initial_lsn,
            operation,
        })
    }
}

impl PartialEq for PageOperationRecord {
    fn eq(&self, other: &Self) -> bool {
        self.page == other.page
            && self.operation_id == other.operation_id
            && self.initial_lsn == other.initial_lsn
            && self.operation.kind() == other.operation.kind()
            && self.operation.version() == other.operation.version()
            && payload_bytes(self.operation.as_ref()) == payload_bytes(other.operation.as_ref())
    }
}
