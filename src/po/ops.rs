//! Built-in Page Operations
//!
//! | Kind | Operation        | Mutation                          |
//! |------|------------------|-----------------------------------|
//! | 1    | `WriteBytesPO`   | raw byte range write              |
//! | 2    | `SetFieldPO`     | fixed-width header field write    |
//! | 3    | `InsertCellPO`   | cell insert                       |
//! | 4    | `RemoveCellPO`   | cell remove                       |
//! | 5    | `UpdateCellPO`   | cell replace                      |
//! | 6    | `AddLeafEntryPO` | B-tree leaf entry insert (a cell) |
//!
//! All payload fields are big-endian with explicit lengths.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WalError};

use super::cell_page;
use super::{ensure_remaining, get_blob, put_blob, PageImage, PageOperation};

fn check_version(kind: &str, version: u8) -> Result<()> {
    if version != 1 {
        return Err(WalError::Corruption(format!(
            "unsupported {} payload version {}",
            kind, version
        )));
    }
    Ok(())
}

fn state_mismatch(what: &str, detail: impl std::fmt::Display) -> WalError {
    WalError::PageOperation(format!("{}: page is not in the expected state ({})", what, detail))
}

// =============================================================================
// WriteBytesPO
// =============================================================================

/// Overwrite a byte range; `before` and `after` have the same length
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBytesPO {
    pub offset: u32,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

impl WriteBytesPO {
    pub const KIND: u8 = 1;

    pub fn new(offset: u32, before: Vec<u8>, after: Vec<u8>) -> Result<Self> {
        if before.len() != after.len() {
            return Err(WalError::PageOperation(format!(
                "byte write images differ in length ({} vs {})",
                before.len(),
                after.len()
            )));
        }
        Ok(Self {
            offset,
            before,
            after,
        })
    }

    /// Build the operation from the current content of `page`
    pub fn capture(page: &dyn PageImage, offset: u32, after: &[u8]) -> Result<Self> {
        let before = page.read_bytes(offset as usize, after.len())?;
        Self::new(offset, before, after.to_vec())
    }

    pub fn decode(version: u8, payload: &mut Bytes) -> Result<Box<dyn PageOperation>> {
        check_version("WriteBytesPO", version)?;
        ensure_remaining(payload, 4, "WriteBytesPO offset")?;
        let offset = payload.get_u32();
        let before = get_blob(payload, "WriteBytesPO before image")?;
        let after = get_blob(payload, "WriteBytesPO after image")?;
        Ok(Box::new(Self::new(offset, before, after)?))
    }

    fn swap(&self, page: &mut dyn PageImage, from: &[u8], to: &[u8], what: &str) -> Result<()> {
        let current = page.read_bytes(self.offset as usize, from.len())?;
        if current != from {
            return Err(state_mismatch(what, format_args!("bytes at offset {}", self.offset)));
        }
        page.write_bytes(self.offset as usize, to)
    }
}

impl PageOperation for WriteBytesPO {
    fn kind(&self) -> u8 {
        Self::KIND
    }

    fn redo(&self, page: &mut dyn PageImage) -> Result<()> {
        self.swap(page, &self.before, &self.after, "WriteBytesPO redo")
    }

    fn undo(&self, page: &mut dyn PageImage) -> Result<()> {
        self.swap(page, &self.after, &self.before, "WriteBytesPO undo")
    }

    fn payload_size(&self) -> usize {
        4 + 4 + self.before.len() + 4 + self.after.len()
    }

    fn write_payload(&self, out: &mut BytesMut) {
        out.put_u32(self.offset);
        put_blob(out, &self.before);
        put_blob(out, &self.after);
    }

    fn clone_box(&self) -> Box<dyn PageOperation> {
        Box::new(self.clone())
    }
}

// =============================================================================
// SetFieldPO
// =============================================================================

/// Write a big-endian header field of 1, 2, 4 or 8 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetFieldPO {
    pub offset: u32,
    pub width: u8,
    pub before: u64,
    pub after: u64,
}

impl SetFieldPO {
    pub const KIND: u8 = 2;

    pub fn new(offset: u32, width: u8, before: u64, after: u64) -> Result<Self> {
        if !matches!(width, 1 | 2 | 4 | 8) {
            return Err(WalError::PageOperation(format!(
                "unsupported field width {}",
                width
            )));
        }
        if width < 8 {
            let limit = 1u64 << (width as u32 * 8);
            if before >= limit || after >= limit {
                return Err(WalError::PageOperation(format!(
                    "field value does not fit in {} bytes",
                    width
                )));
            }
        }
        Ok(Self {
            offset,
            width,
            before,
            after,
        })
    }

    /// Build the operation from the current field value in `page`
    pub fn capture(page: &dyn PageImage, offset: u32, width: u8, after: u64) -> Result<Self> {
        let field = Self::new(offset, width, 0, 0)?;
        let before = field.read_field(page)?;
        Self::new(offset, width, before, after)
    }

    pub fn decode(version: u8, payload: &mut Bytes) -> Result<Box<dyn PageOperation>> {
        check_version("SetFieldPO", version)?;
        ensure_remaining(payload, 4 + 1 + 8 + 8, "SetFieldPO")?;
        let offset = payload.get_u32();
        let width = payload.get_u8();
        let before = payload.get_u64();
        let after = payload.get_u64();
        Ok(Box::new(Self::new(offset, width, before, after)?))
    }

    fn read_field(&self, page: &dyn PageImage) -> Result<u64> {
        let bytes = page.read_bytes(self.offset as usize, self.width as usize)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }

    fn write_field(&self, page: &mut dyn PageImage, value: u64) -> Result<()> {
        let bytes = value.to_be_bytes();
        page.write_bytes(self.offset as usize, &bytes[8 - self.width as usize..])
    }

    fn swap(&self, page: &mut dyn PageImage, from: u64, to: u64, what: &str) -> Result<()> {
        let current = self.read_field(page)?;
        if current != from {
            return Err(state_mismatch(
                what,
                format_args!("field at {} is {}, expected {}", self.offset, current, from),
            ));
        }
        self.write_field(page, to)
    }
}

impl PageOperation for SetFieldPO {
    fn kind(&self) -> u8 {
        Self::KIND
    }

    fn redo(&self, page: &mut dyn PageImage) -> Result<()> {
        self.swap(page, self.before, self.after, "SetFieldPO redo")
    }

    fn undo(&self, page: &mut dyn PageImage) -> Result<()> {
        self.swap(page, self.after, self.before, "SetFieldPO undo")
    }

    fn payload_size(&self) -> usize {
        4 + 1 + 8 + 8
    }

    fn write_payload(&self, out: &mut BytesMut) {
        out.put_u32(self.offset);
        out.put_u8(self.width);
        out.put_u64(self.before);
        out.put_u64(self.after);
    }

    fn clone_box(&self) -> Box<dyn PageOperation> {
        Box::new(self.clone())
    }
}

// =============================================================================
// Cell Operations
// =============================================================================

/// Remove the cell at `index` after checking it holds `expected`
fn remove_expected(page: &mut dyn PageImage, index: u16, expected: &[u8], what: &str) -> Result<()> {
    let current = cell_page::read_cell(&*page, index)?;
    if current != expected {
        return Err(state_mismatch(what, format_args!("cell {}", index)));
    }
    cell_page::remove_cell(page, index)?;
    Ok(())
}

/// Replace the cell at `index` after checking it holds `expected`
fn replace_expected(
    page: &mut dyn PageImage,
    index: u16,
    expected: &[u8],
    replacement: &[u8],
    what: &str,
) -> Result<()> {
    let current = cell_page::read_cell(&*page, index)?;
    if current != expected {
        return Err(state_mismatch(what, format_args!("cell {}", index)));
    }
    cell_page::replace_cell(page, index, replacement)?;
    Ok(())
}

/// Insert a cell at `index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertCellPO {
    pub index: u16,
    pub cell: Vec<u8>,
}

impl InsertCellPO {
    pub const KIND: u8 = 3;

    pub fn new(index: u16, cell: Vec<u8>) -> Self {
        Self { index, cell }
    }

    pub fn decode(version: u8, payload: &mut Bytes) -> Result<Box<dyn PageOperation>> {
        check_version("InsertCellPO", version)?;
        ensure_remaining(payload, 2, "InsertCellPO index")?;
        let index = payload.get_u16();
        let cell = get_blob(payload, "InsertCellPO cell")?;
        Ok(Box::new(Self::new(index, cell)))
    }
}

impl PageOperation for InsertCellPO {
    fn kind(&self) -> u8 {
        Self::KIND
    }

    fn redo(&self, page: &mut dyn PageImage) -> Result<()> {
        cell_page::insert_cell(page, self.index, &self.cell)
    }

    fn undo(&self, page: &mut dyn PageImage) -> Result<()> {
        remove_expected(page, self.index, &self.cell, "InsertCellPO undo")
    }

    fn payload_size(&self) -> usize {
        2 + 4 + self.cell.len()
    }

    fn write_payload(&self, out: &mut BytesMut) {
        out.put_u16(self.index);
        put_blob(out, &self.cell);
    }

    fn clone_box(&self) -> Box<dyn PageOperation> {
        Box::new(self.clone())
    }
}

/// Remove the cell at `index`; `cell` is its content before removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveCellPO {
    pub index: u16,
    pub cell: Vec<u8>,
}

impl RemoveCellPO {
    pub const KIND: u8 = 4;

    pub fn new(index: u16, cell: Vec<u8>) -> Self {
        Self { index, cell }
    }

    /// Build the operation from the current content of `page`
    pub fn capture(page: &dyn PageImage, index: u16) -> Result<Self> {
        Ok(Self::new(index, cell_page::read_cell(page, index)?))
    }

    pub fn decode(version: u8, payload: &mut Bytes) -> Result<Box<dyn PageOperation>> {
        check_version("RemoveCellPO", version)?;
        ensure_remaining(payload, 2, "RemoveCellPO index")?;
        let index = payload.get_u16();
        let cell = get_blob(payload, "RemoveCellPO cell")?;
        Ok(Box::new(Self::new(index, cell)))
    }
}

impl PageOperation for RemoveCellPO {
    fn kind(&self) -> u8 {
        Self::KIND
    }

    fn redo(&self, page: &mut dyn PageImage) -> Result<()> {
        remove_expected(page, self.index, &self.cell, "RemoveCellPO redo")
    }

    fn undo(&self, page: &mut dyn PageImage) -> Result<()> {
        cell_page::insert_cell(page, self.index, &self.cell)
    }

    fn payload_size(&self) -> usize {
        2 + 4 + self.cell.len()
    }

    fn write_payload(&self, out: &mut BytesMut) {
        out.put_u16(self.index);
        put_blob(out, &self.cell);
    }

    fn clone_box(&self) -> Box<dyn PageOperation> {
        Box::new(self.clone())
    }
}

/// Replace the content of the cell at `index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCellPO {
    pub index: u16,
    pub before: Vec<u8>,
    pub after: Vec<u8>,
}

impl UpdateCellPO {
    pub const KIND: u8 = 5;

    pub fn new(index: u16, before: Vec<u8>, after: Vec<u8>) -> Self {
        Self {
            index,
            before,
            after,
        }
    }

    /// Build the operation from the current content of `page`
    pub fn capture(page: &dyn PageImage, index: u16, after: Vec<u8>) -> Result<Self> {
        Ok(Self::new(index, cell_page::read_cell(page, index)?, after))
    }

    pub fn decode(version: u8, payload: &mut Bytes) -> Result<Box<dyn PageOperation>> {
        check_version("UpdateCellPO", version)?;
        ensure_remaining(payload, 2, "UpdateCellPO index")?;
        let index = payload.get_u16();
        let before = get_blob(payload, "UpdateCellPO before image")?;
        let after = get_blob(payload, "UpdateCellPO after image")?;
        Ok(Box::new(Self::new(index, before, after)))
    }
}

impl PageOperation for UpdateCellPO {
    fn kind(&self) -> u8 {
        Self::KIND
    }

    fn redo(&self, page: &mut dyn PageImage) -> Result<()> {
        replace_expected(page, self.index, &self.before, &self.after, "UpdateCellPO redo")
    }

    fn undo(&self, page: &mut dyn PageImage) -> Result<()> {
        replace_expected(page, self.index, &self.after, &self.before, "UpdateCellPO undo")
    }

    fn payload_size(&self) -> usize {
        2 + 4 + self.before.len() + 4 + self.after.len()
    }

    fn write_payload(&self, out: &mut BytesMut) {
        out.put_u16(self.index);
        put_blob(out, &self.before);
        put_blob(out, &self.after);
    }

    fn clone_box(&self) -> Box<dyn PageOperation> {
        Box::new(self.clone())
    }
}

// =============================================================================
// AddLeafEntryPO
// =============================================================================

/// Encode a leaf entry as a cell: `[key_len u16][key][value]`
pub fn encode_leaf_entry(key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut cell = Vec::with_capacity(2 + key.len() + value.len());
    cell.extend_from_slice(&(key.len() as u16).to_be_bytes());
    cell.extend_from_slice(key);
    cell.extend_from_slice(value);
    cell
}

/// Split a leaf entry cell into key and value
pub fn decode_leaf_entry(cell: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    if cell.len() < 2 {
        return Err(WalError::Corruption("leaf entry cell is too short".to_string()));
    }
    let key_len = u16::from_be_bytes([cell[0], cell[1]]) as usize;
    if cell.len() < 2 + key_len {
        return Err(WalError::Corruption(format!(
            "leaf entry key of {} bytes exceeds cell of {} bytes",
            key_len,
            cell.len()
        )));
    }
    Ok((cell[2..2 + key_len].to_vec(), cell[2 + key_len..].to_vec()))
}

/// Insert a B-tree leaf entry at `index`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddLeafEntryPO {
    pub index: u16,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl AddLeafEntryPO {
    pub const KIND: u8 = 6;

    pub fn new(index: u16, key: Vec<u8>, value: Vec<u8>) -> Result<Self> {
        if key.len() > u16::MAX as usize {
            return Err(WalError::PageOperation(format!(
                "leaf key of {} bytes is too large",
                key.len()
            )));
        }
        Ok(Self { index, key, value })
    }

    pub fn decode(version: u8, payload: &mut Bytes) -> Result<Box<dyn PageOperation>> {
        check_version("AddLeafEntryPO", version)?;
        ensure_remaining(payload, 2, "AddLeafEntryPO index")?;
        let index = payload.get_u16();
        let key = get_blob(payload, "AddLeafEntryPO key")?;
        let value = get_blob(payload, "AddLeafEntryPO value")?;
        Ok(Box::new(Self::new(index, key, value)?))
    }

    fn cell(&self) -> Vec<u8> {
        encode_leaf_entry(&self.key, &self.value)
    }
}

impl PageOperation for AddLeafEntryPO {
    fn kind(&self) -> u8 {
        Self::KIND
    }

    fn redo(&self, page: &mut dyn PageImage) -> Result<()> {
        cell_page::insert_cell(page, self.index, &self.cell())
    }

    fn undo(&self, page: &mut dyn PageImage) -> Result<()> {
        remove_expected(page, self.index, &self.cell(), "AddLeafEntryPO undo")
    }

    fn payload_size(&self) -> usize {
        2 + 4 + self.key.len() + 4 + self.value.len()
    }

    fn write_payload(&self, out: &mut BytesMut) {
        out.put_u16(self.index);
        put_blob(out, &self.key);
        put_blob(out, &self.value);
    }

    fn clone_box(&self) -> Box<dyn PageOperation> {
        Box::new(self.clone())
    }
}
