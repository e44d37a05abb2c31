//! Cell Page Layout
//!
//! A compact slotless page layout used by the built-in cell operations.
//!
//! ```text
//! ┌────────────────────┬────────────┬──────────┬──────────────────────┬───────────┐
//! │ Caller header (16) │ Count (2)  │ Used (2) │ Cells [len u16][..]  │ Zero fill │
//! └────────────────────┴────────────┴──────────┴──────────────────────┴───────────┘
//! ```
//!
//! Cells are packed from `CELLS_OFFSET` with no gaps and the area after them
//! is kept zeroed: insert shifts later cells right, remove shifts them left
//! and zero-fills the freed bytes. This makes insert and remove exact
//! inverses of each other at the byte level.

use crate::error::{Result, WalError};

use super::PageImage;

/// Bytes at the start of the page reserved for the caller
pub const HEADER_RESERVED: usize = 16;

/// Offset of the cell count (u16 BE)
pub const CELL_COUNT_OFFSET: usize = HEADER_RESERVED;

/// Offset of the bytes used by cells, length prefixes included (u16 BE)
pub const USED_OFFSET: usize = CELL_COUNT_OFFSET + 2;

/// Offset of the first cell
pub const CELLS_OFFSET: usize = USED_OFFSET + 2;

/// Size of the length prefix of every cell
pub const CELL_HEADER_SIZE: usize = 2;

fn read_u16<P: PageImage + ?Sized>(page: &P, offset: usize) -> Result<u16> {
    let bytes = page.read_bytes(offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn write_u16<P: PageImage + ?Sized>(page: &mut P, offset: usize, value: u16) -> Result<()> {
    page.write_bytes(offset, &value.to_be_bytes())
}

pub fn cell_count<P: PageImage + ?Sized>(page: &P) -> Result<u16> {
    read_u16(page, CELL_COUNT_OFFSET)
}

/// Bytes occupied by packed cells
pub fn used_bytes<P: PageImage + ?Sized>(page: &P) -> Result<usize> {
    Ok(read_u16(page, USED_OFFSET)? as usize)
}

/// Bytes still available for one more cell (length prefix included)
pub fn free_space<P: PageImage + ?Sized>(page: &P) -> Result<usize> {
    Ok(page
        .page_size()
        .saturating_sub(CELLS_OFFSET + used_bytes(page)?))
}

/// Offset of the cell at `index`; `index == count` gives the end of the cells
fn cell_offset<P: PageImage + ?Sized>(page: &P, index: u16) -> Result<usize> {
    let count = cell_count(page)?;
    if index > count {
        return Err(WalError::PageOperation(format!(
            "cell index {} out of range (count {})",
            index, count
        )));
    }

    let mut offset = CELLS_OFFSET;
    for _ in 0..index {
        offset += CELL_HEADER_SIZE + read_u16(page, offset)? as usize;
    }
    Ok(offset)
}

fn check_index<P: PageImage + ?Sized>(page: &P, index: u16) -> Result<()> {
    let count = cell_count(page)?;
    if index >= count {
        return Err(WalError::PageOperation(format!(
            "no cell at index {} (count {})",
            index, count
        )));
    }
    Ok(())
}

/// Read the content of the cell at `index`
pub fn read_cell<P: PageImage + ?Sized>(page: &P, index: u16) -> Result<Vec<u8>> {
    check_index(page, index)?;
    let offset = cell_offset(page, index)?;
    let len = read_u16(page, offset)? as usize;
    page.read_bytes(offset + CELL_HEADER_SIZE, len)
}

/// Insert a cell at `index`, shifting later cells right
pub fn insert_cell<P: PageImage + ?Sized>(page: &mut P, index: u16, cell: &[u8]) -> Result<()> {
    if cell.len() > u16::MAX as usize {
        return Err(WalError::PageOperation(format!(
            "cell of {} bytes is too large",
            cell.len()
        )));
    }
    let needed = CELL_HEADER_SIZE + cell.len();
    if needed > free_space(page)? {
        return Err(WalError::PageOperation(format!(
            "not enough free space for a cell of {} bytes",
            cell.len()
        )));
    }

    let count = cell_count(page)?;
    let used = used_bytes(page)?;
    let offset = cell_offset(page, index)?;
    let end = CELLS_OFFSET + used;
    let tail = page.read_bytes(offset, end - offset)?;

    page.write_bytes(offset, &(cell.len() as u16).to_be_bytes())?;
    page.write_bytes(offset + CELL_HEADER_SIZE, cell)?;
    page.write_bytes(offset + needed, &tail)?;

    write_u16(page, CELL_COUNT_OFFSET, count + 1)?;
    write_u16(page, USED_OFFSET, (used + needed) as u16)
}

/// Remove the cell at `index`, shifting later cells left; returns its content
pub fn remove_cell<P: PageImage + ?Sized>(page: &mut P, index: u16) -> Result<Vec<u8>> {
    let cell = read_cell(page, index)?;
    let count = cell_count(page)?;
    let used = used_bytes(page)?;
    let offset = cell_offset(page, index)?;
    let removed = CELL_HEADER_SIZE + cell.len();
    let end = CELLS_OFFSET + used;

    let tail = page.read_bytes(offset + removed, end - offset - removed)?;
    page.write_bytes(offset, &tail)?;
    page.write_bytes(end - removed, &vec![0u8; removed])?;

    write_u16(page, CELL_COUNT_OFFSET, count - 1)?;
    write_u16(page, USED_OFFSET, (used - removed) as u16)?;
    Ok(cell)
}

/// Replace the content of the cell at `index`
pub fn replace_cell<P: PageImage + ?Sized>(page: &mut P, index: u16, cell: &[u8]) -> Result<Vec<u8>> {
    let previous = read_cell(page, index)?;
    let grows_by = cell.len().saturating_sub(previous.len());
    if grows_by > free_space(page)? {
        return Err(WalError::PageOperation(format!(
            "not enough free space to grow cell {} by {} bytes",
            index, grows_by
        )));
    }
    remove_cell(page, index)?;
    insert_cell(page, index, cell)?;
    Ok(previous)
}

/// Read every cell in order
pub fn cells<P: PageImage + ?Sized>(page: &P) -> Result<Vec<Vec<u8>>> {
    let count = cell_count(page)?;
    let mut out = Vec::with_capacity(count as usize);
    let mut offset = CELLS_OFFSET;
    for _ in 0..count {
        let len = read_u16(page, offset)? as usize;
        out.push(page.read_bytes(offset + CELL_HEADER_SIZE, len)?);
        offset += CELL_HEADER_SIZE + len;
    }
    Ok(out)
}
