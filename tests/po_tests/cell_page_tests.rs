//! Tests for the Cell Page Layout
//!
//! These tests verify:
//! - Cells are kept in order across insert, remove and replace
//! - The header tracks count and used bytes
//! - Free space accounting and the full-page case
//! - Out-of-range indexes are rejected
//! - Insert followed by remove restores the exact page bytes

use pagelog::error::WalError;
use pagelog::po::cell_page::{
    self, cell_count, cells, free_space, insert_cell, read_cell, remove_cell, replace_cell,
    used_bytes, CELLS_OFFSET, CELL_HEADER_SIZE, HEADER_RESERVED,
};

// =============================================================================
// Helper Functions
// =============================================================================

const PAGE_SIZE: usize = 128;

fn empty_page() -> Vec<u8> {
    vec![0u8; PAGE_SIZE]
}

fn is_page_operation_error<T>(result: pagelog::error::Result<T>) -> bool {
    matches!(result, Err(WalError::PageOperation(_)))
}

// =============================================================================
// Basic Tests
// =============================================================================

#[test]
fn test_empty_page() {
    let page = empty_page();
    assert_eq!(cell_count(&page).unwrap(), 0);
    assert_eq!(used_bytes(&page).unwrap(), 0);
    assert_eq!(free_space(&page).unwrap(), PAGE_SIZE - CELLS_OFFSET);
    assert!(cells(&page).unwrap().is_empty());
}

#[test]
fn test_insert_keeps_order() {
    let mut page = empty_page();
    insert_cell(&mut page, 0, b"b").unwrap();
    insert_cell(&mut page, 0, b"a").unwrap();
    insert_cell(&mut page, 2, b"d").unwrap();
    insert_cell(&mut page, 2, b"c").unwrap();

    assert_eq!(
        cells(&page).unwrap(),
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
    );
    assert_eq!(cell_count(&page).unwrap(), 4);
    assert_eq!(used_bytes(&page).unwrap(), 4 * (CELL_HEADER_SIZE + 1));
    assert_eq!(read_cell(&page, 2).unwrap(), b"c".to_vec());
}

#[test]
fn test_header_is_big_endian_after_caller_area() {
    let mut page = empty_page();
    insert_cell(&mut page, 0, b"xyz").unwrap();

    assert!(page[..HEADER_RESERVED].iter().all(|b| *b == 0));
    assert_eq!(&page[cell_page::CELL_COUNT_OFFSET..cell_page::CELL_COUNT_OFFSET + 2], &[0, 1]);
    assert_eq!(&page[cell_page::USED_OFFSET..cell_page::USED_OFFSET + 2], &[0, 5]);
    assert_eq!(&page[CELLS_OFFSET..CELLS_OFFSET + 5], &[0, 3, b'x', b'y', b'z']);
}

#[test]
fn test_remove_returns_cell_and_shifts_left() {
    let mut page = empty_page();
    for (index, cell) in [&b"one"[..], &b"two"[..], &b"three"[..]].iter().enumerate() {
        insert_cell(&mut page, index as u16, cell).unwrap();
    }

    assert_eq!(remove_cell(&mut page, 1).unwrap(), b"two".to_vec());
    assert_eq!(cells(&page).unwrap(), vec![b"one".to_vec(), b"three".to_vec()]);
    assert_eq!(used_bytes(&page).unwrap(), 2 * CELL_HEADER_SIZE + 8);
}

#[test]
fn test_replace_returns_previous_cell() {
    let mut page = empty_page();
    insert_cell(&mut page, 0, b"short").unwrap();
    insert_cell(&mut page, 1, b"tail").unwrap();

    let previous = replace_cell(&mut page, 0, b"much longer").unwrap();
    assert_eq!(previous, b"short".to_vec());
    assert_eq!(cells(&page).unwrap(), vec![b"much longer".to_vec(), b"tail".to_vec()]);

    replace_cell(&mut page, 0, b"s").unwrap();
    assert_eq!(read_cell(&page, 0).unwrap(), b"s".to_vec());
    assert_eq!(read_cell(&page, 1).unwrap(), b"tail".to_vec());
}

// =============================================================================
// Byte-Level Inverse Tests
// =============================================================================

#[test]
fn test_insert_then_remove_restores_page_bytes() {
    let mut page = empty_page();
    insert_cell(&mut page, 0, b"keep-1").unwrap();
    insert_cell(&mut page, 1, b"keep-2").unwrap();
    let before = page.clone();

    insert_cell(&mut page, 1, b"temporary").unwrap();
    remove_cell(&mut page, 1).unwrap();
    assert_eq!(page, before);
}

#[test]
fn test_free_area_stays_zeroed() {
    let mut page = empty_page();
    insert_cell(&mut page, 0, &[0xFF; 20]).unwrap();
    insert_cell(&mut page, 1, &[0xEE; 10]).unwrap();
    remove_cell(&mut page, 0).unwrap();

    let end = CELLS_OFFSET + used_bytes(&page).unwrap();
    assert!(page[end..].iter().all(|b| *b == 0));
}

// =============================================================================
// Capacity and Range Tests
// =============================================================================

#[test]
fn test_insert_fails_without_space() {
    let mut page = empty_page();
    let fits = free_space(&page).unwrap() - CELL_HEADER_SIZE;
    insert_cell(&mut page, 0, &vec![1u8; fits]).unwrap();
    assert_eq!(free_space(&page).unwrap(), 0);

    let before = page.clone();
    assert!(is_page_operation_error(insert_cell(&mut page, 1, b"")));
    assert_eq!(page, before);
}

#[test]
fn test_replace_fails_when_growth_does_not_fit() {
    let mut page = empty_page();
    let fits = free_space(&page).unwrap() - 2 * CELL_HEADER_SIZE - 4;
    insert_cell(&mut page, 0, &vec![1u8; fits]).unwrap();
    insert_cell(&mut page, 1, b"abcd").unwrap();

    let before = page.clone();
    assert!(is_page_operation_error(replace_cell(&mut page, 1, b"abcde")));
    assert_eq!(page, before);
}

#[test]
fn test_out_of_range_indexes_fail() {
    let mut page = empty_page();
    insert_cell(&mut page, 0, b"only").unwrap();

    assert!(is_page_operation_error(read_cell(&page, 1)));
    assert!(is_page_operation_error(remove_cell(&mut page, 1)));
    assert!(is_page_operation_error(replace_cell(&mut page, 3, b"x")));
    assert!(is_page_operation_error(insert_cell(&mut page, 2, b"gap")));
    assert_eq!(cells(&page).unwrap(), vec![b"only".to_vec()]);
}
