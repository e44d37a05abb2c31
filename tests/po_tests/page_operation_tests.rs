//! Tests for Page Operations
//!
//! These tests verify:
//! - Every built-in operation is reversible: undo(redo(p)) == p
//! - Redo and undo refuse pages that are not in the expected state
//! - Constructors reject malformed operations
//! - `capture` builds operations from current page content
//! - The registry decodes framed operations and accepts custom kinds

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use pagelog::error::{Result, WalError};
use pagelog::po::cell_page;
use pagelog::po::{
    decode_leaf_entry, encode_leaf_entry, AddLeafEntryPO, InsertCellPO, PageImage, PageOperation,
    PageOperationRegistry, RemoveCellPO, SetFieldPO, UpdateCellPO, WriteBytesPO,
};
use pagelog::wal::OperationUnitId;
use pagelog::{DiskWriteAheadLog, LogSequenceNumber, PageKey, PageOperationRecord, WalConfig, WalRecord};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const PAGE_SIZE: usize = 512;

fn empty_page() -> Vec<u8> {
    vec![0u8; PAGE_SIZE]
}

/// A page holding the given cells, in order
fn page_with_cells(cells: &[&[u8]]) -> Vec<u8> {
    let mut page = empty_page();
    for (index, cell) in cells.iter().enumerate() {
        cell_page::insert_cell(&mut page, index as u16, cell).unwrap();
    }
    page
}

/// Check undo(redo(p)) == p and redo(undo(redo(p))) == redo(p)
fn assert_reversible(operation: &dyn PageOperation, page: &[u8]) {
    let mut current = page.to_vec();
    operation.redo(&mut current).unwrap();
    let redone = current.clone();
    assert_ne!(redone, page, "redo should change the page");

    operation.undo(&mut current).unwrap();
    assert_eq!(current, page);

    operation.redo(&mut current).unwrap();
    assert_eq!(current, redone);
}

/// Flips the bits of one byte; registered under a custom kind
#[derive(Debug, Clone)]
struct XorBytePO {
    offset: u32,
    mask: u8,
}

impl XorBytePO {
    const KIND: u8 = 100;

    fn decode(_version: u8, payload: &mut Bytes) -> Result<Box<dyn PageOperation>> {
        if payload.remaining() < 5 {
            return Err(WalError::Corruption("truncated XorBytePO".to_string()));
        }
        let offset = payload.get_u32();
        let mask = payload.get_u8();
        Ok(Box::new(Self { offset, mask }))
    }

    fn flip(&self, page: &mut dyn PageImage) -> Result<()> {
        let current = page.read_bytes(self.offset as usize, 1)?;
        page.write_bytes(self.offset as usize, &[current[0] ^ self.mask])
    }
}

impl PageOperation for XorBytePO {
    fn kind(&self) -> u8 {
        Self::KIND
    }

    fn redo(&self, page: &mut dyn PageImage) -> Result<()> {
        self.flip(page)
    }

    fn undo(&self, page: &mut dyn PageImage) -> Result<()> {
        self.flip(page)
    }

    fn payload_size(&self) -> usize {
        5
    }

    fn write_payload(&self, out: &mut BytesMut) {
        out.put_u32(self.offset);
        out.put_u8(self.mask);
    }

    fn clone_box(&self) -> Box<dyn PageOperation> {
        Box::new(self.clone())
    }
}

fn is_page_operation_error<T>(result: Result<T>) -> bool {
    matches!(result, Err(WalError::PageOperation(_)))
}

// =============================================================================
// Reversibility Tests
// =============================================================================

#[test]
fn test_write_bytes_is_reversible() {
    let operation = WriteBytesPO::new(100, vec![0; 5], b"hello".to_vec()).unwrap();
    assert_reversible(&operation, &empty_page());
}

#[test]
fn test_set_field_is_reversible_for_every_width() {
    for (width, value) in [(1u8, 0xABu64), (2, 0xBEEF), (4, 0xDEAD_BEEF), (8, u64::MAX - 1)] {
        let operation = SetFieldPO::new(8, width, 0, value).unwrap();
        assert_reversible(&operation, &empty_page());
    }
}

#[test]
fn test_set_field_writes_big_endian() {
    let mut page = empty_page();
    SetFieldPO::new(4, 2, 0, 0x0102).unwrap().redo(&mut page).unwrap();
    assert_eq!(&page[4..6], &[0x01, 0x02]);
}

#[test]
fn test_cell_operations_are_reversible() {
    let page = page_with_cells(&[b"first", b"second", b"third"]);

    assert_reversible(&InsertCellPO::new(0, b"new".to_vec()), &page);
    assert_reversible(&InsertCellPO::new(3, b"last".to_vec()), &page);
    assert_reversible(&RemoveCellPO::new(1, b"second".to_vec()), &page);
    assert_reversible(
        &UpdateCellPO::new(2, b"third".to_vec(), b"a much longer third cell".to_vec()),
        &page,
    );
    assert_reversible(&UpdateCellPO::new(0, b"first".to_vec(), b"1".to_vec()), &page);
    assert_reversible(
        &AddLeafEntryPO::new(1, b"key".to_vec(), b"value".to_vec()).unwrap(),
        &page,
    );
}

#[test]
fn test_add_leaf_entry_stores_encoded_cell() {
    let mut page = empty_page();
    AddLeafEntryPO::new(0, b"k1".to_vec(), b"v1".to_vec())
        .unwrap()
        .redo(&mut page)
        .unwrap();

    let cell = cell_page::read_cell(&page, 0).unwrap();
    assert_eq!(cell, encode_leaf_entry(b"k1", b"v1"));
    assert_eq!(decode_leaf_entry(&cell).unwrap(), (b"k1".to_vec(), b"v1".to_vec()));
}

// =============================================================================
// Pre-State Tests
// =============================================================================

#[test]
fn test_write_bytes_requires_expected_content() {
    let operation = WriteBytesPO::new(0, vec![1, 2], vec![3, 4]).unwrap();

    let mut page = empty_page();
    assert!(is_page_operation_error(operation.redo(&mut page)));
    assert!(is_page_operation_error(operation.undo(&mut page)));
    assert_eq!(page, empty_page());
}

#[test]
fn test_set_field_requires_expected_value() {
    let operation = SetFieldPO::new(0, 4, 7, 8).unwrap();
    let mut page = empty_page();
    assert!(is_page_operation_error(operation.redo(&mut page)));
}

#[test]
fn test_cell_operations_require_expected_cells() {
    let mut page = page_with_cells(&[b"one"]);
    let original = page.clone();

    assert!(is_page_operation_error(
        RemoveCellPO::new(0, b"two".to_vec()).redo(&mut page)
    ));
    assert!(is_page_operation_error(
        UpdateCellPO::new(0, b"two".to_vec(), b"three".to_vec()).redo(&mut page)
    ));
    assert!(is_page_operation_error(
        InsertCellPO::new(0, b"zero".to_vec()).undo(&mut page)
    ));
    assert!(is_page_operation_error(
        RemoveCellPO::new(4, b"one".to_vec()).redo(&mut page)
    ));
    assert_eq!(page, original);
}

#[test]
fn test_write_outside_page_fails() {
    let operation = WriteBytesPO::new(PAGE_SIZE as u32 - 1, vec![0, 0], vec![1, 1]).unwrap();
    let mut page = empty_page();
    assert!(is_page_operation_error(operation.redo(&mut page)));
}

// =============================================================================
// Constructor Tests
// =============================================================================

#[test]
fn test_constructors_reject_malformed_operations() {
    assert!(is_page_operation_error(WriteBytesPO::new(0, vec![0], vec![0, 0])));
    assert!(is_page_operation_error(SetFieldPO::new(0, 3, 0, 0)));
    assert!(is_page_operation_error(SetFieldPO::new(0, 1, 0, 256)));
    assert!(is_page_operation_error(AddLeafEntryPO::new(
        0,
        vec![0; u16::MAX as usize + 1],
        Vec::new()
    )));
}

#[test]
fn test_capture_reads_current_content() {
    let mut page = page_with_cells(&[b"alpha", b"beta"]);
    page[0..4].copy_from_slice(&[0, 0, 0x12, 0x34]);

    let write = WriteBytesPO::capture(&page, 1, &[9, 9]).unwrap();
    assert_eq!(write.before, vec![0, 0x12]);

    let field = SetFieldPO::capture(&page, 0, 4, 1).unwrap();
    assert_eq!(field.before, 0x1234);

    let remove = RemoveCellPO::capture(&page, 1).unwrap();
    assert_eq!(remove.cell, b"beta".to_vec());

    let update = UpdateCellPO::capture(&page, 0, b"ALPHA".to_vec()).unwrap();
    assert_eq!(update.before, b"alpha".to_vec());

    assert!(is_page_operation_error(RemoveCellPO::capture(&page, 2)));
}

#[test]
fn test_decode_leaf_entry_rejects_short_cells() {
    assert!(matches!(decode_leaf_entry(&[0]), Err(WalError::Corruption(_))));
    assert!(matches!(decode_leaf_entry(&[0, 5, 1]), Err(WalError::Corruption(_))));
}

// =============================================================================
// Registry Tests
// =============================================================================

#[test]
fn test_builtin_registry_knows_every_kind() {
    let registry = PageOperationRegistry::builtin();
    for kind in [
        WriteBytesPO::KIND,
        SetFieldPO::KIND,
        InsertCellPO::KIND,
        RemoveCellPO::KIND,
        UpdateCellPO::KIND,
        AddLeafEntryPO::KIND,
    ] {
        assert!(registry.contains(kind));
    }
    assert!(!registry.contains(XorBytePO::KIND));
    assert!(!PageOperationRegistry::empty().contains(WriteBytesPO::KIND));
}

#[test]
fn test_duplicate_registration_fails() {
    let mut registry = PageOperationRegistry::builtin();
    let result = registry.register(WriteBytesPO::KIND, XorBytePO::decode);
    assert!(matches!(result, Err(WalError::ProtocolViolation(_))));

    registry.register(XorBytePO::KIND, XorBytePO::decode).unwrap();
    assert!(registry.contains(XorBytePO::KIND));
}

#[test]
fn test_framed_operation_decodes() {
    let registry = PageOperationRegistry::builtin();
    let operation = UpdateCellPO::new(3, b"old".to_vec(), b"new".to_vec());

    let mut out = BytesMut::new();
    PageOperationRegistry::encode_framed(&operation, &mut out);
    let mut buf = out.freeze();
    let decoded = registry.decode_framed(&mut buf).unwrap();

    assert_eq!(decoded.kind(), UpdateCellPO::KIND);
    assert!(!buf.has_remaining());

    let mut page = page_with_cells(&[b"a", b"b", b"c", b"old"]);
    decoded.redo(&mut page).unwrap();
    assert_eq!(cell_page::read_cell(&page, 3).unwrap(), b"new".to_vec());
}

#[test]
fn test_decode_framed_errors() {
    let registry = PageOperationRegistry::builtin();

    // Unknown kind
    let mut unknown = BytesMut::new();
    PageOperationRegistry::encode_framed(&XorBytePO { offset: 0, mask: 1 }, &mut unknown);
    let result = registry.decode_framed(&mut unknown.freeze());
    assert!(matches!(result, Err(WalError::UnknownPageOperation(100))));

    // Unsupported version
    let mut versioned = BytesMut::new();
    PageOperationRegistry::encode_framed(&InsertCellPO::new(0, vec![1]), &mut versioned);
    versioned[1] = 9;
    let result = registry.decode_framed(&mut versioned.freeze());
    assert!(matches!(result, Err(WalError::Corruption(_))));

    // Payload longer than the operation needs
    let mut padded = BytesMut::new();
    padded.put_u8(SetFieldPO::KIND);
    padded.put_u8(1);
    padded.put_u32(4 + 1 + 8 + 8 + 1);
    padded.put_u32(0);
    padded.put_u8(1);
    padded.put_u64(0);
    padded.put_u64(1);
    padded.put_u8(0xFF);
    let result = registry.decode_framed(&mut padded.freeze());
    assert!(matches!(result, Err(WalError::Corruption(_))));

    // Truncated header
    let result = registry.decode_framed(&mut Bytes::from_static(&[1, 1]));
    assert!(matches!(result, Err(WalError::Corruption(_))));
}

#[test]
fn test_page_operation_record_decodes_to_equal_record() {
    let registry = PageOperationRegistry::builtin();
    let record = PageOperationRecord::new(
        PageKey::new(5, 6),
        OperationUnitId(7),
        LogSequenceNumber::new(1, 2),
        Box::new(SetFieldPO::new(16, 2, 1, 2).unwrap()),
    );

    let mut out = BytesMut::new();
    record.encode(&mut out);
    assert_eq!(out.len(), record.encoded_size());

    let decoded = PageOperationRecord::decode(&mut out.freeze(), &registry).unwrap();
    assert_eq!(decoded, record);
}

#[test]
fn test_custom_operation_through_the_log() {
    let temp = TempDir::new().unwrap();
    let config = WalConfig::builder()
        .wal_dir(temp.path())
        .storage_name("custom")
        .commit_delay(Duration::from_millis(20))
        .build();

    let mut registry = PageOperationRegistry::builtin();
    registry.register(XorBytePO::KIND, XorBytePO::decode).unwrap();

    let record = PageOperationRecord::new(
        PageKey::new(1, 1),
        OperationUnitId(1),
        LogSequenceNumber::ZERO,
        Box::new(XorBytePO { offset: 2, mask: 0x0F }),
    );
    let lsn = {
        let wal = DiskWriteAheadLog::open_with_registry(config.clone(), registry).unwrap();
        let lsn = wal.log(&WalRecord::PageOperation(record.clone())).unwrap();

        match wal.read(lsn).unwrap() {
            Some(WalRecord::PageOperation(read)) => {
                assert_eq!(read, record);
                let mut page = empty_page();
                read.redo(&mut page).unwrap();
                assert_eq!(page[2], 0x0F);
            }
            other => panic!("unexpected record {:?}", other),
        }
        wal.close(true).unwrap();
        lsn
    };

    // Without the custom decoder the record is reported by kind
    let wal = DiskWriteAheadLog::open(config).unwrap();
    assert!(matches!(
        wal.read(lsn),
        Err(WalError::UnknownPageOperation(XorBytePO::KIND))
    ));
}
