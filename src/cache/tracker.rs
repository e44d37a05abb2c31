//! Cache Entry Change Tracker
//!
//! `CacheEntryChanges` wraps one cache entry for the duration of an atomic
//! operation. Page writes land in a sparse overlay instead of the entry's
//! buffer, and every page operation applied through the wrapper is kept so
//! it can be logged.
//!
//! ```text
//!   apply(op) ──▶ op.redo(overlay) ──▶ recorded ops
//!                       │
//!        commit(lsn) ───┴──▶ overlay merged into entry, page LSN stamped
//!        rollback()  ──────▶ ops undone in reverse, overlay dropped
//! ```

use crate::error::Result;
use crate::lsn::LogSequenceNumber;
use crate::po::{PageImage, PageOperation, PageOperationRecord};
use crate::wal::OperationUnitId;

use super::changes::PageChanges;
use super::{CacheEntry, PageBuffer};

/// Copy-on-write view of a cache entry that records page operations
pub struct CacheEntryChanges<E: PageBuffer> {
    delegate: E,
    changes: PageChanges,
    /// Page LSN before the first change
    original_lsn: LogSequenceNumber,
    lsn: Option<LogSequenceNumber>,
    is_new: bool,
    pin_page: bool,
    operations: Vec<Box<dyn PageOperation>>,
}

impl<E: PageBuffer> CacheEntryChanges<E> {
    /// Track changes to an existing page
    pub fn new(delegate: E) -> Self {
        let original_lsn = delegate.page_lsn();
        Self::build(delegate, original_lsn, false)
    }

    /// Track changes to a page allocated by this operation
    pub fn new_page(delegate: E) -> Self {
        Self::build(delegate, LogSequenceNumber::ZERO, true)
    }

    fn build(delegate: E, original_lsn: LogSequenceNumber, is_new: bool) -> Self {
        let page_size = delegate.buffer().len();
        Self {
            delegate,
            changes: PageChanges::new(page_size),
            original_lsn,
            lsn: None,
            is_new,
            pin_page: false,
            operations: Vec::new(),
        }
    }

    pub fn delegate(&self) -> &E {
        &self.delegate
    }

    pub fn changes(&self) -> &PageChanges {
        &self.changes
    }

    pub fn original_lsn(&self) -> LogSequenceNumber {
        self.original_lsn
    }

    /// LSN the page was committed with
    pub fn lsn(&self) -> Option<LogSequenceNumber> {
        self.lsn
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn pin_page(&self) -> bool {
        self.pin_page
    }

    /// Ask the cache to keep the page resident
    pub fn set_pin_page(&mut self, pin: bool) {
        self.pin_page = pin;
    }

    // =========================================================================
    // Page Operations
    // =========================================================================

    /// Apply a page operation to the overlay and record it
    pub fn apply(&mut self, operation: Box<dyn PageOperation>) -> Result<()> {
        operation.redo(self)?;
        self.operations.push(operation);
        Ok(())
    }

    pub fn page_operations(&self) -> &[Box<dyn PageOperation>] {
        &self.operations
    }

    pub fn take_page_operations(&mut self) -> Vec<Box<dyn PageOperation>> {
        std::mem::take(&mut self.operations)
    }

    /// Records ready to be logged for the recorded operations, in apply order
    pub fn page_operation_records(&self, operation_id: OperationUnitId) -> Vec<PageOperationRecord> {
        let page = self.delegate.page_key();
        self.operations
            .iter()
            .map(|operation| {
                PageOperationRecord::new(page, operation_id, self.original_lsn, operation.clone_box())
            })
            .collect()
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Merge the overlay into the entry, stamp `lsn` and mark it dirty
    pub fn commit(mut self, lsn: LogSequenceNumber) -> E {
        self.changes.apply_to(self.delegate.buffer_mut());
        self.delegate.set_page_lsn(lsn);
        self.delegate.mark_dirty();
        self.lsn = Some(lsn);

        tracing::trace!(
            page = %self.delegate.page_key(),
            lsn = %lsn,
            operations = self.operations.len(),
            "committed page changes"
        );
        self.delegate
    }

    /// Undo recorded operations in reverse, drop the overlay and restore the original LSN
    pub fn rollback(mut self) -> Result<E> {
        let operations = std::mem::take(&mut self.operations);
        for operation in operations.iter().rev() {
            operation.undo(&mut self)?;
        }

        self.changes.clear();
        self.delegate.set_page_lsn(self.original_lsn);
        Ok(self.delegate)
    }
}

// =============================================================================
// Page Image (overlay view)
// =============================================================================

impl<E: PageBuffer> PageImage for CacheEntryChanges<E> {
    fn page_size(&self) -> usize {
        self.changes.page_size()
    }

    fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.changes.read_bytes(self.delegate.buffer(), offset, len)
    }

    fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.changes.set_bytes(self.delegate.buffer(), offset, data)
    }
}

// =============================================================================
// Cache Entry (forwarded)
// =============================================================================
//
// No page buffer here: page content is only reachable through the overlay.

impl<E: PageBuffer> CacheEntry for CacheEntryChanges<E> {
    fn file_id(&self) -> u64 {
        self.delegate.file_id()
    }

    fn page_index(&self) -> u64 {
        self.delegate.page_index()
    }

    fn acquire_exclusive_lock(&self) {
        self.delegate.acquire_exclusive_lock();
    }

    fn release_exclusive_lock(&self) -> Result<()> {
        self.delegate.release_exclusive_lock()
    }

    fn acquire_shared_lock(&self) {
        self.delegate.acquire_shared_lock();
    }

    fn release_shared_lock(&self) -> Result<()> {
        self.delegate.release_shared_lock()
    }

    fn is_lock_acquired_by_current_thread(&self) -> bool {
        self.delegate.is_lock_acquired_by_current_thread()
    }

    fn mark_dirty(&self) {
        self.delegate.mark_dirty();
    }

    fn clear_dirty(&self) {
        self.delegate.clear_dirty();
    }

    fn is_dirty(&self) -> bool {
        self.delegate.is_dirty()
    }

    fn usages_count(&self) -> usize {
        self.delegate.usages_count()
    }

    fn increment_usages(&self) {
        self.delegate.increment_usages();
    }

    fn decrement_usages(&self) {
        self.delegate.decrement_usages();
    }

    fn page_lsn(&self) -> LogSequenceNumber {
        self.delegate.page_lsn()
    }
}
