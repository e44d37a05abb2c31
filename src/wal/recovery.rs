//! WAL Recovery
//!
//! Replays page operations from the log against a page store.
//!
//! This will:
//! 1. Start at the last checkpoint (or the first record)
//! 2. Buffer page operations per atomic operation
//! 3. Redo committed operations on pages that have not seen them yet
//! 4. Undo rolled-back and unfinished operations on pages that contain them
//!
//! Page LSNs decide what a page already contains: an operation logged at
//! `lsn` is present on a page whose LSN is at least `lsn`.

use std::collections::HashMap;

use crate::error::Result;
use crate::lsn::LogSequenceNumber;
use crate::po::{PageImage, PageKey, PageOperationRecord};

use super::manager::DiskWriteAheadLog;
use super::reader::WalReader;
use super::record::{OperationUnitId, WalRecord};

/// Default size of pages created by `MemoryPageStore`
pub const DEFAULT_PAGE_SIZE: usize = 4096;

// =============================================================================
// Page Store
// =============================================================================

/// Pages recovery replays into
pub trait PageStore {
    /// Current LSN of a page; `LogSequenceNumber::ZERO` for a page never written
    fn page_lsn(&mut self, page: PageKey) -> Result<LogSequenceNumber>;

    fn set_page_lsn(&mut self, page: PageKey, lsn: LogSequenceNumber) -> Result<()>;

    /// Mutable page image, created zeroed if missing
    fn page(&mut self, page: PageKey) -> Result<&mut dyn PageImage>;
}

struct StoredPage {
    data: Vec<u8>,
    lsn: LogSequenceNumber,
}

/// In-memory page store
pub struct MemoryPageStore {
    page_size: usize,
    pages: HashMap<PageKey, StoredPage>,
}

impl MemoryPageStore {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: HashMap::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Content of a page, if it exists
    pub fn page_bytes(&self, page: PageKey) -> Option<&[u8]> {
        self.pages.get(&page).map(|stored| stored.data.as_slice())
    }

    /// Install a page image and its LSN
    pub fn insert_page(&mut self, page: PageKey, data: Vec<u8>, lsn: LogSequenceNumber) {
        self.pages.insert(page, StoredPage { data, lsn });
    }

    fn entry(&mut self, page: PageKey) -> &mut StoredPage {
        let page_size = self.page_size;
        self.pages.entry(page).or_insert_with(|| StoredPage {
            data: vec![0u8; page_size],
            lsn: LogSequenceNumber::ZERO,
        })
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl PageStore for MemoryPageStore {
    fn page_lsn(&mut self, page: PageKey) -> Result<LogSequenceNumber> {
        Ok(self
            .pages
            .get(&page)
            .map_or(LogSequenceNumber::ZERO, |stored| stored.lsn))
    }

    fn set_page_lsn(&mut self, page: PageKey, lsn: LogSequenceNumber) -> Result<()> {
        self.entry(page).lsn = lsn;
        Ok(())
    }

    fn page(&mut self, page: PageKey) -> Result<&mut dyn PageImage> {
        Ok(&mut self.entry(page).data)
    }
}

// =============================================================================
// Recovery
// =============================================================================

/// Result of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of records read
    pub records_scanned: u64,

    /// LSN recovery started at
    pub start_lsn: Option<LogSequenceNumber>,

    /// Last LSN read
    pub last_lsn: Option<LogSequenceNumber>,

    pub operations_committed: u64,
    pub operations_rolled_back: u64,

    /// Operations with no end record
    pub operations_incomplete: u64,

    pub page_operations_redone: u64,
    pub page_operations_undone: u64,
}

type Buffered = Vec<(LogSequenceNumber, PageOperationRecord)>;

/// Replays a log into a page store
pub struct WalRecovery;

impl WalRecovery {
    /// Redo committed and undo unfinished operations found in the log
    pub fn recover(wal: &DiskWriteAheadLog, store: &mut dyn PageStore) -> Result<RecoveryResult> {
        let result = Self::scan(wal, |outcome, operations, result| match outcome {
            Outcome::Committed => Self::redo(store, operations, result),
            Outcome::RolledBack | Outcome::Incomplete => Self::undo(store, operations, result),
        })?;

        tracing::info!(
            records = result.records_scanned,
            committed = result.operations_committed,
            rolled_back = result.operations_rolled_back,
            incomplete = result.operations_incomplete,
            redone = result.page_operations_redone,
            undone = result.page_operations_undone,
            "recovery complete"
        );
        Ok(result)
    }

    /// Scan the log and classify operations without touching any page
    pub fn verify(wal: &DiskWriteAheadLog) -> Result<RecoveryResult> {
        Self::scan(wal, |_, _, _| Ok(()))
    }

    fn scan<F>(wal: &DiskWriteAheadLog, mut apply: F) -> Result<RecoveryResult>
    where
        F: FnMut(Outcome, &Buffered, &mut RecoveryResult) -> Result<()>,
    {
        let start = match wal.last_checkpoint() {
            Some(checkpoint) => Some(checkpoint),
            None => wal.begin()?,
        };
        let mut result = RecoveryResult {
            start_lsn: start,
            ..RecoveryResult::default()
        };
        let Some(start) = start else {
            return Ok(result);
        };

        tracing::debug!(start = %start, "starting log replay");

        let mut pending: HashMap<OperationUnitId, Buffered> = HashMap::new();
        let mut started: Vec<OperationUnitId> = Vec::new();

        for item in WalReader::new(wal, start) {
            let (lsn, record) = item?;
            result.records_scanned += 1;
            result.last_lsn = Some(lsn);

            match record {
                WalRecord::AtomicUnitStart { operation_id, .. } => {
                    if pending.insert(operation_id, Vec::new()).is_none() {
                        started.push(operation_id);
                    }
                }
                WalRecord::PageOperation(operation) => {
                    let operation_id = operation.operation_id;
                    pending
                        .entry(operation_id)
                        .or_insert_with(|| {
                            started.push(operation_id);
                            Vec::new()
                        })
                        .push((lsn, operation));
                }
                WalRecord::AtomicUnitEnd {
                    operation_id,
                    rollback,
                    ..
                } => {
                    let operations = pending.remove(&operation_id).unwrap_or_default();
                    started.retain(|id| *id != operation_id);
                    if rollback {
                        result.operations_rolled_back += 1;
                        apply(Outcome::RolledBack, &operations, &mut result)?;
                    } else {
                        result.operations_committed += 1;
                        apply(Outcome::Committed, &operations, &mut result)?;
                    }
                }
                _ => {}
            }
        }

        // Latest-started first, so overlapping writers unwind in reverse
        for operation_id in started.into_iter().rev() {
            if let Some(operations) = pending.remove(&operation_id) {
                tracing::debug!(operation = %operation_id, "undoing unfinished operation");
                result.operations_incomplete += 1;
                apply(Outcome::Incomplete, &operations, &mut result)?;
            }
        }

        Ok(result)
    }

    fn redo(store: &mut dyn PageStore, operations: &Buffered, result: &mut RecoveryResult) -> Result<()> {
        for (lsn, operation) in operations {
            if store.page_lsn(operation.page)? >= *lsn {
                continue;
            }
            operation.redo(store.page(operation.page)?)?;
            store.set_page_lsn(operation.page, *lsn)?;
            result.page_operations_redone += 1;
        }
        Ok(())
    }

    fn undo(store: &mut dyn PageStore, operations: &Buffered, result: &mut RecoveryResult) -> Result<()> {
        // Page -> LSN to restore once every operation on it is undone
        let mut restored: HashMap<PageKey, LogSequenceNumber> = HashMap::new();

        for (lsn, operation) in operations.iter().rev() {
            let contains = restored.contains_key(&operation.page)
                || store.page_lsn(operation.page)? >= *lsn;
            if !contains {
                continue;
            }
            operation.undo(store.page(operation.page)?)?;
            restored.insert(operation.page, operation.initial_lsn);
            result.page_operations_undone += 1;
        }

        for (page, lsn) in restored {
            store.set_page_lsn(page, lsn)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Committed,
    RolledBack,
    Incomplete,
}
