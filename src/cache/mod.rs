//! Page Cache Entries
//!
//! The capability surface a page cache entry offers to the log's change
//! tracker.
//!
//! ## Responsibilities
//! - `CacheEntry`: identity, locking, dirty flag, usage count, page LSN
//! - `PageBuffer`: raw page memory, for entries owned by the cache
//! - `MemoryCacheEntry`: a heap-backed entry with a per-thread reader/writer lock
//! - `PageChanges`: sparse overlay of changed 64-byte portions
//! - `CacheEntryChanges`: copy-on-write wrapper that records page operations

mod changes;
mod tracker;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, WalError};
use crate::lsn::LogSequenceNumber;
use crate::po::PageKey;

pub use changes::{PageChanges, PORTION_SIZE};
pub use tracker::CacheEntryChanges;

// =============================================================================
// Cache Entry Capability
// =============================================================================

/// One page held by a page cache
pub trait CacheEntry: Send + Sync {
    fn file_id(&self) -> u64;

    fn page_index(&self) -> u64;

    fn page_key(&self) -> PageKey {
        PageKey::new(self.file_id(), self.page_index())
    }

    fn acquire_exclusive_lock(&self);

    fn release_exclusive_lock(&self) -> Result<()>;

    fn acquire_shared_lock(&self);

    fn release_shared_lock(&self) -> Result<()>;

    /// Whether the calling thread holds the lock (either mode)
    fn is_lock_acquired_by_current_thread(&self) -> bool;

    fn mark_dirty(&self);

    fn clear_dirty(&self);

    fn is_dirty(&self) -> bool;

    fn usages_count(&self) -> usize;

    fn increment_usages(&self);

    fn decrement_usages(&self);

    /// LSN of the last change applied to the page
    fn page_lsn(&self) -> LogSequenceNumber;
}

/// Direct access to the page memory behind a cache entry
///
/// Only the cache's own entries implement this. `CacheEntryChanges` does not,
/// so every write through it goes to its overlay via `PageImage`.
pub trait PageBuffer: CacheEntry {
    /// Page content
    fn buffer(&self) -> &[u8];

    fn buffer_mut(&mut self) -> &mut [u8];

    fn set_page_lsn(&mut self, lsn: LogSequenceNumber);
}

// =============================================================================
// In-Memory Cache Entry
// =============================================================================

/// Holders of a page's reader/writer lock
#[derive(Default)]
struct LockOwners {
    exclusive: Option<ThreadId>,
    shared: Vec<ThreadId>,
}

/// Heap-backed cache entry
pub struct MemoryCacheEntry {
    file_id: u64,
    page_index: u64,
    lock: Mutex<LockOwners>,
    lock_released: Condvar,
    dirty: AtomicBool,
    usages: AtomicUsize,
    buffer: Vec<u8>,
    page_lsn: LogSequenceNumber,
}

impl MemoryCacheEntry {
    /// Zero-filled page
    pub fn new(file_id: u64, page_index: u64, page_size: usize) -> Self {
        Self::with_content(file_id, page_index, vec![0u8; page_size], LogSequenceNumber::ZERO)
    }

    /// Page with existing content and LSN
    pub fn with_content(
        file_id: u64,
        page_index: u64,
        buffer: Vec<u8>,
        page_lsn: LogSequenceNumber,
    ) -> Self {
        Self {
            file_id,
            page_index,
            lock: Mutex::new(LockOwners::default()),
            lock_released: Condvar::new(),
            dirty: AtomicBool::new(false),
            usages: AtomicUsize::new(0),
            buffer,
            page_lsn,
        }
    }
}

impl CacheEntry for MemoryCacheEntry {
    fn file_id(&self) -> u64 {
        self.file_id
    }

    fn page_index(&self) -> u64 {
        self.page_index
    }

    fn acquire_exclusive_lock(&self) {
        let mut owners = self.lock.lock();
        while owners.exclusive.is_some() || !owners.shared.is_empty() {
            self.lock_released.wait(&mut owners);
        }
        owners.exclusive = Some(thread::current().id());
    }

    fn release_exclusive_lock(&self) -> Result<()> {
        let mut owners = self.lock.lock();
        if owners.exclusive != Some(thread::current().id()) {
            return Err(WalError::ProtocolViolation(format!(
                "exclusive lock of page {}:{} is not held by this thread",
                self.file_id, self.page_index
            )));
        }
        owners.exclusive = None;
        self.lock_released.notify_all();
        Ok(())
    }

    fn acquire_shared_lock(&self) {
        let mut owners = self.lock.lock();
        while owners.exclusive.is_some() {
            self.lock_released.wait(&mut owners);
        }
        owners.shared.push(thread::current().id());
    }

    fn release_shared_lock(&self) -> Result<()> {
        let me = thread::current().id();
        let mut owners = self.lock.lock();
        let Some(position) = owners.shared.iter().position(|id| *id == me) else {
            return Err(WalError::ProtocolViolation(format!(
                "shared lock of page {}:{} is not held by this thread",
                self.file_id, self.page_index
            )));
        };
        owners.shared.swap_remove(position);
        if owners.shared.is_empty() {
            self.lock_released.notify_all();
        }
        Ok(())
    }

    fn is_lock_acquired_by_current_thread(&self) -> bool {
        let me = thread::current().id();
        let owners = self.lock.lock();
        owners.exclusive == Some(me) || owners.shared.contains(&me)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    fn usages_count(&self) -> usize {
        self.usages.load(Ordering::Acquire)
    }

    fn increment_usages(&self) {
        self.usages.fetch_add(1, Ordering::AcqRel);
    }

    fn decrement_usages(&self) {
        let _ = self
            .usages
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn page_lsn(&self) -> LogSequenceNumber {
        self.page_lsn
    }
}

impl PageBuffer for MemoryCacheEntry {
    fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn set_page_lsn(&mut self, lsn: LogSequenceNumber) {
        self.page_lsn = lsn;
    }
}

impl std::fmt::Debug for MemoryCacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheEntry")
            .field("file_id", &self.file_id)
            .field("page_index", &self.page_index)
            .field("dirty", &self.is_dirty())
            .field("usages", &self.usages_count())
            .field("page_lsn", &self.page_lsn)
            .finish()
    }
}
