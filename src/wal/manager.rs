//! Segmented Write-Ahead Log
//!
//! Owns the ordered list of segments and every structural decision about
//! them.
//!
//! ## Responsibilities
//! - Assign LSNs (under the log lock, so they are strictly increasing)
//! - Track in-flight atomic operations
//! - Rotate the active segment, deferring while operations are in flight
//! - Retention (`cut_till`, `truncate`) guarded by retention floors
//! - Keep the master record consistent with the segment list
//! - Notify observers about log growth and low disk space
//!
//! ## Rotation Gate
//! ```text
//!            filled >= max_segment_size
//!   Idle ───────────────────────────────▶ RotationPending
//!    ▲                                         │
//!    │   last active operation ended, or a     │
//!    │   non-operation record with none active │
//!    └──────────── RotatingNow ◀───────────────┘
//! ```
//! While rotation is pending, writers of records for operations that are
//! not already active wait on a condition variable until the gate returns
//! to `Idle`.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::config::WalConfig;
use crate::error::{Result, WalError};
use crate::lsn::LogSequenceNumber;
use crate::po::PageOperationRegistry;

use super::closer::AutoCloser;
use super::files::{discover_segments, segment_path};
use super::limits::CutTillLimits;
use super::listener::{
    FullCheckpointRequestListener, ListenerRegistry, ListenerToken, LowDiskSpaceInfo,
    LowDiskSpaceListener,
};
use super::master::MasterRecordStore;
use super::record::{AtomicOperationMetadata, OperationUnitId, RecordCodec, WalRecord};
use super::segment::{LogSegment, LsnWatermark, SegmentOptions, SegmentShared};
use super::stats::{LogCallKind, PerformanceStatistic};

/// Capacity of the recent end-record ring
pub const MAX_LAST_TXS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RotationState {
    Idle,
    RotationPending,
    RotatingNow,
}

/// Everything guarded by the log lock
struct WalState {
    segments: Vec<LogSegment>,
    master: MasterRecordStore,
    active_operations: HashSet<OperationUnitId>,
    last_txs: VecDeque<LogSequenceNumber>,
    rotation: RotationState,
    closer: Option<AutoCloser>,
    closed: bool,
}

impl WalState {
    fn active(&self) -> Result<&LogSegment> {
        self.segments
            .last()
            .ok_or_else(|| WalError::ProtocolViolation("log has no active segment".to_string()))
    }

    fn active_mut(&mut self) -> Result<&mut LogSegment> {
        self.segments
            .last_mut()
            .ok_or_else(|| WalError::ProtocolViolation("log has no active segment".to_string()))
    }

    /// Index of the segment with `order`, or where it would be inserted
    fn position_of(&self, order: u64) -> std::result::Result<usize, usize> {
        self.segments
            .binary_search_by_key(&order, |segment| segment.order())
    }

    fn segment(&self, order: u64) -> Option<&LogSegment> {
        self.position_of(order).ok().map(|index| &self.segments[index])
    }

    fn begin(&self) -> Option<LogSequenceNumber> {
        self.segments.iter().find_map(|segment| segment.begin())
    }

    fn end(&self) -> Option<LogSequenceNumber> {
        self.segments.iter().rev().find_map(|segment| segment.end())
    }

    fn fix_master_record(&mut self) -> Result<()> {
        validate_master_record(&mut self.master, &self.segments)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(WalError::Closed);
        }
        Ok(())
    }

    fn ensure_no_active_operations(&self, action: &str) -> Result<()> {
        if !self.active_operations.is_empty() {
            return Err(WalError::ProtocolViolation(format!(
                "cannot {} while {} atomic operations are active",
                action,
                self.active_operations.len()
            )));
        }
        Ok(())
    }
}

/// Side effects to run once the log lock is released
#[derive(Default)]
struct Notifications {
    request_checkpoint: bool,
    check_free_space: bool,
}

/// Segmented, page-framed write-ahead log
pub struct DiskWriteAheadLog {
    config: WalConfig,
    segment_options: SegmentOptions,
    codec: RecordCodec,
    state: Mutex<WalState>,
    rotation_complete: Condvar,
    log_size: AtomicU64,
    flushed_lsn: Arc<LsnWatermark>,
    cut_till_limits: CutTillLimits,
    low_disk_space_listeners: ListenerRegistry<dyn LowDiskSpaceListener>,
    checkpoint_listeners: ListenerRegistry<dyn FullCheckpointRequestListener>,
    statistic: RwLock<Option<Arc<dyn PerformanceStatistic>>>,
}

impl DiskWriteAheadLog {
    /// Open (or create) the log with the built-in page operations
    pub fn open(config: WalConfig) -> Result<Self> {
        Self::open_with_registry(config, PageOperationRegistry::builtin())
    }

    /// Open (or create) the log
    ///
    /// On startup:
    /// 1. Create the WAL directory if it doesn't exist
    /// 2. Discover and open existing segments in order
    /// 3. Append a fresh segment if there is none or the last one is legacy
    /// 4. Start background writing on the active segment
    /// 5. Open the master record and re-validate it against the segments
    pub fn open_with_registry(config: WalConfig, registry: PageOperationRegistry) -> Result<Self> {
        config.validate()?;
        let storage = config.storage_name.clone();

        // Step 1: directory
        fs::create_dir_all(&config.wal_dir)
            .map_err(|e| WalError::io_at(storage.as_str(), &config.wal_dir, e))?;

        let flushed_lsn = Arc::new(LsnWatermark::default());
        let segment_options = SegmentOptions::from_config(&config);
        let closer = AutoCloser::spawn(&storage, config.file_ttl)?;

        // Step 2: existing segments
        let mut segments = Vec::new();
        for file in discover_segments(&config.wal_dir, &storage, config.filter_wal_files)? {
            let segment = LogSegment::open_shared(
                &file.path,
                file.order,
                segment_options.clone(),
                Arc::clone(&flushed_lsn),
            )?;
            closer.register(segment.shared());
            segments.push(segment);
        }

        // Step 3: writable tail
        let next_order = match segments.last() {
            None => Some(0),
            Some(last) if !last.format().is_writable() => {
                tracing::info!(
                    storage = %storage,
                    segment = last.order(),
                    format = ?last.format(),
                    "last segment uses a legacy format, starting a new segment"
                );
                Some(last.order() + 1)
            }
            Some(_) => None,
        };
        if let Some(order) = next_order {
            let path = segment_path(&config.wal_dir, &storage, order);
            let segment = LogSegment::open_shared(
                &path,
                order,
                segment_options.clone(),
                Arc::clone(&flushed_lsn),
            )?;
            closer.register(segment.shared());
            segments.push(segment);
        }

        // Step 4: background writing and watermarks
        if let Some(active) = segments.last_mut() {
            active.start_background_write()?;
        }
        if let Some(end) = segments.iter().rev().find_map(|segment| segment.end()) {
            flushed_lsn.advance(end);
        }
        let log_size: u64 = segments.iter().map(|segment| segment.filled_up_to()).sum();

        // Step 5: master record
        let mut master = MasterRecordStore::open(&config.wal_dir, &storage)?;
        validate_master_record(&mut master, &segments)?;

        tracing::info!(
            storage = %storage,
            dir = %config.wal_dir.display(),
            segments = segments.len(),
            log_size,
            checkpoint = ?master.checkpoint(),
            "write-ahead log opened"
        );

        Ok(Self {
            segment_options,
            codec: RecordCodec::new(registry),
            state: Mutex::new(WalState {
                segments,
                master,
                active_operations: HashSet::new(),
                last_txs: VecDeque::with_capacity(MAX_LAST_TXS),
                rotation: RotationState::Idle,
                closer: Some(closer),
                closed: false,
            }),
            rotation_complete: Condvar::new(),
            log_size: AtomicU64::new(log_size),
            flushed_lsn,
            cut_till_limits: CutTillLimits::new(),
            low_disk_space_listeners: ListenerRegistry::new(),
            checkpoint_listeners: ListenerRegistry::new(),
            statistic: RwLock::new(None),
            config,
        })
    }

    // =========================================================================
    // Logging
    // =========================================================================

    /// Log the start of an atomic operation and mark it active
    pub fn log_atomic_operation_start_record(
        &self,
        rollback_supported: bool,
        operation_id: OperationUnitId,
    ) -> Result<LogSequenceNumber> {
        let record = WalRecord::AtomicUnitStart {
            operation_id,
            rollback_supported,
        };
        self.timed(LogCallKind::AtomicOperationStart, || self.internal_log(&record))
    }

    /// Log the end of an atomic operation and mark it finished
    pub fn log_atomic_operation_end_record(
        &self,
        operation_id: OperationUnitId,
        rollback: bool,
        start_lsn: Option<LogSequenceNumber>,
        metadata: AtomicOperationMetadata,
    ) -> Result<LogSequenceNumber> {
        let record = WalRecord::AtomicUnitEnd {
            operation_id,
            rollback,
            start_lsn,
            metadata,
        };
        self.timed(LogCallKind::AtomicOperationEnd, || self.internal_log(&record))
    }

    /// Log any record
    pub fn log(&self, record: &WalRecord) -> Result<LogSequenceNumber> {
        self.timed(LogCallKind::Record, || self.internal_log(record))
    }

    fn timed<F>(&self, kind: LogCallKind, call: F) -> Result<LogSequenceNumber>
    where
        F: FnOnce() -> Result<LogSequenceNumber>,
    {
        let statistic = self.statistic.read().clone();
        match statistic {
            Some(statistic) => {
                let started = Instant::now();
                let result = call();
                statistic.wal_record_logged(kind, started.elapsed());
                result
            }
            None => call(),
        }
    }

    fn internal_log(&self, record: &WalRecord) -> Result<LogSequenceNumber> {
        let payload = self.codec.encode(record)?;
        let mut notifications = Notifications::default();

        let lsn = {
            let mut state = self.state.lock();
            state.ensure_open()?;

            // Step 1: rotation gate
            if state.rotation == RotationState::RotationPending
                && state.active_operations.is_empty()
            {
                self.rotate(&mut state)?;
                notifications.check_free_space = true;
            }
            if let Some(operation_id) = record.operation_id() {
                if state.rotation != RotationState::Idle
                    && !state.active_operations.contains(&operation_id)
                {
                    self.wait_for_rotation(&mut state)?;
                }
            }

            // Step 2: append
            let active = state.active()?;
            let filled_before = active.filled_up_to();
            let lsn = active.log_record(&payload)?;
            let filled = active.filled_up_to();
            self.log_size
                .fetch_add(filled - filled_before, Ordering::SeqCst);

            if record.updates_master_record() {
                state.master.record_checkpoint(lsn)?;
            }

            // Step 3: operation bookkeeping
            match record {
                WalRecord::AtomicUnitStart { operation_id, .. } => {
                    state.active_operations.insert(*operation_id);
                }
                WalRecord::AtomicUnitEnd { operation_id, .. } => {
                    state.active_operations.remove(operation_id);
                    if state.last_txs.len() >= MAX_LAST_TXS {
                        state.last_txs.pop_front();
                    }
                    state.last_txs.push_back(lsn);
                }
                _ => {}
            }

            // Step 4: rotation
            if filled >= self.config.max_segment_size && state.rotation == RotationState::Idle {
                tracing::debug!(
                    storage = %self.config.storage_name,
                    segment = lsn.segment,
                    filled,
                    "segment is full, rotation pending"
                );
                state.rotation = RotationState::RotationPending;
            }
            if state.rotation == RotationState::RotationPending
                && state.active_operations.is_empty()
                && (record.is_atomic_unit_end() || !record.is_operation_unit_record())
            {
                self.rotate(&mut state)?;
                notifications.check_free_space = true;
            }

            // Step 5: size limit
            if self.log_size.load(Ordering::SeqCst) > self.config.wal_size_limit
                && state.segments.len() > 1
            {
                notifications.request_checkpoint = true;
            }

            lsn
        };

        self.dispatch(notifications);
        Ok(lsn)
    }

    /// Block until a pending rotation completes, the deadline passes or the log closes
    fn wait_for_rotation(&self, state: &mut MutexGuard<'_, WalState>) -> Result<()> {
        let deadline = Instant::now() + self.config.rotation_wait_timeout;
        while state.rotation != RotationState::Idle {
            if state.closed {
                break;
            }
            if self.rotation_complete.wait_until(state, deadline).timed_out()
                && state.rotation != RotationState::Idle
            {
                return Err(WalError::Interrupted(format!(
                    "segment rotation did not complete within {:?}",
                    self.config.rotation_wait_timeout
                )));
            }
        }
        if state.closed {
            return Err(WalError::Interrupted(
                "log was closed while waiting for segment rotation".to_string(),
            ));
        }
        Ok(())
    }

    /// Run a rotation and release every waiter
    fn rotate(&self, state: &mut WalState) -> Result<()> {
        state.rotation = RotationState::RotatingNow;
        let result = self.append_segment_locked(state);
        state.rotation = RotationState::Idle;
        self.rotation_complete.notify_all();
        result.map(|_| ())
    }

    /// Seal the active segment and start the next one; false if the active one is empty
    fn append_segment_locked(&self, state: &mut WalState) -> Result<bool> {
        let active = state.active_mut()?;
        if active.filled_up_to() == 0 {
            return Ok(false);
        }
        let next_order = active.order() + 1;
        active.stop_background_write(true)?;

        self.push_segment(state, next_order)?;
        state.fix_master_record()?;

        tracing::info!(
            storage = %self.config.storage_name,
            segment = next_order,
            "rotated to new segment"
        );
        Ok(true)
    }

    fn push_segment(&self, state: &mut WalState, order: u64) -> Result<()> {
        let path = segment_path(&self.config.wal_dir, &self.config.storage_name, order);
        let mut segment = LogSegment::open_shared(
            &path,
            order,
            self.segment_options.clone(),
            Arc::clone(&self.flushed_lsn),
        )?;
        segment.start_background_write()?;
        if let Some(closer) = &state.closer {
            closer.register(segment.shared());
        }
        self.log_size
            .fetch_add(segment.filled_up_to(), Ordering::SeqCst);
        state.segments.push(segment);
        Ok(())
    }

    fn dispatch(&self, notifications: Notifications) {
        if notifications.request_checkpoint {
            for listener in self.checkpoint_listeners.live() {
                listener.request_checkpoint();
            }
        }
        if notifications.check_free_space {
            if let Err(e) = self.check_free_space() {
                tracing::warn!(storage = %self.config.storage_name, error = %e, "free space check failed");
            }
        }
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// First LSN in the log, skipping empty segments
    pub fn begin(&self) -> Result<Option<LogSequenceNumber>> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.begin())
    }

    /// Last LSN in the log, skipping empty segments
    pub fn end(&self) -> Result<Option<LogSequenceNumber>> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.end())
    }

    fn segment_for(&self, order: u64) -> Result<Option<Arc<SegmentShared>>> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.segment(order).map(|segment| Arc::clone(segment.shared())))
    }

    /// Raw payload of the record at `lsn`
    pub fn read_raw(&self, lsn: LogSequenceNumber) -> Result<Option<Vec<u8>>> {
        match self.segment_for(lsn.segment)? {
            Some(segment) => segment.read_record(lsn),
            None => Ok(None),
        }
    }

    /// Decode the record at `lsn`
    pub fn read(&self, lsn: LogSequenceNumber) -> Result<Option<WalRecord>> {
        match self.read_raw(lsn)? {
            Some(payload) => Ok(Some(self.codec.decode(&payload)?)),
            None => Ok(None),
        }
    }

    /// LSN of the record following `lsn`, crossing segment boundaries
    pub fn next(&self, lsn: LogSequenceNumber) -> Result<Option<LogSequenceNumber>> {
        if let Some(segment) = self.segment_for(lsn.segment)? {
            if let Some(next) = segment.next_lsn(lsn)? {
                return Ok(Some(next));
            }
        }

        let state = self.state.lock();
        state.ensure_open()?;
        let from = match state.position_of(lsn.segment) {
            Ok(index) => index + 1,
            Err(index) => index,
        };
        Ok(state.segments[from..]
            .iter()
            .find_map(|segment| segment.begin()))
    }

    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Make every logged record durable
    pub fn flush(&self) -> Result<()> {
        let flusher = {
            let state = self.state.lock();
            state.ensure_open()?;
            state.active()?.flusher()
        };
        flusher.flush()?;

        if let Err(e) = self.check_free_space() {
            tracing::warn!(storage = %self.config.storage_name, error = %e, "free space check failed");
        }
        Ok(())
    }

    /// Highest LSN known to be durable
    pub fn flushed_lsn(&self) -> Option<LogSequenceNumber> {
        self.flushed_lsn.get()
    }

    /// Notify low disk space listeners if free space is below the limit
    pub fn check_free_space(&self) -> Result<()> {
        let free_space = fs2::available_space(&self.config.wal_dir)
            .map_err(|e| WalError::io_at(self.config.storage_name.as_str(), &self.config.wal_dir, e))?;

        if free_space < self.config.free_space_limit {
            let info = LowDiskSpaceInfo {
                free_space,
                free_space_limit: self.config.free_space_limit,
            };
            tracing::warn!(
                storage = %self.config.storage_name,
                free_space,
                limit = self.config.free_space_limit,
                "low disk space under WAL directory"
            );
            for listener in self.low_disk_space_listeners.live() {
                listener.low_disk_space(&info);
            }
        }
        Ok(())
    }

    // =========================================================================
    // Retention
    // =========================================================================

    /// Delete leading segments entirely below `lsn` (clamped to the retention floors)
    ///
    /// The active segment is never deleted. Returns whether anything was removed.
    pub fn cut_till(&self, lsn: LogSequenceNumber) -> Result<bool> {
        self.flush()?;

        let mut state = self.state.lock();
        state.ensure_open()?;

        let target = match self.cut_till_limits.first() {
            Some(limit) if limit < lsn => limit,
            _ => lsn,
        };

        let mut removed = 0usize;
        let mut outcome = Ok(());
        while state.segments.len() > 1 {
            let removable = match state.segments[0].end() {
                None => true,
                Some(end) => end < target,
            };
            if !removable {
                break;
            }
            // A segment leaves the list only once its file is gone
            if let Err(e) = state.segments[0].delete() {
                outcome = Err(e);
                break;
            }
            state.segments.remove(0);
            removed += 1;
        }

        if removed > 0 {
            self.recompute_log_size(&state);
            state.fix_master_record()?;
            tracing::info!(
                storage = %self.config.storage_name,
                removed,
                target = %target,
                "cut log segments"
            );
        }
        outcome.map(|()| removed > 0)
    }

    /// Protect segments at or above `lsn` from `cut_till`
    pub fn add_cut_till_limit(&self, lsn: LogSequenceNumber) {
        self.cut_till_limits.add(lsn);
    }

    /// Drop one protection previously added with `add_cut_till_limit`
    pub fn remove_cut_till_limit(&self, lsn: LogSequenceNumber) -> Result<()> {
        self.cut_till_limits.remove(lsn)
    }

    /// Delete every segment except the active one
    pub fn truncate(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        let mut count = 0usize;
        let mut outcome = Ok(());
        while state.segments.len() > 1 {
            if let Err(e) = state.segments[0].delete() {
                outcome = Err(e);
                break;
            }
            state.segments.remove(0);
            count += 1;
        }

        self.recompute_log_size(&state);
        state.fix_master_record()?;
        tracing::info!(storage = %self.config.storage_name, removed = count, "truncated log");
        outcome
    }

    fn recompute_log_size(&self, state: &WalState) {
        let size: u64 = state.segments.iter().map(|segment| segment.filled_up_to()).sum();
        self.log_size.store(size, Ordering::SeqCst);
    }

    // =========================================================================
    // Explicit End Changes
    // =========================================================================

    /// Make every future LSN greater than `lsn` by starting segment `lsn.segment + 1`
    pub fn move_lsn_after(&self, lsn: LogSequenceNumber) -> Result<()> {
        let notify = {
            let mut state = self.state.lock();
            state.ensure_open()?;
            state.ensure_no_active_operations("move the end of the log")?;

            let Some(end) = state.end() else {
                return Ok(());
            };
            if end >= lsn {
                return Ok(());
            }
            let next_segment = lsn.segment.checked_add(1).ok_or_else(|| {
                WalError::ProtocolViolation(format!("no segment can follow {}", lsn))
            })?;

            let active = state.active_mut()?;
            if active.filled_up_to() == 0 && active.order() > lsn.segment {
                return Ok(());
            }

            active.stop_background_write(true)?;
            if active.filled_up_to() == 0 {
                if let Some(mut empty) = state.segments.pop() {
                    empty.delete()?;
                }
            }

            self.push_segment(&mut state, next_segment)?;
            self.recompute_log_size(&state);
            state.fix_master_record()?;
            tracing::info!(
                storage = %self.config.storage_name,
                segment = next_segment,
                after = %lsn,
                "moved log end"
            );
            Notifications {
                check_free_space: true,
                ..Notifications::default()
            }
        };
        self.dispatch(notify);
        Ok(())
    }

    /// Seal the active segment and start a new one; no-op if it is empty
    pub fn append_new_segment(&self) -> Result<()> {
        let rotated = {
            let mut state = self.state.lock();
            state.ensure_open()?;
            state.ensure_no_active_operations("append a new segment")?;
            if state.active()?.filled_up_to() == 0 {
                false
            } else {
                self.rotate(&mut state)?;
                true
            }
        };
        if rotated {
            self.dispatch(Notifications {
                check_free_space: true,
                ..Notifications::default()
            });
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Total logical bytes across all segments
    pub fn size(&self) -> u64 {
        self.log_size.load(Ordering::SeqCst)
    }

    pub fn wal_files(&self) -> Vec<PathBuf> {
        let state = self.state.lock();
        state
            .segments
            .iter()
            .map(|segment| segment.path().to_path_buf())
            .collect()
    }

    pub fn master_record_file(&self) -> PathBuf {
        MasterRecordStore::file_path(&self.config.wal_dir, &self.config.storage_name)
    }

    /// Order of the active segment
    pub fn active_segment(&self) -> Result<u64> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.active()?.order())
    }

    /// Paths of the sealed segments with order >= `from_segment`
    pub fn non_active_segments(&self, from_segment: u64) -> Vec<PathBuf> {
        let state = self.state.lock();
        let sealed = state.segments.len().saturating_sub(1);
        state.segments[..sealed]
            .iter()
            .filter(|segment| segment.order() >= from_segment)
            .map(|segment| segment.path().to_path_buf())
            .collect()
    }

    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    pub fn preferred_segment_count(&self) -> u64 {
        self.config.preferred_segment_count()
    }

    /// LSN of the last checkpoint recorded in the master record
    pub fn last_checkpoint(&self) -> Option<LogSequenceNumber> {
        self.state.lock().master.checkpoint()
    }

    /// Oldest recent end-record LSN, or the log end if none is tracked
    pub fn oldest_tx_lsn(&self) -> Option<LogSequenceNumber> {
        let state = self.state.lock();
        state.last_txs.front().copied().or_else(|| state.end())
    }

    /// Number of atomic operations currently in flight
    pub fn active_operation_count(&self) -> usize {
        self.state.lock().active_operations.len()
    }

    pub fn wal_directory(&self) -> &Path {
        &self.config.wal_dir
    }

    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn add_low_disk_space_listener(&self, listener: &Arc<dyn LowDiskSpaceListener>) -> ListenerToken {
        self.low_disk_space_listeners.subscribe(listener)
    }

    pub fn remove_low_disk_space_listener(&self, token: ListenerToken) -> bool {
        self.low_disk_space_listeners.unsubscribe(token)
    }

    pub fn add_full_checkpoint_listener(
        &self,
        listener: &Arc<dyn FullCheckpointRequestListener>,
    ) -> ListenerToken {
        self.checkpoint_listeners.subscribe(listener)
    }

    pub fn remove_full_checkpoint_listener(&self, token: ListenerToken) -> bool {
        self.checkpoint_listeners.unsubscribe(token)
    }

    /// Number of live (not yet dropped) listeners of both kinds
    pub fn listener_count(&self) -> usize {
        self.low_disk_space_listeners.len() + self.checkpoint_listeners.len()
    }

    /// Install or remove the timing hook
    pub fn set_performance_statistic(&self, statistic: Option<Arc<dyn PerformanceStatistic>>) {
        *self.statistic.write() = statistic;
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Close every segment and background thread; idempotent
    pub fn close(&self, flush: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let mut first_error = None;
        for segment in state.segments.iter_mut() {
            if let Err(e) = segment.close(flush) {
                tracing::error!(
                    storage = %self.config.storage_name,
                    segment = segment.order(),
                    error = %e,
                    "failed to close segment"
                );
                first_error.get_or_insert(e);
            }
        }
        if let Some(mut closer) = state.closer.take() {
            if let Err(e) = closer.shutdown(self.config.shutdown_timeout) {
                first_error.get_or_insert(e);
            }
        }

        self.cut_till_limits.clear();
        state.master.close();
        self.rotation_complete.notify_all();
        drop(state);

        tracing::info!(storage = %self.config.storage_name, "write-ahead log closed");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close the log and remove every segment and the master record file
    pub fn delete(&self, flush: bool) -> Result<()> {
        self.close(flush)?;

        let mut state = self.state.lock();
        for mut segment in state.segments.drain(..) {
            segment.delete()?;
        }
        state.master.delete()?;
        self.log_size.store(0, Ordering::SeqCst);

        tracing::info!(storage = %self.config.storage_name, "write-ahead log deleted");
        Ok(())
    }
}

impl Drop for DiskWriteAheadLog {
    fn drop(&mut self) {
        if let Err(e) = self.close(true) {
            tracing::warn!(storage = %self.config.storage_name, error = %e, "failed to close log on drop");
        }
    }
}

/// Re-validate the master record slots against the current segments
fn validate_master_record(master: &mut MasterRecordStore, segments: &[LogSegment]) -> Result<()> {
    master.fix(|lsn| {
        segments
            .binary_search_by_key(&lsn.segment, |segment| segment.order())
            .map(|index| segments[index].filled_up_to() > lsn.position)
            .unwrap_or(false)
    })
}
