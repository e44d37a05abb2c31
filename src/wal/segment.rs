//! Log Segment
//!
//! One append-only segment file made of fixed-size pages.
//!
//! ## Responsibilities
//! - Assign LSNs from the current fill offset and frame records
//! - Keep not-yet-durable bytes in an in-memory tail buffer
//! - Write pending pages (background writer or explicit flush)
//! - Random-access reads by LSN and forward iteration
//! - Recover the fill offset on open, repairing torn tails
//!
//! ## Concurrency
//! - `file`: the file handle slot, held for the whole duration of page I/O
//! - `state`: fill offsets and the tail buffer, held only briefly
//! - Lock order is always `file` → `state`; appends only take `state`, so
//!   writers never wait on an fsync.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::WalConfig;
use crate::error::{Result, WalError};
use crate::lsn::LogSequenceNumber;

use super::page::{SegmentFormat, MAGIC_NUMBER_OFFSET, PAGE_SIZE};
use super::writer::{BackgroundWriter, WriterHandle};

/// Attempts made to remove a segment file before giving up
const DELETE_RETRIES: usize = 10;

// =============================================================================
// Flushed LSN Watermark
// =============================================================================

/// Highest LSN known to be durable; only ever advances
#[derive(Debug, Default)]
pub(crate) struct LsnWatermark {
    value: Mutex<Option<LogSequenceNumber>>,
}

impl LsnWatermark {
    pub(crate) fn get(&self) -> Option<LogSequenceNumber> {
        *self.value.lock()
    }

    pub(crate) fn advance(&self, lsn: LogSequenceNumber) {
        let mut value = self.value.lock();
        if value.map_or(true, |current| lsn > current) {
            *value = Some(lsn);
        }
    }
}

// =============================================================================
// Segment Options
// =============================================================================

/// Settings shared by every segment of one log
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    /// Storage name, used in error context and logs
    pub storage_name: String,
    /// Interval between background writes
    pub commit_delay: Duration,
    /// Pending tail pages that trigger an early background write
    pub max_pages_cache_size: usize,
    /// Deadline for the background writer to stop
    pub shutdown_timeout: Duration,
}

impl SegmentOptions {
    pub fn from_config(config: &WalConfig) -> Self {
        Self {
            storage_name: config.storage_name.clone(),
            commit_delay: config.commit_delay,
            max_pages_cache_size: config.max_pages_cache_size,
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self::from_config(&WalConfig::default())
    }
}

// =============================================================================
// Shared Segment State
// =============================================================================

/// File handle slot; the handle is dropped by the idle closer and reopened on demand
struct FileSlot {
    handle: Option<File>,
    last_access: Instant,
}

/// Fill offsets and the not-yet-durable tail
struct SegmentState {
    /// Logical length of the record stream
    filled_up_to: u64,
    /// Logical bytes known to be on disk
    durable_up_to: u64,
    /// Page-aligned logical offset where `buffer` starts
    buffer_start: u64,
    /// Logical bytes `[buffer_start, filled_up_to)`
    buffer: Vec<u8>,
    /// Position of the last complete record
    last_record: Option<u64>,
}

impl SegmentState {
    fn empty() -> Self {
        Self {
            filled_up_to: 0,
            durable_up_to: 0,
            buffer_start: 0,
            buffer: Vec::new(),
            last_record: None,
        }
    }
}

/// Segment internals shared with the background writer and the idle closer
pub(crate) struct SegmentShared {
    order: u64,
    path: PathBuf,
    format: SegmentFormat,
    storage_name: String,
    file: Mutex<FileSlot>,
    state: Mutex<SegmentState>,
    flushed: Arc<LsnWatermark>,
}

impl SegmentShared {
    pub(crate) fn label(&self) -> String {
        format!("{}#{}", self.storage_name, self.order)
    }

    fn io_error(&self, source: io::Error) -> WalError {
        WalError::io_at(self.storage_name.clone(), self.path.clone(), source)
    }

    fn open_file(&self) -> Result<File> {
        let mut options = OpenOptions::new();
        options.read(true);
        if self.format.is_writable() {
            options.write(true).create(true);
        }
        options.open(&self.path).map_err(|e| self.io_error(e))
    }

    fn handle<'a>(&self, slot: &'a mut FileSlot) -> Result<&'a mut File> {
        slot.last_access = Instant::now();
        let file = match slot.handle.take() {
            Some(file) => file,
            None => self.open_file()?,
        };
        Ok(slot.handle.insert(file))
    }

    fn read_page(&self, slot: &mut FileSlot, index: u64) -> Result<Vec<u8>> {
        let file = self.handle(slot)?;
        let mut page = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(index * PAGE_SIZE as u64))
            .and_then(|_| file.read_exact(&mut page))
            .map_err(|e| self.io_error(e))?;
        Ok(page)
    }

    /// Read `len` logical bytes starting at `pos`, from disk or the tail buffer
    fn read_logical(
        &self,
        slot: &mut FileSlot,
        state: &SegmentState,
        pos: u64,
        len: usize,
    ) -> Result<Vec<u8>> {
        let capacity = self.format.page_capacity() as u64;
        let end = pos.checked_add(len as u64).ok_or_else(|| {
            WalError::Corruption(format!(
                "read of {} bytes at {} overflows segment {}",
                len, pos, self.order
            ))
        })?;
        let mut out = Vec::with_capacity(len);
        let mut cur = pos;

        while cur < end {
            if cur >= state.buffer_start {
                let from = (cur - state.buffer_start) as usize;
                let to = (end - state.buffer_start) as usize;
                if to > state.buffer.len() {
                    return Err(WalError::Corruption(format!(
                        "read past the end of segment {} ({} > {})",
                        self.order, end, state.filled_up_to
                    )));
                }
                out.extend_from_slice(&state.buffer[from..to]);
                break;
            }

            let page_index = cur / capacity;
            let page = self.read_page(slot, page_index)?;
            let payload = self.format.decode_page(&page).ok_or_else(|| {
                WalError::Corruption(format!(
                    "page {} of segment {} is corrupt",
                    page_index, self.order
                ))
            })?;

            let in_page = (cur % capacity) as usize;
            let chunk_end = end
                .min((page_index + 1) * capacity)
                .min(state.buffer_start);
            let take = (chunk_end - cur) as usize;
            if in_page + take > payload.len() {
                return Err(WalError::Corruption(format!(
                    "page {} of segment {} is shorter than expected",
                    page_index, self.order
                )));
            }
            out.extend_from_slice(&payload[in_page..in_page + take]);
            cur += take as u64;
        }

        Ok(out)
    }

    /// Append a framed record; returns its position and the pending page count
    fn append(&self, payload: &[u8]) -> Result<(u64, usize)> {
        if !self.format.is_writable() {
            return Err(WalError::ProtocolViolation(format!(
                "segment {} uses legacy format {:?} and is read-only",
                self.order, self.format
            )));
        }

        let mut state = self.state.lock();
        let position = state.filled_up_to;
        self.format.encode_record(payload, &mut state.buffer);
        state.filled_up_to = state.buffer_start + state.buffer.len() as u64;
        state.last_record = Some(position);

        let pending_pages = state.buffer.len() / self.format.page_capacity();
        Ok((position, pending_pages))
    }

    /// Write every pending page and fsync; advances the flushed watermark
    pub(crate) fn write_pending(&self) -> Result<()> {
        let mut slot = self.file.lock();

        let (first_page, pages, durable, last_record) = {
            let state = self.state.lock();
            if state.durable_up_to == state.filled_up_to {
                return Ok(());
            }
            let capacity = self.format.page_capacity();
            let pages: Vec<Vec<u8>> = state
                .buffer
                .chunks(capacity)
                .map(|chunk| self.format.encode_page(chunk))
                .collect();
            (
                state.buffer_start / capacity as u64,
                pages,
                state.filled_up_to,
                state.last_record,
            )
        };

        let file = self.handle(&mut slot)?;
        file.seek(SeekFrom::Start(first_page * PAGE_SIZE as u64))
            .map_err(|e| self.io_error(e))?;
        for page in &pages {
            file.write_all(page).map_err(|e| self.io_error(e))?;
        }
        file.sync_data().map_err(|e| self.io_error(e))?;

        {
            let mut state = self.state.lock();
            let capacity = self.format.page_capacity() as u64;
            state.durable_up_to = state.durable_up_to.max(durable);
            let keep_from = (durable / capacity) * capacity;
            if keep_from > state.buffer_start {
                let drop = (keep_from - state.buffer_start) as usize;
                state.buffer.drain(..drop);
                state.buffer_start = keep_from;
            }
        }

        if let Some(position) = last_record {
            self.flushed
                .advance(LogSequenceNumber::new(self.order, position));
        }

        tracing::trace!(
            segment = self.order,
            pages = pages.len(),
            durable_up_to = durable,
            "segment pages written"
        );
        Ok(())
    }

    /// Read the record stored at `lsn`; `None` if it lies past the end
    pub(crate) fn read_record(&self, lsn: LogSequenceNumber) -> Result<Option<Vec<u8>>> {
        if lsn.segment != self.order {
            return Ok(None);
        }

        let format = self.format;
        let header_size = format.record_header_size() as u64;
        let mut slot = self.file.lock();
        let state = self.state.lock();

        // Positions that overflow lie past the end as well
        let payload_start = match lsn.position.checked_add(header_size) {
            Some(start) if start <= state.filled_up_to => start,
            _ => return Ok(None),
        };

        let header = self.read_logical(&mut slot, &state, lsn.position, header_size as usize)?;
        let (len, crc) = format.decode_record_header(&header);
        let fits = payload_start
            .checked_add(len as u64)
            .map_or(false, |end| end <= state.filled_up_to);
        if len == 0 || !fits {
            return Err(WalError::Corruption(format!(
                "no record starts at {}",
                lsn
            )));
        }

        let payload = self.read_logical(&mut slot, &state, payload_start, len)?;
        if !format.verify_record(crc, &payload) {
            return Err(WalError::Corruption(format!(
                "checksum mismatch for record at {}",
                lsn
            )));
        }
        Ok(Some(payload))
    }

    /// LSN of the record following `lsn` in this segment
    pub(crate) fn next_lsn(&self, lsn: LogSequenceNumber) -> Result<Option<LogSequenceNumber>> {
        if lsn.segment != self.order {
            return Ok(None);
        }

        let format = self.format;
        let header_size = format.record_header_size() as u64;
        let mut slot = self.file.lock();
        let state = self.state.lock();

        match lsn.position.checked_add(header_size) {
            Some(end) if end <= state.filled_up_to => {}
            _ => return Ok(None),
        }

        let header = self.read_logical(&mut slot, &state, lsn.position, header_size as usize)?;
        let (len, _) = format.decode_record_header(&header);
        let next = match (lsn.position + header_size).checked_add(len as u64) {
            Some(next) if len != 0 && next < state.filled_up_to => next,
            _ => return Ok(None),
        };
        Ok(Some(LogSequenceNumber::new(self.order, next)))
    }

    /// Drop the file handle if it was not used for `ttl`
    pub(crate) fn close_if_idle(&self, ttl: Duration) -> bool {
        let Some(mut slot) = self.file.try_lock() else {
            return false;
        };
        if slot.handle.is_some() && slot.last_access.elapsed() >= ttl {
            slot.handle = None;
            tracing::debug!(segment = self.order, "closed idle segment file");
            return true;
        }
        false
    }

    /// Scan the record stream to rebuild fill offsets after open
    fn recover(&self) -> Result<()> {
        let mut slot = self.file.lock();
        let mut state = self.state.lock();

        let size = self
            .handle(&mut slot)?
            .metadata()
            .map_err(|e| self.io_error(e))?
            .len();

        if size < PAGE_SIZE as u64 {
            if size > 0 {
                tracing::warn!(
                    segment = self.order,
                    path = %self.path.display(),
                    size,
                    "segment is smaller than one page, treating it as empty"
                );
                if self.format.is_writable() {
                    self.handle(&mut slot)?
                        .set_len(0)
                        .map_err(|e| self.io_error(e))?;
                }
            }
            *state = SegmentState::empty();
            return Ok(());
        }

        // Step 1: logical length from consecutive valid pages
        let capacity = self.format.page_capacity() as u64;
        let pages = size / PAGE_SIZE as u64;
        let mut logical_len = 0u64;
        for index in 0..pages {
            let page = self.read_page(&mut slot, index)?;
            match self.format.decode_page(&page) {
                Some(payload) => {
                    logical_len += payload.len() as u64;
                    if (payload.len() as u64) < capacity {
                        break;
                    }
                }
                None => break,
            }
        }

        // Step 2: walk record frames, stopping at the first torn or corrupt one
        *state = SegmentState::empty();
        state.buffer_start = logical_len;
        let header_size = self.format.record_header_size() as u64;
        let mut pos = 0u64;
        let mut last_record = None;
        while pos + header_size <= logical_len {
            let header = self.read_logical(&mut slot, &state, pos, header_size as usize)?;
            let (len, crc) = self.format.decode_record_header(&header);
            if len == 0 || pos + header_size + len as u64 > logical_len {
                break;
            }
            let payload = self.read_logical(&mut slot, &state, pos + header_size, len)?;
            if !self.format.verify_record(crc, &payload) {
                break;
            }
            last_record = Some(pos);
            pos += header_size + len as u64;
        }

        // Step 3: reload the partial tail page into the buffer
        let tail_start = (pos / capacity) * capacity;
        let tail = self.read_logical(&mut slot, &state, tail_start, (pos - tail_start) as usize)?;
        state.buffer_start = tail_start;
        state.buffer = tail;
        state.filled_up_to = pos;
        state.durable_up_to = pos;
        state.last_record = last_record;

        // Step 4: cut off anything past the last valid record
        let needed_pages = (pos + capacity - 1) / capacity;
        let torn = logical_len > pos || size != needed_pages * PAGE_SIZE as u64;
        if torn && self.format.is_writable() {
            tracing::warn!(
                segment = self.order,
                path = %self.path.display(),
                valid_bytes = pos,
                scanned_bytes = logical_len,
                "repairing torn segment tail"
            );
            let file = self.handle(&mut slot)?;
            file.set_len(needed_pages * PAGE_SIZE as u64)
                .map_err(|e| self.io_error(e))?;
            if !state.buffer.is_empty() {
                let page = self.format.encode_page(&state.buffer);
                file.seek(SeekFrom::Start((tail_start / capacity) * PAGE_SIZE as u64))
                    .and_then(|_| file.write_all(&page))
                    .and_then(|_| file.sync_data())
                    .map_err(|e| self.io_error(e))?;
            }
        }

        Ok(())
    }
}

// =============================================================================
// Format Detection
// =============================================================================

/// Detect the on-disk format of a segment file from its magic number
///
/// Missing files and files smaller than one page use the latest format.
pub fn detect_format(path: &Path) -> Result<SegmentFormat> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SegmentFormat::LATEST),
        Err(e) => return Err(e.into()),
    };

    if file.metadata()?.len() < PAGE_SIZE as u64 {
        return Ok(SegmentFormat::LATEST);
    }

    let mut magic = [0u8; 8];
    file.seek(SeekFrom::Start(MAGIC_NUMBER_OFFSET as u64))?;
    file.read_exact(&mut magic)?;
    Ok(SegmentFormat::from_magic(u64::from_le_bytes(magic)))
}

// =============================================================================
// Log Segment
// =============================================================================

/// Flush access to a segment that outlives the manager lock
#[derive(Clone)]
pub(crate) struct SegmentFlusher {
    shared: Arc<SegmentShared>,
    writer: Option<WriterHandle>,
}

impl SegmentFlusher {
    pub(crate) fn flush(&self) -> Result<()> {
        if let Some(writer) = &self.writer {
            if let Some(result) = writer.flush() {
                return result;
            }
        }
        // Writer already stopped: write directly
        self.shared.write_pending()
    }
}

/// One append-only segment file
pub struct LogSegment {
    shared: Arc<SegmentShared>,
    options: SegmentOptions,
    writer: Option<BackgroundWriter>,
}

impl LogSegment {
    /// Open (or create) a segment with its own flushed-LSN watermark
    pub fn open(path: &Path, order: u64, options: SegmentOptions) -> Result<Self> {
        Self::open_shared(path, order, options, Arc::new(LsnWatermark::default()))
    }

    /// Open a segment reporting durability into the log's watermark
    pub(crate) fn open_shared(
        path: &Path,
        order: u64,
        options: SegmentOptions,
        flushed: Arc<LsnWatermark>,
    ) -> Result<Self> {
        let format = detect_format(path)
            .map_err(|e| match e {
                WalError::Io(source) => WalError::io_at(options.storage_name.clone(), path, source),
                other => other,
            })?;

        let shared = Arc::new(SegmentShared {
            order,
            path: path.to_path_buf(),
            format,
            storage_name: options.storage_name.clone(),
            file: Mutex::new(FileSlot {
                handle: None,
                last_access: Instant::now(),
            }),
            state: Mutex::new(SegmentState::empty()),
            flushed,
        });
        shared.recover()?;

        tracing::debug!(
            storage = %options.storage_name,
            segment = order,
            format = ?format,
            filled_up_to = shared.state.lock().filled_up_to,
            "opened log segment"
        );

        Ok(Self {
            shared,
            options,
            writer: None,
        })
    }

    pub(crate) fn shared(&self) -> &Arc<SegmentShared> {
        &self.shared
    }

    pub(crate) fn flusher(&self) -> SegmentFlusher {
        SegmentFlusher {
            shared: Arc::clone(&self.shared),
            writer: self.writer.as_ref().map(|w| w.handle()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn order(&self) -> u64 {
        self.shared.order
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn format(&self) -> SegmentFormat {
        self.shared.format
    }

    /// Logical length of the record stream
    pub fn filled_up_to(&self) -> u64 {
        self.shared.state.lock().filled_up_to
    }

    /// Highest LSN the watermark of this segment's log has seen durable
    pub fn flushed_lsn(&self) -> Option<LogSequenceNumber> {
        self.shared.flushed.get()
    }

    /// First record LSN, or `None` if the segment is empty
    pub fn begin(&self) -> Option<LogSequenceNumber> {
        let state = self.shared.state.lock();
        state
            .last_record
            .map(|_| LogSequenceNumber::new(self.shared.order, 0))
    }

    /// Last record LSN, or `None` if the segment is empty
    pub fn end(&self) -> Option<LogSequenceNumber> {
        let state = self.shared.state.lock();
        state
            .last_record
            .map(|position| LogSequenceNumber::new(self.shared.order, position))
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Append a record and return its LSN
    pub fn log_record(&self, payload: &[u8]) -> Result<LogSequenceNumber> {
        if payload.is_empty() {
            return Err(WalError::ProtocolViolation(
                "empty records cannot be logged".to_string(),
            ));
        }

        let (position, pending_pages) = self.shared.append(payload)?;
        if pending_pages >= self.options.max_pages_cache_size {
            if let Some(writer) = &self.writer {
                writer.nudge();
            }
        }
        Ok(LogSequenceNumber::new(self.shared.order, position))
    }

    /// Read the record stored at `lsn`; `None` if it lies past the end
    pub fn read_record(&self, lsn: LogSequenceNumber) -> Result<Option<Vec<u8>>> {
        self.shared.read_record(lsn)
    }

    /// LSN of the record following `lsn` in this segment
    pub fn next_lsn(&self, lsn: LogSequenceNumber) -> Result<Option<LogSequenceNumber>> {
        self.shared.next_lsn(lsn)
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Force every byte written so far to disk
    pub fn flush(&self) -> Result<()> {
        self.flusher().flush()
    }

    /// Start the asynchronous writer; no-op if already running or read-only
    pub fn start_background_write(&mut self) -> Result<()> {
        if self.writer.is_some() || !self.shared.format.is_writable() {
            return Ok(());
        }
        self.writer = Some(BackgroundWriter::spawn(
            Arc::clone(&self.shared),
            self.options.commit_delay,
            self.options.shutdown_timeout,
        )?);
        Ok(())
    }

    /// Stop the asynchronous writer, optionally writing pending pages first
    pub fn stop_background_write(&mut self, flush: bool) -> Result<()> {
        match self.writer.take() {
            Some(writer) => writer.stop(flush),
            None if flush => self.shared.write_pending(),
            None => Ok(()),
        }
    }

    pub fn is_background_write_running(&self) -> bool {
        self.writer.is_some()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop background writing and release the file handle
    pub fn close(&mut self, flush: bool) -> Result<()> {
        self.stop_background_write(flush)?;
        self.shared.file.lock().handle = None;
        Ok(())
    }

    /// Stop background writing and remove the backing file
    pub fn delete(&mut self) -> Result<()> {
        self.stop_background_write(false)?;
        self.shared.file.lock().handle = None;

        let path = &self.shared.path;
        let mut attempt = 0;
        loop {
            match fs::remove_file(path) {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => {
                    attempt += 1;
                    if attempt >= DELETE_RETRIES {
                        return Err(self.shared.io_error(e));
                    }
                    tracing::warn!(
                        segment = self.shared.order,
                        attempt,
                        error = %e,
                        "retrying segment deletion"
                    );
                }
            }
        }

        tracing::debug!(segment = self.shared.order, "deleted log segment");
        Ok(())
    }
}
