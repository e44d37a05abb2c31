//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only, segmented logging.
//!
//! ## Responsibilities
//! - Append records before any page mutation reaches disk
//! - CRC32 checksums on pages, records and master records
//! - Log Sequence Numbers (LSN) for ordering
//! - Segment rotation, retention and checkpoint tracking
//! - Crash recovery and replay
//!
//! ## Directory Layout
//! ```text
//! {wal_dir}/
//! ├── {storage}.0.wal      sealed segment
//! ├── {storage}.1.wal      sealed segment
//! ├── {storage}.2.wal      active segment (background writer)
//! └── {storage}.wmr        master record (last checkpoint LSN)
//! ```
//!
//! ## Segment File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Page 0 (4096 bytes)                     │
//! │ ┌───────────┬─────────┬──────────┬────┐ │
//! │ │ Magic (8) │ CRC (4) │ Used (4) │Data│ │
//! │ └───────────┴─────────┴──────────┴────┘ │
//! ├─────────────────────────────────────────┤
//! │ Page 1 ...                              │
//! └─────────────────────────────────────────┘
//!
//! Records inside the page data stream:
//! ┌─────────┬─────────┬─────────┐
//! │ Len (4) │ CRC (4) │ Payload │
//! └─────────┴─────────┴─────────┘
//! ```

mod closer;
mod files;
mod limits;
mod listener;
mod manager;
mod master;
pub mod page;
mod reader;
mod record;
mod recovery;
mod segment;
mod stats;
mod writer;

pub use files::{discover_segments, parse_segment_name, segment_path, SegmentFile, SEGMENT_EXTENSION};
pub use limits::CutTillLimits;
pub use listener::{
    FullCheckpointRequestListener, ListenerToken, LowDiskSpaceInfo, LowDiskSpaceListener,
};
pub use manager::{DiskWriteAheadLog, MAX_LAST_TXS};
pub use master::{MasterRecordStore, MASTER_RECORD_EXTENSION, MASTER_RECORD_SIZE};
pub use page::{SegmentFormat, PAGE_SIZE};
pub use reader::WalReader;
pub use record::{AtomicOperationMetadata, OperationUnitId, RecordCodec, WalRecord};
pub use recovery::{MemoryPageStore, PageStore, RecoveryResult, WalRecovery, DEFAULT_PAGE_SIZE};
pub use segment::{detect_format, LogSegment, SegmentOptions};
pub use stats::{LogCallKind, PerformanceStatistic};
