//! # pagelog
//!
//! A segmented, page-framed write-ahead log for page-oriented storage
//! engines:
//! - Log Sequence Numbers (segment, position) with a total order
//! - Checksummed fixed-size pages with a legacy read path
//! - Rotation that never splits an in-flight atomic operation
//! - Dual-slot master record for the last checkpoint
//! - Redo/undo page operations and a copy-on-write page change tracker
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Storage Engine (caller)                     │
//! │        atomic operations over cached pages                  │
//! └──────────────┬───────────────────────────────┬──────────────┘
//!                │                               │
//!                ▼                               ▼
//!   ┌────────────────────────┐      ┌────────────────────────┐
//!   │   CacheEntryChanges    │      │   DiskWriteAheadLog    │
//!   │ (overlay + page ops)   │─────▶│ (LSNs, rotation, cut)  │
//!   └────────────────────────┘      └───────────┬────────────┘
//!                                               │
//!                        ┌──────────────────────┼──────────────┐
//!                        ▼                      ▼              ▼
//!                ┌──────────────┐      ┌──────────────┐ ┌────────────┐
//!                │  LogSegment  │ ...  │  LogSegment  │ │   Master   │
//!                │   (sealed)   │      │   (active)   │ │   Record   │
//!                └──────────────┘      └──────────────┘ └────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod lsn;

pub mod wal;
pub mod po;
pub mod cache;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, WalError};
pub use config::{WalConfig, WalConfigBuilder};
pub use lsn::LogSequenceNumber;
pub use wal::{
    AtomicOperationMetadata, DiskWriteAheadLog, OperationUnitId, WalReader, WalRecord,
    WalRecovery,
};
pub use po::{PageKey, PageOperation, PageOperationRecord, PageOperationRegistry};
pub use cache::{CacheEntry, CacheEntryChanges, MemoryCacheEntry, PageBuffer};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of pagelog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
