//! Performance statistics hook.

use std::time::Duration;

/// Kind of logging call being timed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCallKind {
    AtomicOperationStart,
    AtomicOperationEnd,
    Record,
}

/// Receives the duration of every logging call
///
/// Implementations must be cheap; they run on the caller's thread.
pub trait PerformanceStatistic: Send + Sync {
    fn wal_record_logged(&self, kind: LogCallKind, elapsed: Duration);
}
