//! WAL Reader
//!
//! Forward iteration over decoded records, crossing segment boundaries.

use crate::error::Result;
use crate::lsn::LogSequenceNumber;

use super::manager::DiskWriteAheadLog;
use super::record::WalRecord;

/// Reads records from a log in LSN order
pub struct WalReader<'a> {
    wal: &'a DiskWriteAheadLog,
    next: Option<LogSequenceNumber>,
}

impl<'a> WalReader<'a> {
    /// Start reading at `from`, which must be the LSN of a record
    pub fn new(wal: &'a DiskWriteAheadLog, from: LogSequenceNumber) -> Self {
        Self {
            wal,
            next: Some(from),
        }
    }

    /// Start reading at the first record of the log
    pub fn from_begin(wal: &'a DiskWriteAheadLog) -> Result<Self> {
        Ok(Self {
            wal,
            next: wal.begin()?,
        })
    }

    /// Read the next record; `None` at the end of the log
    pub fn next_record(&mut self) -> Result<Option<(LogSequenceNumber, WalRecord)>> {
        let Some(lsn) = self.next else {
            return Ok(None);
        };

        let record = match self.wal.read(lsn)? {
            Some(record) => record,
            None => {
                self.next = None;
                return Ok(None);
            }
        };
        self.next = self.wal.next(lsn)?;
        Ok(Some((lsn, record)))
    }
}

impl Iterator for WalReader<'_> {
    type Item = Result<(LogSequenceNumber, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                // Stop after the first error
                self.next = None;
                Some(Err(e))
            }
        }
    }
}
