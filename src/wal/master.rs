//! Master Record Store
//!
//! Persists the LSN of the last checkpoint in `<storage>.wmr`.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ Slot 0 (offset 0)                               │
//! │ ┌─────────┬─────────────┬──────────────┐        │
//! │ │ CRC (4) │ Segment (8) │ Position (8) │        │
//! │ └─────────┴─────────────┴──────────────┘        │
//! ├─────────────────────────────────────────────────┤
//! │ Slot 1 (offset 20)                              │
//! │ ┌─────────┬─────────────┬──────────────┐        │
//! │ │ CRC (4) │ Segment (8) │ Position (8) │        │
//! │ └─────────┴─────────────┴──────────────┘        │
//! └─────────────────────────────────────────────────┘
//! ```
//! All fields are big-endian; the CRC covers the 16 LSN bytes.
//!
//! Writes alternate between the slots, so a crash in the middle of a write
//! leaves the previous checkpoint intact in the other slot.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, WalError};
use crate::lsn::LogSequenceNumber;

/// Size of one master record slot
pub const MASTER_RECORD_SIZE: usize = 4 + LogSequenceNumber::SERIALIZED_SIZE;

/// Extension of the master record file
pub const MASTER_RECORD_EXTENSION: &str = "wmr";

const SLOT_COUNT: usize = 2;
const DELETE_RETRIES: usize = 10;

/// Dual-slot, CRC-protected checkpoint pointer
pub struct MasterRecordStore {
    path: PathBuf,
    storage_name: String,
    file: Option<File>,
    /// Decoded content of each slot, `None` when empty or corrupt
    slots: [Option<LogSequenceNumber>; SLOT_COUNT],
    /// Index of the authoritative slot
    current: Option<usize>,
}

impl MasterRecordStore {
    /// Path of the master record file for a storage
    pub fn file_path(dir: &Path, storage_name: &str) -> PathBuf {
        dir.join(format!("{}.{}", storage_name, MASTER_RECORD_EXTENSION))
    }

    /// Open (or create) the master record file and pick the authoritative slot
    pub fn open(dir: &Path, storage_name: &str) -> Result<Self> {
        let path = Self::file_path(dir, storage_name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| WalError::io_at(storage_name, &path, e))?;

        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|e| WalError::io_at(storage_name, &path, e))?;

        let mut slots = [None; SLOT_COUNT];
        for (index, slot) in slots.iter_mut().enumerate() {
            *slot = decode_slot(&content, index, storage_name);
        }

        let current = match slots {
            [Some(first), Some(second)] => Some(if second > first { 1 } else { 0 }),
            [Some(_), None] => Some(0),
            [None, Some(_)] => Some(1),
            [None, None] => None,
        };

        tracing::debug!(
            storage = storage_name,
            checkpoint = ?current.and_then(|i| slots[i]),
            "opened master record file"
        );

        Ok(Self {
            path,
            storage_name: storage_name.to_string(),
            file: Some(file),
            slots,
            current,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// LSN of the last recorded checkpoint
    pub fn checkpoint(&self) -> Option<LogSequenceNumber> {
        self.current.and_then(|index| self.slots[index])
    }

    /// Persist a new checkpoint LSN into the non-authoritative slot
    pub fn record_checkpoint(&mut self, lsn: LogSequenceNumber) -> Result<()> {
        let target = match self.current {
            Some(index) => 1 - index,
            None => 0,
        };
        self.write_slot(target, lsn)?;
        self.current = Some(target);
        Ok(())
    }

    /// Re-validate both slots after a structural change of the log
    ///
    /// If no slot survives the file is truncated; if exactly one survives it
    /// is copied into the other slot.
    pub fn fix<F>(&mut self, is_valid: F) -> Result<()>
    where
        F: Fn(LogSequenceNumber) -> bool,
    {
        let valid: Vec<Option<LogSequenceNumber>> = self
            .slots
            .iter()
            .map(|slot| slot.filter(|lsn| is_valid(*lsn)))
            .collect();

        match (valid[0], valid[1]) {
            (Some(_), Some(_)) => Ok(()),
            (Some(lsn), None) | (None, Some(lsn)) => {
                let survivor = if valid[0].is_some() { 0 } else { 1 };
                tracing::debug!(
                    storage = %self.storage_name,
                    checkpoint = %lsn,
                    "copying surviving master record into both slots"
                );
                self.write_slot(1 - survivor, lsn)?;
                self.current = Some(survivor);
                Ok(())
            }
            (None, None) => self.clear(),
        }
    }

    /// Release the file handle
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Close and remove the master record file
    pub fn delete(&mut self) -> Result<()> {
        self.close();
        let mut attempt = 0;
        loop {
            match fs::remove_file(&self.path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= DELETE_RETRIES {
                        return Err(WalError::io_at(self.storage_name.as_str(), &self.path, e));
                    }
                    tracing::warn!(
                        storage = %self.storage_name,
                        attempt,
                        error = %e,
                        "retrying master record deletion"
                    );
                }
            }
        }
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn file(&mut self) -> Result<&mut File> {
        match self.file {
            Some(ref mut file) => Ok(file),
            None => Err(WalError::Closed),
        }
    }

    fn write_slot(&mut self, index: usize, lsn: LogSequenceNumber) -> Result<()> {
        let payload = lsn.to_bytes();
        let mut slot = [0u8; MASTER_RECORD_SIZE];
        slot[0..4].copy_from_slice(&crc32fast::hash(&payload).to_be_bytes());
        slot[4..].copy_from_slice(&payload);

        let storage = self.storage_name.clone();
        let path = self.path.clone();
        let file = self.file()?;
        file.seek(SeekFrom::Start((index * MASTER_RECORD_SIZE) as u64))
            .and_then(|_| file.write_all(&slot))
            .and_then(|_| file.sync_data())
            .map_err(|e| WalError::io_at(storage, path, e))?;

        self.slots[index] = Some(lsn);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        if self.slots.iter().all(Option::is_none) && self.current.is_none() {
            let file = self.file()?;
            if file.metadata()?.len() == 0 {
                return Ok(());
            }
        }

        tracing::debug!(storage = %self.storage_name, "no valid master record left, clearing");
        let storage = self.storage_name.clone();
        let path = self.path.clone();
        let file = self.file()?;
        file.set_len(0)
            .and_then(|_| file.sync_data())
            .map_err(|e| WalError::io_at(storage, path, e))?;

        self.slots = [None; SLOT_COUNT];
        self.current = None;
        Ok(())
    }
}

/// Decode one slot from the file content, logging corruption
fn decode_slot(content: &[u8], index: usize, storage_name: &str) -> Option<LogSequenceNumber> {
    let start = index * MASTER_RECORD_SIZE;
    let end = start + MASTER_RECORD_SIZE;
    if content.len() <= start {
        return None;
    }
    if content.len() < end {
        tracing::error!(storage = storage_name, slot = index, "master record slot is truncated");
        return None;
    }

    let slot = &content[start..end];
    let stored = u32::from_be_bytes(slot[0..4].try_into().unwrap());
    if stored != crc32fast::hash(&slot[4..]) {
        tracing::error!(storage = storage_name, slot = index, "master record slot is corrupt");
        return None;
    }
    LogSequenceNumber::from_bytes(&slot[4..]).ok()
}
