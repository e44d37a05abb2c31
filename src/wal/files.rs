//! Segment File Naming and Discovery
//!
//! Segment files are named `<storage>.<order>.wal` with a decimal order.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Extension of segment files
pub const SEGMENT_EXTENSION: &str = "wal";

/// A segment file found in the WAL directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub order: u64,
    pub path: PathBuf,
}

/// Generate the path of a segment file
pub fn segment_path(dir: &Path, storage_name: &str, order: u64) -> PathBuf {
    dir.join(format!("{}.{}.{}", storage_name, order, SEGMENT_EXTENSION))
}

/// Parse `(storage, order)` from a segment file name
/// "orders.42.wal" → Some(("orders", 42))
pub fn parse_segment_name(file_name: &str) -> Option<(&str, u64)> {
    let (stem, extension) = file_name.rsplit_once('.')?;
    if !extension.eq_ignore_ascii_case(SEGMENT_EXTENSION) {
        return None;
    }
    let (storage, order) = stem.rsplit_once('.')?;
    if storage.is_empty() || order.is_empty() || !order.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((storage, order.parse().ok()?))
}

/// Discover segment files in `dir`, sorted by order
///
/// With `filter` set only files of `storage_name` are returned; the storage
/// name comparison ignores case.
pub fn discover_segments(dir: &Path, storage_name: &str, filter: bool) -> Result<Vec<SegmentFile>> {
    let wanted = storage_name.to_lowercase();
    let mut segments = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some((storage, order)) = parse_segment_name(name) {
            if filter && storage.to_lowercase() != wanted {
                continue;
            }
            segments.push(SegmentFile {
                order,
                path: path.clone(),
            });
        }
    }

    segments.sort_by_key(|segment| segment.order);
    Ok(segments)
}
