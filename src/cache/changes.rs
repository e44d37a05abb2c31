//! Sparse Page Change Buffer
//!
//! Records writes to one page as 64-byte portions. A portion is copied from
//! the base page the first time it is touched, so reads can overlay the
//! changed portions on top of an unchanged base.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::Result;
use crate::po::check_bounds;

/// Granularity of tracked changes
pub const PORTION_SIZE: usize = 64;

/// Page-sized overlay of changed portions
#[derive(Debug, Clone, Default)]
pub struct PageChanges {
    page_size: usize,
    /// Portion index -> portion content
    portions: BTreeMap<usize, Vec<u8>>,
}

impl PageChanges {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            portions: BTreeMap::new(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn portion_range(&self, index: usize) -> Range<usize> {
        let start = index * PORTION_SIZE;
        start..(start + PORTION_SIZE).min(self.page_size)
    }

    /// Write `data` at `offset`, copying untouched portions from `base` first
    pub fn set_bytes(&mut self, base: &[u8], offset: usize, data: &[u8]) -> Result<()> {
        check_bounds(self.page_size, offset, data.len())?;
        check_bounds(base.len(), offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        let end = offset + data.len();
        for index in offset / PORTION_SIZE..=(end - 1) / PORTION_SIZE {
            let range = self.portion_range(index);
            let portion = self
                .portions
                .entry(index)
                .or_insert_with(|| base[range.clone()].to_vec());

            let from = offset.max(range.start);
            let to = end.min(range.end);
            portion[from - range.start..to - range.start]
                .copy_from_slice(&data[from - offset..to - offset]);
        }
        Ok(())
    }

    /// Read `len` bytes at `offset` with the changes laid over `base`
    pub fn read_bytes(&self, base: &[u8], offset: usize, len: usize) -> Result<Vec<u8>> {
        check_bounds(self.page_size, offset, len)?;
        check_bounds(base.len(), offset, len)?;
        let mut out = base[offset..offset + len].to_vec();
        if len == 0 {
            return Ok(out);
        }

        let end = offset + len;
        for (&index, portion) in self
            .portions
            .range(offset / PORTION_SIZE..=(end - 1) / PORTION_SIZE)
        {
            let range = self.portion_range(index);
            let from = offset.max(range.start);
            let to = end.min(range.end);
            out[from - offset..to - offset]
                .copy_from_slice(&portion[from - range.start..to - range.start]);
        }
        Ok(out)
    }

    /// Copy every changed portion into `target`
    pub fn apply_to(&self, target: &mut [u8]) {
        for (&index, portion) in &self.portions {
            let range = self.portion_range(index);
            target[range].copy_from_slice(portion);
        }
    }

    /// Byte ranges covered by changed portions, adjacent portions merged
    pub fn changed_ranges(&self) -> Vec<Range<usize>> {
        let mut ranges: Vec<Range<usize>> = Vec::new();
        for &index in self.portions.keys() {
            let range = self.portion_range(index);
            match ranges.last_mut() {
                Some(last) if last.end == range.start => last.end = range.end,
                _ => ranges.push(range),
            }
        }
        ranges
    }

    pub fn portion_count(&self) -> usize {
        self.portions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portions.is_empty()
    }

    pub fn clear(&mut self) {
        self.portions.clear();
    }
}
