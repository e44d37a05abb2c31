//! Segment Page Format
//!
//! A segment file is a sequence of fixed-size pages. Each page carries a
//! header followed by a slice of the segment's logical record stream.
//!
//! ## Page Layout
//! ```text
//! V1 (legacy, read-only)
//! ┌───────────────┬──────────┬──────────────────────────────┐
//! │ Magic u64 (8) │ Used (4) │ Payload (PAGE_SIZE - 12)     │
//! └───────────────┴──────────┴──────────────────────────────┘
//!
//! V2 (current)
//! ┌───────────────┬─────────┬──────────┬────────────────────┐
//! │ Magic u64 (8) │ CRC (4) │ Used (4) │ Payload (PAGE - 16)│
//! └───────────────┴─────────┴──────────┴────────────────────┘
//! ```
//! The V2 CRC covers everything after the CRC field (used + payload).
//!
//! ## Record Framing (inside the logical stream)
//! ```text
//! V1: [Len u32 (4)][Payload]
//! V2: [Len u32 (4)][Payload CRC (4)][Payload]
//! ```
//! A zero length marks the end of the stream (zero padding).

/// Size of every page in a segment file
pub const PAGE_SIZE: usize = 4096;

/// Offset of the magic number inside a page
pub const MAGIC_NUMBER_OFFSET: usize = 0;

/// Magic number of legacy V1 pages
pub const MAGIC_V1: u64 = 0xFACB_03FE_0000_0001;

/// Magic number of current V2 pages
pub const MAGIC_V2: u64 = 0xEF31_BCDE_0000_0002;

const V1_HEADER_SIZE: usize = 12;
const V2_HEADER_SIZE: usize = 16;
const V2_CRC_OFFSET: usize = 8;

/// On-disk format version of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentFormat {
    /// Legacy format: no page or record checksums
    V1,
    /// Current format: page and record CRC32
    V2,
}

impl SegmentFormat {
    /// Format used for every newly created segment
    pub const LATEST: SegmentFormat = SegmentFormat::V2;

    /// Magic number written at `MAGIC_NUMBER_OFFSET`
    pub fn magic(self) -> u64 {
        match self {
            SegmentFormat::V1 => MAGIC_V1,
            SegmentFormat::V2 => MAGIC_V2,
        }
    }

    /// Detect the format from a magic number; anything not V1 is read as V2
    pub fn from_magic(magic: u64) -> SegmentFormat {
        if magic == MAGIC_V1 {
            SegmentFormat::V1
        } else {
            SegmentFormat::V2
        }
    }

    pub fn page_header_size(self) -> usize {
        match self {
            SegmentFormat::V1 => V1_HEADER_SIZE,
            SegmentFormat::V2 => V2_HEADER_SIZE,
        }
    }

    /// Logical payload bytes one page can hold
    pub fn page_capacity(self) -> usize {
        PAGE_SIZE - self.page_header_size()
    }

    pub fn record_header_size(self) -> usize {
        match self {
            SegmentFormat::V1 => 4,
            SegmentFormat::V2 => 8,
        }
    }

    /// Whether new records may be appended to segments of this format
    pub fn is_writable(self) -> bool {
        self == SegmentFormat::LATEST
    }

    // =========================================================================
    // Pages
    // =========================================================================

    /// Build a full page image holding `payload` (at most one page capacity)
    pub fn encode_page(self, payload: &[u8]) -> Vec<u8> {
        assert!(
            payload.len() <= self.page_capacity(),
            "page payload exceeds page capacity"
        );

        let header = self.page_header_size();
        let mut page = vec![0u8; PAGE_SIZE];
        page[MAGIC_NUMBER_OFFSET..MAGIC_NUMBER_OFFSET + 8]
            .copy_from_slice(&self.magic().to_le_bytes());
        page[header - 4..header].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        page[header..header + payload.len()].copy_from_slice(payload);

        if self == SegmentFormat::V2 {
            let crc = crc32fast::hash(&page[V2_CRC_OFFSET + 4..]);
            page[V2_CRC_OFFSET..V2_CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        }

        page
    }

    /// Validate a page image and return its used payload
    ///
    /// Returns `None` if the magic number, CRC or used length is invalid.
    pub fn decode_page(self, page: &[u8]) -> Option<&[u8]> {
        if page.len() != PAGE_SIZE || read_magic(page) != self.magic() {
            return None;
        }

        let header = self.page_header_size();
        let used = u32::from_le_bytes(page[header - 4..header].try_into().ok()?) as usize;
        if used > self.page_capacity() {
            return None;
        }

        if self == SegmentFormat::V2 {
            let stored = u32::from_le_bytes(page[V2_CRC_OFFSET..V2_CRC_OFFSET + 4].try_into().ok()?);
            if stored != crc32fast::hash(&page[V2_CRC_OFFSET + 4..]) {
                return None;
            }
        }

        Some(&page[header..header + used])
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Append a framed record to `out`
    pub fn encode_record(self, payload: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        if self == SegmentFormat::V2 {
            out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        }
        out.extend_from_slice(payload);
    }

    /// Parse a record header: (payload length, stored payload CRC)
    pub fn decode_record_header(self, header: &[u8]) -> (usize, Option<u32>) {
        let len = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        let crc = match self {
            SegmentFormat::V1 => None,
            SegmentFormat::V2 => Some(u32::from_le_bytes(header[4..8].try_into().unwrap())),
        };
        (len, crc)
    }

    /// Check a payload against the CRC from its header (V1 has none)
    pub fn verify_record(self, crc: Option<u32>, payload: &[u8]) -> bool {
        match crc {
            Some(expected) => crc32fast::hash(payload) == expected,
            None => true,
        }
    }
}

/// Read the magic number from the start of a page
pub fn read_magic(page: &[u8]) -> u64 {
    u64::from_le_bytes(
        page[MAGIC_NUMBER_OFFSET..MAGIC_NUMBER_OFFSET + 8]
            .try_into()
            .unwrap(),
    )
}
