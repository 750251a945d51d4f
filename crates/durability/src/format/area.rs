//! Metadata area geometry and exception record codec.
//!
//! # Record Layout (16 bytes)
//!
//! ```text
//! old_chunk(8, LE) + new_chunk(8, LE)
//! ```
//!
//! Records are packed from the start of the area chunk. The first record with
//! `new_chunk == 0` ends the area; everything after it is zero.
//!
//! Area `i` lives at chunk `HEADER_CHUNKS + (epa + 1) * i` and is followed by
//! the `epa` data chunks whose exceptions it will record.

use super::header::HEADER_CHUNKS;
use byteorder::{ByteOrder, LittleEndian};
use snapstore_core::{ChunkIndex, Exception, SECTOR_SIZE};

/// Encoded size of one exception record.
pub const DISK_EXCEPTION_SIZE: usize = 16;

/// First chunk the allocator may hand out: right after the header and area 0.
pub const FIRST_DATA_CHUNK: ChunkIndex = HEADER_CHUNKS + 1;

/// Geometry of the metadata areas for a given chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaLayout {
    chunk_size: u32,
    exceptions_per_area: u32,
}

impl AreaLayout {
    /// Layout for `chunk_size`-sector chunks, optionally capping the number of
    /// records per area below what the chunk could hold.
    pub fn new(chunk_size: u32, capacity_limit: Option<u32>) -> Self {
        let natural = Self::natural_capacity(chunk_size);
        let exceptions_per_area = match capacity_limit {
            Some(limit) => limit.clamp(1, natural.max(1)),
            None => natural,
        };
        AreaLayout {
            chunk_size,
            exceptions_per_area,
        }
    }

    /// Records that fit in one chunk of `chunk_size` sectors.
    pub fn natural_capacity(chunk_size: u32) -> u32 {
        (chunk_size as usize * SECTOR_SIZE / DISK_EXCEPTION_SIZE) as u32
    }

    /// Chunk size in sectors.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Records per metadata area.
    pub fn exceptions_per_area(&self) -> u32 {
        self.exceptions_per_area
    }

    /// Chunks covered by one area: the area chunk plus its data chunks.
    pub fn stride(&self) -> u64 {
        u64::from(self.exceptions_per_area) + 1
    }

    /// Chunk holding metadata area `area`.
    pub fn area_location(&self, area: u64) -> ChunkIndex {
        HEADER_CHUNKS + self.stride() * area
    }

    /// True for the header chunk and every metadata area chunk.
    pub fn is_metadata_chunk(&self, chunk: ChunkIndex) -> bool {
        chunk < HEADER_CHUNKS || (chunk - HEADER_CHUNKS) % self.stride() == 0
    }

    /// Move an allocation cursor off a metadata area chunk.
    pub fn skip_metadata(&self, next_free: ChunkIndex) -> ChunkIndex {
        if next_free % self.stride() == HEADER_CHUNKS {
            next_free + 1
        } else {
            next_free
        }
    }

    fn slot_range(&self, area: &[u8], slot: u32) -> std::ops::Range<usize> {
        assert!(
            slot < self.exceptions_per_area,
            "exception slot {} out of range (area holds {})",
            slot,
            self.exceptions_per_area
        );
        let start = slot as usize * DISK_EXCEPTION_SIZE;
        assert!(
            start + DISK_EXCEPTION_SIZE <= area.len(),
            "area buffer too small for slot {}",
            slot
        );
        start..start + DISK_EXCEPTION_SIZE
    }

    /// Decode the record in `slot`.
    pub fn get_exception(&self, area: &[u8], slot: u32) -> Exception {
        let range = self.slot_range(area, slot);
        let record = &area[range];
        Exception {
            old_chunk: LittleEndian::read_u64(&record[0..8]),
            new_chunk: LittleEndian::read_u64(&record[8..16]),
        }
    }

    /// Encode `exception` into `slot`.
    pub fn set_exception(&self, area: &mut [u8], slot: u32, exception: Exception) {
        let range = self.slot_range(area, slot);
        let record = &mut area[range];
        LittleEndian::write_u64(&mut record[0..8], exception.old_chunk);
        LittleEndian::write_u64(&mut record[8..16], exception.new_chunk);
    }

    /// Zero the record in `slot`.
    pub fn clear_exception(&self, area: &mut [u8], slot: u32) {
        let range = self.slot_range(area, slot);
        area[range].fill(0);
    }
}
