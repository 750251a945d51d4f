//! Value types shared by the storage and durability crates.

use serde::{Deserialize, Serialize};

/// log2 of the sector size.
pub const SECTOR_SHIFT: u32 = 9;

/// Bytes per sector. Chunk sizes are always expressed in sectors.
pub const SECTOR_SIZE: usize = 1 << SECTOR_SHIFT;

/// Index of a chunk on the origin or COW device.
pub type ChunkIndex = u64;

/// Absolute sector number on a device.
pub type Sector = u64;

/// A copy-on-write redirection: origin chunk `old_chunk` is preserved in COW
/// chunk `new_chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exception {
    /// Chunk on the origin device being shadowed
    pub old_chunk: ChunkIndex,
    /// Chunk on the COW device holding the preserved data
    pub new_chunk: ChunkIndex,
}

impl Exception {
    /// Create a new exception.
    pub fn new(old_chunk: ChunkIndex, new_chunk: ChunkIndex) -> Self {
        Exception {
            old_chunk,
            new_chunk,
        }
    }

    /// A record with `new_chunk == 0` is the unused tail of a metadata area.
    pub fn is_live(&self) -> bool {
        self.new_chunk != 0
    }
}

/// Space accounting for a store, in sectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Capacity of the COW device
    pub total_sectors: u64,
    /// Sectors handed out so far, including header and metadata areas
    pub sectors_allocated: u64,
    /// Sectors occupied by the header and metadata areas in use
    pub metadata_sectors: u64,
}

impl Usage {
    /// Sectors still available for new exceptions.
    pub fn free_sectors(&self) -> u64 {
        self.total_sectors.saturating_sub(self.sectors_allocated)
    }

    /// True once every sector of the device has been allocated.
    pub fn is_full(&self) -> bool {
        self.sectors_allocated >= self.total_sectors
    }
}

/// A trailing run of committed exceptions that can be merged with one copy.
///
/// Exception `i` of the run (counting back from the last committed one) is
/// `(last_old_chunk - i, last_new_chunk - i)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRun {
    /// Origin chunk of the most recently committed exception
    pub last_old_chunk: ChunkIndex,
    /// COW chunk of the most recently committed exception
    pub last_new_chunk: ChunkIndex,
    /// Number of consecutive exceptions ending at the last one (at least 1)
    pub count: u32,
}

impl MergeRun {
    /// Lowest origin chunk covered by the run.
    pub fn first_old_chunk(&self) -> ChunkIndex {
        self.last_old_chunk - u64::from(self.count.saturating_sub(1))
    }

    /// Lowest COW chunk covered by the run.
    pub fn first_new_chunk(&self) -> ChunkIndex {
        self.last_new_chunk - u64::from(self.count.saturating_sub(1))
    }
}
