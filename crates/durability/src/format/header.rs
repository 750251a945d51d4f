//! Disk header format.
//!
//! The header occupies chunk 0 of the COW device.
//!
//! # Binary Format (16 bytes, rest of the chunk zero)
//!
//! ```text
//! magic(4) + valid(4) + version(4) + chunk_size(4)
//! ```
//!
//! All fields are little-endian `u32`; `chunk_size` is in sectors. An all-zero
//! magic means the device has never held a store.

use byteorder::{ByteOrder, LittleEndian};
use snapstore_core::{Result, StoreError};

/// Magic number identifying a persistent exception store ("SnAp").
pub const SNAP_MAGIC: u32 = 0x7041_6e53;

/// The only on-disk format version this build reads and writes.
pub const SNAPSHOT_DISK_VERSION: u32 = 1;

/// Chunks reserved for the header at the start of the device.
pub const HEADER_CHUNKS: u64 = 1;

/// Encoded size of the header fields.
pub const DISK_HEADER_SIZE: usize = 16;

/// Decoded disk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskHeader {
    /// Whether the store was still trustworthy when the header was written
    pub valid: bool,
    /// Format version
    pub version: u32,
    /// Chunk size in sectors
    pub chunk_size: u32,
}

impl DiskHeader {
    /// Header for the current format version.
    pub fn new(valid: bool, chunk_size: u32) -> Self {
        DiskHeader {
            valid,
            version: SNAPSHOT_DISK_VERSION,
            chunk_size,
        }
    }

    /// Serialize into `buf`, zero-filling everything past the header fields.
    pub fn encode_into(&self, buf: &mut [u8]) {
        assert!(
            buf.len() >= DISK_HEADER_SIZE,
            "header buffer smaller than the header"
        );
        buf.fill(0);
        LittleEndian::write_u32(&mut buf[0..4], SNAP_MAGIC);
        LittleEndian::write_u32(&mut buf[4..8], u32::from(self.valid));
        LittleEndian::write_u32(&mut buf[8..12], self.version);
        LittleEndian::write_u32(&mut buf[12..16], self.chunk_size);
    }

    /// Deserialize from the first bytes of the header chunk.
    ///
    /// Returns `Ok(None)` for a device that has never held a store (magic is
    /// zero). A non-zero foreign magic or an unsupported version is
    /// `CorruptStore`.
    pub fn decode(buf: &[u8]) -> Result<Option<DiskHeader>> {
        if buf.len() < DISK_HEADER_SIZE {
            return Err(StoreError::corrupt(format!(
                "header chunk too short: {} bytes",
                buf.len()
            )));
        }

        let magic = LittleEndian::read_u32(&buf[0..4]);
        if magic == 0 {
            return Ok(None);
        }
        if magic != SNAP_MAGIC {
            return Err(StoreError::corrupt(format!(
                "invalid or corrupt snapshot header: magic {:#010x}",
                magic
            )));
        }

        let version = LittleEndian::read_u32(&buf[8..12]);
        if version != SNAPSHOT_DISK_VERSION {
            return Err(StoreError::corrupt(format!(
                "unable to handle snapshot disk version {}",
                version
            )));
        }

        Ok(Some(DiskHeader {
            valid: LittleEndian::read_u32(&buf[4..8]) != 0,
            version,
            chunk_size: LittleEndian::read_u32(&buf[12..16]),
        }))
    }
}
