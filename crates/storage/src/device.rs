//! Block device abstraction consumed by the exception store.
//!
//! Devices are sector addressed and synchronous: a call returns only once the
//! I/O has completed or failed. Buffers must be a whole number of sectors.

use snapstore_core::{Sector, SECTOR_SHIFT, SECTOR_SIZE};
use std::io;
use std::sync::Arc;

/// Durability flags for a write, mirroring the block layer's preflush and
/// force-unit-access request bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteFlags {
    /// Flush the device's volatile cache before the write is issued
    pub preflush: bool,
    /// Report completion only once the write itself is on stable storage
    pub fua: bool,
}

impl WriteFlags {
    /// Plain cached write.
    pub const NONE: WriteFlags = WriteFlags {
        preflush: false,
        fua: false,
    };

    /// Force-unit-access write.
    pub const FUA: WriteFlags = WriteFlags {
        preflush: false,
        fua: true,
    };

    /// Preflush followed by a force-unit-access write.
    pub const FLUSH_FUA: WriteFlags = WriteFlags {
        preflush: true,
        fua: true,
    };

    /// True if the write must be on stable storage when it completes.
    pub fn is_durable(&self) -> bool {
        self.fua
    }
}

/// The block-chunk read/write primitive.
///
/// Implementations must be safe to share between the caller's thread and the
/// metadata worker thread.
pub trait BlockDevice: Send + Sync {
    /// Read `buf.len()` bytes starting at `sector`.
    fn read_sectors(&self, sector: Sector, buf: &mut [u8]) -> io::Result<()>;

    /// Write `buf` starting at `sector` with the given durability flags.
    fn write_sectors(&self, sector: Sector, buf: &[u8], flags: WriteFlags) -> io::Result<()>;

    /// Flush the device's volatile write cache.
    fn flush(&self) -> io::Result<()>;

    /// Device capacity in sectors.
    fn size_sectors(&self) -> io::Result<u64>;

    /// Logical block size in bytes (a multiple of the sector size).
    fn logical_block_size(&self) -> u32 {
        SECTOR_SIZE as u32
    }
}

impl<T: BlockDevice + ?Sized> BlockDevice for Arc<T> {
    fn read_sectors(&self, sector: Sector, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_sectors(sector, buf)
    }

    fn write_sectors(&self, sector: Sector, buf: &[u8], flags: WriteFlags) -> io::Result<()> {
        (**self).write_sectors(sector, buf, flags)
    }

    fn flush(&self) -> io::Result<()> {
        (**self).flush()
    }

    fn size_sectors(&self) -> io::Result<u64> {
        (**self).size_sectors()
    }

    fn logical_block_size(&self) -> u32 {
        (**self).logical_block_size()
    }
}

/// Validate a sector-addressed request against a device of `capacity_bytes`
/// and return the byte offset it starts at.
pub(crate) fn check_request(sector: Sector, len: usize, capacity_bytes: u64) -> io::Result<u64> {
    if len % SECTOR_SIZE != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("I/O length {} is not a multiple of the sector size", len),
        ));
    }

    let offset = sector.checked_mul(1 << SECTOR_SHIFT).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "sector offset overflows")
    })?;
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "I/O range overflows"))?;

    if end > capacity_bytes {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "I/O at sector {} (+{} bytes) beyond end of device ({} bytes)",
                sector, len, capacity_bytes
            ),
        ));
    }

    Ok(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_flags_durability() {
        assert!(!WriteFlags::NONE.is_durable());
        assert!(WriteFlags::FUA.is_durable());
        assert!(WriteFlags::FLUSH_FUA.preflush);
    }

    #[test]
    fn test_check_request_in_range() {
        assert_eq!(check_request(2, 1024, 4096).unwrap(), 1024);
    }

    #[test]
    fn test_check_request_rejects_partial_sector() {
        let err = check_request(0, 100, 4096).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_check_request_rejects_past_end() {
        let err = check_request(7, 1024, 4096).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
