//! In-memory block device, used by tests and benchmarks.

use crate::device::{check_request, BlockDevice, WriteFlags};
use parking_lot::RwLock;
use snapstore_core::{Sector, SECTOR_SIZE};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

/// A block device backed by a `Vec<u8>`.
///
/// The device can be grown with [`MemoryDevice::resize`] and its contents
/// copied out with [`MemoryDevice::image`] to simulate reopening after a crash.
pub struct MemoryDevice {
    data: RwLock<Vec<u8>>,
    logical_block_size: u32,
    flushes: AtomicU64,
}

impl MemoryDevice {
    /// Create a zero-filled device of `size_sectors` sectors.
    pub fn new(size_sectors: u64) -> Self {
        Self::filled(size_sectors, 0)
    }

    /// Create a device whose every byte is `pattern`, to stand in for a disk
    /// that was never cleared.
    pub fn filled(size_sectors: u64, pattern: u8) -> Self {
        MemoryDevice {
            data: RwLock::new(vec![pattern; size_sectors as usize * SECTOR_SIZE]),
            logical_block_size: SECTOR_SIZE as u32,
            flushes: AtomicU64::new(0),
        }
    }

    /// Create a device from an existing image.
    ///
    /// The image is truncated to a whole number of sectors.
    pub fn from_image(mut image: Vec<u8>) -> Self {
        let whole = image.len() - image.len() % SECTOR_SIZE;
        image.truncate(whole);
        MemoryDevice {
            data: RwLock::new(image),
            logical_block_size: SECTOR_SIZE as u32,
            flushes: AtomicU64::new(0),
        }
    }

    /// Set the reported logical block size (builder pattern).
    pub fn with_logical_block_size(mut self, bytes: u32) -> Self {
        self.logical_block_size = bytes;
        self
    }

    /// Copy of the current device contents.
    pub fn image(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Grow or shrink the device. New space is zero-filled.
    pub fn resize(&self, size_sectors: u64) {
        self.data
            .write()
            .resize(size_sectors as usize * SECTOR_SIZE, 0);
    }

    /// Number of explicit or write-implied cache flushes seen.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for MemoryDevice {
    fn read_sectors(&self, sector: Sector, buf: &mut [u8]) -> io::Result<()> {
        let data = self.data.read();
        let offset = check_request(sector, buf.len(), data.len() as u64)? as usize;
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_sectors(&self, sector: Sector, buf: &[u8], flags: WriteFlags) -> io::Result<()> {
        let mut data = self.data.write();
        let offset = check_request(sector, buf.len(), data.len() as u64)? as usize;
        if flags.preflush {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        if flags.fua {
            self.flushes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn size_sectors(&self) -> io::Result<u64> {
        Ok((self.data.read().len() / SECTOR_SIZE) as u64)
    }

    fn logical_block_size(&self) -> u32 {
        self.logical_block_size
    }
}
