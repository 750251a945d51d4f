//! A block device implemented by a file or raw device node.

use crate::device::{check_request, BlockDevice, WriteFlags};
use snapstore_core::{Sector, SECTOR_SIZE};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A block device backed by a file.
///
/// Positional reads and writes are used so the device can be shared between
/// threads without a seek cursor. FUA and preflush map to `sync_data`.
pub struct FileDevice {
    file: File,
    path: PathBuf,
}

impl FileDevice {
    /// Open an existing file for read/write.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        debug!(target: "snapstore::device", path = %path.display(), "Opened file device");
        Ok(FileDevice { file, path })
    }

    /// Create (or truncate) a file of `size_sectors` zeroed sectors.
    pub fn create(path: impl AsRef<Path>, size_sectors: u64) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(size_sectors * SECTOR_SIZE as u64)?;
        debug!(
            target: "snapstore::device",
            path = %path.display(),
            size_sectors,
            "Created file device"
        );
        Ok(FileDevice { file, path })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn capacity_bytes(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

impl BlockDevice for FileDevice {
    fn read_sectors(&self, sector: Sector, buf: &mut [u8]) -> io::Result<()> {
        let offset = check_request(sector, buf.len(), self.capacity_bytes()?)?;
        self.file.read_exact_at(buf, offset)
    }

    fn write_sectors(&self, sector: Sector, buf: &[u8], flags: WriteFlags) -> io::Result<()> {
        let offset = check_request(sector, buf.len(), self.capacity_bytes()?)?;
        if flags.preflush {
            self.file.sync_data()?;
        }
        self.file.write_all_at(buf, offset)?;
        if flags.fua {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn flush(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    fn size_sectors(&self) -> io::Result<u64> {
        Ok(self.capacity_bytes()? / SECTOR_SIZE as u64)
    }
}
