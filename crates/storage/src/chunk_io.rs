//! Chunk-granular synchronous I/O against the COW device.
//!
//! Every read or write moves exactly one chunk. Requests on the
//! [`IoRoute::Metadata`] route run on the store's [`MetadataWorker`] so that
//! header and area writes are strictly ordered; [`IoRoute::Direct`] requests
//! run on the calling thread. Either way the call returns only once the I/O
//! has completed.

use crate::device::{BlockDevice, WriteFlags};
use crate::worker::MetadataWorker;
use snapstore_core::{ChunkIndex, SECTOR_SIZE};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Direction of a chunk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Fill the buffer from the device
    Read,
    /// Store the buffer on the device with the given durability flags
    Write(WriteFlags),
}

/// Execution context a chunk request is issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoRoute {
    /// Issue on the caller's thread
    Direct,
    /// Issue on the ordered metadata worker
    Metadata,
}

/// Cumulative chunk I/O counters.
///
/// These counters accumulate over the lifetime of the `ChunkIo` and are never
/// reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoCounters {
    /// Chunk reads issued
    pub reads: u64,
    /// Chunk writes issued
    pub writes: u64,
    /// Writes issued with force-unit-access
    pub durable_writes: u64,
    /// Requests that went through the metadata worker
    pub metadata_requests: u64,
    /// Requests that completed with an error
    pub errors: u64,
}

#[derive(Default)]
struct IoStats {
    reads: AtomicU64,
    writes: AtomicU64,
    durable_writes: AtomicU64,
    metadata_requests: AtomicU64,
    errors: AtomicU64,
}

/// Synchronous chunk reader/writer for one COW device.
pub struct ChunkIo {
    device: Arc<dyn BlockDevice>,
    chunk_size: u32,
    worker: MetadataWorker,
    stats: Arc<IoStats>,
}

impl ChunkIo {
    /// Create a chunk I/O context for `device` with chunks of
    /// `chunk_size` sectors, spawning its metadata worker.
    pub fn new(device: Arc<dyn BlockDevice>, chunk_size: u32) -> io::Result<Self> {
        let worker = MetadataWorker::spawn("snapstore-meta")?;
        Ok(ChunkIo {
            device,
            chunk_size,
            worker,
            stats: Arc::new(IoStats::default()),
        })
    }

    /// Chunk size in sectors.
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Chunk size in bytes.
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_size as usize * SECTOR_SIZE
    }

    /// Change the chunk size used for subsequent requests.
    pub fn set_chunk_size(&mut self, chunk_size: u32) {
        self.chunk_size = chunk_size;
    }

    /// The underlying device.
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }

    /// Current device capacity in sectors.
    pub fn device_sectors(&self) -> io::Result<u64> {
        self.device.size_sectors()
    }

    /// Issue one chunk-sized I/O and wait for it.
    ///
    /// `buf` must be exactly one chunk long. On the metadata route the buffer
    /// is handed to the worker for the duration of the request and returned
    /// before this call completes.
    pub fn chunk_io(
        &self,
        buf: &mut Vec<u8>,
        chunk: ChunkIndex,
        direction: Direction,
        route: IoRoute,
    ) -> io::Result<()> {
        let len = buf.len();
        if len != self.chunk_bytes() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "chunk buffer is {} bytes, chunk size is {} bytes",
                    len,
                    self.chunk_bytes()
                ),
            ));
        }

        let sector = chunk.checked_mul(u64::from(self.chunk_size)).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "chunk index overflows")
        })?;

        trace!(target: "snapstore::chunk_io", chunk, sector, ?direction, ?route, "Chunk I/O");

        let result = match route {
            IoRoute::Direct => transfer(self.device.as_ref(), sector, buf, direction),
            IoRoute::Metadata => {
                self.stats.metadata_requests.fetch_add(1, Ordering::Relaxed);
                let device = Arc::clone(&self.device);
                let owned = std::mem::take(buf);
                match self.worker.run(move || {
                    let mut owned = owned;
                    let result = transfer(device.as_ref(), sector, &mut owned, direction);
                    (owned, result)
                }) {
                    Ok((owned, result)) => {
                        *buf = owned;
                        result
                    }
                    Err(e) => {
                        // The buffer was lost with the failed job.
                        *buf = vec![0u8; len];
                        Err(e)
                    }
                }
            }
        };

        match direction {
            Direction::Read => {
                self.stats.reads.fetch_add(1, Ordering::Relaxed);
            }
            Direction::Write(flags) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
                if flags.is_durable() {
                    self.stats.durable_writes.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if result.is_err() {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
        }

        result
    }

    /// Get a snapshot of cumulative I/O counters.
    pub fn counters(&self) -> IoCounters {
        IoCounters {
            reads: self.stats.reads.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            durable_writes: self.stats.durable_writes.load(Ordering::Relaxed),
            metadata_requests: self.stats.metadata_requests.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }
}

fn transfer(
    device: &dyn BlockDevice,
    sector: u64,
    buf: &mut [u8],
    direction: Direction,
) -> io::Result<()> {
    match direction {
        Direction::Read => device.read_sectors(sector, buf),
        Direction::Write(flags) => device.write_sectors(sector, buf, flags),
    }
}
