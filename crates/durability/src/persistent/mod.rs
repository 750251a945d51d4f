//! Persistent exception store.
//!
//! Exceptions are appended to fixed-size metadata areas interleaved with the
//! data chunks they describe. An area is written back whenever the batch of
//! in-flight exceptions drains or the area fills up, and the area after a full
//! one is zeroed before the full one is made durable, so a crash at any point
//! leaves a log that recovery can walk to a zero terminator.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──read_metadata()──> Valid ──drop_store() / I/O failure──> Invalidated
//!                              │
//!                              └── drop ──> Closed
//! ```
//!
//! # Module Structure
//!
//! - `recovery`: header handling and the replay scan on open
//! - `merge`: handing exceptions back as they are merged into the origin

mod merge;
mod recovery;

use crate::config::{validate_chunk_size, StoreConfig};
use crate::format::{AreaLayout, DiskHeader, FIRST_DATA_CHUNK, HEADER_CHUNKS};
use crate::store::{
    CommitCompleter, CommitHandle, ExceptionStore, RecoveryOutcome, ReplayCallback,
};
use crate::usage::{UsageCounters, UsageReporter};
use snapstore_core::{
    ChunkIndex, Exception, MergeRun, Result, StoreError, Usage, SECTOR_SIZE,
};
use snapstore_storage::{BlockDevice, ChunkIo, Direction, IoCounters, IoRoute, WriteFlags};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Registered type name of the persistent store.
pub const PERSISTENT_STORE_TYPE: &str = "persistent";

/// Snapshot of the exception log's position, for inspection and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogState {
    /// False once the store has been invalidated
    pub valid: bool,
    /// Index of the metadata area receiving commits
    pub current_area: u64,
    /// Records committed into the current area
    pub current_committed: u32,
    /// Next chunk the allocator will hand out
    pub next_free: ChunkIndex,
    /// Prepared exceptions not yet committed
    pub pending_count: u32,
    /// Records per metadata area
    pub exceptions_per_area: u32,
    /// Chunk size in sectors
    pub chunk_size: u32,
}

/// The persistent exception store for one COW device.
pub struct PersistentStore {
    io: ChunkIo,
    config: StoreConfig,
    layout: AreaLayout,

    /// In-memory image of the current metadata area
    area: Vec<u8>,
    /// Always zero; written to wipe the next area
    zero_area: Vec<u8>,
    /// Scratch for header reads and writes
    header_area: Vec<u8>,

    valid: bool,
    current_area: u64,
    current_committed: u32,
    next_free: ChunkIndex,
    pending_count: u32,

    /// Completions waiting on the next area write
    callbacks: Vec<CommitCompleter>,

    /// Set once `read_metadata` has succeeded
    loaded: bool,
    counters: Arc<UsageCounters>,
}

impl PersistentStore {
    /// Create a store for `device`. Nothing is read or written until
    /// [`read_metadata`](Self::read_metadata).
    pub fn new(device: Arc<dyn BlockDevice>, config: StoreConfig) -> Result<Self> {
        let logical_block_size = device.logical_block_size();
        config.validate(logical_block_size)?;

        let chunk_size = config.resolve_chunk_size(logical_block_size);
        validate_chunk_size(chunk_size, logical_block_size)?;

        let layout = AreaLayout::new(chunk_size, config.area_capacity);
        let io = ChunkIo::new(device, chunk_size)?;
        let chunk_bytes = io.chunk_bytes();

        debug!(
            target: "snapstore::log",
            chunk_size,
            exceptions_per_area = layout.exceptions_per_area(),
            "Created persistent exception store"
        );

        Ok(PersistentStore {
            io,
            config,
            layout,
            area: vec![0u8; chunk_bytes],
            zero_area: vec![0u8; chunk_bytes],
            header_area: vec![0u8; chunk_bytes],
            valid: true,
            current_area: 0,
            current_committed: 0,
            next_free: FIRST_DATA_CHUNK,
            pending_count: 0,
            callbacks: Vec::new(),
            loaded: false,
            counters: Arc::new(UsageCounters::new()),
        })
    }

    /// Create a store and load it, replaying every exception through
    /// `callback`. Either returns a loaded store or nothing.
    pub fn open(
        device: Arc<dyn BlockDevice>,
        config: StoreConfig,
        callback: &mut ReplayCallback<'_>,
    ) -> Result<(Self, RecoveryOutcome)> {
        let mut store = PersistentStore::new(device, config)?;
        let outcome = store.read_metadata(callback)?;
        Ok((store, outcome))
    }

    /// Reserve the next free COW chunk for `old_chunk`.
    pub fn prepare_exception(&mut self, old_chunk: ChunkIndex) -> Result<ChunkIndex> {
        self.ensure_loaded("prepare_exception")?;
        if !self.valid {
            return Err(StoreError::StoreInvalid);
        }

        let chunk_size = u64::from(self.chunk_size());
        let device_sectors = self.io.device_sectors()?;
        // The last data chunk of an area also needs the next area on disk:
        // committing it fills the area, which zeroes the following one.
        let mut required_chunks = self.next_free + 1;
        if self.layout.is_metadata_chunk(required_chunks) {
            required_chunks += 1;
        }
        let required_sectors = required_chunks * chunk_size;
        if device_sectors < required_sectors {
            debug!(
                target: "snapstore::log",
                old_chunk,
                required_sectors,
                device_sectors,
                "COW device full"
            );
            return Err(StoreError::NoSpace {
                required_sectors,
                device_sectors,
            });
        }

        let new_chunk = self.next_free;
        self.next_free = self.layout.skip_metadata(self.next_free + 1);
        self.pending_count += 1;
        self.publish();

        Ok(new_chunk)
    }

    /// Record `exception` in the current area.
    ///
    /// The area is written back once no prepared exceptions remain in flight
    /// or the area is full; the returned handle resolves after that write.
    pub fn commit_exception(&mut self, exception: Exception) -> CommitHandle {
        if !self.loaded {
            warn!(
                target: "snapstore::log",
                old_chunk = exception.old_chunk,
                "Commit before metadata was loaded"
            );
            return CommitHandle::resolved(false);
        }

        self.layout
            .set_exception(&mut self.area, self.current_committed, exception);
        self.current_committed += 1;

        let (handle, completer) = CommitHandle::pending();
        self.callbacks.push(completer);

        if self.pending_count == 0 {
            warn!(
                target: "snapstore::log",
                old_chunk = exception.old_chunk,
                new_chunk = exception.new_chunk,
                "Commit without a matching prepare"
            );
        } else {
            self.pending_count -= 1;
        }

        let area_full = self.current_committed == self.layout.exceptions_per_area();
        if self.pending_count > 0 && !area_full {
            return handle;
        }

        if area_full && self.valid {
            let next_area = self.current_area + 1;
            if let Err(e) = self.zero_disk_area(next_area) {
                self.invalidate("zeroing next metadata area failed", &e);
            }
        }

        if self.valid {
            let flags = self.metadata_write_flags();
            if let Err(e) = self.area_io(Direction::Write(flags)) {
                self.invalidate("metadata area write failed", &e);
            }
        }

        if area_full {
            self.current_committed = 0;
            self.current_area += 1;
            self.area.fill(0);
        }

        let ok = self.valid;
        let batch = self.callbacks.len();
        for completer in self.callbacks.drain(..) {
            completer.complete(ok);
        }
        debug!(
            target: "snapstore::log",
            batch,
            ok,
            current_area = self.current_area,
            "Exception batch committed"
        );

        self.publish();
        handle
    }

    /// Invalidate the store and record that in the on-disk header.
    ///
    /// Safe to call more than once. A failed header write is logged and
    /// otherwise ignored.
    pub fn drop_store(&mut self) {
        self.valid = false;
        self.publish();

        if !self.loaded {
            debug!(target: "snapstore::header", "Store never loaded, header left untouched");
            return;
        }

        if let Err(e) = self.write_header() {
            warn!(target: "snapstore::header", error = %e, "Write header failed");
        }
    }

    /// Current space accounting.
    pub fn usage(&self) -> Result<Usage> {
        let chunk_size = u64::from(self.chunk_size());
        Ok(Usage {
            total_sectors: self.io.device_sectors()?,
            sectors_allocated: self.next_free * chunk_size,
            metadata_sectors: self.metadata_chunks() * chunk_size,
        })
    }

    /// A cloneable handle that reads usage without borrowing the store.
    pub fn usage_reporter(&self) -> UsageReporter {
        UsageReporter::new(Arc::clone(&self.counters), Arc::clone(self.io.device()))
    }

    /// Chunk size in sectors (the on-disk value once metadata is loaded).
    pub fn chunk_size(&self) -> u32 {
        self.layout.chunk_size()
    }

    /// Records per metadata area.
    pub fn exceptions_per_area(&self) -> u32 {
        self.layout.exceptions_per_area()
    }

    /// Metadata area geometry.
    pub fn layout(&self) -> &AreaLayout {
        &self.layout
    }

    /// False once the store has been invalidated.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The configuration the store was created with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Snapshot of the log position.
    pub fn state(&self) -> LogState {
        LogState {
            valid: self.valid,
            current_area: self.current_area,
            current_committed: self.current_committed,
            next_free: self.next_free,
            pending_count: self.pending_count,
            exceptions_per_area: self.layout.exceptions_per_area(),
            chunk_size: self.layout.chunk_size(),
        }
    }

    /// Cumulative chunk I/O counters.
    pub fn io_counters(&self) -> IoCounters {
        self.io.counters()
    }

    fn ensure_loaded(&self, operation: &str) -> Result<()> {
        if self.loaded {
            Ok(())
        } else {
            Err(StoreError::invalid_operation(format!(
                "{} before metadata was loaded",
                operation
            )))
        }
    }

    /// Header plus every area up to and including the current one.
    fn metadata_chunks(&self) -> u64 {
        self.current_area + 1 + HEADER_CHUNKS
    }

    fn metadata_write_flags(&self) -> WriteFlags {
        if self.config.metadata_fua {
            WriteFlags::FLUSH_FUA
        } else {
            WriteFlags::NONE
        }
    }

    fn zero_write_flags(&self) -> WriteFlags {
        if self.config.metadata_fua {
            WriteFlags::FUA
        } else {
            WriteFlags::NONE
        }
    }

    /// Read or write the current area through the metadata worker.
    fn area_io(&mut self, direction: Direction) -> std::io::Result<()> {
        let chunk = self.layout.area_location(self.current_area);
        self.io
            .chunk_io(&mut self.area, chunk, direction, IoRoute::Metadata)
    }

    fn zero_disk_area(&mut self, area: u64) -> std::io::Result<()> {
        let chunk = self.layout.area_location(area);
        let flags = self.zero_write_flags();
        self.io
            .chunk_io(&mut self.zero_area, chunk, Direction::Write(flags), IoRoute::Metadata)
    }

    fn write_header(&mut self) -> Result<()> {
        DiskHeader::new(self.valid, self.chunk_size()).encode_into(&mut self.header_area);
        let flags = self.metadata_write_flags();
        self.io
            .chunk_io(&mut self.header_area, 0, Direction::Write(flags), IoRoute::Metadata)?;
        Ok(())
    }

    /// Resize every chunk buffer after the chunk size changed.
    fn reallocate_buffers(&mut self) {
        let chunk_bytes = self.layout.chunk_size() as usize * SECTOR_SIZE;
        self.area = vec![0u8; chunk_bytes];
        self.zero_area = vec![0u8; chunk_bytes];
        self.header_area = vec![0u8; chunk_bytes];
    }

    fn invalidate(&mut self, reason: &str, cause: &std::io::Error) {
        if self.valid {
            error!(
                target: "snapstore::log",
                current_area = self.current_area,
                error = %cause,
                "{}, invalidating exception store",
                reason
            );
        }
        self.valid = false;
        self.publish();
    }

    fn publish(&self) {
        let chunk_size = u64::from(self.chunk_size());
        self.counters.publish(
            self.next_free * chunk_size,
            self.metadata_chunks() * chunk_size,
            self.valid,
        );
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("state", &self.state())
            .field("loaded", &self.loaded)
            .field("queued_callbacks", &self.callbacks.len())
            .finish()
    }
}

impl ExceptionStore for PersistentStore {
    fn type_name(&self) -> &'static str {
        PERSISTENT_STORE_TYPE
    }

    fn read_metadata(&mut self, callback: &mut ReplayCallback<'_>) -> Result<RecoveryOutcome> {
        PersistentStore::read_metadata(self, callback)
    }

    fn prepare_exception(&mut self, old_chunk: ChunkIndex) -> Result<ChunkIndex> {
        PersistentStore::prepare_exception(self, old_chunk)
    }

    fn commit_exception(&mut self, exception: Exception) -> CommitHandle {
        PersistentStore::commit_exception(self, exception)
    }

    fn prepare_merge(&mut self) -> Result<Option<MergeRun>> {
        PersistentStore::prepare_merge(self)
    }

    fn commit_merge(&mut self, count: u32) -> Result<()> {
        PersistentStore::commit_merge(self, count)
    }

    fn drop_store(&mut self) {
        PersistentStore::drop_store(self)
    }

    fn usage(&self) -> Result<Usage> {
        PersistentStore::usage(self)
    }

    fn usage_reporter(&self) -> UsageReporter {
        PersistentStore::usage_reporter(self)
    }

    fn chunk_size(&self) -> u32 {
        PersistentStore::chunk_size(self)
    }

    fn is_valid(&self) -> bool {
        PersistentStore::is_valid(self)
    }
}
