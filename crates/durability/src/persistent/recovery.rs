//! Loading a store from the COW device.
//!
//! ## Recovery Algorithm
//!
//! 1. Read the header chunk. A zero magic means a fresh device: write a valid
//!    header and zero area 0, nothing to replay.
//! 2. If the header records a different chunk size than configured, adopt the
//!    on-disk value and reallocate buffers before any further I/O.
//! 3. If the header is marked invalid, open invalidated without scanning.
//! 4. Otherwise walk the areas from 0. Every live record is replayed; the
//!    first zero `new_chunk` marks the end of the log.
//!
//! Any error aborts the load and leaves the store unusable.

use super::PersistentStore;
use crate::config::validate_chunk_size;
use crate::format::{AreaLayout, DiskHeader, FIRST_DATA_CHUNK};
use crate::store::{RecoveryOutcome, ReplayCallback};
use snapstore_core::{Result, StoreError};
use snapstore_storage::{Direction, IoRoute};
use tracing::{debug, info, warn};

/// Result of reading the header chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum HeaderState {
    /// The device holds no store yet
    New,
    /// A store header was found
    Existing(DiskHeader),
}

impl PersistentStore {
    /// Load the store, replaying every recorded exception through `callback`.
    ///
    /// On success the store is ready for use. On error it must be discarded.
    pub fn read_metadata(&mut self, callback: &mut ReplayCallback<'_>) -> Result<RecoveryOutcome> {
        if self.loaded {
            return Err(StoreError::invalid_operation("metadata already loaded"));
        }

        let configured_chunk_size = self.chunk_size();
        let header = self.read_header()?;

        let mut outcome = RecoveryOutcome {
            valid: true,
            ..RecoveryOutcome::default()
        };
        if self.chunk_size() != configured_chunk_size {
            outcome.chunk_size_override = Some((configured_chunk_size, self.chunk_size()));
        }

        self.current_area = 0;
        self.current_committed = 0;
        self.next_free = FIRST_DATA_CHUNK;
        self.pending_count = 0;
        self.area.fill(0);

        match header {
            HeaderState::New => {
                self.valid = true;
                self.write_header()?;
                self.zero_disk_area(0)?;
                outcome.new_store = true;
                info!(
                    target: "snapstore::recovery",
                    chunk_size = self.chunk_size(),
                    "Initialized new exception store"
                );
            }
            HeaderState::Existing(disk) if !disk.valid => {
                self.valid = false;
                outcome.valid = false;
                warn!(
                    target: "snapstore::recovery",
                    "Exception store header is marked invalid, opening invalidated"
                );
            }
            HeaderState::Existing(_) => {
                self.valid = true;
                self.read_exceptions(callback, &mut outcome)?;
                info!(
                    target: "snapstore::recovery",
                    exceptions = outcome.exceptions_replayed,
                    areas = outcome.areas_scanned,
                    next_free = self.next_free,
                    "Exception store recovered"
                );
            }
        }

        self.loaded = true;
        self.publish();
        Ok(outcome)
    }

    /// Read and decode the header chunk, adopting its chunk size if it
    /// differs from the configured one.
    pub(super) fn read_header(&mut self) -> Result<HeaderState> {
        self.io
            .chunk_io(&mut self.header_area, 0, Direction::Read, IoRoute::Metadata)?;

        let header = match DiskHeader::decode(&self.header_area)? {
            Some(header) => header,
            None => {
                debug!(target: "snapstore::header", "Zero magic, treating device as a new store");
                return Ok(HeaderState::New);
            }
        };

        let current = self.chunk_size();
        if header.chunk_size != current {
            self.adopt_chunk_size(header.chunk_size)?;
        }

        Ok(HeaderState::Existing(header))
    }

    fn adopt_chunk_size(&mut self, on_disk: u32) -> Result<()> {
        let logical_block_size = self.io.device().logical_block_size();
        validate_chunk_size(on_disk, logical_block_size).map_err(|e| {
            StoreError::corrupt(format!("invalid on-disk chunk size {}: {}", on_disk, e))
        })?;

        if let Some(configured) = self.config.chunk_size {
            warn!(
                target: "snapstore::header",
                on_disk,
                configured,
                "Chunk size in device metadata overrides table chunk size"
            );
        } else {
            debug!(target: "snapstore::header", on_disk, "Using on-disk chunk size");
        }

        self.io.set_chunk_size(on_disk);
        self.layout = AreaLayout::new(on_disk, self.config.area_capacity);
        self.reallocate_buffers();
        Ok(())
    }

    /// Walk the areas until one is not full, replaying each live record.
    fn read_exceptions(
        &mut self,
        callback: &mut ReplayCallback<'_>,
        outcome: &mut RecoveryOutcome,
    ) -> Result<()> {
        let exceptions_per_area = self.layout.exceptions_per_area();
        let mut area = 0u64;

        loop {
            let chunk = self.layout.area_location(area);
            self.io
                .chunk_io(&mut self.area, chunk, Direction::Read, IoRoute::Direct)?;
            outcome.areas_scanned += 1;

            let mut full = true;
            for slot in 0..exceptions_per_area {
                let exception = self.layout.get_exception(&self.area, slot);
                if !exception.is_live() {
                    self.current_committed = slot;
                    full = false;
                    break;
                }

                if self.layout.is_metadata_chunk(exception.new_chunk) {
                    return Err(StoreError::corrupt(format!(
                        "exception {} -> {} in area {} points at a metadata chunk",
                        exception.old_chunk, exception.new_chunk, area
                    )));
                }

                if self.next_free <= exception.new_chunk {
                    self.next_free = exception.new_chunk + 1;
                }
                callback(exception)?;
                outcome.exceptions_replayed += 1;
            }

            if !full {
                break;
            }
            area += 1;
        }

        self.current_area = area;
        self.next_free = self.layout.skip_metadata(self.next_free);
        Ok(())
    }
}
