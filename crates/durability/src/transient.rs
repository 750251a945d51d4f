//! Transient exception store.
//!
//! Allocates COW chunks linearly and keeps no metadata on the device, so
//! nothing survives a restart. Commits complete immediately.

use crate::config::{validate_chunk_size, StoreConfig};
use crate::store::{CommitHandle, ExceptionStore, RecoveryOutcome, ReplayCallback};
use crate::usage::{UsageCounters, UsageReporter};
use snapstore_core::{ChunkIndex, Exception, MergeRun, Result, Sector, StoreError, Usage};
use snapstore_storage::BlockDevice;
use std::sync::Arc;
use tracing::debug;

/// Registered type name of the transient store.
pub const TRANSIENT_STORE_TYPE: &str = "transient";

/// A non-persistent exception store.
pub struct TransientStore {
    device: Arc<dyn BlockDevice>,
    chunk_size: u32,
    /// Next free sector
    next_free: Sector,
    valid: bool,
    counters: Arc<UsageCounters>,
}

impl TransientStore {
    /// Create a transient store over `device`.
    pub fn new(device: Arc<dyn BlockDevice>, config: &StoreConfig) -> Result<Self> {
        let logical_block_size = device.logical_block_size();
        config.validate(logical_block_size)?;
        let chunk_size = config.resolve_chunk_size(logical_block_size);
        validate_chunk_size(chunk_size, logical_block_size)?;

        let store = TransientStore {
            device,
            chunk_size,
            next_free: 0,
            valid: true,
            counters: Arc::new(UsageCounters::new()),
        };
        store.publish();
        Ok(store)
    }

    fn publish(&self) {
        self.counters.publish(self.next_free, 0, self.valid);
    }
}

impl ExceptionStore for TransientStore {
    fn type_name(&self) -> &'static str {
        TRANSIENT_STORE_TYPE
    }

    fn read_metadata(&mut self, _callback: &mut ReplayCallback<'_>) -> Result<RecoveryOutcome> {
        Ok(RecoveryOutcome {
            new_store: true,
            valid: self.valid,
            ..RecoveryOutcome::default()
        })
    }

    fn prepare_exception(&mut self, old_chunk: ChunkIndex) -> Result<ChunkIndex> {
        if !self.valid {
            return Err(StoreError::StoreInvalid);
        }

        let device_sectors = self.device.size_sectors()?;
        let required_sectors = self.next_free + u64::from(self.chunk_size);
        if device_sectors < required_sectors {
            debug!(target: "snapstore::log", old_chunk, "Transient COW device full");
            return Err(StoreError::NoSpace {
                required_sectors,
                device_sectors,
            });
        }

        let new_chunk = self.next_free / u64::from(self.chunk_size);
        self.next_free = required_sectors;
        self.publish();
        Ok(new_chunk)
    }

    fn commit_exception(&mut self, _exception: Exception) -> CommitHandle {
        CommitHandle::resolved(self.valid)
    }

    fn prepare_merge(&mut self) -> Result<Option<MergeRun>> {
        Err(StoreError::Unsupported("merging a transient exception store"))
    }

    fn commit_merge(&mut self, _count: u32) -> Result<()> {
        Err(StoreError::Unsupported("merging a transient exception store"))
    }

    fn drop_store(&mut self) {
        self.valid = false;
        self.publish();
    }

    fn usage(&self) -> Result<Usage> {
        Ok(Usage {
            total_sectors: self.device.size_sectors()?,
            sectors_allocated: self.next_free,
            metadata_sectors: 0,
        })
    }

    fn usage_reporter(&self) -> UsageReporter {
        UsageReporter::new(Arc::clone(&self.counters), Arc::clone(&self.device))
    }

    fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}
