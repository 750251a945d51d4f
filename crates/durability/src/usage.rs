//! Space accounting readable from other threads.
//!
//! The store owner publishes its allocation state after every mutation; a
//! [`UsageReporter`] reads it without taking the store. Readings may lag the
//! owner by one operation, but every reading comes from a single publish.

use parking_lot::Mutex;
use snapstore_core::{Result, Usage};
use snapstore_storage::BlockDevice;
use std::sync::Arc;

/// One published state of the owning store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    /// Sectors handed out so far, metadata included
    pub sectors_allocated: u64,
    /// Sectors used by the header and metadata areas
    pub metadata_sectors: u64,
    /// False once the store has been invalidated
    pub valid: bool,
}

/// Allocation state of one store, published as a whole.
#[derive(Debug)]
pub struct UsageCounters {
    current: Mutex<UsageSnapshot>,
}

impl UsageCounters {
    /// Counters for a store that has allocated nothing yet.
    pub fn new() -> Self {
        UsageCounters {
            current: Mutex::new(UsageSnapshot {
                sectors_allocated: 0,
                metadata_sectors: 0,
                valid: true,
            }),
        }
    }

    /// Publish the owner's current state.
    pub fn publish(&self, sectors_allocated: u64, metadata_sectors: u64, valid: bool) {
        *self.current.lock() = UsageSnapshot {
            sectors_allocated,
            metadata_sectors,
            valid,
        };
    }

    /// The last published state.
    pub fn snapshot(&self) -> UsageSnapshot {
        *self.current.lock()
    }

    /// Last published allocated sectors.
    pub fn sectors_allocated(&self) -> u64 {
        self.snapshot().sectors_allocated
    }

    /// Last published metadata sectors.
    pub fn metadata_sectors(&self) -> u64 {
        self.snapshot().metadata_sectors
    }

    /// Last published validity.
    pub fn is_valid(&self) -> bool {
        self.snapshot().valid
    }
}

impl Default for UsageCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable read-only view of a store's usage.
#[derive(Clone)]
pub struct UsageReporter {
    counters: Arc<UsageCounters>,
    device: Arc<dyn BlockDevice>,
}

impl UsageReporter {
    /// Reporter over `counters`, sizing against `device`.
    pub fn new(counters: Arc<UsageCounters>, device: Arc<dyn BlockDevice>) -> Self {
        UsageReporter { counters, device }
    }

    /// Current usage. The total is queried from the device on every call.
    pub fn usage(&self) -> Result<Usage> {
        let total_sectors = self.device.size_sectors()?;
        let snapshot = self.counters.snapshot();
        Ok(Usage {
            total_sectors,
            sectors_allocated: snapshot.sectors_allocated,
            metadata_sectors: snapshot.metadata_sectors,
        })
    }

    /// Whether the store was valid at its last publish.
    pub fn is_valid(&self) -> bool {
        self.counters.is_valid()
    }
}

impl std::fmt::Debug for UsageReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageReporter")
            .field("counters", &self.counters)
            .finish()
    }
}
