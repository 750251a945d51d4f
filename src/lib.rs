//! snapstore - persistent snapshot exception store
//!
//! A crash-consistent metadata log mapping chunks of an origin block device
//! to their preserved copies on a copy-on-write (COW) device. Exceptions are
//! committed in batches, replayed on open, and released again as they are
//! merged back into the origin.
//!
//! # Quick Start
//!
//! ```ignore
//! use snapstore::{Exception, FileDevice, PersistentStore, StoreConfig};
//! use std::sync::Arc;
//!
//! let cow = Arc::new(FileDevice::open("cow.img")?);
//! let (mut store, _) = PersistentStore::open(cow, StoreConfig::default(), &mut |e| {
//!     table.insert(e.old_chunk, e.new_chunk);
//!     Ok(())
//! })?;
//!
//! let new_chunk = store.prepare_exception(42)?;
//! // ... copy origin chunk 42 into new_chunk ...
//! store.commit_exception(Exception::new(42, new_chunk)).wait()?;
//! ```
//!
//! # Architecture
//!
//! - `snapstore-core`: shared types and the error taxonomy
//! - `snapstore-storage`: block devices, the metadata worker and chunk I/O
//! - `snapstore-durability`: on-disk format, persistent and transient stores

pub use snapstore_core::{
    ChunkIndex, Exception, MergeRun, Result, Sector, StoreError, Usage, SECTOR_SHIFT,
    SECTOR_SIZE,
};
pub use snapstore_durability::{
    CommitHandle, ExceptionStore, LogState, PersistentStore, RecoveryOutcome, ReplayCallback,
    StoreConfig, StoreConstructor, StoreTypeRegistry, TransientStore, UsageReporter,
    DEFAULT_CHUNK_SIZE_SECTORS,
};
pub use snapstore_storage::{BlockDevice, FileDevice, MemoryDevice, WriteFlags};

/// On-disk format constants and codecs.
pub mod format {
    pub use snapstore_durability::format::*;
}

/// Fault injection for crash and error-path testing.
pub mod testing {
    pub use snapstore_storage::testing::*;
}
