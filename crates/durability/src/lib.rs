//! Durability layer for the snapshot exception store
//!
//! This crate owns everything that defines what is on the COW device:
//!
//! - Binary on-disk formats (disk header, metadata areas, exception records)
//! - PersistentStore: the exception log, recovery scan and merge support
//! - TransientStore: linear allocation with no on-disk metadata
//! - Store configuration, usage reporting and the store type registry

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod format;
pub mod persistent;
pub mod registry;
pub mod store;
pub mod transient;
pub mod usage;

pub use config::{
    validate_chunk_size, StoreConfig, DEFAULT_CHUNK_SIZE_SECTORS, MAX_CHUNK_SIZE_SECTORS,
};
pub use format::{AreaLayout, DiskHeader, SNAPSHOT_DISK_VERSION, SNAP_MAGIC};
pub use persistent::{LogState, PersistentStore, PERSISTENT_STORE_TYPE};
pub use registry::{StoreConstructor, StoreTypeRegistry};
pub use store::{CommitCompleter, CommitHandle, ExceptionStore, RecoveryOutcome, ReplayCallback};
pub use transient::{TransientStore, TRANSIENT_STORE_TYPE};
pub use usage::{UsageCounters, UsageReporter, UsageSnapshot};
