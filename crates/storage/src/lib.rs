//! Block layer for the snapshot exception store
//!
//! This crate implements the I/O collaborators the store engine consumes:
//! - BlockDevice: sector-addressed synchronous device trait
//! - MemoryDevice / FileDevice: in-memory and file-backed devices
//! - MetadataWorker: single ordered thread for metadata writes
//! - ChunkIo: chunk-granular reads and writes, direct or via the worker
//! - testing: fault injection for crash and error-path tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk_io;
pub mod device;
pub mod file;
pub mod memory;
pub mod testing;
pub mod worker;

pub use chunk_io::{ChunkIo, Direction, IoCounters, IoRoute};
pub use device::{BlockDevice, WriteFlags};
pub use file::FileDevice;
pub use memory::MemoryDevice;
pub use worker::MetadataWorker;
