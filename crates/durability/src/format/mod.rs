//! On-disk byte formats for the exception store.
//!
//! This module centralizes all serialization logic for the COW device.
//! Keeping serialization separate from operational logic (when areas are
//! flushed, how recovery proceeds) makes format evolution easier to manage.
//!
//! # Device Layout
//!
//! ```text
//! chunk 0                      header
//! chunk 1                      metadata area 0
//! chunks 2 ..= epa + 1         exception data
//! chunk epa + 2                metadata area 1
//! ...                          area i at 1 + (epa + 1) * i
//! ```
//!
//! `epa` is the number of exception records that fit in one chunk.
//!
//! # Module Structure
//!
//! - `header`: the fixed-location disk header
//! - `area`: metadata area geometry and exception record codec

pub mod area;
pub mod header;

pub use area::{AreaLayout, DISK_EXCEPTION_SIZE, FIRST_DATA_CHUNK};
pub use header::{
    DiskHeader, DISK_HEADER_SIZE, HEADER_CHUNKS, SNAPSHOT_DISK_VERSION, SNAP_MAGIC,
};
