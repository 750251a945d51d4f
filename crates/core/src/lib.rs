//! Core types for the snapshot exception store
//!
//! This crate defines the foundational types used throughout the system:
//! - ChunkIndex / Sector: chunk and sector addressing
//! - Exception: an `(old_chunk, new_chunk)` copy-on-write redirection
//! - Usage: space accounting reported to the snapshot layer
//! - MergeRun: a coalesced run of exceptions ready to merge
//! - StoreError: Error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Result, StoreError};
pub use types::{ChunkIndex, Exception, MergeRun, Sector, Usage, SECTOR_SHIFT, SECTOR_SIZE};
