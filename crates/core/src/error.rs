//! Error types for the exception store
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! # Taxonomy
//!
//! | Variant | Raised by | Fatal to the store |
//! |---------|-----------|--------------------|
//! | `CorruptStore` | header read, recovery scan | yes, open fails |
//! | `Io` | any chunk read/write | yes for metadata I/O |
//! | `NoSpace` | `prepare_exception` | no |
//! | `StoreInvalid` | any operation after invalidation | already invalid |
//! | `InvalidConfig` | config validation | open fails |
//! | `Replay` | recovery callback | open fails |
//!
//! A chunk size mismatch between the table and the on-disk header is not an
//! error: the on-disk value wins and a warning is logged.

use std::io;
use thiserror::Error;

/// Result type alias for exception store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error types for the exception store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Header or metadata content cannot belong to a valid store
    #[error("Corrupt exception store: {0}")]
    CorruptStore(String),

    /// I/O error from the COW device
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The COW device has no room for another chunk
    #[error("No space on COW device: need {required_sectors} sectors, device has {device_sectors}")]
    NoSpace {
        /// Sectors the allocation would need the device to have
        required_sectors: u64,
        /// Current device capacity in sectors
        device_sectors: u64,
    },

    /// The store has been invalidated and no longer accepts exceptions
    #[error("Exception store is invalid")]
    StoreInvalid,

    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Recovery callback refused a replayed exception
    #[error("Replay aborted: {0}")]
    Replay(String),

    /// Operation not provided by this store type
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// No store type registered under this name
    #[error("Unknown exception store type: {0}")]
    UnknownStoreType(String),

    /// A committed exception did not reach stable storage
    #[error("Exception commit failed")]
    CommitFailed,
}

impl StoreError {
    /// Create a corruption error from a message
    pub fn corrupt(msg: impl Into<String>) -> Self {
        StoreError::CorruptStore(msg.into())
    }

    /// Create a replay error from a message
    pub fn replay(msg: impl Into<String>) -> Self {
        StoreError::Replay(msg.into())
    }

    /// Create an invalid configuration error from a message
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        StoreError::InvalidConfig(msg.into())
    }

    /// Create an invalid operation error from a message
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        StoreError::InvalidOperation(msg.into())
    }

    /// True when the error means the store can no longer be trusted.
    ///
    /// `NoSpace` is deliberately excluded: space may come back after a merge.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptStore(_)
                | StoreError::Io(_)
                | StoreError::StoreInvalid
                | StoreError::CommitFailed
        )
    }
}
