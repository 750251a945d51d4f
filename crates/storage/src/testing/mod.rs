//! Testing utilities for the block layer
//!
//! This module provides tools for testing the exception store's resilience:
//!
//! - **FaultyDevice**: wraps a device and injects write/read failures or a
//!   power cut at chosen points, recording every write it sees
//!
//! # Example
//!
//! ```ignore
//! use snapstore_storage::testing::{Fault, FaultyDevice};
//! use snapstore_storage::MemoryDevice;
//!
//! let dev = FaultyDevice::new(MemoryDevice::new(1024));
//! dev.fail_writes_to_chunk(4, 8); // zeroing of metadata area 1
//! ```

mod faulty;

pub use faulty::{Fault, FaultyDevice, WriteRecord};
