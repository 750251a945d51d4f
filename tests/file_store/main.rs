//! Integration tests for file-backed exception stores.
//!
//! These tests exercise the full open → commit → close → reopen lifecycle on
//! a real file, through the public `snapstore` facade. Unit tests in the
//! member crates cover the format, recovery and merge logic in isolation.

mod common;
mod lifecycle;
mod power_loss;
