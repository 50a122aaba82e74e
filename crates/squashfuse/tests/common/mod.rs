//! Shared helpers for FUSE integration tests.

pub mod harness;

#[allow(unused_imports)]
pub use harness::*;
