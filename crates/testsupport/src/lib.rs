//! Test support utilities for the storage-engine workspace.
//!
//! Provides isolated on-disk contexts for store tests, deterministic data
//! fixtures, and proptest strategies for keys and values.

pub mod context;
pub mod fixtures;
pub mod proptest_generators;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::context::*;
    pub use crate::fixtures::*;
}
