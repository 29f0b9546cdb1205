
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{fmt, io};
use thiserror::Error;

/// Byte offset of a page's start in the backing file.
///
/// A position is the stable identity of a page: it survives cache eviction
/// and process restarts, and every valid page position is a multiple of the
/// page size.
/// Examples:
/// - `let root = Position(0);`
/// - `let second_page = Position(4096);`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(pub u64);

impl Position {
    /// True when this position sits on a page boundary.
    pub fn is_page_aligned(self, page_size: usize) -> bool {
        self.0 % page_size as u64 == 0
    }

    /// Index of the page this position falls in.
    pub fn page_index(self, page_size: usize) -> u64 {
        self.0 / page_size as u64
    }

    /// Position of the start of the page this position falls in.
    pub fn page_start(self, page_size: usize) -> Position {
        Position(self.0 - self.0 % page_size as u64)
    }

    /// Byte offset of this position within its page.
    pub fn offset_in_page(self, page_size: usize) -> usize {
        (self.0 % page_size as u64) as usize
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Canonical error type shared across the engine's subsystems.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("alloc: {0}")]
    Alloc(String),
    #[error("position {0}: {1}")]
    Position(Position, String),
    #[error("read: {0}")]
    Read(String),
    #[error("write: {0}")]
    Write(String),
    #[error("search: {0}")]
    Search(String),
    #[error("insert: {0}")]
    Insert(String),
    #[error("remove: {0}")]
    Remove(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `StoreError`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Runtime configuration for the engine components.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder()
///     .cache_frames(64)
///     .branching_factor_leaf(5)
///     .branching_factor_branch(5)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Number of page frames the buffer pool keeps resident.
    #[builder(default = 256)]
    pub cache_frames: usize,
    /// Fixed leaf fan-out; 0 derives it from the page size.
    #[builder(default = 0)]
    pub branching_factor_leaf: i64,
    /// Fixed branch fan-out; 0 derives it from the page size.
    #[builder(default = 0)]
    pub branching_factor_branch: i64,
    /// Hard cap on the number of pages the free-list allocator hands out.
    #[builder(default = u64::MAX)]
    pub page_limit: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_frames: 256,
            branching_factor_leaf: 0,
            branching_factor_branch: 0,
            page_limit: u64::MAX,
        }
    }
}

/// Path of a sidecar file next to a store's backing file, e.g.
/// `sidecar_path("data/tree", "alloc")` → `data/tree-alloc`.
pub fn sidecar_path(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push("-");
    name.push(suffix);
    PathBuf::from(name)
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, Position, StoreError, StoreResult, sidecar_path};
}
