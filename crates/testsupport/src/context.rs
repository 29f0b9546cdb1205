//! Isolated on-disk contexts for store tests.

use std::path::PathBuf;

use common::Config;
use tempfile::TempDir;

/// A temporary directory for a store's backing file and sidecars, removed
/// on drop. Installs the test logger so `RUST_LOG=debug` shows engine
/// events during a failing test.
pub struct TestContext {
    dir: TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            dir: TempDir::new().expect("create test dir"),
        }
    }

    /// Absolute path for a store identifier inside the context.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A configuration with tiny fan-out so a handful of keys already builds a
/// multi-level tree.
pub fn tiny_config() -> Config {
    Config::builder()
        .cache_frames(8)
        .branching_factor_leaf(5)
        .branching_factor_branch(4)
        .build()
}

/// The stock configuration: fan-out derived from the page size.
pub fn default_config() -> Config {
    Config::default()
}
