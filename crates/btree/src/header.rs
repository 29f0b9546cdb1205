//! Persistent tree metadata.

use std::fs;
use std::path::Path;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{Position, StoreError, StoreResult};
use serde::{Deserialize, Serialize};

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Marker verified when a header is read back.
pub const MAGIC: u32 = 0xB75E_EA41;

/// Everything a tree needs besides its pages, stored in `<id>-header`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeHeader {
    pub magic: u32,
    pub root_pos: Position,
    pub size: u64,
    pub depth: u64,
    pub max_records_leaf: i64,
    pub max_records_branch: i64,
}

impl TreeHeader {
    /// Serialize to `path`, truncating whatever was there.
    pub fn write_to(&self, path: &Path) -> StoreResult<()> {
        let bytes = encode_to_vec(self, bincode_config())
            .map_err(|e| StoreError::Write(format!("encode header: {e}")))?;
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Deserialize from `path`, verifying the magic.
    pub fn read_from(path: &Path) -> StoreResult<TreeHeader> {
        let bytes = fs::read(path)?;
        let (header, _): (TreeHeader, usize) = decode_from_slice(&bytes, bincode_config())
            .map_err(|e| StoreError::Read(format!("decode header: {e}")))?;
        if header.magic != MAGIC {
            return Err(StoreError::Read(format!(
                "bad header magic {:#x}, expected {MAGIC:#x}",
                header.magic
            )));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> TreeHeader {
        TreeHeader {
            magic: MAGIC,
            root_pos: Position(8192),
            size: 321,
            depth: 2,
            max_records_leaf: 170,
            max_records_branch: 120,
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree-header");

        sample().write_to(&path).unwrap();
        assert_eq!(TreeHeader::read_from(&path).unwrap(), sample());
    }

    #[test]
    fn write_truncates_previous_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree-header");

        sample().write_to(&path).unwrap();
        let mut smaller = sample();
        smaller.size = 1;
        smaller.write_to(&path).unwrap();
        assert_eq!(TreeHeader::read_from(&path).unwrap().size, 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tree-header");

        let mut header = sample();
        header.magic = 0xDEAD_BEEF;
        header.write_to(&path).unwrap();
        assert!(TreeHeader::read_from(&path).is_err());
    }

    #[test]
    fn missing_header_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(TreeHeader::read_from(&dir.path().join("absent")).is_err());
    }
}
