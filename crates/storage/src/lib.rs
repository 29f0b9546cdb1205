//! Page layout and single-page file I/O.
//!
//! A page is the unit of allocation, caching and disk transfer. Byte 0 of
//! every page is a kind tag: `Node` pages carry one serialized tree node,
//! `Slots` pages carry a chunk-occupancy bitmap followed by a byte arena
//! for variable-length payloads.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use common::{Position, StoreError, StoreResult};
use log::trace;

/// Size of one page in bytes. Positions are multiples of this.
pub const PAGE_SIZE: usize = 4096;

/// Granularity of the sub-page allocator inside `Slots` pages.
pub const CHUNK_SIZE: usize = 4;

/// Number of chunks a `Slots` page can hold once the kind byte and the
/// occupancy bitmap are paid for.
pub const CHUNKS_PER_PAGE: usize = {
    let mut chunks = (PAGE_SIZE - 1) * 8 / (8 * CHUNK_SIZE + 1);
    while 1 + (chunks + 7) / 8 + chunks * CHUNK_SIZE > PAGE_SIZE {
        chunks -= 1;
    }
    chunks
};

/// Length of the chunk-occupancy bitmap in bytes.
pub const BITMAP_LEN: usize = CHUNKS_PER_PAGE.div_ceil(8);

/// Offset of the chunk arena within a `Slots` page (kind byte + bitmap).
pub const ARENA_OFFSET: usize = 1 + BITMAP_LEN;

/// Usable arena bytes per `Slots` page.
pub const ARENA_LEN: usize = CHUNKS_PER_PAGE * CHUNK_SIZE;

/// What a page stores, encoded in its first byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageKind {
    /// One serialized tree node.
    Node,
    /// Chunk bitmap + byte arena for variable-length payloads.
    Slots,
}

impl PageKind {
    pub fn tag(self) -> u8 {
        match self {
            PageKind::Node => 0,
            PageKind::Slots => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<PageKind> {
        match tag {
            0 => Some(PageKind::Node),
            1 => Some(PageKind::Slots),
            _ => None,
        }
    }
}

/// A fixed-size page buffer.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: Vec<u8>,
}

impl Page {
    /// A zeroed page tagged as a node page.
    pub fn node() -> Self {
        Self {
            data: vec![0u8; PAGE_SIZE],
        }
    }

    /// A zeroed page tagged as a slots page, with an empty chunk bitmap.
    pub fn slots() -> Self {
        let mut data = vec![0u8; PAGE_SIZE];
        data[0] = PageKind::Slots.tag();
        Self { data }
    }

    /// Wrap raw page bytes, validating the length.
    pub fn from_bytes(data: Vec<u8>) -> StoreResult<Self> {
        if data.len() != PAGE_SIZE {
            return Err(StoreError::Read(format!(
                "page buffer is {} bytes, expected {}",
                data.len(),
                PAGE_SIZE
            )));
        }
        Ok(Self { data })
    }

    pub fn kind(&self) -> Option<PageKind> {
        PageKind::from_tag(self.data[0])
    }

    /// Whether the given chunk of a `Slots` page is unoccupied.
    pub fn chunk_is_free(&self, chunk: usize) -> bool {
        debug_assert!(chunk < CHUNKS_PER_PAGE);
        self.data[1 + chunk / 8] & (1 << (chunk % 8)) == 0
    }

    /// Flip the occupancy bit for one chunk.
    pub fn set_chunk(&mut self, chunk: usize, occupied: bool) {
        debug_assert!(chunk < CHUNKS_PER_PAGE);
        let mask = 1 << (chunk % 8);
        if occupied {
            self.data[1 + chunk / 8] |= mask;
        } else {
            self.data[1 + chunk / 8] &= !mask;
        }
    }

    /// Byte range of one chunk inside the page.
    pub fn chunk_span(chunk: usize) -> std::ops::Range<usize> {
        let start = ARENA_OFFSET + chunk * CHUNK_SIZE;
        start..start + CHUNK_SIZE
    }
}

/// Reject positions that do not sit on a page boundary.
pub fn ensure_page_aligned(pos: Position) -> StoreResult<()> {
    if pos.is_page_aligned(PAGE_SIZE) {
        Ok(())
    } else {
        Err(StoreError::Position(pos, "not page aligned".into()))
    }
}

/// Random single-page access to a backing file.
#[derive(Debug)]
pub struct PageFile {
    file: File,
}

impl PageFile {
    /// Open (or create) the backing file at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StoreError::Read(format!("open {} failed: {e}", path.display())))?;
        Ok(Self { file })
    }

    /// Read the page at `pos`. A position past the end of the file yields a
    /// zeroed node page, matching what a freshly allocated page looks like.
    pub fn read_page(&mut self, pos: Position) -> StoreResult<Page> {
        ensure_page_aligned(pos)?;
        self.file
            .seek(SeekFrom::Start(pos.0))
            .map_err(|e| StoreError::Read(format!("seek to {pos} failed: {e}")))?;

        let mut buf = vec![0u8; PAGE_SIZE];
        let n = self
            .file
            .read(&mut buf)
            .map_err(|e| StoreError::Read(format!("read at {pos} failed: {e}")))?;
        trace!("page read at {pos} ({n} bytes)");

        if n == 0 {
            Ok(Page::node())
        } else if n < PAGE_SIZE {
            Err(StoreError::Read(format!(
                "partial page at {pos}: expected {PAGE_SIZE} bytes, got {n}"
            )))
        } else {
            Page::from_bytes(buf)
        }
    }

    /// Write the page at `pos`.
    pub fn write_page(&mut self, pos: Position, page: &Page) -> StoreResult<()> {
        ensure_page_aligned(pos)?;
        self.file
            .seek(SeekFrom::Start(pos.0))
            .map_err(|e| StoreError::Write(format!("seek to {pos} failed: {e}")))?;
        self.file
            .write_all(&page.data)
            .map_err(|e| StoreError::Write(format!("write at {pos} failed: {e}")))?;
        trace!("page written at {pos}");
        Ok(())
    }

    /// Flush buffered writes down to the OS.
    pub fn sync(&mut self) -> StoreResult<()> {
        self.file
            .flush()
            .map_err(|e| StoreError::Write(format!("flush failed: {e}")))?;
        Ok(())
    }
}
