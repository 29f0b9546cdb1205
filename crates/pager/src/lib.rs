//! Paged-file abstraction: backing file + allocation policy + page cache.
//!
//! The pager is the only component that touches the backing file. All page
//! I/O funnels through the buffer pool; evictions and explicit saves write
//! dirty pages back synchronously. On top of whole pages it layers a
//! byte-granular allocator for variable-length payloads (`*_inner`) and a
//! slot table handing out stable IDs for such payloads.

mod inner;
mod slots;
#[cfg(test)]
mod tests;

pub use slots::{Slot, SlotId, SlotTable};

use std::fs;
use std::path::{Path, PathBuf};

use allocator::PageAllocator;
use buffer::PagePool;
use common::{Position, StoreError, StoreResult, sidecar_path};
use log::debug;
use storage::{Page, PageFile, ensure_page_aligned};

/// A paged file with pluggable allocation and eviction.
pub struct Pager {
    identifier: PathBuf,
    file: PageFile,
    allocator: Box<dyn PageAllocator + Send>,
    pool: PagePool,
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("identifier", &self.identifier)
            .field("pool", &self.pool)
            .finish()
    }
}

impl Pager {
    /// Open (or create) the backing file at `identifier` and wire it to the
    /// given allocation policy and pool.
    pub fn new(
        identifier: impl Into<PathBuf>,
        allocator: Box<dyn PageAllocator + Send>,
        pool: PagePool,
    ) -> StoreResult<Self> {
        let identifier = identifier.into();
        let file = PageFile::open(&identifier)?;
        Ok(Self {
            identifier,
            file,
            allocator,
            pool,
        })
    }

    pub fn identifier(&self) -> &Path {
        &self.identifier
    }

    /// Hand out a fresh page position.
    pub fn alloc(&mut self) -> StoreResult<Position> {
        self.allocator.alloc()
    }

    /// Release a page position back to the allocator.
    pub fn free(&mut self, pos: Position) -> StoreResult<()> {
        self.allocator.free(pos)
    }

    pub fn has_allocated(&self, pos: Position) -> bool {
        self.allocator.has_allocated(pos)
    }

    /// Every allocated page position, ascending.
    pub fn allocated(&self) -> Box<dyn Iterator<Item = Position> + '_> {
        self.allocator.allocated()
    }

    /// Fetch the page at `pos`, faulting it in from the file on a miss.
    pub fn get(&mut self, pos: Position) -> StoreResult<&Page> {
        ensure_page_aligned(pos)?;
        if !self.pool.contains(pos) {
            debug!("page fault at {pos}");
            let page = self.file.read_page(pos)?;
            self.admit(pos, page)?;
        }
        self.pool
            .get(pos)
            .ok_or_else(|| StoreError::Read(format!("page at {pos} vanished from the pool")))
    }

    /// Put a page into the cache; an overflow eviction is written back
    /// before this returns.
    pub fn place(&mut self, pos: Position, page: Page) -> StoreResult<()> {
        ensure_page_aligned(pos)?;
        self.admit(pos, page)
    }

    fn admit(&mut self, pos: Position, page: Page) -> StoreResult<()> {
        if let Some(evicted) = self.pool.place(pos, page)
            && evicted.dirty
        {
            self.file.write_page(evicted.pos, &evicted.page)?;
        }
        Ok(())
    }

    /// Persist the allocator state to the `<id>-alloc` sidecar and drain
    /// every dirty page to the backing file.
    pub fn save(&mut self) -> StoreResult<()> {
        let state = self.allocator.snapshot()?;
        fs::write(self.alloc_path(), state)?;

        for evicted in self.pool.flush() {
            if evicted.dirty {
                self.file.write_page(evicted.pos, &evicted.page)?;
            }
        }
        self.file.sync()
    }

    /// Restore the allocator from its sidecar; the cache starts empty.
    pub fn load(&mut self) -> StoreResult<()> {
        let bytes = fs::read(self.alloc_path())?;
        self.allocator.restore(&bytes)?;
        self.pool.clear();
        Ok(())
    }

    fn alloc_path(&self) -> PathBuf {
        sidecar_path(&self.identifier, "alloc")
    }
}
