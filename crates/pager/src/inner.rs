//! Byte-granular allocation inside `Slots` pages.
//!
//! Each `Slots` page is carved into fixed-size chunks tracked by the bitmap
//! in its header. An inner allocation is a run of free chunks that may span
//! page-adjacent `Slots` pages; the payload bytes skip over each page's
//! header, so spans are logically contiguous even though the file is not.

use common::{Position, StoreError, StoreResult};
use log::debug;
use storage::{ARENA_LEN, ARENA_OFFSET, CHUNK_SIZE, CHUNKS_PER_PAGE, PAGE_SIZE, Page, PageKind};

use crate::Pager;

/// A candidate run of free chunks under construction.
#[derive(Clone, Copy)]
struct Run {
    page: Position,
    chunk: usize,
    len: usize,
}

impl Pager {
    /// Allocate `len` bytes of sub-page storage and return the byte
    /// position of the first chunk. Grows the file with fresh `Slots`
    /// pages when no existing run is wide enough.
    pub fn alloc_inner(&mut self, len: usize) -> StoreResult<Position> {
        if len == 0 {
            return Err(StoreError::Alloc("zero-length inner allocation".into()));
        }
        let needed = len.div_ceil(CHUNK_SIZE);

        let mut run: Option<Run> = None;
        let mut prev_page: Option<Position> = None;
        let pages: Vec<Position> = self.allocator.allocated().collect();

        for pos in pages {
            if let Some(prev) = prev_page
                && pos.0 != prev.0 + PAGE_SIZE as u64
            {
                run = None;
            }
            prev_page = Some(pos);

            let page = self.get(pos)?;
            if page.kind() != Some(PageKind::Slots) {
                run = None;
                continue;
            }
            let occupancy: Vec<bool> =
                (0..CHUNKS_PER_PAGE).map(|c| page.chunk_is_free(c)).collect();

            for (chunk, free) in occupancy.into_iter().enumerate() {
                if !free {
                    run = None;
                    continue;
                }
                let r = match run {
                    Some(mut r) => {
                        r.len += 1;
                        r
                    }
                    None => Run {
                        page: pos,
                        chunk,
                        len: 1,
                    },
                };
                run = Some(r);
                if r.len == needed {
                    return self.occupy_run(r.page, r.chunk, needed);
                }
            }
        }

        // Nothing wide enough among existing pages; extend the file.
        loop {
            let pos = self.alloc()?;
            if let Some(prev) = prev_page
                && pos.0 != prev.0 + PAGE_SIZE as u64
            {
                run = None;
            }
            prev_page = Some(pos);
            debug!("extending slots arena with page at {pos}");
            self.place(pos, Page::slots())?;

            for chunk in 0..CHUNKS_PER_PAGE {
                let r = match run {
                    Some(mut r) => {
                        r.len += 1;
                        r
                    }
                    None => Run {
                        page: pos,
                        chunk,
                        len: 1,
                    },
                };
                run = Some(r);
                if r.len == needed {
                    return self.occupy_run(r.page, r.chunk, needed);
                }
            }
        }
    }

    /// Clear the chunk bits covering `len` bytes starting at `pos`.
    /// Clearing an already-free chunk is a no-op.
    pub fn free_inner(&mut self, pos: Position, len: usize) -> StoreResult<()> {
        let (mut page_pos, mut chunk) = locate_chunk(pos)?;
        let mut remaining = len.div_ceil(CHUNK_SIZE);
        while remaining > 0 {
            let mut page = self.slots_page(page_pos)?.clone();
            let take = remaining.min(CHUNKS_PER_PAGE - chunk);
            for c in chunk..chunk + take {
                page.set_chunk(c, false);
            }
            self.place(page_pos, page)?;
            remaining -= take;
            chunk = 0;
            page_pos = Position(page_pos.0 + PAGE_SIZE as u64);
        }
        Ok(())
    }

    /// Copy `len` bytes starting at `pos`, following the arena across
    /// consecutive pages.
    pub fn get_inner(&mut self, pos: Position, len: usize) -> StoreResult<Vec<u8>> {
        let (mut page_pos, chunk) = locate_chunk(pos)?;
        let mut offset = ARENA_OFFSET + chunk * CHUNK_SIZE;
        let mut out = Vec::with_capacity(len);
        let mut remaining = len;
        while remaining > 0 {
            let page = self.slots_page(page_pos)?;
            let take = remaining.min(ARENA_OFFSET + ARENA_LEN - offset);
            out.extend_from_slice(&page.data[offset..offset + take]);
            remaining -= take;
            offset = ARENA_OFFSET;
            page_pos = Position(page_pos.0 + PAGE_SIZE as u64);
        }
        Ok(out)
    }

    /// Write `bytes` starting at `pos`, following the arena across
    /// consecutive pages.
    pub fn place_inner(&mut self, pos: Position, bytes: &[u8]) -> StoreResult<()> {
        let (mut page_pos, chunk) = locate_chunk(pos)?;
        let mut offset = ARENA_OFFSET + chunk * CHUNK_SIZE;
        let mut written = 0;
        while written < bytes.len() {
            let mut page = self.slots_page(page_pos)?.clone();
            let take = (bytes.len() - written).min(ARENA_OFFSET + ARENA_LEN - offset);
            page.data[offset..offset + take].copy_from_slice(&bytes[written..written + take]);
            self.place(page_pos, page)?;
            written += take;
            offset = ARENA_OFFSET;
            page_pos = Position(page_pos.0 + PAGE_SIZE as u64);
        }
        Ok(())
    }

    /// Fetch a page that must be a `Slots` page.
    fn slots_page(&mut self, pos: Position) -> StoreResult<&Page> {
        let page = self.get(pos)?;
        if page.kind() != Some(PageKind::Slots) {
            return Err(StoreError::Position(pos, "not a slots page".into()));
        }
        Ok(page)
    }

    /// Mark `needed` chunks occupied starting at (`page_pos`, `chunk`) and
    /// return the byte position of the run's first chunk.
    fn occupy_run(
        &mut self,
        mut page_pos: Position,
        mut chunk: usize,
        mut remaining: usize,
    ) -> StoreResult<Position> {
        let start = Position(page_pos.0 + (ARENA_OFFSET + chunk * CHUNK_SIZE) as u64);
        while remaining > 0 {
            let mut page = self.slots_page(page_pos)?.clone();
            let take = remaining.min(CHUNKS_PER_PAGE - chunk);
            for c in chunk..chunk + take {
                page.set_chunk(c, true);
            }
            self.place(page_pos, page)?;
            remaining -= take;
            chunk = 0;
            page_pos = Position(page_pos.0 + PAGE_SIZE as u64);
        }
        Ok(start)
    }
}

/// Resolve an inner byte position to its page and chunk index.
fn locate_chunk(pos: Position) -> StoreResult<(Position, usize)> {
    let offset = pos.offset_in_page(PAGE_SIZE);
    if offset < ARENA_OFFSET {
        return Err(StoreError::Position(pos, "inside slots page header".into()));
    }
    let rel = offset - ARENA_OFFSET;
    if rel % CHUNK_SIZE != 0 {
        return Err(StoreError::Position(pos, "not chunk aligned".into()));
    }
    let chunk = rel / CHUNK_SIZE;
    if chunk >= CHUNKS_PER_PAGE {
        return Err(StoreError::Position(pos, "past the chunk arena".into()));
    }
    Ok((pos.page_start(PAGE_SIZE), chunk))
}
