//! Page allocation policies.
//!
//! The pager talks to page allocation through the [`PageAllocator`]
//! capability set; which policy backs it is the caller's choice.
//! [`StackAllocator`] only ever grows the file, [`FreeListAllocator`]
//! recycles freed pages and enforces a hard page budget.


use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{Position, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use storage::{PAGE_SIZE, ensure_page_aligned};

fn bincode_config() -> impl Config {
    config::legacy()
}

/// Capability set for assigning and releasing page positions.
///
/// Implementations also expose a state snapshot so the pager can persist
/// whichever policy it was built with.
pub trait PageAllocator {
    /// Hand out the position of a page considered allocated from now on.
    fn alloc(&mut self) -> StoreResult<Position>;

    /// Release a previously allocated page.
    fn free(&mut self, pos: Position) -> StoreResult<()>;

    /// Whether `pos` falls inside currently allocated space.
    fn has_allocated(&self, pos: Position) -> bool;

    /// Lazy traversal of every allocated page position, ascending.
    fn allocated(&self) -> Box<dyn Iterator<Item = Position> + '_>;

    /// Serialized policy state, fit for a sidecar file.
    fn snapshot(&self) -> StoreResult<Vec<u8>>;

    /// Replace this policy's state with a previously taken snapshot.
    fn restore(&mut self, bytes: &[u8]) -> StoreResult<()>;
}

/// Monotone allocator: a cursor that only moves forward.
///
/// `free` is unsupported; every position below the cursor counts as
/// allocated forever.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StackAllocator {
    cursor: u64,
}

impl StackAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PageAllocator for StackAllocator {
    fn alloc(&mut self) -> StoreResult<Position> {
        let pos = Position(self.cursor);
        self.cursor += PAGE_SIZE as u64;
        Ok(pos)
    }

    fn free(&mut self, pos: Position) -> StoreResult<()> {
        Err(StoreError::Alloc(format!(
            "stack allocator cannot free {pos}"
        )))
    }

    fn has_allocated(&self, pos: Position) -> bool {
        pos.0 < self.cursor
    }

    fn allocated(&self) -> Box<dyn Iterator<Item = Position> + '_> {
        Box::new((0..self.cursor.div_ceil(PAGE_SIZE as u64)).map(|i| Position(i * PAGE_SIZE as u64)))
    }

    fn snapshot(&self) -> StoreResult<Vec<u8>> {
        encode_to_vec(self, bincode_config())
            .map_err(|e| StoreError::Write(format!("encode allocator state: {e}")))
    }

    fn restore(&mut self, bytes: &[u8]) -> StoreResult<()> {
        let (state, _) = decode_from_slice(bytes, bincode_config())
            .map_err(|e| StoreError::Read(format!("decode allocator state: {e}")))?;
        *self = state;
        Ok(())
    }
}

/// Recycling allocator with a hard page budget.
///
/// Freed positions are kept sorted ascending so `alloc` pops the largest
/// freed position first; freeing the highest page shrinks the high-water
/// mark instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FreeListAllocator {
    free: Vec<Position>,
    next_unused: u64,
    limit: u64,
}

impl FreeListAllocator {
    /// `limit` is the maximum number of pages ever handed out at once.
    pub fn new(limit: u64) -> Self {
        Self {
            free: Vec::new(),
            next_unused: 0,
            limit,
        }
    }
}

impl PageAllocator for FreeListAllocator {
    fn alloc(&mut self) -> StoreResult<Position> {
        if let Some(pos) = self.free.pop() {
            return Ok(pos);
        }
        if self.next_unused >= self.limit {
            return Err(StoreError::Alloc(format!(
                "page limit of {} reached",
                self.limit
            )));
        }
        let pos = Position(self.next_unused * PAGE_SIZE as u64);
        self.next_unused += 1;
        Ok(pos)
    }

    fn free(&mut self, pos: Position) -> StoreResult<()> {
        ensure_page_aligned(pos)?;
        let page = pos.page_index(PAGE_SIZE);
        if page >= self.next_unused {
            return Err(StoreError::Position(pos, "not an allocated page".into()));
        }
        if page + 1 == self.next_unused {
            self.next_unused -= 1;
            return Ok(());
        }
        match self.free.binary_search(&pos) {
            Ok(_) => Err(StoreError::Position(pos, "already freed".into())),
            Err(at) => {
                self.free.insert(at, pos);
                Ok(())
            }
        }
    }

    fn has_allocated(&self, pos: Position) -> bool {
        pos.0 < self.next_unused * PAGE_SIZE as u64
            && self.free.binary_search(&pos.page_start(PAGE_SIZE)).is_err()
    }

    fn allocated(&self) -> Box<dyn Iterator<Item = Position> + '_> {
        Box::new(
            (0..self.next_unused)
                .map(|i| Position(i * PAGE_SIZE as u64))
                .filter(|pos| self.free.binary_search(pos).is_err()),
        )
    }

    fn snapshot(&self) -> StoreResult<Vec<u8>> {
        encode_to_vec(self, bincode_config())
            .map_err(|e| StoreError::Write(format!("encode allocator state: {e}")))
    }

    fn restore(&mut self, bytes: &[u8]) -> StoreResult<()> {
        let (state, _) = decode_from_slice(bytes, bincode_config())
            .map_err(|e| StoreError::Read(format!("decode allocator state: {e}")))?;
        *self = state;
        Ok(())
    }
}
