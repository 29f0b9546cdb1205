use super::*;
use allocator::{FreeListAllocator, StackAllocator};
use buffer::PagePool;
use storage::{ARENA_LEN, ARENA_OFFSET, CHUNK_SIZE, PAGE_SIZE, PageKind};
use tempfile::{TempDir, tempdir};

const PS: u64 = PAGE_SIZE as u64;

fn scratch(frames: usize) -> (TempDir, Pager) {
    let dir = tempdir().unwrap();
    let pager = Pager::new(
        dir.path().join("store"),
        Box::new(FreeListAllocator::new(u64::MAX)),
        PagePool::lru(frames),
    )
    .unwrap();
    (dir, pager)
}

#[test]
fn place_then_get_round_trips() {
    let (_dir, mut pager) = scratch(4);
    let pos = pager.alloc().unwrap();

    let mut page = Page::node();
    page.data[10] = 0x5A;
    pager.place(pos, page).unwrap();

    assert_eq!(pager.get(pos).unwrap().data[10], 0x5A);
}

#[test]
fn eviction_writes_back_before_returning() {
    let (_dir, mut pager) = scratch(1);
    let first = pager.alloc().unwrap();
    let second = pager.alloc().unwrap();

    let mut page = Page::node();
    page.data[1] = 11;
    pager.place(first, page).unwrap();

    // This placement overflows the single-frame pool and must push the
    // first page to disk synchronously.
    pager.place(second, Page::node()).unwrap();

    // Refetch faults the first page back in from the file.
    assert_eq!(pager.get(first).unwrap().data[1], 11);
}

#[test]
fn unaligned_positions_are_rejected() {
    let (_dir, mut pager) = scratch(4);
    assert!(matches!(
        pager.get(Position(100)),
        Err(common::StoreError::Position(..))
    ));
    assert!(matches!(
        pager.place(Position(PS + 1), Page::node()),
        Err(common::StoreError::Position(..))
    ));
}

#[test]
fn save_then_load_restores_allocator_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store");

    {
        let mut pager = Pager::new(
            &path,
            Box::new(FreeListAllocator::new(u64::MAX)),
            PagePool::lru(4),
        )
        .unwrap();
        pager.alloc().unwrap();
        pager.alloc().unwrap();
        pager.free(Position(0)).unwrap();
        pager.save().unwrap();
    }

    let mut pager = Pager::new(
        &path,
        Box::new(FreeListAllocator::new(u64::MAX)),
        PagePool::lru(4),
    )
    .unwrap();
    pager.load().unwrap();
    assert!(!pager.has_allocated(Position(0)));
    assert!(pager.has_allocated(Position(PS)));
    // The freed page is reissued before any fresh one.
    assert_eq!(pager.alloc().unwrap(), Position(0));
}

#[test]
fn save_persists_cached_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store");

    let pos;
    {
        let mut pager = Pager::new(
            &path,
            Box::new(StackAllocator::new()),
            PagePool::lru(8),
        )
        .unwrap();
        pos = pager.alloc().unwrap();
        let mut page = Page::node();
        page.data[42] = 42;
        pager.place(pos, page).unwrap();
        pager.save().unwrap();
    }

    let mut pager = Pager::new(
        &path,
        Box::new(StackAllocator::new()),
        PagePool::lru(8),
    )
    .unwrap();
    pager.load().unwrap();
    assert_eq!(pager.get(pos).unwrap().data[42], 42);
}

#[test]
fn zero_length_inner_alloc_fails() {
    let (_dir, mut pager) = scratch(4);
    assert!(matches!(
        pager.alloc_inner(0),
        Err(common::StoreError::Alloc(_))
    ));
}

#[test]
fn inner_alloc_round_trips_small_payload() {
    let (_dir, mut pager) = scratch(8);
    let payload = b"ordered keys".to_vec();

    let pos = pager.alloc_inner(payload.len()).unwrap();
    pager.place_inner(pos, &payload).unwrap();

    assert_eq!(pager.get_inner(pos, payload.len()).unwrap(), payload);
    // The position lands inside the arena of the first slots page.
    assert_eq!(pos.offset_in_page(PAGE_SIZE), ARENA_OFFSET);
}

#[test]
fn inner_allocations_do_not_overlap() {
    let (_dir, mut pager) = scratch(8);

    let a = pager.alloc_inner(10).unwrap();
    let b = pager.alloc_inner(10).unwrap();
    pager.place_inner(a, &[0xAA; 10]).unwrap();
    pager.place_inner(b, &[0xBB; 10]).unwrap();

    assert_eq!(pager.get_inner(a, 10).unwrap(), vec![0xAA; 10]);
    assert_eq!(pager.get_inner(b, 10).unwrap(), vec![0xBB; 10]);
}

#[test]
fn inner_alloc_spans_pages() {
    let (_dir, mut pager) = scratch(8);
    let len = ARENA_LEN + 3 * CHUNK_SIZE;
    let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();

    let pos = pager.alloc_inner(len).unwrap();
    pager.place_inner(pos, &payload).unwrap();

    assert_eq!(pager.get_inner(pos, len).unwrap(), payload);
    // Both touched pages are slots pages.
    assert_eq!(pager.get(Position(0)).unwrap().kind(), Some(PageKind::Slots));
    assert_eq!(
        pager.get(Position(PS)).unwrap().kind(),
        Some(PageKind::Slots)
    );
}

#[test]
fn freed_chunks_are_reused() {
    let (_dir, mut pager) = scratch(8);

    let first = pager.alloc_inner(8).unwrap();
    let _second = pager.alloc_inner(8).unwrap();
    pager.free_inner(first, 8).unwrap();

    // The freed run is the first fit for an equal-sized request.
    let again = pager.alloc_inner(8).unwrap();
    assert_eq!(again, first);
}

#[test]
fn double_free_inner_is_a_no_op() {
    let (_dir, mut pager) = scratch(8);
    let pos = pager.alloc_inner(16).unwrap();
    pager.free_inner(pos, 16).unwrap();
    pager.free_inner(pos, 16).unwrap();
}

#[test]
fn header_positions_are_rejected() {
    let (_dir, mut pager) = scratch(8);
    pager.alloc_inner(4).unwrap();

    // Byte 0 is the kind tag, the bitmap follows; neither is addressable.
    assert!(pager.get_inner(Position(0), 4).is_err());
    assert!(pager.get_inner(Position(ARENA_OFFSET as u64 - 1), 4).is_err());
    assert!(pager.place_inner(Position(1), &[1, 2, 3]).is_err());
}

#[test]
fn inner_ops_reject_node_pages() {
    let (_dir, mut pager) = scratch(8);
    let pos = pager.alloc().unwrap();
    pager.place(pos, Page::node()).unwrap();

    let inside = Position(pos.0 + ARENA_OFFSET as u64);
    assert!(pager.get_inner(inside, 4).is_err());
    assert!(pager.place_inner(inside, &[9; 4]).is_err());
}

#[test]
fn slot_table_set_get_remove() {
    let (_dir, mut pager) = scratch(8);
    let mut table = SlotTable::new(pager.identifier().to_path_buf());

    let id = table.set(&mut pager, &"first value".to_string()).unwrap();
    let back: String = table.get(&mut pager, id).unwrap();
    assert_eq!(back, "first value");

    table.remove(&mut pager, id).unwrap();
    assert!(table.get::<String>(&mut pager, id).is_err());
    // Removing again is tolerated.
    table.remove(&mut pager, id).unwrap();
}

#[test]
fn slot_ids_are_reused_after_remove() {
    let (_dir, mut pager) = scratch(8);
    let mut table = SlotTable::new(pager.identifier().to_path_buf());

    let a = table.set(&mut pager, &vec![1u64, 2, 3]).unwrap();
    let b = table.set(&mut pager, &vec![4u64]).unwrap();
    assert_ne!(a, b);

    table.remove(&mut pager, a).unwrap();
    let c = table.set(&mut pager, &vec![7u64, 8]).unwrap();
    assert_eq!(c, a);
    assert_eq!(table.len(), 2);

    let back: Vec<u64> = table.get(&mut pager, c).unwrap();
    assert_eq!(back, vec![7, 8]);
}

#[test]
fn slot_replace_swaps_the_payload() {
    let (_dir, mut pager) = scratch(8);
    let mut table = SlotTable::new(pager.identifier().to_path_buf());

    let id = table.set(&mut pager, &"short".to_string()).unwrap();
    table
        .replace(&mut pager, id, &"a considerably longer payload".to_string())
        .unwrap();

    let back: String = table.get(&mut pager, id).unwrap();
    assert_eq!(back, "a considerably longer payload");
}

#[test]
fn slot_table_bounds_are_checked() {
    let (_dir, mut pager) = scratch(8);
    let table = SlotTable::new(pager.identifier().to_path_buf());
    assert!(table.get::<String>(&mut pager, 3).is_err());
}

#[test]
fn slot_table_save_load_round_trips() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store");

    let id;
    {
        let mut pager = Pager::new(
            &path,
            Box::new(FreeListAllocator::new(u64::MAX)),
            PagePool::lru(8),
        )
        .unwrap();
        let mut table = SlotTable::new(&path);
        id = table.set(&mut pager, &"persisted".to_string()).unwrap();
        table.save(&mut pager).unwrap();
    }

    let mut pager = Pager::new(
        &path,
        Box::new(FreeListAllocator::new(u64::MAX)),
        PagePool::lru(8),
    )
    .unwrap();
    let mut table = SlotTable::new(&path);
    table.load(&mut pager).unwrap();

    let back: String = table.get(&mut pager, id).unwrap();
    assert_eq!(back, "persisted");
}
