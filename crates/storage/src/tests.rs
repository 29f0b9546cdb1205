use super::*;
use tempfile::tempdir;

#[test]
fn layout_constants_fit_one_page() {
    assert!(ARENA_OFFSET + ARENA_LEN <= PAGE_SIZE);
    assert_eq!(BITMAP_LEN, CHUNKS_PER_PAGE.div_ceil(8));
    // The slack left over is smaller than one more chunk plus its bit.
    assert!(ARENA_OFFSET + ARENA_LEN + CHUNK_SIZE + 1 > PAGE_SIZE);
}

#[test]
fn kind_tags_round_trip() {
    assert_eq!(PageKind::from_tag(PageKind::Node.tag()), Some(PageKind::Node));
    assert_eq!(PageKind::from_tag(PageKind::Slots.tag()), Some(PageKind::Slots));
    assert_eq!(PageKind::from_tag(7), None);
}

#[test]
fn fresh_pages_carry_their_kind() {
    assert_eq!(Page::node().kind(), Some(PageKind::Node));
    assert_eq!(Page::slots().kind(), Some(PageKind::Slots));
}

#[test]
fn chunk_bits_set_and_clear() {
    let mut page = Page::slots();
    assert!(page.chunk_is_free(0));
    assert!(page.chunk_is_free(CHUNKS_PER_PAGE - 1));

    page.set_chunk(0, true);
    page.set_chunk(9, true);
    page.set_chunk(CHUNKS_PER_PAGE - 1, true);
    assert!(!page.chunk_is_free(0));
    assert!(!page.chunk_is_free(9));
    assert!(!page.chunk_is_free(CHUNKS_PER_PAGE - 1));
    // Neighbors are untouched.
    assert!(page.chunk_is_free(1));
    assert!(page.chunk_is_free(8));
    assert!(page.chunk_is_free(10));

    page.set_chunk(9, false);
    assert!(page.chunk_is_free(9));
}

#[test]
fn chunk_spans_are_disjoint_and_in_arena() {
    let first = Page::chunk_span(0);
    let second = Page::chunk_span(1);
    let last = Page::chunk_span(CHUNKS_PER_PAGE - 1);
    assert_eq!(first.start, ARENA_OFFSET);
    assert_eq!(first.end, second.start);
    assert!(last.end <= PAGE_SIZE);
}

#[test]
fn from_bytes_rejects_wrong_length() {
    assert!(Page::from_bytes(vec![0u8; PAGE_SIZE - 1]).is_err());
    assert!(Page::from_bytes(vec![0u8; PAGE_SIZE]).is_ok());
}

#[test]
fn write_then_read_round_trips() {
    let dir = tempdir().unwrap();
    let mut file = PageFile::open(&dir.path().join("pages")).unwrap();

    let mut page = Page::node();
    page.data[1] = 0xAB;
    page.data[PAGE_SIZE - 1] = 0xCD;
    file.write_page(Position(PAGE_SIZE as u64), &page).unwrap();

    let back = file.read_page(Position(PAGE_SIZE as u64)).unwrap();
    assert_eq!(back.data, page.data);
}

#[test]
fn read_past_end_yields_zeroed_page() {
    let dir = tempdir().unwrap();
    let mut file = PageFile::open(&dir.path().join("pages")).unwrap();

    let page = file.read_page(Position(10 * PAGE_SIZE as u64)).unwrap();
    assert!(page.data.iter().all(|&b| b == 0));
    assert_eq!(page.kind(), Some(PageKind::Node));
}

#[test]
fn unaligned_positions_are_rejected() {
    let dir = tempdir().unwrap();
    let mut file = PageFile::open(&dir.path().join("pages")).unwrap();

    let err = file.read_page(Position(100)).unwrap_err();
    assert!(matches!(err, common::StoreError::Position(..)));

    let err = file.write_page(Position(1), &Page::node()).unwrap_err();
    assert!(matches!(err, common::StoreError::Position(..)));
}

#[test]
fn reopen_preserves_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pages");

    {
        let mut file = PageFile::open(&path).unwrap();
        let mut page = Page::slots();
        page.set_chunk(3, true);
        file.write_page(Position(0), &page).unwrap();
        file.sync().unwrap();
    }

    let mut file = PageFile::open(&path).unwrap();
    let back = file.read_page(Position(0)).unwrap();
    assert_eq!(back.kind(), Some(PageKind::Slots));
    assert!(!back.chunk_is_free(3));
}
