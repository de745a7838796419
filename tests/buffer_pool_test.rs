//! Buffer pool scenarios: eviction order per policy, pin discipline,
//! and dirty write-back.

use beedb::buffer::{BufferManager, ReplacementPolicy};
use beedb::common::PAGE_SIZE;
use beedb::error::DbError;
use beedb::storage::{PageKind, StorageManager};
use std::sync::Arc;
use tempfile::tempdir;

fn pool_with_pages(
    frames: usize,
    policy: ReplacementPolicy,
    pages: u32,
) -> (tempfile::TempDir, BufferManager) {
    let dir = tempdir().unwrap();
    let storage = Arc::new(StorageManager::open(dir.path().join("data.bee")).unwrap());
    for _ in 0..pages {
        storage.allocate(PageKind::Record).unwrap();
    }
    let buffer = BufferManager::builder()
        .frame_count(frames)
        .replacement_policy(policy)
        .build(storage);
    (dir, buffer)
}

#[test]
fn lru_evicts_least_recently_pinned_page() {
    let (_dir, buffer) = pool_with_pages(2, ReplacementPolicy::Lru, 4);

    buffer.pin(1).unwrap();
    buffer.unpin(1, false).unwrap();
    buffer.pin(2).unwrap();
    buffer.unpin(2, false).unwrap();
    buffer.pin(3).unwrap();

    assert_eq!(buffer.evicted_frames(), 1);
    assert!(!buffer.is_resident(1));
    assert!(buffer.is_resident(2));
    assert!(buffer.is_resident(3));

    buffer.unpin(3, false).unwrap();
}

#[test]
fn clock_grants_repinned_page_a_second_chance() {
    let (_dir, buffer) = pool_with_pages(2, ReplacementPolicy::Clock, 4);

    buffer.pin(1).unwrap();
    buffer.unpin(1, false).unwrap();
    buffer.pin(1).unwrap();
    buffer.unpin(1, false).unwrap();
    buffer.pin(2).unwrap();
    buffer.unpin(2, false).unwrap();
    buffer.pin(3).unwrap();

    // Page 1's second pin set its reference bit, so the hand passes it
    // over and takes page 2.
    assert_eq!(buffer.evicted_frames(), 1);
    assert!(buffer.is_resident(1));
    assert!(!buffer.is_resident(2));
    assert!(buffer.is_resident(3));

    buffer.unpin(3, false).unwrap();
}

#[test]
fn pinned_pages_are_never_evicted() {
    let (_dir, buffer) = pool_with_pages(2, ReplacementPolicy::Lru, 4);

    buffer.pin(1).unwrap(); // stays pinned
    buffer.pin(2).unwrap();
    buffer.unpin(2, false).unwrap();

    // Page 1 is older by LRU order but pinned, so page 2 must go.
    buffer.pin(3).unwrap();
    assert!(buffer.is_resident(1));
    assert!(!buffer.is_resident(2));

    // With every frame pinned there is nothing left to evict.
    let err = buffer.pin(2).unwrap_err();
    assert!(matches!(err, DbError::NoFreeFrame));

    buffer.unpin(1, false).unwrap();
    buffer.unpin(3, false).unwrap();
}

#[test]
fn matched_pins_leave_no_frame_pinned() {
    let (_dir, buffer) = pool_with_pages(3, ReplacementPolicy::Lru, 6);

    for round in 0..3 {
        for page in 0..6u32 {
            buffer.pin(page).unwrap();
            if round == 1 {
                buffer.pin(page).unwrap();
                buffer.unpin(page, false).unwrap();
            }
            buffer.unpin(page, false).unwrap();
        }
    }

    for page in 0..6u32 {
        assert_eq!(buffer.pin_count(page), 0, "page {page} still pinned");
    }
}

#[test]
fn unpin_below_zero_is_rejected() {
    let (_dir, buffer) = pool_with_pages(2, ReplacementPolicy::Lru, 2);

    buffer.pin(0).unwrap();
    buffer.unpin(0, false).unwrap();
    assert!(matches!(
        buffer.unpin(0, false),
        Err(DbError::PageNotPinned(0))
    ));
    // Never-resident pages are rejected the same way.
    assert!(matches!(
        buffer.unpin(1, false),
        Err(DbError::PageNotPinned(1))
    ));
}

#[test]
fn dirty_victim_is_flushed_and_reloaded_intact() {
    let (_dir, buffer) = pool_with_pages(1, ReplacementPolicy::Lru, 3);

    let page = buffer.pin(1).unwrap();
    page.write()[PAGE_SIZE - 1] = 0x5A;
    buffer.unpin(1, true).unwrap();

    // One frame: pinning another page forces the dirty write-back.
    buffer.pin(2).unwrap();
    buffer.unpin(2, false).unwrap();

    let mut image = vec![0u8; PAGE_SIZE];
    buffer.storage().read_page(1, &mut image).unwrap();
    assert_eq!(image[PAGE_SIZE - 1], 0x5A);

    let back = buffer.pin(1).unwrap();
    assert_eq!(back.read()[PAGE_SIZE - 1], 0x5A);
    buffer.unpin(1, false).unwrap();
}

#[test]
fn clean_pages_are_not_written_back() {
    let (_dir, buffer) = pool_with_pages(1, ReplacementPolicy::Lru, 3);

    // Scribble on the frame without declaring it dirty; eviction must
    // not persist the change.
    let page = buffer.pin(1).unwrap();
    page.write()[10] = 0xFF;
    buffer.unpin(1, false).unwrap();

    buffer.pin(2).unwrap();
    buffer.unpin(2, false).unwrap();

    let mut image = vec![0u8; PAGE_SIZE];
    buffer.storage().read_page(1, &mut image).unwrap();
    assert_eq!(image[10], 0);
}

#[test]
fn lfu_evicts_least_frequently_pinned_page() {
    let (_dir, buffer) = pool_with_pages(2, ReplacementPolicy::Lfu, 4);

    buffer.pin(1).unwrap();
    buffer.unpin(1, false).unwrap();
    buffer.pin(1).unwrap();
    buffer.unpin(1, false).unwrap();
    buffer.pin(2).unwrap();
    buffer.unpin(2, false).unwrap();

    buffer.pin(3).unwrap();
    assert!(buffer.is_resident(1));
    assert!(!buffer.is_resident(2));
    buffer.unpin(3, false).unwrap();
}

#[test]
fn lru_k_prefers_pages_with_short_history() {
    let (_dir, buffer) = pool_with_pages(2, ReplacementPolicy::LruK, 4);

    // Page 1 reaches k = 2 pins; page 2 stays below and is preferred
    // for eviction despite being pinned more recently.
    buffer.pin(1).unwrap();
    buffer.unpin(1, false).unwrap();
    buffer.pin(1).unwrap();
    buffer.unpin(1, false).unwrap();
    buffer.pin(2).unwrap();
    buffer.unpin(2, false).unwrap();

    buffer.pin(3).unwrap();
    assert!(buffer.is_resident(1));
    assert!(!buffer.is_resident(2));
    buffer.unpin(3, false).unwrap();
}

#[test]
fn random_policy_evicts_some_unpinned_page() {
    let (_dir, buffer) = pool_with_pages(2, ReplacementPolicy::Random, 4);

    buffer.pin(1).unwrap();
    buffer.unpin(1, false).unwrap();
    buffer.pin(2).unwrap();
    buffer.unpin(2, false).unwrap();
    buffer.pin(3).unwrap();

    assert_eq!(buffer.evicted_frames(), 1);
    assert!(buffer.is_resident(3));
    let survivors = [1u32, 2].iter().filter(|&&p| buffer.is_resident(p)).count();
    assert_eq!(survivors, 1);
    buffer.unpin(3, false).unwrap();
}
