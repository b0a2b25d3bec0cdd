//! Integration tests for the B+tree index

use std::sync::Arc;

use oxbow::buffer::PageCache;
use oxbow::common::{PageId, RecordId, SlotId, INVALID_PAGE_ID};
use oxbow::index::{BPlusTree, IntegerComparator, InternalNodeRef, LeafNodeRef};
use oxbow::storage::disk::DiskManager;

use tempfile::NamedTempFile;

fn create_tree(
    pool_size: usize,
    leaf_max: usize,
    internal_max: usize,
) -> (Arc<PageCache>, BPlusTree, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let cache = Arc::new(PageCache::new(pool_size, 2, disk_manager));
    let tree = BPlusTree::new(
        Arc::clone(&cache),
        Arc::new(IntegerComparator),
        4,
        leaf_max,
        internal_max,
    )
    .unwrap();
    (cache, tree, temp_file)
}

fn key(n: u32) -> [u8; 4] {
    n.to_le_bytes()
}

fn rid(n: u32) -> RecordId {
    RecordId::new(PageId::new(n), SlotId::new((n % 16) as u16))
}

fn scan_keys(tree: &BPlusTree) -> Vec<u32> {
    tree.begin()
        .unwrap()
        .map(|entry| {
            let (key, _) = entry.unwrap();
            u32::from_le_bytes(key[..4].try_into().unwrap())
        })
        .collect()
}

#[test]
fn test_empty_tree() {
    let (_cache, tree, _temp) = create_tree(16, 4, 5);

    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.root_page_id().unwrap(), INVALID_PAGE_ID);
    assert_eq!(tree.get(&key(1)).unwrap(), None);
    assert!(tree.begin().unwrap() == tree.end().unwrap());
    assert_eq!(tree.height().unwrap(), 0);

    // Removing from an empty tree is a silent no-op
    tree.remove(&key(1)).unwrap();
}

#[test]
fn test_insert_and_get() {
    let (_cache, tree, _temp) = create_tree(16, 4, 5);

    assert!(tree.insert(&key(10), rid(10)).unwrap());
    assert!(tree.insert(&key(20), rid(20)).unwrap());
    assert!(tree.insert(&key(30), rid(30)).unwrap());

    assert!(!tree.is_empty().unwrap());
    assert_eq!(tree.get(&key(10)).unwrap(), Some(rid(10)));
    assert_eq!(tree.get(&key(20)).unwrap(), Some(rid(20)));
    assert_eq!(tree.get(&key(30)).unwrap(), Some(rid(30)));
    assert_eq!(tree.get(&key(40)).unwrap(), None);
}

#[test]
fn test_duplicate_insert_keeps_first_value() {
    let (_cache, tree, _temp) = create_tree(16, 4, 5);

    assert!(tree.insert(&key(5), rid(100)).unwrap());
    assert!(!tree.insert(&key(5), rid(200)).unwrap());
    assert_eq!(tree.get(&key(5)).unwrap(), Some(rid(100)));
}

#[test]
fn test_monotonic_insert_then_scan() {
    let (_cache, tree, _temp) = create_tree(64, 4, 5);

    for k in 1..=20u32 {
        assert!(tree.insert(&key(k), rid(k)).unwrap(), "insert {k}");
    }

    assert_eq!(scan_keys(&tree), (1..=20).collect::<Vec<u32>>());
    assert_eq!(tree.height().unwrap(), 3);

    for k in 1..=20u32 {
        assert_eq!(tree.get(&key(k)).unwrap(), Some(rid(k)), "get {k}");
    }
}

#[test]
fn test_delete_cascade_contracts_height() {
    let (_cache, tree, _temp) = create_tree(64, 4, 5);

    for k in 1..=20u32 {
        tree.insert(&key(k), rid(k)).unwrap();
    }
    assert_eq!(tree.height().unwrap(), 3);

    for k in 11..=20u32 {
        tree.remove(&key(k)).unwrap();
    }

    assert_eq!(tree.height().unwrap(), 2);
    assert_eq!(scan_keys(&tree), (1..=10).collect::<Vec<u32>>());

    for k in 1..=10u32 {
        assert_eq!(tree.get(&key(k)).unwrap(), Some(rid(k)), "get {k}");
    }
    for k in 11..=20u32 {
        assert_eq!(tree.get(&key(k)).unwrap(), None, "get {k}");
    }
}

#[test]
fn test_first_overflow_splits_once() {
    let (cache, tree, _temp) = create_tree(16, 4, 5);

    // Five inserts into a max-4 leaf: exactly one split, sibling sizes 2/3
    for k in 1..=5u32 {
        tree.insert(&key(k), rid(k)).unwrap();
    }
    assert_eq!(tree.height().unwrap(), 2);

    let root_id = tree.root_page_id().unwrap();
    let root_guard = cache.read_page(root_id).unwrap();
    let root = InternalNodeRef::new(root_guard.data(), 4);
    assert_eq!(root.size(), 2);

    let left_guard = cache.read_page(root.child_at(0)).unwrap();
    let right_guard = cache.read_page(root.child_at(1)).unwrap();
    let left = LeafNodeRef::new(left_guard.data(), 4);
    let right = LeafNodeRef::new(right_guard.data(), 4);

    assert_eq!(left.size(), 2);
    assert_eq!(right.size(), 3);
    assert_eq!(left.next_page_id(), right.page_id());
}

#[test]
fn test_remove_absent_key_is_noop() {
    let (_cache, tree, _temp) = create_tree(16, 4, 5);

    for k in [1u32, 2, 3] {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    tree.remove(&key(9)).unwrap();
    tree.remove(&key(2)).unwrap();
    tree.remove(&key(2)).unwrap(); // second remove is silent

    assert_eq!(scan_keys(&tree), vec![1, 3]);
}

#[test]
fn test_remove_everything_leaves_empty_tree() {
    let (_cache, tree, _temp) = create_tree(64, 4, 5);

    for k in 1..=50u32 {
        tree.insert(&key(k), rid(k)).unwrap();
    }
    for k in 1..=50u32 {
        tree.remove(&key(k)).unwrap();
    }

    assert!(tree.is_empty().unwrap());
    assert_eq!(tree.root_page_id().unwrap(), INVALID_PAGE_ID);
    assert!(tree.begin().unwrap() == tree.end().unwrap());

    // The empty tree is a valid steady state; inserts start a fresh root
    assert!(tree.insert(&key(7), rid(7)).unwrap());
    assert_eq!(tree.get(&key(7)).unwrap(), Some(rid(7)));
}

#[test]
fn test_reverse_insert() {
    let (_cache, tree, _temp) = create_tree(64, 4, 5);

    for k in (1..=100u32).rev() {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    assert_eq!(scan_keys(&tree), (1..=100).collect::<Vec<u32>>());
}

#[test]
fn test_random_insert_remove() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    let (_cache, tree, _temp) = create_tree(128, 4, 5);

    let mut keys: Vec<u32> = (0..500).collect();
    keys.shuffle(&mut thread_rng());

    for &k in &keys {
        assert!(tree.insert(&key(k), rid(k)).unwrap());
    }
    for &k in &keys {
        assert_eq!(tree.get(&key(k)).unwrap(), Some(rid(k)), "get {k}");
    }

    // Remove a random half and verify the partition
    let (removed, kept) = keys.split_at(250);
    for &k in removed {
        tree.remove(&key(k)).unwrap();
    }
    for &k in removed {
        assert_eq!(tree.get(&key(k)).unwrap(), None, "removed {k}");
    }
    for &k in kept {
        assert_eq!(tree.get(&key(k)).unwrap(), Some(rid(k)), "kept {k}");
    }

    let mut expected: Vec<u32> = kept.to_vec();
    expected.sort_unstable();
    assert_eq!(scan_keys(&tree), expected);
}

#[test]
fn test_begin_at_positions_at_lower_bound() {
    let (_cache, tree, _temp) = create_tree(64, 4, 5);

    for k in (10..=100u32).step_by(10) {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    // Exact hit
    let from_50: Vec<u32> = tree
        .begin_at(&key(50))
        .unwrap()
        .map(|e| u32::from_le_bytes(e.unwrap().0[..4].try_into().unwrap()))
        .collect();
    assert_eq!(from_50, vec![50, 60, 70, 80, 90, 100]);

    // Between keys: positions at the next larger one
    let from_55: Vec<u32> = tree
        .begin_at(&key(55))
        .unwrap()
        .map(|e| u32::from_le_bytes(e.unwrap().0[..4].try_into().unwrap()))
        .collect();
    assert_eq!(from_55, vec![60, 70, 80, 90, 100]);

    // Past the last key: an exhausted iterator
    let mut past = tree.begin_at(&key(500)).unwrap();
    assert!(past.next().is_none());
}

#[test]
fn test_iterator_stops_at_end() {
    let (_cache, tree, _temp) = create_tree(16, 4, 5);

    for k in [1u32, 2, 3] {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    let mut iter = tree.begin().unwrap();
    assert!(!iter.is_end());
    for _ in 0..3 {
        assert!(iter.next().is_some());
    }
    assert!(iter.next().is_none());
    assert!(iter.is_end());
    assert!(iter == tree.end().unwrap());
}

#[test]
fn test_values_survive_structural_changes() {
    let (_cache, tree, _temp) = create_tree(128, 4, 5);

    // Interleave inserts and removes so splits and merges both run, then
    // check that untouched mappings are intact.
    for k in 0..200u32 {
        tree.insert(&key(k), rid(k)).unwrap();
    }
    for k in (0..200u32).step_by(2) {
        tree.remove(&key(k)).unwrap();
    }
    for k in 200..300u32 {
        tree.insert(&key(k), rid(k)).unwrap();
    }

    for k in (1..200u32).step_by(2) {
        assert_eq!(tree.get(&key(k)).unwrap(), Some(rid(k)), "odd {k}");
    }
    for k in (0..200u32).step_by(2) {
        assert_eq!(tree.get(&key(k)).unwrap(), None, "even {k}");
    }
    for k in 200..300u32 {
        assert_eq!(tree.get(&key(k)).unwrap(), Some(rid(k)), "late {k}");
    }
}

#[test]
fn test_persistence_across_reopen() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    let header_page_id = {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let cache = Arc::new(PageCache::new(64, 2, disk_manager));
        let tree = BPlusTree::new(
            Arc::clone(&cache),
            Arc::new(IntegerComparator),
            4,
            4,
            5,
        )
        .unwrap();

        for k in 0..50u32 {
            tree.insert(&key(k), rid(k)).unwrap();
        }
        cache.flush_all_pages().unwrap();
        tree.header_page_id()
    };

    let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
    let cache = Arc::new(PageCache::new(64, 2, disk_manager));
    let tree = BPlusTree::open(
        header_page_id,
        Arc::clone(&cache),
        Arc::new(IntegerComparator),
        4,
        4,
        5,
    );

    for k in 0..50u32 {
        assert_eq!(tree.get(&key(k)).unwrap(), Some(rid(k)), "reloaded {k}");
    }
    assert_eq!(scan_keys(&tree), (0..50).collect::<Vec<u32>>());
}
