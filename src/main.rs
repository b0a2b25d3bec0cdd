use std::sync::Arc;

use oxbow::buffer::PageCache;
use oxbow::index::{BPlusTree, IntegerComparator};
use oxbow::storage::disk::DiskManager;
use oxbow::storage::page::TupleMeta;
use oxbow::storage::TableHeap;

fn main() {
    println!("Oxbow - a disk-oriented storage kernel in Rust");
    println!("==============================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to create disk manager"));
    let cache = Arc::new(PageCache::new(64, 2, disk_manager));
    println!("Created page cache with 64 frames (LRU-2 replacement)");

    // A heap for the tuples and a B+tree over 4-byte integer keys
    let heap = TableHeap::new(Arc::clone(&cache)).expect("failed to create table heap");
    let tree = BPlusTree::new(Arc::clone(&cache), Arc::new(IntegerComparator), 4, 64, 64)
        .expect("failed to create index");

    let rows = [
        (10u32, "alice"),
        (30u32, "carol"),
        (20u32, "bob"),
        (40u32, "dave"),
    ];

    for (key, name) in rows {
        let rid = heap
            .insert_tuple(TupleMeta::new(0, false), name.as_bytes())
            .expect("failed to insert tuple");
        tree.insert(&key.to_le_bytes(), rid)
            .expect("failed to insert key");
        println!("Inserted key {key} -> {rid} ({name})");
    }

    println!("\nIndex scan in key order:");
    for entry in tree.begin().expect("failed to open iterator") {
        let (key, rid) = entry.expect("scan failed");
        let (_, payload) = heap.get_tuple(rid).expect("failed to fetch tuple");
        println!(
            "  key {} -> {}",
            u32::from_le_bytes(key[..4].try_into().unwrap()),
            String::from_utf8_lossy(&payload)
        );
    }

    let probe = 20u32;
    match tree.get(&probe.to_le_bytes()).expect("lookup failed") {
        Some(rid) => println!("\nPoint lookup key {probe}: found at {rid}"),
        None => println!("\nPoint lookup key {probe}: not found"),
    }

    tree.remove(&probe.to_le_bytes()).expect("remove failed");
    println!(
        "After remove, key {probe} present: {}",
        tree.get(&probe.to_le_bytes()).expect("lookup failed").is_some()
    );

    cache.flush_all_pages().expect("flush failed");
    println!("\nFlushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
