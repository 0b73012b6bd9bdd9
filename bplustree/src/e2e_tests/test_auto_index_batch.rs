//! Auto-index batches: all succeed, one fails, and concurrent batches.

use crate::auto_index::AutoIndex;
use crate::btree::TreeError;
use crate::e2e_tests::helpers::small_config;
use crate::memory::{BoundedPool, NodeAllocator, SystemPool};

#[test]
fn test_batch_all_succeed() {
    let index = AutoIndex::with_config(SystemPool::new(), small_config(), 1)
        .expect("system pool never refuses");

    let range = index
        .insert_batch((0..1_000u32).collect())
        .expect("unbounded pool");

    assert_eq!(range, 1..1_001);
    assert_eq!(index.len(), 1_000);
    assert_eq!(index.min_key(), Some(1));
    assert_eq!(index.max_key(), Some(1_000));
    index.tree().check_invariants().expect("valid after batch");
}

#[test]
fn test_batch_one_fails_keeps_prefix() {
    let config = small_config();
    let leaf_bytes = NodeAllocator::<u64, u32>::leaf_bytes_for(&config);
    let inner_bytes = NodeAllocator::<u64, u32>::inner_bytes_for(&config);
    // Root leaf plus exactly one split: a second leaf and a new root
    let pool = BoundedPool::new(2 * leaf_bytes + inner_bytes);
    let index = AutoIndex::with_config(pool, config, 1).expect("root fits");

    let error = index
        .insert_batch((0..20u32).collect())
        .expect_err("second split cannot be leased");

    // Append-mode splits keep six entries left and start the right leaf with
    // the seventh, so the second split is needed at the thirteenth value.
    assert_eq!(error.applied, 12);
    assert_eq!(error.failed_key, 13);
    assert_eq!(error.source, TreeError::OutOfMemory);

    assert_eq!(index.len(), 12);
    assert_eq!(index.get(12), Ok(11));
    assert_eq!(index.get(13), Err(TreeError::NotFound));
    // The counter still advanced by the full batch
    assert_eq!(index.max_key(), Some(20));
    assert_eq!(index.insert(99), Err(TreeError::OutOfMemory));
    assert_eq!(index.max_key(), Some(21));
    index.tree().check_invariants().expect("valid after partial batch");
}

#[test]
fn test_concurrent_batches_take_contiguous_ranges() {
    let index = AutoIndex::with_config(SystemPool::new(), small_config(), 1)
        .expect("system pool never refuses");

    let mut ranges = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8u64)
            .map(|batch| {
                let index = &index;
                scope.spawn(move || {
                    let values: Vec<u64> = (0..50).map(|i| batch * 100 + i).collect();
                    index.insert_batch(values).expect("unbounded pool")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("batch thread panicked"))
            .collect::<Vec<_>>()
    });

    ranges.sort_by_key(|range| range.start);
    for (expected_start, range) in (1u64..).step_by(50).zip(&ranges) {
        assert_eq!(range.start, expected_start);
        assert_eq!(range.end - range.start, 50);
    }

    // Within a range the values keep their batch order
    for range in &ranges {
        let first = index.get(range.start).expect("range start present");
        for (offset, key) in range.clone().enumerate() {
            assert_eq!(index.get(key), Ok(first + offset as u64));
        }
    }
    assert_eq!(index.len(), 400);
    index.tree().check_invariants().expect("valid after concurrent batches");
}
