//! Several callers race to insert the same keys; exactly one wins each.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::btree::TreeError;
use crate::e2e_tests::helpers::*;
use crate::task::TaskGroup;

#[test]
fn test_same_key_one_winner() {
    let tree = new_tree();
    let wins = AtomicUsize::new(0);
    let duplicates = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for racer in 0..8u64 {
            let (tree, wins, duplicates) = (&tree, &wins, &duplicates);
            scope.spawn(move || match tree.insert(42, format!("racer-{racer}")) {
                Ok(()) => {
                    wins.fetch_add(1, Ordering::Relaxed);
                }
                Err(TreeError::DuplicateKey) => {
                    duplicates.fetch_add(1, Ordering::Relaxed);
                }
                Err(other) => panic!("unexpected error {other}"),
            });
        }
    });

    assert_eq!(wins.load(Ordering::Relaxed), 1);
    assert_eq!(duplicates.load(Ordering::Relaxed), 7);
    assert_eq!(tree.len(), 1);
    assert!(tree.get(&42).is_some_and(|value| value.starts_with("racer-")));
    tree.check_invariants().expect("losers leave no trace");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_ranges_split_under_contention() {
    let (tree, _pool) = new_shared_tree();
    let wins = Arc::new(AtomicUsize::new(0));

    // Every task tries every key in 0..1000, in a task-specific order
    let mut group = TaskGroup::<TreeError>::new();
    for task in 0..6u64 {
        let tree = Arc::clone(&tree);
        let wins = Arc::clone(&wins);
        group.spawn(format!("racer-{task}"), move || {
            for i in 0..1_000u64 {
                let key = (i * 7 + task * 131) % 1_000;
                match tree.insert(key, tag(key)) {
                    Ok(()) => {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TreeError::DuplicateKey) => {}
                    Err(other) => return Err(other),
                }
            }
            Ok(())
        });
    }
    group.join_all().await.expect("only duplicates are expected");

    assert_eq!(wins.load(Ordering::Relaxed), 1_000);
    assert_eq!(tree.len(), 1_000);
    tree.check_invariants().expect("counts exact despite thousands of duplicates");
    for position in (0..1_000).step_by(37) {
        assert_eq!(tree.key_at_position(position), Ok(position as u64));
    }
}
