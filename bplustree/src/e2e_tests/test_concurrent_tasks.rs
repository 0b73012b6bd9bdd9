//! Many named tasks insert disjoint key ranges into one shared tree.

use std::sync::Arc;

use crate::btree::TreeError;
use crate::e2e_tests::helpers::*;
use crate::task::TaskGroup;

const TASKS: u64 = 100;
const KEYS_PER_TASK: u64 = 100;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hundred_tasks_disjoint_ranges() {
    let (tree, pool) = new_shared_tree();

    let mut group = TaskGroup::<TreeError>::new();
    for task in 0..TASKS {
        let tree = Arc::clone(&tree);
        group.spawn(format!("inserter-{task}"), move || {
            for key in task * KEYS_PER_TASK..(task + 1) * KEYS_PER_TASK {
                tree.insert(key, tag(key))?;
            }
            Ok(())
        });
    }
    assert_eq!(group.join_all().await.expect("no task fails"), 100);

    assert_eq!(tree.len(), 10_000);
    tree.check_invariants().expect("valid after concurrent tasks");
    for key in 0..10_000u64 {
        assert_eq!(tree.get(&key), Some(tag(key)), "key {key}");
    }
    for position in 0..10_000 {
        assert_eq!(tree.key_at_position(position), Ok(position as u64));
    }

    drop(tree);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tasks_interleaved_keys_with_rank_readers() {
    let (tree, _pool) = new_shared_tree();

    let mut group = TaskGroup::<TreeError>::new();
    for task in 0..8u64 {
        let tree = Arc::clone(&tree);
        // Task t owns keys congruent to t mod 8, so every leaf sees every task
        group.spawn(format!("striped-{task}"), move || {
            for i in 0..500 {
                let key = i * 8 + task;
                tree.insert(key, tag(key))?;
            }
            Ok(())
        });
    }
    for reader in 0..2 {
        let tree = Arc::clone(&tree);
        group.spawn(format!("ranker-{reader}"), move || {
            for _ in 0..100 {
                let size = tree.len();
                if size > 0 {
                    tree.key_at_position(size - 1)?;
                }
            }
            Ok(())
        });
    }
    assert_eq!(group.join_all().await.expect("no task fails"), 10);

    assert_eq!(tree.len(), 4_000);
    tree.check_invariants().expect("valid after striped inserts");
    assert_eq!(keys_forward(&tree), (0..4_000).collect::<Vec<_>>());
}
