//! A bounded pool runs dry while many threads insert.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::btree::{BPlusTree, TreeError};
use crate::e2e_tests::helpers::*;
use crate::memory::{BoundedPool, MemoryPool};

#[test]
fn test_exhaustion_under_concurrency() {
    let pool = BoundedPool::new(48 * 1024);
    let tree = BPlusTree::<u64, String>::new(small_config(), pool.clone()).expect("root fits");
    let inserted = AtomicUsize::new(0);
    let refused = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for worker in 0..4u64 {
            let (tree, inserted, refused) = (&tree, &inserted, &refused);
            scope.spawn(move || {
                for i in 0..2_000 {
                    let key = i * 4 + worker;
                    match tree.insert(key, tag(key)) {
                        Ok(()) => {
                            inserted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(TreeError::OutOfMemory) => {
                            refused.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(other) => panic!("unexpected error {other}"),
                    }
                }
            });
        }
    });

    assert!(refused.load(Ordering::Relaxed) > 0, "the pool must run dry");
    assert_eq!(tree.len(), inserted.load(Ordering::Relaxed));
    assert!(pool.in_use() <= 48 * 1024);
    tree.check_invariants().expect("refused inserts leave no trace");

    // Every accepted key is readable and ranks consistently
    let keys = keys_forward(&tree);
    assert_eq!(keys.len(), tree.len());
    for (position, key) in keys.iter().enumerate().step_by(17) {
        assert_eq!(tree.key_at_position(position), Ok(*key));
        assert_eq!(tree.get(key), Some(tag(*key)));
    }
}
