//! Common helpers for end-to-end tests.

use std::sync::Arc;

use crate::btree::BPlusTree;
use crate::memory::{MemoryPool, SystemPool};
pub use crate::testing::{small_config, tag};

/// A tree with the small test shape on an unbounded pool.
pub fn new_tree() -> BPlusTree<u64, String> {
    #[allow(clippy::expect_used)]
    BPlusTree::new(small_config(), SystemPool::new()).expect("system pool never refuses")
}

/// A shared tree plus the pool it draws from, for tasks that need `'static` data.
pub fn new_shared_tree() -> (Arc<BPlusTree<u64, String>>, Arc<dyn MemoryPool>) {
    let pool: Arc<dyn MemoryPool> = SystemPool::new();
    #[allow(clippy::expect_used)]
    let tree = BPlusTree::new(small_config(), Arc::clone(&pool)).expect("system pool never refuses");
    (Arc::new(tree), pool)
}

/// Collect every key by walking the leaf chain forward.
pub fn keys_forward(tree: &BPlusTree<u64, String>) -> Vec<u64> {
    tree.iter().map(|(key, _)| key).collect()
}

/// Collect every key by walking the leaf chain backward.
pub fn keys_backward(tree: &BPlusTree<u64, String>) -> Vec<u64> {
    tree.iter().rev().map(|(key, _)| key).collect()
}
