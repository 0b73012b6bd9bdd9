//! Retained latches for lock coupling.
//!
//! Insert descends from the root holding exclusive latches. Once it reaches a
//! node that cannot split, nothing above that node can change, so every latch
//! retained so far is released. What remains on the stack when the leaf is
//! reached is exactly the set of nodes a split may touch.
//!
//! # Invariants
//!
//! - Latches are ordered root-first
//! - If the root slot is held, it is the first entry and the root node follows it
//! - Every node latch except the first one guards a node that will split if
//!   its child splits

use parking_lot::RwLockWriteGuard;

use crate::btree::node::{NodeRef, WriteGuard};

/// One retained latch.
pub enum Latch<'t, K, V> {
    /// Exclusive access to the root pointer, needed to install a new root.
    Root(RwLockWriteGuard<'t, NodeRef<K, V>>),
    /// Exclusive access to an inner node, and the child slot the descent took.
    Node {
        cell: NodeRef<K, V>,
        guard: WriteGuard<K, V>,
        slot: usize,
    },
}

/// Latches held by one insert on its way down.
pub struct LatchStack<'t, K, V> {
    held: Vec<Latch<'t, K, V>>,
}

impl<'t, K, V> LatchStack<'t, K, V> {
    #[must_use]
    pub const fn new() -> Self {
        Self { held: Vec::new() }
    }

    pub fn push_root(&mut self, guard: RwLockWriteGuard<'t, NodeRef<K, V>>) {
        debug_assert!(self.held.is_empty(), "root slot must be taken first");
        self.held.push(Latch::Root(guard));
    }

    pub fn push_node(&mut self, cell: NodeRef<K, V>, guard: WriteGuard<K, V>, slot: usize) {
        self.held.push(Latch::Node { cell, guard, slot });
    }

    /// Release every retained latch, top-down.
    pub fn release_all(&mut self) {
        for latch in self.held.drain(..) {
            drop(latch);
        }
    }

    /// Take the deepest retained latch.
    pub fn pop(&mut self) -> Option<Latch<'t, K, V>> {
        self.held.pop()
    }

    /// Check whether the root pointer is still held, i.e. the root will split.
    #[must_use]
    pub fn holds_root(&self) -> bool {
        matches!(self.held.first(), Some(Latch::Root(_)))
    }

    /// Number of retained inner node latches.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.held
            .iter()
            .filter(|latch| matches!(latch, Latch::Node { .. }))
            .count()
    }

    /// Number of inner nodes that split if the leaf below them splits.
    ///
    /// Without the root slot the topmost node is safe and absorbs the split.
    #[must_use]
    pub fn splitting_nodes(&self) -> usize {
        let nodes = self.node_count();
        if self.holds_root() {
            nodes
        } else {
            nodes.saturating_sub(1)
        }
    }
}

impl<K, V> Drop for LatchStack<'_, K, V> {
    fn drop(&mut self) {
        // Vec drops back to front; release top-down like release_all.
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;

    use super::*;
    use crate::btree::node::{LeafNode, Node, NodeCell};
    use crate::memory::{MemoryPool, SystemPool, lease};

    fn cell() -> NodeRef<u64, u64> {
        let pool: Arc<dyn MemoryPool> = SystemPool::new();
        NodeCell::new(
            Node::Leaf(LeafNode::with_capacity(2)),
            lease(&pool, 8).expect("system pool never refuses"),
        )
    }

    #[test]
    fn test_counts_and_release() {
        let root = RwLock::new(cell());
        let a = cell();
        let b = cell();

        let mut stack = LatchStack::new();
        stack.push_root(root.write());
        stack.push_node(a.clone(), a.write(), 0);
        stack.push_node(b.clone(), b.write(), 1);

        assert!(stack.holds_root());
        assert_eq!(stack.node_count(), 2);
        assert_eq!(stack.splitting_nodes(), 2);
        assert!(root.try_read().is_none());

        stack.release_all();
        assert_eq!(stack.node_count(), 0);
        assert!(!stack.holds_root());
        assert!(root.try_read().is_some());
        assert!(a.latch_is_free());
        assert!(b.latch_is_free());
    }

    #[test]
    fn test_topmost_node_absorbs_split() {
        let a = cell();
        let b = cell();

        let mut stack = LatchStack::new();
        stack.push_node(a.clone(), a.write(), 0);
        stack.push_node(b.clone(), b.write(), 0);

        assert!(!stack.holds_root());
        assert_eq!(stack.splitting_nodes(), 1);

        let Some(Latch::Node { cell, slot, .. }) = stack.pop() else {
            panic!("expected a node latch");
        };
        assert!(Arc::ptr_eq(&cell, &b));
        assert_eq!(slot, 0);
        assert!(b.latch_is_free());

        drop(stack);
        assert!(a.latch_is_free());
    }
}
