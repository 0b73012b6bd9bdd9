//! B+-tree node types.
//!
//! The tree uses two node kinds:
//! - Inner nodes: separator keys, child references and one subtree count per child
//! - Leaf nodes: key-value pairs, doubly-linked for ordered iteration
//!
//! Every node lives in a [`NodeCell`] that carries the header shared by both
//! kinds: the latch, a non-owning parent link and the pool lease backing it.

use std::cmp::Ordering;
use std::sync::{Arc, Weak};

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};

use crate::btree::compare::Comparator;
use crate::memory::Lease;

/// Owning reference to a node. Ownership flows from the root downwards.
pub type NodeRef<K, V> = Arc<NodeCell<K, V>>;

/// Non-owning reference used for parent and sibling links.
pub type NodeLink<K, V> = Weak<NodeCell<K, V>>;

/// Shared latch guard that keeps the node alive on its own.
pub type ReadGuard<K, V> = ArcRwLockReadGuard<RawRwLock, Node<K, V>>;

/// Exclusive latch guard that keeps the node alive on its own.
pub type WriteGuard<K, V> = ArcRwLockWriteGuard<RawRwLock, Node<K, V>>;

/// Header and latch around a node.
pub struct NodeCell<K, V> {
    /// Empty for the root.
    parent: Mutex<NodeLink<K, V>>,
    latch: Arc<RwLock<Node<K, V>>>,
    _lease: Lease,
}

impl<K, V> NodeCell<K, V> {
    /// Wrap a node, charging it to `lease`.
    pub fn new(node: Node<K, V>, lease: Lease) -> NodeRef<K, V> {
        Arc::new(Self {
            parent: Mutex::new(Weak::new()),
            latch: Arc::new(RwLock::new(node)),
            _lease: lease,
        })
    }

    /// Acquire the latch in shared mode.
    pub fn read(&self) -> ReadGuard<K, V> {
        self.latch.read_arc()
    }

    /// Acquire the latch in exclusive mode.
    pub fn write(&self) -> WriteGuard<K, V> {
        self.latch.write_arc()
    }

    /// Current parent, if any.
    pub fn parent(&self) -> Option<NodeRef<K, V>> {
        self.parent.lock().upgrade()
    }

    /// Point the parent link at `parent`.
    pub fn set_parent(&self, parent: &NodeRef<K, V>) {
        *self.parent.lock() = Arc::downgrade(parent);
    }

    #[cfg(test)]
    pub fn latch_is_free(&self) -> bool {
        !self.latch.is_locked()
    }
}

/// A tree node, tagged by kind.
pub enum Node<K, V> {
    Leaf(LeafNode<K, V>),
    Inner(InnerNode<K, V>),
}

impl<K, V> Node<K, V> {
    #[must_use]
    pub const fn as_leaf(&self) -> Option<&LeafNode<K, V>> {
        match self {
            Self::Leaf(leaf) => Some(leaf),
            Self::Inner(_) => None,
        }
    }

    #[must_use]
    pub const fn as_inner(&self) -> Option<&InnerNode<K, V>> {
        match self {
            Self::Inner(inner) => Some(inner),
            Self::Leaf(_) => None,
        }
    }

    /// Number of elements stored under this node.
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        match self {
            Self::Leaf(leaf) => leaf.len(),
            Self::Inner(inner) => inner.total(),
        }
    }

    /// Check whether one more insert below this node cannot split it.
    ///
    /// A leaf is safe while it has a free slot; an inner node is safe while
    /// it can take one more child.
    #[must_use]
    pub fn is_safe_for_insert(&self, leaf_slots: usize, inner_slots: usize) -> bool {
        match self {
            Self::Leaf(leaf) => leaf.len() < leaf_slots,
            Self::Inner(inner) => inner.children.len() < inner_slots,
        }
    }
}

/// Choose how many elements stay in the left node when `len` elements overflow.
///
/// The element that caused the overflow sits at `inserted_at`. With
/// `right_biased` set and the overflow at the very end, the left node keeps
/// everything but the new element, which suits strictly increasing keys.
#[must_use]
pub const fn split_point(len: usize, inserted_at: usize, right_biased: bool) -> usize {
    if right_biased && inserted_at + 1 == len {
        len - 1
    } else {
        len.div_ceil(2)
    }
}

/// A leaf node.
///
/// Stores key-value pairs and links to the neighbouring leaves.
pub struct LeafNode<K, V> {
    /// Entries in sorted order by key.
    pub entries: Vec<(K, V)>,
    pub prev: NodeLink<K, V>,
    pub next: NodeLink<K, V>,
}

impl<K, V> LeafNode<K, V> {
    /// Create an empty leaf able to hold `capacity` entries without growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            prev: Weak::new(),
            next: Weak::new(),
        }
    }

    /// Approximate bytes taken by a leaf holding up to `capacity` entries.
    #[must_use]
    pub const fn footprint(capacity: usize) -> usize {
        size_of::<NodeCell<K, V>>() + size_of::<RwLock<Node<K, V>>>() + capacity * size_of::<(K, V)>()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the slot holding `key`, or the slot where it would be inserted.
    pub fn find<C: Comparator<K>>(&self, key: &K, comparator: &C) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|(probe, _)| comparator.compare(probe, key))
    }

    /// Move the entries from `at` onwards into a new right sibling.
    ///
    /// Sibling links of the new node are left empty; the caller relinks them.
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> Self {
        let mut right = Self::with_capacity(self.entries.capacity());
        right.entries.extend(self.entries.drain(at..));
        right
    }
}

/// An inner node.
///
/// Stores N separator keys, N+1 children and one subtree count per child.
/// `children[i]` holds keys < `keys[i]`, `children[i+1]` holds keys >= `keys[i]`.
pub struct InnerNode<K, V> {
    pub keys: Vec<K>,
    pub children: Vec<NodeRef<K, V>>,
    /// `counts[i]` is the number of elements under `children[i]`.
    pub counts: Vec<usize>,
}

impl<K, V> InnerNode<K, V> {
    /// Create an inner node with two children, used when the root splits.
    #[must_use]
    pub fn with_children(
        capacity: usize,
        left: NodeRef<K, V>,
        left_count: usize,
        key: K,
        right: NodeRef<K, V>,
        right_count: usize,
    ) -> Self {
        let mut node = Self::with_capacity(capacity);
        node.keys.push(key);
        node.children.push(left);
        node.children.push(right);
        node.counts.push(left_count);
        node.counts.push(right_count);
        node
    }

    /// Create an empty inner node able to hold `capacity` children without growing.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity.saturating_sub(1)),
            children: Vec::with_capacity(capacity),
            counts: Vec::with_capacity(capacity),
        }
    }

    /// Approximate bytes taken by an inner node holding up to `capacity` children.
    #[must_use]
    pub const fn footprint(capacity: usize) -> usize {
        size_of::<NodeCell<K, V>>()
            + size_of::<RwLock<Node<K, V>>>()
            + capacity * (size_of::<K>() + size_of::<NodeRef<K, V>>() + size_of::<usize>())
    }

    /// Number of elements under this node.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    /// Find the child whose key range contains `key`.
    ///
    /// With `append_hint` set the last separator is checked first, which is
    /// the common case for strictly increasing keys.
    pub fn child_slot<C: Comparator<K>>(&self, key: &K, comparator: &C, append_hint: bool) -> usize {
        if append_hint
            && self
                .keys
                .last()
                .is_some_and(|last| comparator.compare(last, key) != Ordering::Greater)
        {
            return self.keys.len();
        }
        self.keys
            .partition_point(|separator| comparator.compare(separator, key) != Ordering::Greater)
    }

    /// Find the child holding the element at `position`.
    ///
    /// Returns the child slot and the position relative to that child.
    #[must_use]
    pub fn locate(&self, mut position: usize) -> Option<(usize, usize)> {
        for (slot, &count) in self.counts.iter().enumerate() {
            if position < count {
                return Some((slot, position));
            }
            position -= count;
        }
        None
    }

    /// Number of elements in the children left of `slot`.
    #[must_use]
    pub fn count_before(&self, slot: usize) -> usize {
        self.counts[..slot].iter().sum()
    }

    /// Record that `children[slot]` split into itself and `right`.
    pub fn insert_split_child(
        &mut self,
        slot: usize,
        separator: K,
        right: NodeRef<K, V>,
        left_count: usize,
        right_count: usize,
    ) {
        self.keys.insert(slot, separator);
        self.children.insert(slot + 1, right);
        self.counts[slot] = left_count;
        self.counts.insert(slot + 1, right_count);
    }

    /// Keep the first `at` children and move the rest into a new right sibling.
    ///
    /// Returns the separator promoted to the parent and the new node.
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> (K, Self) {
        let capacity = self.children.capacity();
        let mut right = Self::with_capacity(capacity);
        right.keys.extend(self.keys.drain(at..));
        right.children.extend(self.children.drain(at..));
        right.counts.extend(self.counts.drain(at..));
        let separator = self
            .keys
            .pop()
            .unwrap_or_else(|| unreachable!("a split inner node keeps at least one separator"));
        (separator, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::compare::NaturalOrder;
    use crate::memory::{MemoryPool, SystemPool, lease};

    fn leaf_with(keys: &[u64]) -> LeafNode<u64, String> {
        let mut leaf = LeafNode::with_capacity(keys.len() + 1);
        leaf.entries
            .extend(keys.iter().map(|&k| (k, format!("v{k}"))));
        leaf
    }

    fn empty_leaf_cell() -> NodeRef<u64, String> {
        let pool: Arc<dyn MemoryPool> = SystemPool::new();
        NodeCell::new(
            Node::Leaf(LeafNode::with_capacity(4)),
            lease(&pool, 64).expect("system pool never refuses"),
        )
    }

    fn inner_with(keys: &[u64], counts: &[usize]) -> InnerNode<u64, String> {
        let mut inner = InnerNode::with_capacity(counts.len() + 1);
        inner.keys.extend_from_slice(keys);
        for &count in counts {
            inner.children.push(empty_leaf_cell());
            inner.counts.push(count);
        }
        inner
    }

    #[test]
    fn test_split_point() {
        // Median split
        assert_eq!(split_point(7, 3, false), 4);
        assert_eq!(split_point(4, 1, false), 2);

        // Right bias only applies when the overflow is at the end
        assert_eq!(split_point(7, 6, true), 6);
        assert_eq!(split_point(7, 2, true), 4);
        assert_eq!(split_point(7, 6, false), 4);
    }

    #[test]
    fn test_leaf_find() {
        let leaf = leaf_with(&[10, 20, 30]);

        assert_eq!(leaf.find(&20, &NaturalOrder), Ok(1));
        assert_eq!(leaf.find(&5, &NaturalOrder), Err(0));
        assert_eq!(leaf.find(&25, &NaturalOrder), Err(2));
        assert_eq!(leaf.find(&35, &NaturalOrder), Err(3));
    }

    #[test]
    fn test_leaf_split_off() {
        let mut leaf = leaf_with(&[1, 2, 3, 4, 5, 6, 7]);

        let right = leaf.split_off(4);

        assert_eq!(leaf.len(), 4);
        assert_eq!(right.len(), 3);
        assert_eq!(right.entries[0].0, 5);
        // Capacity carries over so the right leaf never reallocates either
        assert!(right.entries.capacity() >= 7);
    }

    #[test]
    fn test_inner_child_slot() {
        let inner = inner_with(&[10, 20, 30], &[1, 1, 1, 1]);

        // Key less than first separator -> first child
        assert_eq!(inner.child_slot(&5, &NaturalOrder, false), 0);
        // Key equal to a separator -> child to its right
        assert_eq!(inner.child_slot(&10, &NaturalOrder, false), 1);
        assert_eq!(inner.child_slot(&15, &NaturalOrder, false), 1);
        assert_eq!(inner.child_slot(&35, &NaturalOrder, false), 3);

        // The append hint agrees with the full search
        for key in [5, 10, 15, 20, 30, 35] {
            assert_eq!(
                inner.child_slot(&key, &NaturalOrder, true),
                inner.child_slot(&key, &NaturalOrder, false),
                "mismatch at {key}"
            );
        }
    }

    #[test]
    fn test_inner_locate() {
        let inner = inner_with(&[10, 20], &[3, 0, 4]);

        assert_eq!(inner.total(), 7);
        assert_eq!(inner.locate(0), Some((0, 0)));
        assert_eq!(inner.locate(2), Some((0, 2)));
        // Empty children are skipped
        assert_eq!(inner.locate(3), Some((2, 0)));
        assert_eq!(inner.locate(6), Some((2, 3)));
        assert_eq!(inner.locate(7), None);
        assert_eq!(inner.count_before(2), 3);
    }

    #[test]
    fn test_inner_insert_split_child_and_split_off() {
        let mut inner = inner_with(&[10, 20, 30], &[2, 2, 2, 3]);

        // Child 3 split into (2, 2) around separator 35
        inner.insert_split_child(3, 35, empty_leaf_cell(), 2, 2);
        assert_eq!(inner.keys, vec![10, 20, 30, 35]);
        assert_eq!(inner.counts, vec![2, 2, 2, 2, 2]);
        assert_eq!(inner.children.len(), 5);

        let (separator, right) = inner.split_off(3);

        assert_eq!(separator, 30);
        assert_eq!(inner.keys, vec![10, 20]);
        assert_eq!(inner.children.len(), 3);
        assert_eq!(right.keys, vec![35]);
        assert_eq!(right.children.len(), 2);
        assert_eq!(inner.total() + right.total(), 10);
    }

    #[test]
    fn test_safe_for_insert() {
        let leaf = Node::Leaf(leaf_with(&[1, 2]));
        assert!(leaf.is_safe_for_insert(3, 3));
        assert!(!leaf.is_safe_for_insert(2, 3));

        let inner = Node::Inner(inner_with(&[10], &[1, 1]));
        assert!(inner.is_safe_for_insert(6, 3));
        assert!(!inner.is_safe_for_insert(6, 2));
        assert!(inner.as_leaf().is_none());
        assert_eq!(inner.subtree_len(), 2);
    }

    #[test]
    fn test_parent_link() {
        let parent = empty_leaf_cell();
        let child = empty_leaf_cell();
        assert!(child.parent().is_none());

        child.set_parent(&parent);
        assert!(Arc::ptr_eq(&child.parent().expect("parent set"), &parent));

        // Links never keep the parent alive
        drop(parent);
        assert!(child.parent().is_none());
    }
}
