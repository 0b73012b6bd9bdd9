//! Bidirectional cursor over the leaf chain.
//!
//! A cursor names a (leaf, slot) pair and holds no latch between calls; each
//! accessor latches the leaf shared for the duration of the call. Cursors are
//! not snapshots: an insert that splits the cursor's leaf can move the entry
//! it points at. Iterate a tree only while no insert is running.
//!
//! The end position sits between the last and the first element, so moving
//! forward from the end yields the first element and moving back from the
//! end yields the last.

use std::sync::Arc;

use crate::btree::compare::{Comparator, NaturalOrder};
use crate::btree::node::NodeRef;
use crate::btree::tree::BPlusTree;

/// Position in a tree.
pub struct Cursor<'a, K, V, C = NaturalOrder> {
    tree: &'a BPlusTree<K, V, C>,
    /// `None` at the end position.
    position: Option<(NodeRef<K, V>, usize)>,
}

impl<'a, K: Clone, V, C: Comparator<K>> Cursor<'a, K, V, C> {
    pub(crate) const fn end(tree: &'a BPlusTree<K, V, C>) -> Self {
        Self {
            tree,
            position: None,
        }
    }

    pub(crate) const fn at(tree: &'a BPlusTree<K, V, C>, leaf: NodeRef<K, V>, slot: usize) -> Self {
        Self {
            tree,
            position: Some((leaf, slot)),
        }
    }

    #[must_use]
    pub const fn is_end(&self) -> bool {
        self.position.is_none()
    }

    /// Advance to the next element, or to the end after the last one.
    pub fn move_next(&mut self) {
        let Some((leaf, slot)) = self.position.take() else {
            self.position = self.tree.first_position();
            return;
        };
        let (len, next) = match leaf.read().as_leaf() {
            Some(node) => (node.len(), node.next.upgrade()),
            None => (0, None),
        };
        if slot + 1 < len {
            self.position = Some((leaf, slot + 1));
        } else {
            self.position = next.map(|next| (next, 0));
        }
    }

    /// Step back to the previous element, or to the end before the first one.
    pub fn move_prev(&mut self) {
        let Some((leaf, slot)) = self.position.take() else {
            self.position = self.tree.last_position();
            return;
        };
        if slot > 0 {
            self.position = Some((leaf, slot - 1));
            return;
        }
        let prev = leaf.read().as_leaf().and_then(|node| node.prev.upgrade());
        self.position = prev.and_then(|prev| {
            let last = prev.read().as_leaf().and_then(|node| node.len().checked_sub(1));
            last.map(|last| (prev, last))
        });
    }

    /// Call `f` with the entry under the cursor.
    ///
    /// Returns `None` at the end, or if the entry moved away.
    pub fn with_entry<R>(&self, f: impl FnOnce(&K, &V) -> R) -> Option<R> {
        let (leaf, slot) = self.position.as_ref()?;
        let guard = leaf.read();
        let (key, value) = guard.as_leaf()?.entries.get(*slot)?;
        Some(f(key, value))
    }

    /// Call `f` with the value under the cursor.
    pub fn with_value<R>(&self, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.with_entry(|_, value| f(value))
    }

    #[must_use]
    pub fn key(&self) -> Option<K> {
        self.with_entry(|key, _| key.clone())
    }

    #[must_use]
    pub fn value(&self) -> Option<V>
    where
        V: Clone,
    {
        self.with_entry(|_, value| value.clone())
    }

    #[must_use]
    pub fn entry(&self) -> Option<(K, V)>
    where
        V: Clone,
    {
        self.with_entry(|key, value| (key.clone(), value.clone()))
    }
}

impl<K, V, C> Clone for Cursor<'_, K, V, C> {
    fn clone(&self) -> Self {
        Self {
            tree: self.tree,
            position: self.position.clone(),
        }
    }
}

impl<K, V, C> PartialEq for Cursor<'_, K, V, C> {
    fn eq(&self, other: &Self) -> bool {
        match (&self.position, &other.position) {
            (None, None) => true,
            (Some((a, i)), Some((b, j))) => Arc::ptr_eq(a, b) && i == j,
            _ => false,
        }
    }
}

impl<K, V, C> Eq for Cursor<'_, K, V, C> {}

impl<K, V, C> std::fmt::Debug for Cursor<'_, K, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.position {
            None => f.write_str("Cursor(end)"),
            Some((leaf, slot)) => f
                .debug_struct("Cursor")
                .field("leaf", &Arc::as_ptr(leaf))
                .field("slot", slot)
                .finish(),
        }
    }
}

/// Double-ended iterator over cloned entries, in key order.
pub struct Iter<'a, K, V, C = NaturalOrder> {
    front: Cursor<'a, K, V, C>,
    back: Cursor<'a, K, V, C>,
    finished: bool,
}

impl<K: Clone, V: Clone, C: Comparator<K>> Iterator for Iter<'_, K, V, C> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let Some(entry) = self.front.entry() else {
            self.finished = true;
            return None;
        };
        if self.front == self.back {
            self.finished = true;
        } else {
            self.front.move_next();
            self.finished = self.front.is_end();
        }
        Some(entry)
    }
}

impl<K: Clone, V: Clone, C: Comparator<K>> DoubleEndedIterator for Iter<'_, K, V, C> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let Some(entry) = self.back.entry() else {
            self.finished = true;
            return None;
        };
        if self.front == self.back {
            self.finished = true;
        } else {
            self.back.move_prev();
            self.finished = self.back.is_end();
        }
        Some(entry)
    }
}

impl<K: Clone, V, C: Comparator<K>> BPlusTree<K, V, C> {
    /// Cursor at the smallest element, or the end if the tree is empty.
    #[must_use]
    pub fn begin(&self) -> Cursor<'_, K, V, C> {
        Cursor {
            tree: self,
            position: self.first_position(),
        }
    }

    /// Cursor at the end position.
    #[must_use]
    pub const fn end(&self) -> Cursor<'_, K, V, C> {
        Cursor::end(self)
    }

    /// Cursor at `key`, or the end if the key is not present.
    #[must_use]
    pub fn search(&self, key: &K) -> Cursor<'_, K, V, C> {
        let Some((cell, guard)) = self.find_leaf_shared(key) else {
            return Cursor::end(self);
        };
        let slot = guard
            .as_leaf()
            .and_then(|leaf| leaf.find(key, &self.comparator).ok());
        drop(guard);
        match slot {
            Some(slot) => Cursor::at(self, cell, slot),
            None => Cursor::end(self),
        }
    }

    /// Iterate over cloned entries in key order, from either end.
    #[must_use]
    pub fn iter(&self) -> Iter<'_, K, V, C> {
        let front = self.begin();
        let mut back = self.end();
        back.move_prev();
        let finished = front.is_end() || back.is_end();
        Iter {
            front,
            back,
            finished,
        }
    }

    pub(crate) fn first_position(&self) -> Option<(NodeRef<K, V>, usize)> {
        let (cell, guard) = self.descend_shared(|_| Some(0))?;
        let empty = guard.as_leaf().is_none_or(|leaf| leaf.is_empty());
        drop(guard);
        (!empty).then_some((cell, 0))
    }

    pub(crate) fn last_position(&self) -> Option<(NodeRef<K, V>, usize)> {
        let (cell, guard) = self.descend_shared(|inner| inner.children.len().checked_sub(1))?;
        let last = guard.as_leaf().and_then(|leaf| leaf.len().checked_sub(1));
        drop(guard);
        last.map(|last| (cell, last))
    }
}

impl<'a, K: Clone, V: Clone, C: Comparator<K>> IntoIterator for &'a BPlusTree<K, V, C> {
    type Item = (K, V);
    type IntoIter = Iter<'a, K, V, C>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::SystemPool;
    use crate::testing::{small_config, tag};

    fn tree_with(keys: impl IntoIterator<Item = u64>) -> BPlusTree<u64, String> {
        let tree = BPlusTree::new(small_config(), SystemPool::new()).expect("system pool never refuses");
        for key in keys {
            tree.insert(key, tag(key)).expect("insert");
        }
        tree
    }

    #[test]
    fn test_empty_tree_cursors() {
        let tree = tree_with([]);

        assert!(tree.begin().is_end());
        assert_eq!(tree.begin(), tree.end());
        assert_eq!(tree.iter().next(), None);
        assert_eq!(tree.iter().next_back(), None);

        let mut cursor = tree.end();
        cursor.move_prev();
        assert!(cursor.is_end());
    }

    #[test]
    fn test_search_hit_and_miss() {
        let tree = tree_with((0..100).map(|k| k * 2));

        let hit = tree.search(&40);
        assert_eq!(hit.key(), Some(40));
        assert_eq!(hit.value(), Some(tag(40)));
        assert_eq!(hit.with_value(String::len), Some(tag(40).len()));

        assert!(tree.search(&41).is_end());
        assert_eq!(tree.search(&41), tree.end());
        assert_eq!(tree.search(&40), hit);
    }

    #[test]
    fn test_forward_and_backward_walk_across_leaves() {
        let tree = tree_with(0..50);

        let mut cursor = tree.begin();
        let mut forward = Vec::new();
        while let Some(key) = cursor.key() {
            forward.push(key);
            cursor.move_next();
        }
        assert_eq!(forward, (0..50).collect::<Vec<_>>());
        assert!(cursor.is_end());

        let mut backward = Vec::new();
        cursor.move_prev();
        while let Some(key) = cursor.key() {
            backward.push(key);
            cursor.move_prev();
        }
        assert_eq!(backward, (0..50).rev().collect::<Vec<_>>());
    }

    #[test]
    fn test_end_wraps_to_ends() {
        let tree = tree_with(10..20);

        let mut cursor = tree.end();
        cursor.move_next();
        assert_eq!(cursor.key(), Some(10));

        let mut cursor = tree.end();
        cursor.move_prev();
        assert_eq!(cursor.entry(), Some((19, tag(19))));
    }

    #[test]
    fn test_iter_both_ends_meet() {
        let tree = tree_with(0..31);

        let mut iter = tree.iter();
        let mut seen = Vec::new();
        loop {
            match (iter.next(), iter.next_back()) {
                (Some(front), Some(back)) => {
                    seen.push(front.0);
                    seen.push(back.0);
                }
                (Some(front), None) => seen.push(front.0),
                (None, _) => break,
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..31).collect::<Vec<_>>());
    }

    #[test]
    fn test_iter_reverse_matches_forward() {
        let tree = tree_with((0..200).rev());

        let forward: Vec<(u64, String)> = tree.iter().collect();
        let mut backward: Vec<(u64, String)> = tree.iter().rev().collect();
        backward.reverse();

        assert_eq!(forward.len(), 200);
        assert_eq!(forward, backward);
        assert!(forward.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }

    #[test]
    fn test_single_element() {
        let tree = tree_with([7]);

        assert_eq!(tree.begin(), tree.search(&7));
        assert_eq!((&tree).into_iter().collect::<Vec<_>>(), vec![(7, tag(7))]);
        assert_eq!(tree.iter().rev().count(), 1);
    }
}
