//! Order statistics over the subtree counts.
//!
//! Insert reserves one element in each count on its path before it knows
//! whether the insert will succeed. A successful insert consumes the
//! reservation. A failed one releases its latches and calls
//! [`BPlusTree::repair_counts`], which re-latches the path and recomputes it.
//!
//! Positional queries take the structure gate exclusively, so they never see
//! a reservation in flight.

use std::sync::Arc;

use crate::btree::compare::Comparator;
use crate::btree::node::{Node, WriteGuard};
use crate::btree::tree::{BPlusTree, TreeError};

impl<K: Clone, V, C: Comparator<K>> BPlusTree<K, V, C> {
    /// Return the key at `position` in sorted order, 0-indexed.
    ///
    /// Waits for in-flight inserts to finish and holds new ones off while it
    /// runs, so the answer is exact under concurrent inserts.
    ///
    /// # Errors
    /// Returns `InvalidPosition` if `position >= len()`.
    pub fn key_at_position(&self, position: usize) -> Result<K, TreeError> {
        let _quiesced = self.gate.write();
        let size = self.len();
        let invalid = TreeError::InvalidPosition { position, size };
        if position >= size {
            return Err(invalid);
        }

        let mut remaining = position;
        let (_, guard) = self
            .descend_shared(|inner| {
                let (slot, rest) = inner.locate(remaining)?;
                remaining = rest;
                Some(slot)
            })
            .ok_or(invalid)?;
        guard
            .as_leaf()
            .and_then(|leaf| leaf.entries.get(remaining))
            .map(|(key, _)| key.clone())
            .ok_or(invalid)
    }

    /// Return the 0-indexed position of `key` in sorted order.
    ///
    /// # Errors
    /// Returns `NotFound` if the key is not present.
    pub fn position_of(&self, key: &K) -> Result<usize, TreeError> {
        let _quiesced = self.gate.write();
        let append = self.config.append_mode();

        let mut before = 0;
        let (_, guard) = self
            .descend_shared(|inner| {
                let slot = inner.child_slot(key, &self.comparator, append);
                before += inner.count_before(slot);
                Some(slot)
            })
            .ok_or(TreeError::NotFound)?;
        let slot = guard
            .as_leaf()
            .and_then(|leaf| leaf.find(key, &self.comparator).ok())
            .ok_or(TreeError::NotFound)?;
        Ok(before + slot)
    }

    /// Recompute the subtree counts on the path to `key`.
    ///
    /// Latches the whole path exclusively, top-down, then rewrites each
    /// count on it bottom-up from the child below. Any insert that reserved
    /// a count on the path either finished while holding a latch we waited
    /// for, or failed and will repair the path itself, so running twice is
    /// harmless.
    ///
    /// # Pre-conditions
    /// - The caller holds no latch
    pub(crate) fn repair_counts(&self, key: &K) {
        let append = self.config.append_mode();
        let slot = self.root.read();
        let root = Arc::clone(&slot);
        let mut guard = root.write();
        drop(slot);

        let mut path: Vec<(WriteGuard<K, V>, usize)> = Vec::new();
        loop {
            let (child_slot, child) = match &*guard {
                Node::Leaf(_) => break,
                Node::Inner(inner) => {
                    let child_slot = inner.child_slot(key, &self.comparator, append);
                    (child_slot, Arc::clone(&inner.children[child_slot]))
                }
            };
            let child_guard = child.write();
            path.push((std::mem::replace(&mut guard, child_guard), child_slot));
        }

        let mut count = guard.subtree_len();
        while let Some((mut parent, child_slot)) = path.pop() {
            if let Node::Inner(inner) = &mut *parent {
                inner.counts[child_slot] = count;
                count = inner.total();
            }
        }
        tracing::trace!(size = count, "repaired subtree counts");
    }
}
