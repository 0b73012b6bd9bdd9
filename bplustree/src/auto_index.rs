//! Auto-index: a tree that assigns increasing integer keys on insert.
//!
//! Keys come from an atomic counter, so no two callers ever receive the same
//! key. The tree runs in append mode since keys arrive nearly in order.
//!
//! # Invariants
//!
//! - Assigned keys form the range `start..next_key`
//! - A key is assigned even if its insert fails; it is never reused
//! - `next_key` never wraps, so the largest key handed out is `u64::MAX - 1`

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::btree::{BPlusTree, Cursor, Iter, TreeError};
use crate::config::TreeConfig;
use crate::memory::MemoryPool;

/// A tree keyed by automatically assigned `u64` keys.
pub struct AutoIndex<V> {
    tree: BPlusTree<u64, V>,
    /// First key this index hands out.
    start: u64,
    /// Next key to hand out.
    next_key: AtomicU64,
}

impl<V> AutoIndex<V> {
    pub const DEFAULT_START: u64 = 1;

    /// Create an empty index whose first key is 1.
    pub fn new(pool: Arc<dyn MemoryPool>) -> Result<Self, TreeError> {
        Self::with_start(pool, Self::DEFAULT_START)
    }

    /// Create an empty index whose first key is `start`.
    pub fn with_start(pool: Arc<dyn MemoryPool>, start: u64) -> Result<Self, TreeError> {
        Self::with_config(pool, TreeConfig::default(), start)
    }

    /// Create an empty index with an explicit tree shape. Append mode is always on.
    pub fn with_config(
        pool: Arc<dyn MemoryPool>,
        config: TreeConfig,
        start: u64,
    ) -> Result<Self, TreeError> {
        let tree = BPlusTree::new(config.with_append_mode(true), pool)?;
        Ok(Self {
            tree,
            start,
            next_key: AtomicU64::new(start),
        })
    }

    /// Insert `value` under the next key.
    ///
    /// # Errors
    /// - `OutOfMemory` if the tree cannot grow. The key stays consumed.
    /// - `KeysExhausted` if no key is left to assign
    pub fn insert(&self, value: V) -> Result<u64, TreeError> {
        let key = self.reserve_keys(1).ok_or(TreeError::KeysExhausted)?;
        self.tree.insert(key, value)?;
        Ok(key)
    }

    /// Insert `values` under consecutive keys, in order.
    ///
    /// The whole key range is taken up front with one counter bump, so a
    /// concurrent caller never interleaves keys with this batch.
    ///
    /// # Errors
    /// Stops at the first failed insert. Entries inserted before it stay in
    /// the tree; the rest of the range stays consumed. If the key space cannot
    /// hold the whole batch, nothing is inserted and no key is consumed.
    pub fn insert_batch(&self, values: Vec<V>) -> Result<Range<u64>, BatchInsertError> {
        let count = values.len() as u64;
        let Some(first) = self.reserve_keys(count) else {
            let next = self.next_key.load(Ordering::Relaxed);
            tracing::warn!(count, next, "batch does not fit in the remaining keys");
            return Err(BatchInsertError {
                applied: 0,
                failed_key: next,
                source: TreeError::KeysExhausted,
            });
        };
        let keys = first..first + count;

        for (key, (applied, value)) in keys.clone().zip(values.into_iter().enumerate()) {
            if let Err(source) = self.tree.insert(key, value) {
                tracing::warn!(applied, failed_key = key, %source, "batch insert stopped early");
                return Err(BatchInsertError {
                    applied,
                    failed_key: key,
                    source,
                });
            }
        }
        Ok(keys)
    }

    /// Take `count` consecutive keys and return the first.
    ///
    /// Returns `None`, taking nothing, if the counter would wrap.
    fn reserve_keys(&self, count: u64) -> Option<u64> {
        self.next_key
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |next| next.checked_add(count))
            .ok()
    }

    /// Smallest assigned key, if any key was assigned.
    #[must_use]
    pub fn min_key(&self) -> Option<u64> {
        (self.next_key.load(Ordering::Relaxed) > self.start).then_some(self.start)
    }

    /// Largest assigned key, if any key was assigned.
    #[must_use]
    pub fn max_key(&self) -> Option<u64> {
        let next = self.next_key.load(Ordering::Relaxed);
        (next > self.start).then(|| next - 1)
    }

    /// Value stored under `key`.
    ///
    /// # Errors
    /// Returns `NotFound` if nothing is stored under the key.
    pub fn get(&self, key: u64) -> Result<V, TreeError>
    where
        V: Clone,
    {
        self.tree.get(&key).ok_or(TreeError::NotFound)
    }

    #[must_use]
    pub fn search(&self, key: u64) -> Cursor<'_, u64, V> {
        self.tree.search(&key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    #[must_use]
    pub fn iter(&self) -> Iter<'_, u64, V>
    where
        V: Clone,
    {
        self.tree.iter()
    }

    /// The underlying tree.
    #[must_use]
    pub const fn tree(&self) -> &BPlusTree<u64, V> {
        &self.tree
    }
}

/// Error returned when a batch insert stops early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInsertError {
    /// Values inserted before the failure.
    pub applied: usize,
    /// Key whose insert failed.
    pub failed_key: u64,
    pub source: TreeError,
}

impl std::fmt::Display for BatchInsertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "batch insert failed at key {} after {} values: {}",
            self.failed_key, self.applied, self.source
        )
    }
}

impl std::error::Error for BatchInsertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
