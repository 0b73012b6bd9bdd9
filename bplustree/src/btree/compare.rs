//! Key ordering used by the tree.

use std::cmp::Ordering;

/// Total order over keys.
///
/// Shared by every thread operating on a tree, so it must be `Send + Sync`.
/// Any `Fn(&K, &K) -> Ordering` closure that is `Send + Sync` qualifies.
pub trait Comparator<K: ?Sized>: Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// The key type's own `Ord`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NaturalOrder;

impl<K: Ord + ?Sized> Comparator<K> for NaturalOrder {
    fn compare(&self, a: &K, b: &K) -> Ordering {
        a.cmp(b)
    }
}

impl<K: ?Sized, F> Comparator<K> for F
where
    F: Fn(&K, &K) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &K, b: &K) -> Ordering {
        self(a, b)
    }
}
