//! Typed node allocator derived from a shared memory pool.
//!
//! Every node leases its storage from the pool when it is created and keeps
//! the lease until the tree is dropped. Node vectors are pre-sized to the
//! configured capacity plus one overflow slot, so a lease covers the node for
//! its whole life.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::btree::node::{InnerNode, LeafNode};
use crate::config::TreeConfig;
use crate::memory::pool::{Lease, MemoryPool, lease};

/// Leases node storage for one tree.
///
/// # Invariants
/// - `leaf_bytes` and `inner_bytes` are fixed at construction
pub struct NodeAllocator<K, V> {
    pool: Arc<dyn MemoryPool>,
    /// Bytes charged per leaf (`leaf_slots + 1` entries).
    leaf_bytes: usize,
    /// Bytes charged per inner node (`inner_slots + 1` children).
    inner_bytes: usize,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> NodeAllocator<K, V> {
    /// Derive a typed allocator from `pool` for trees shaped by `config`.
    #[must_use]
    pub fn new(pool: Arc<dyn MemoryPool>, config: &TreeConfig) -> Self {
        Self {
            pool,
            leaf_bytes: Self::leaf_bytes_for(config),
            inner_bytes: Self::inner_bytes_for(config),
            _marker: PhantomData,
        }
    }

    /// Bytes a leaf costs under `config`.
    #[must_use]
    pub const fn leaf_bytes_for(config: &TreeConfig) -> usize {
        LeafNode::<K, V>::footprint(config.leaf_slots() + 1)
    }

    /// Bytes an inner node costs under `config`.
    #[must_use]
    pub const fn inner_bytes_for(config: &TreeConfig) -> usize {
        InnerNode::<K, V>::footprint(config.inner_slots() + 1)
    }

    #[must_use]
    pub const fn leaf_bytes(&self) -> usize {
        self.leaf_bytes
    }

    #[must_use]
    pub const fn inner_bytes(&self) -> usize {
        self.inner_bytes
    }

    /// The pool this allocator draws from.
    #[must_use]
    pub fn pool(&self) -> &Arc<dyn MemoryPool> {
        &self.pool
    }

    /// Lease storage for one leaf.
    #[must_use]
    pub fn lease_leaf(&self) -> Option<Lease> {
        lease(&self.pool, self.leaf_bytes)
    }

    /// Lease storage for one inner node.
    #[must_use]
    pub fn lease_inner(&self) -> Option<Lease> {
        lease(&self.pool, self.inner_bytes)
    }

    /// Lease every node a split will need before it starts.
    ///
    /// # Returns
    /// - `Some(NodeReservation)` holding `leaves` leaf leases and `inners` inner leases
    /// - `None` if the pool ran dry; leases taken so far go back to the pool
    #[must_use]
    pub fn reserve(&self, leaves: usize, inners: usize) -> Option<NodeReservation> {
        let mut reservation = NodeReservation {
            leaves: Vec::with_capacity(leaves),
            inners: Vec::with_capacity(inners),
        };
        for _ in 0..leaves {
            reservation.leaves.push(self.lease_leaf()?);
        }
        for _ in 0..inners {
            reservation.inners.push(self.lease_inner()?);
        }
        Some(reservation)
    }
}

/// Leases taken ahead of a split.
///
/// Unused leases are returned to the pool when the reservation is dropped.
#[derive(Debug)]
pub struct NodeReservation {
    leaves: Vec<Lease>,
    inners: Vec<Lease>,
}

impl NodeReservation {
    /// Take a leaf lease.
    ///
    /// # Panics
    /// Panics if the reservation was sized for fewer leaves than requested.
    pub fn take_leaf(&mut self) -> Lease {
        self.leaves
            .pop()
            .unwrap_or_else(|| unreachable!("split reservation has no leaf lease left"))
    }

    /// Take an inner node lease.
    ///
    /// # Panics
    /// Panics if the reservation was sized for fewer inner nodes than requested.
    pub fn take_inner(&mut self) -> Lease {
        self.inners
            .pop()
            .unwrap_or_else(|| unreachable!("split reservation has no inner lease left"))
    }
}
