//! Memory pools that supply storage for tree nodes.
//!
//! A pool is shared by every tree built on it and hands out byte budgets
//! through RAII leases that are returned automatically when dropped.
//!
//! # Design
//!
//! - [`SystemPool`] never refuses an allocation; it only tracks usage
//! - [`BoundedPool`] has a fixed capacity and refuses allocations past it
//! - [`Lease`] returns its bytes to the pool on drop
//! - Thread-safe: accounting uses atomics, no lock is taken
//!
//! # Invariants
//!
//! - `in_use()` equals the sum of the sizes of all live leases
//! - For a bounded pool, `in_use() <= capacity`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A source of memory for tree nodes.
///
/// Implementations must be thread-safe: several trees, and several threads
/// inside one tree, allocate from the same pool concurrently.
pub trait MemoryPool: Send + Sync {
    /// Try to take `bytes` from the pool.
    ///
    /// Returns `false` if the pool cannot supply the block.
    fn allocate(&self, bytes: usize) -> bool;

    /// Return `bytes` previously taken with [`MemoryPool::allocate`].
    fn deallocate(&self, bytes: usize);

    /// Bytes currently handed out.
    fn in_use(&self) -> usize;

    /// Total bytes the pool can hand out, or `None` if unbounded.
    fn capacity(&self) -> Option<usize>;
}

/// Lease `bytes` from `pool`.
///
/// # Returns
/// - `Some(Lease)` if the pool supplied the block
/// - `None` if the pool is exhausted
pub fn lease(pool: &Arc<dyn MemoryPool>, bytes: usize) -> Option<Lease> {
    if !pool.allocate(bytes) {
        tracing::warn!(bytes, in_use = pool.in_use(), "memory pool exhausted");
        return None;
    }
    Some(Lease {
        pool: Arc::clone(pool),
        bytes,
    })
}

/// A block of pool memory owned by one node.
///
/// The block goes back to the pool when the lease is dropped.
pub struct Lease {
    pool: Arc<dyn MemoryPool>,
    bytes: usize,
}

impl Lease {
    /// Size of the leased block in bytes.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.deallocate(self.bytes);
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("bytes", &self.bytes).finish()
    }
}

/// An unbounded pool backed by the system allocator.
#[derive(Debug, Default)]
pub struct SystemPool {
    in_use: AtomicUsize,
}

impl SystemPool {
    /// Create a new system pool, ready to be shared.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl MemoryPool for SystemPool {
    fn allocate(&self, bytes: usize) -> bool {
        self.in_use.fetch_add(bytes, Ordering::Relaxed);
        true
    }

    fn deallocate(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::Relaxed);
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    fn capacity(&self) -> Option<usize> {
        None
    }
}

/// A pool with a fixed byte capacity.
///
/// # Pre-conditions
/// - `capacity` must be > 0 when creating
///
/// # Invariants
/// - `in_use <= capacity`
#[derive(Debug)]
pub struct BoundedPool {
    in_use: AtomicUsize,
    capacity: usize,
}

impl BoundedPool {
    /// Create a new bounded pool holding `capacity` bytes.
    ///
    /// # Panics
    /// Panics if capacity is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "Memory pool capacity must be positive");
        Arc::new(Self {
            in_use: AtomicUsize::new(0),
            capacity,
        })
    }

    /// Bytes still available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity - self.in_use.load(Ordering::Acquire)
    }
}

impl MemoryPool for BoundedPool {
    fn allocate(&self, bytes: usize) -> bool {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.capacity)
            })
            .is_ok()
    }

    fn deallocate(&self, bytes: usize) {
        let previous = self.in_use.fetch_sub(bytes, Ordering::AcqRel);
        // Invariant check: we should never return more than was handed out
        assert!(previous >= bytes, "Memory pool underflow: returning unleased bytes");
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
}
