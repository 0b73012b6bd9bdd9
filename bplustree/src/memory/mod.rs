//! Memory accounting for tree nodes.
//!
//! - `pool`: shared pool provider and RAII leases
//! - `allocator`: typed node allocator derived from a pool

pub mod allocator;
pub mod pool;

pub use allocator::{NodeAllocator, NodeReservation};
pub use pool::{BoundedPool, Lease, MemoryPool, SystemPool, lease};
