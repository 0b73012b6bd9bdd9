//! Concurrent in-memory B+-tree with lock coupling and rank queries.
//!
//! System components:
//!  - `memory`: pooled node storage, leased per node
//!  - `btree`: the tree engine, cursors and positional lookup
//!  - `auto_index`: sequential-key wrapper over the tree
//!  - `task`: named task group used to drive concurrent workloads
//!  - `config`: tree shape and workload settings

pub mod auto_index;
pub mod btree;
pub mod config;
mod e2e_tests;
pub mod memory;
pub mod task;
#[cfg(test)]
mod testing;

pub use auto_index::{AutoIndex, BatchInsertError};
pub use btree::{BPlusTree, Comparator, Cursor, Iter, NaturalOrder, TreeError};
pub use config::{ConfigError, TreeConfig, WorkloadConfig};
pub use memory::{BoundedPool, MemoryPool, SystemPool};
pub use task::{TaskError, TaskGroup};
