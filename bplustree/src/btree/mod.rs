//! Concurrent B+-tree with order statistics.
//!
//! # Structure
//!
//! The tree consists of:
//! - Inner nodes: separator keys, child references and per-child subtree counts
//! - Leaf nodes: key-value pairs, doubly-linked for bidirectional iteration
//!
//! # Usage
//!
//! ```
//! use bplustree::btree::{BPlusTree, TreeError};
//! use bplustree::config::TreeConfig;
//! use bplustree::memory::SystemPool;
//!
//! let tree = BPlusTree::new(TreeConfig::default(), SystemPool::new()).unwrap();
//! tree.insert(2, "two").unwrap();
//! tree.insert(1, "one").unwrap();
//!
//! assert_eq!(tree.insert(1, "uno"), Err(TreeError::DuplicateKey));
//! assert_eq!(tree.search(&2).value(), Some("two"));
//! assert_eq!(tree.key_at_position(0), Ok(1));
//! ```

pub mod compare;
pub mod cursor;
pub(crate) mod latch;
pub(crate) mod node;
mod rank;
pub mod tree;

pub use compare::{Comparator, NaturalOrder};
pub use cursor::{Cursor, Iter};
pub use tree::{BPlusTree, TreeError};
