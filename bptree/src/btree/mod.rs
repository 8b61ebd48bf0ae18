//! Disk-resident B+tree index.
//!
//! # File Layout
//!
//! - Offset 0: meta record (order, sizes, node counts, height, root offset)
//! - Offset `META_SIZE`: reserved region holding the first internal nodes
//! - After the reserved region: the initial root leaf
//! - Everything else (new leaves, internal nodes once the reserved region is
//!   used up) is appended at the end of the file
//!
//! # Usage
//!
//! ```
//! use bptree::btree::{BPlusTree, TreeOptions, key_from_u64};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("index.bpt");
//! let options = TreeOptions { order: 4, ..TreeOptions::default() };
//! let mut tree = BPlusTree::open_with(&path, true, options).unwrap();
//!
//! for k in 1..=4 {
//!     tree.insert(key_from_u64(k), k * 10).unwrap();
//! }
//!
//! assert_eq!(tree.search(&key_from_u64(4)).unwrap(), Some(40));
//! assert_eq!(tree.stats().height, 1);
//! ```

mod check;
mod meta;
mod node;
mod tree;

pub use check::VerifyReport;
pub use meta::{MAX_ORDER, META_SIZE, MIN_ORDER, Meta, MetaError};
pub use node::{
    InternalEntry, InternalNode, KEY_SIZE, Key, LOW_BOUND_KEY, LeafEntry, LeafNode, VALUE_SIZE,
    Value, compare_keys, internal_record_size, key_from_u64, leaf_record_size, make_key,
};
pub use tree::{BPlusTree, BPlusTreeError, DEFAULT_INDEX_SLOTS, DEFAULT_ORDER, TreeOptions, TreeStats};
