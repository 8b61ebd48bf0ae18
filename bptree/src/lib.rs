// A single-file B+tree index mapping fixed-size keys to fixed-size values.
//
// Life of an operation:
// 1. The tree acquires its index file once for the whole call
// 2. Search descends from the root through internal nodes to a leaf
// 3. Insert writes the leaf back, splitting and promoting upward when full
// 4. The meta record is rewritten if node counts or height changed
// 5. The file is released
//
// Components:
//  - storage: file store and fixed-size record buffers
//  - btree: node codec, meta record, search/insert engine, verifier
//  - config: environment configuration for the command-line tool
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod btree;
pub mod config;
pub mod storage;

pub use btree::{BPlusTree, BPlusTreeError, Key, TreeOptions, Value};
