//! B+tree node types and their fixed-size record encoding.
//!
//! Internal record layout (`8 + order * 24` bytes):
//! - `n`: 4 bytes, populated entries
//! - reserved: 4 bytes
//! - `order` slots of `key` (16 bytes) + `child` offset (8 bytes)
//!
//! Leaf record layout (`24 + (order - 1) * 24` bytes):
//! - `n`: 4 bytes, populated entries
//! - reserved: 4 bytes
//! - `prev`: 8 bytes (`u64::MAX` if none)
//! - `next`: 8 bytes (`u64::MAX` if none)
//! - `order - 1` slots of `key` (16 bytes) + `value` (8 bytes)
//!
//! Slots past `n` are zeroed on write and ignored on read.

#![allow(clippy::cast_possible_truncation)]

use std::cmp::Ordering;

use crate::storage::{Offset, RecordBuf, RecordError};

/// Size of a key in bytes.
pub const KEY_SIZE: usize = 16;

/// Size of a value in bytes.
pub const VALUE_SIZE: usize = 8;

/// A fixed-size key, ordered bytewise.
pub type Key = [u8; KEY_SIZE];

/// A fixed-size value.
pub type Value = u64;

/// Key stored in slot 0 of a freshly grown root. Slot 0 keys are never
/// compared during descent.
pub const LOW_BOUND_KEY: Key = [0u8; KEY_SIZE];

/// On-disk encoding of a missing sibling link.
const NO_SIBLING: u64 = u64::MAX;

/// Node header: `n` + reserved.
const COUNT_HEADER_SIZE: usize = 8;

/// Leaf header: `n` + reserved + `prev` + `next`.
const LEAF_HEADER_SIZE: usize = COUNT_HEADER_SIZE + 16;

/// Internal slot: key + child offset.
const INTERNAL_ENTRY_SIZE: usize = KEY_SIZE + 8;

/// Leaf slot: key + value.
const LEAF_ENTRY_SIZE: usize = KEY_SIZE + VALUE_SIZE;

/// Encoded size of an internal node for a tree of the given order.
#[must_use]
pub const fn internal_record_size(order: u32) -> usize {
    COUNT_HEADER_SIZE + order as usize * INTERNAL_ENTRY_SIZE
}

/// Encoded size of a leaf node for a tree of the given order.
#[must_use]
pub const fn leaf_record_size(order: u32) -> usize {
    LEAF_HEADER_SIZE + leaf_capacity(order) * LEAF_ENTRY_SIZE
}

/// Entries a leaf can hold.
#[must_use]
pub const fn leaf_capacity(order: u32) -> usize {
    order as usize - 1
}

/// Children an internal node can hold.
#[must_use]
pub const fn internal_capacity(order: u32) -> usize {
    order as usize
}

/// Binary search over a sorted slice by key.
///
/// `Ok(i)` on an exact match, `Err(i)` with the insertion point otherwise.
/// An empty slice reports `Err(0)`.
fn search_by_key<T>(entries: &[T], key: &Key, key_of: impl Fn(&T) -> &Key) -> Result<usize, usize> {
    entries.binary_search_by(|entry| compare_keys(key_of(entry), key))
}

/// An entry of an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalEntry {
    /// Smallest key reachable through `child` (ignored for slot 0).
    pub key: Key,
    pub child: Offset,
}

/// An internal (non-leaf) node.
///
/// Holds up to `order` children. `entries[0]` covers every key below
/// `entries[1].key`; for `i > 0`, `entries[i].child` covers keys from
/// `entries[i].key` up to (excluding) `entries[i + 1].key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub entries: Vec<InternalEntry>,
}

impl InternalNode {
    /// Create a root with two children after the old root split.
    #[must_use]
    pub fn new_root(left_child: Offset, key: Key, right_child: Offset) -> Self {
        Self {
            entries: vec![
                InternalEntry {
                    key: LOW_BOUND_KEY,
                    child: left_child,
                },
                InternalEntry {
                    key,
                    child: right_child,
                },
            ],
        }
    }

    /// Index of the child to follow for `key`: the greatest entry whose key
    /// is `<= key`, with slot 0 acting as the low bound.
    #[must_use]
    pub fn child_index(&self, key: &Key) -> usize {
        if self.entries.len() <= 1 {
            return 0;
        }
        match search_by_key(&self.entries[1..], key, |e| &e.key) {
            Ok(i) => i + 1,
            Err(i) => i,
        }
    }

    /// Insert a separator and the child to its right, keeping keys sorted.
    ///
    /// The entry never lands in slot 0.
    pub fn insert(&mut self, key: Key, child: Offset) {
        let idx = if self.entries.is_empty() {
            0
        } else {
            match search_by_key(&self.entries[1..], &key, |e| &e.key) {
                Ok(i) | Err(i) => i + 1,
            }
        };
        self.entries.insert(idx, InternalEntry { key, child });
    }

    /// Whether the node holds more children than the order allows.
    #[must_use]
    pub fn is_overfull(&self, order: u32) -> bool {
        self.entries.len() > internal_capacity(order)
    }

    /// Split by count. The left half keeps `ceil(len / 2)` entries; the
    /// right half is returned and its first key is the separator to promote.
    #[must_use]
    pub fn split(&mut self) -> Self {
        let mid = self.entries.len().div_ceil(2);
        Self {
            entries: self.entries.split_off(mid),
        }
    }

    /// Serialize into a record sized for `order`.
    #[must_use]
    pub fn encode(&self, order: u32) -> RecordBuf {
        debug_assert!(self.entries.len() <= internal_capacity(order));

        let mut record = RecordBuf::zeroed(internal_record_size(order));
        record.write_u32(0, self.entries.len() as u32);

        let mut offset = COUNT_HEADER_SIZE;
        for entry in &self.entries {
            record.write_bytes(offset, &entry.key);
            record.write_u64(offset + KEY_SIZE, entry.child);
            offset += INTERNAL_ENTRY_SIZE;
        }

        record
    }

    /// Deserialize from a record sized for `order`.
    pub fn decode(bytes: &[u8], order: u32) -> Result<Self, RecordError> {
        let record = RecordBuf::from_bytes(bytes, internal_record_size(order))?;

        let count = record.read_u32(0) as usize;
        let capacity = internal_capacity(order);
        if count > capacity {
            return Err(RecordError::InvalidCount { count, capacity });
        }

        let mut entries = Vec::with_capacity(count + 1);
        let mut offset = COUNT_HEADER_SIZE;
        for _ in 0..count {
            entries.push(InternalEntry {
                key: read_key(&record, offset),
                child: record.read_u64(offset + KEY_SIZE),
            });
            offset += INTERNAL_ENTRY_SIZE;
        }

        Ok(Self { entries })
    }
}

/// A key-value entry in a leaf node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Key,
    pub value: Value,
}

/// A leaf node.
///
/// Stores up to `order - 1` entries and links to sibling leaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Entries in sorted order by key.
    pub entries: Vec<LeafEntry>,
    pub prev: Option<Offset>,
    pub next: Option<Offset>,
}

impl LeafNode {
    /// Create a new empty, unlinked leaf.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Vec::new() is not const-stable
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            prev: None,
            next: None,
        }
    }

    /// Find the index where a key should be inserted (or exists).
    pub fn find_index(&self, key: &Key) -> Result<usize, usize> {
        search_by_key(&self.entries, key, |e| &e.key)
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Value> {
        self.find_index(key).ok().map(|i| self.entries[i].value)
    }

    /// Whether another entry would exceed the leaf capacity.
    #[must_use]
    pub fn is_full(&self, order: u32) -> bool {
        self.entries.len() >= leaf_capacity(order)
    }

    /// Split by count. The left half keeps `ceil(len / 2)` entries and its
    /// links; the returned right half is unlinked.
    #[must_use]
    pub fn split(&mut self) -> Self {
        let mid = self.entries.len().div_ceil(2);
        Self {
            entries: self.entries.split_off(mid),
            prev: None,
            next: None,
        }
    }

    /// Serialize into a record sized for `order`.
    #[must_use]
    pub fn encode(&self, order: u32) -> RecordBuf {
        debug_assert!(self.entries.len() <= leaf_capacity(order));

        let mut record = RecordBuf::zeroed(leaf_record_size(order));
        record.write_u32(0, self.entries.len() as u32);
        record.write_u64(COUNT_HEADER_SIZE, self.prev.unwrap_or(NO_SIBLING));
        record.write_u64(COUNT_HEADER_SIZE + 8, self.next.unwrap_or(NO_SIBLING));

        let mut offset = LEAF_HEADER_SIZE;
        for entry in &self.entries {
            record.write_bytes(offset, &entry.key);
            record.write_u64(offset + KEY_SIZE, entry.value);
            offset += LEAF_ENTRY_SIZE;
        }

        record
    }

    /// Deserialize from a record sized for `order`.
    pub fn decode(bytes: &[u8], order: u32) -> Result<Self, RecordError> {
        let record = RecordBuf::from_bytes(bytes, leaf_record_size(order))?;

        let count = record.read_u32(0) as usize;
        let capacity = leaf_capacity(order);
        if count > capacity {
            return Err(RecordError::InvalidCount { count, capacity });
        }

        let prev = sibling(record.read_u64(COUNT_HEADER_SIZE));
        let next = sibling(record.read_u64(COUNT_HEADER_SIZE + 8));

        // One spare slot so an overflowing insert does not reallocate.
        let mut entries = Vec::with_capacity(count + 1);
        let mut offset = LEAF_HEADER_SIZE;
        for _ in 0..count {
            entries.push(LeafEntry {
                key: read_key(&record, offset),
                value: record.read_u64(offset + KEY_SIZE),
            });
            offset += LEAF_ENTRY_SIZE;
        }

        Ok(Self {
            entries,
            prev,
            next,
        })
    }
}

impl Default for LeafNode {
    fn default() -> Self {
        Self::new()
    }
}

const fn sibling(raw: u64) -> Option<Offset> {
    if raw == NO_SIBLING { None } else { Some(raw) }
}

fn read_key(record: &RecordBuf, offset: usize) -> Key {
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(record.read_bytes(offset, KEY_SIZE));
    key
}

/// Compare two keys.
#[must_use]
pub fn compare_keys(a: &Key, b: &Key) -> Ordering {
    a.cmp(b)
}

/// Build a key from arbitrary bytes, zero-padded or truncated to
/// `KEY_SIZE`.
#[must_use]
pub fn make_key(bytes: &[u8]) -> Key {
    let mut key = [0u8; KEY_SIZE];
    let len = bytes.len().min(KEY_SIZE);
    key[..len].copy_from_slice(&bytes[..len]);
    key
}

/// Build a key from an integer. Big-endian, so key order matches numeric
/// order.
#[must_use]
pub fn key_from_u64(n: u64) -> Key {
    make_key(&n.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_with(keys: &[u64]) -> LeafNode {
        LeafNode {
            entries: keys
                .iter()
                .map(|&k| LeafEntry {
                    key: key_from_u64(k),
                    value: k * 10,
                })
                .collect(),
            prev: None,
            next: None,
        }
    }

    fn internal_with(keys: &[u64]) -> InternalNode {
        InternalNode {
            entries: keys
                .iter()
                .enumerate()
                .map(|(i, &k)| InternalEntry {
                    key: key_from_u64(k),
                    child: 1000 + i as u64,
                })
                .collect(),
        }
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(internal_record_size(4), 8 + 4 * 24);
        assert_eq!(leaf_record_size(4), 24 + 3 * 24);
        assert_eq!(leaf_capacity(4), 3);
        assert_eq!(internal_capacity(4), 4);
    }

    #[test]
    fn test_key_helpers() {
        assert!(key_from_u64(2) < key_from_u64(10));
        assert!(key_from_u64(255) < key_from_u64(256));

        let key = make_key(b"apple");
        assert_eq!(&key[..5], b"apple");
        assert_eq!(&key[5..], &[0u8; KEY_SIZE - 5]);

        let long = make_key(&[7u8; 40]);
        assert_eq!(long, [7u8; KEY_SIZE]);
    }

    #[test]
    fn test_leaf_encode_decode() {
        let mut leaf = leaf_with(&[5, 10, 20]);
        leaf.prev = Some(96);
        leaf.next = None;

        let record = leaf.encode(4);
        assert_eq!(record.as_bytes().len(), leaf_record_size(4));

        let restored = LeafNode::decode(record.as_bytes(), 4).expect("should parse");
        assert_eq!(restored, leaf);
    }

    #[test]
    fn test_internal_encode_decode() {
        let node = internal_with(&[0, 10, 20]);

        let record = node.encode(4);
        assert_eq!(record.as_bytes().len(), internal_record_size(4));

        let restored = InternalNode::decode(record.as_bytes(), 4).expect("should parse");
        assert_eq!(restored, node);
    }

    #[test]
    fn test_decode_truncated() {
        let record = leaf_with(&[1]).encode(4);
        let bytes = &record.as_bytes()[..10];

        assert_eq!(
            LeafNode::decode(bytes, 4),
            Err(RecordError::Truncated {
                expected: leaf_record_size(4),
                actual: 10
            })
        );
    }

    #[test]
    fn test_decode_invalid_count() {
        let mut bytes = leaf_with(&[1]).encode(4).into_bytes();
        bytes[0] = 9;

        assert_eq!(
            LeafNode::decode(&bytes, 4),
            Err(RecordError::InvalidCount {
                count: 9,
                capacity: 3
            })
        );
    }

    #[test]
    fn test_leaf_find_index() {
        let leaf = leaf_with(&[5, 10, 20]);

        assert_eq!(leaf.find_index(&key_from_u64(10)), Ok(1));
        assert_eq!(leaf.find_index(&key_from_u64(1)), Err(0));
        assert_eq!(leaf.find_index(&key_from_u64(15)), Err(2));
        assert_eq!(leaf.find_index(&key_from_u64(99)), Err(3));
        assert_eq!(LeafNode::new().find_index(&key_from_u64(1)), Err(0));

        assert_eq!(leaf.get(&key_from_u64(20)), Some(200));
        assert_eq!(leaf.get(&key_from_u64(21)), None);
    }

    #[test]
    fn test_internal_child_index() {
        let node = internal_with(&[0, 10, 20, 30]);

        // Below the first separator -> low-bound slot
        assert_eq!(node.child_index(&key_from_u64(5)), 0);

        // Exact match goes to that entry
        assert_eq!(node.child_index(&key_from_u64(10)), 1);

        // Between separators -> greatest entry <= key
        assert_eq!(node.child_index(&key_from_u64(15)), 1);
        assert_eq!(node.child_index(&key_from_u64(30)), 3);
        assert_eq!(node.child_index(&key_from_u64(99)), 3);
    }

    #[test]
    fn test_child_index_ignores_low_bound_key() {
        // Slot 0 holds a key larger than the search key; it must still win.
        let node = internal_with(&[50, 60]);
        assert_eq!(node.child_index(&key_from_u64(1)), 0);
    }

    #[test]
    fn test_internal_insert_keeps_order() {
        let mut node = internal_with(&[0, 10, 30]);
        node.insert(key_from_u64(20), 7);

        let keys: Vec<Key> = node.entries.iter().map(|e| e.key).collect();
        assert_eq!(
            keys,
            vec![
                key_from_u64(0),
                key_from_u64(10),
                key_from_u64(20),
                key_from_u64(30)
            ]
        );
        assert_eq!(node.entries[2].child, 7);
    }

    #[test]
    fn test_internal_insert_never_displaces_low_bound() {
        let mut node = internal_with(&[40, 50]);
        node.insert(key_from_u64(45), 7);

        assert_eq!(node.entries[0].key, key_from_u64(40));
        assert_eq!(node.entries[1].child, 7);
    }

    #[test]
    fn test_leaf_split() {
        let mut left = leaf_with(&[1, 2, 3, 4]);
        left.prev = Some(8);
        left.next = Some(9);

        let right = left.split();

        assert_eq!(left.entries.len(), 2);
        assert_eq!(right.entries.len(), 2);
        assert_eq!(right.entries[0].key, key_from_u64(3));
        assert_eq!(left.prev, Some(8));
        assert_eq!(left.next, Some(9));
        assert_eq!(right.prev, None);
    }

    #[test]
    fn test_leaf_split_odd_keeps_larger_left() {
        let mut left = leaf_with(&[1, 2, 3]);
        let right = left.split();

        assert_eq!(left.entries.len(), 2);
        assert_eq!(right.entries.len(), 1);
    }

    #[test]
    fn test_internal_split() {
        let mut node = internal_with(&[0, 10, 20, 30, 40]);
        assert!(node.is_overfull(4));

        let right = node.split();

        assert_eq!(node.entries.len(), 3);
        assert_eq!(right.entries.len(), 2);
        assert_eq!(right.entries[0].key, key_from_u64(30));
        assert!(!node.is_overfull(4));
    }
}
