//! Disk-resident B+tree over a single index file.
//!
//! Nodes are never cached between calls: every operation acquires the file
//! once, reads the records it needs, writes back whatever it changed and
//! releases the file. The only state kept in memory is the meta record.
//!
//! Insertion splits full nodes on the way back up:
//! - a full leaf is split by count, the right half is appended, sibling
//!   links are rewired and the right half's first key is promoted
//! - a parent that overflows is split the same way and promotes again
//! - when the root itself splits, a new root is created above it and the
//!   height grows by one

use std::path::Path;

use crate::btree::meta::{MAX_ORDER, META_SIZE, META_SIZE_U64, MIN_ORDER, Meta, MetaError};
use crate::btree::node::{
    InternalNode, Key, LeafEntry, LeafNode, Value, internal_record_size, leaf_record_size,
};
use crate::storage::{FileError, FileGuard, FileStore, Offset, RecordError};

/// Default order for new trees.
pub const DEFAULT_ORDER: u32 = 20;

/// Default number of internal node slots reserved after the meta record.
pub const DEFAULT_INDEX_SLOTS: u64 = 128;

/// Options applied when a fresh tree is initialized.
///
/// An existing file's meta record always takes precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    /// Max children per internal node; leaves hold `order - 1` entries.
    pub order: u32,
    /// Internal node slots reserved right after the meta record.
    pub index_slots: u64,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            index_slots: DEFAULT_INDEX_SLOTS,
        }
    }
}

/// Snapshot of the tree's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    pub order: u32,
    pub height: u64,
    pub internal_node_count: u64,
    pub leaf_node_count: u64,
    pub root_offset: Offset,
}

/// A B+tree backed by an index file.
#[derive(Debug)]
pub struct BPlusTree {
    store: FileStore,
    meta: Meta,
}

impl BPlusTree {
    /// Open the tree at `path` with default options.
    ///
    /// A fresh tree is initialized when the file does not exist or
    /// `force_empty` is set.
    pub fn open(path: &Path, force_empty: bool) -> Result<Self, BPlusTreeError> {
        Self::open_with(path, force_empty, TreeOptions::default())
    }

    /// Open the tree at `path`, using `options` if a fresh tree is created.
    pub fn open_with(
        path: &Path,
        force_empty: bool,
        options: TreeOptions,
    ) -> Result<Self, BPlusTreeError> {
        if !(MIN_ORDER..=MAX_ORDER).contains(&options.order) {
            return Err(BPlusTreeError::InvalidOrder(options.order));
        }

        // Options are validated on reopen too.
        let fresh = Meta::new(options.order, options.index_slots)
            .ok_or(BPlusTreeError::InvalidIndexSlots(options.index_slots))?;

        if force_empty || !path.exists() {
            Self::init_from_empty(path, fresh)
        } else {
            Self::load(path, options)
        }
    }

    /// Write a meta record and an empty root leaf.
    fn init_from_empty(path: &Path, meta: Meta) -> Result<Self, BPlusTreeError> {
        let mut store = FileStore::create(path)?;

        {
            let mut io = store.acquire()?;
            io.write(0, meta.encode().as_bytes())?;
            io.write(meta.root_offset, LeafNode::new().encode(meta.order).as_bytes())?;
        }

        tracing::info!(
            path = %path.display(),
            order = meta.order,
            index_slots = meta.index_slots(),
            "initialized empty tree"
        );

        Ok(Self { store, meta })
    }

    /// Read and validate the meta record of an existing file.
    fn load(path: &Path, options: TreeOptions) -> Result<Self, BPlusTreeError> {
        let mut store = FileStore::new(path);

        let meta = {
            let mut io = store.acquire()?;
            let file_len = io.file_len()?;
            if file_len < META_SIZE_U64 {
                return Err(MetaError::FileTooShort {
                    expected: META_SIZE_U64,
                    actual: file_len,
                }
                .into());
            }

            let bytes = io.read(0, META_SIZE)?;
            let meta = Meta::decode(&bytes)?;
            meta.check_file_len(file_len)?;
            meta
        };

        if meta.order != options.order {
            tracing::warn!(
                file_order = meta.order,
                requested_order = options.order,
                "ignoring requested order for existing tree"
            );
        }

        tracing::info!(
            path = %path.display(),
            order = meta.order,
            height = meta.height,
            leaves = meta.leaf_node_count,
            "opened tree"
        );

        Ok(Self { store, meta })
    }

    /// Path of the index file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Current shape of the tree, from the in-memory meta record.
    #[must_use]
    pub const fn stats(&self) -> TreeStats {
        TreeStats {
            order: self.meta.order,
            height: self.meta.height,
            internal_node_count: self.meta.internal_node_count,
            leaf_node_count: self.meta.leaf_node_count,
            root_offset: self.meta.root_offset,
        }
    }

    /// Offset of the leaf that would hold `key`.
    pub fn find_leaf_offset(&mut self, key: &Key) -> Result<Offset, BPlusTreeError> {
        let mut session = self.session()?;
        let (_, leaf_offset) = session.descend(key)?;
        Ok(leaf_offset)
    }

    /// Look up a value by key.
    pub fn search(&mut self, key: &Key) -> Result<Option<Value>, BPlusTreeError> {
        let mut session = self.session()?;
        let (_, leaf_offset) = session.descend(key)?;
        let leaf = session.read_leaf(leaf_offset)?;
        Ok(leaf.get(key))
    }

    /// Whether `key` is present.
    pub fn contains(&mut self, key: &Key) -> Result<bool, BPlusTreeError> {
        Ok(self.search(key)?.is_some())
    }

    /// Insert a key-value pair unless the key already exists.
    ///
    /// Returns the existing value for a duplicate key, leaving the tree
    /// untouched, or `None` once the new entry is stored.
    pub fn try_insert(&mut self, key: Key, value: Value) -> Result<Option<Value>, BPlusTreeError> {
        let snapshot = self.meta;
        let result = self.session()?.insert(key, value);
        if result.is_err() {
            // The file's meta record was not rewritten; stay in step with it.
            self.meta = snapshot;
        }
        result
    }

    /// Insert a key-value pair.
    ///
    /// Returns the value now stored under `key`: the existing one for a
    /// duplicate key, otherwise `value`.
    pub fn insert(&mut self, key: Key, value: Value) -> Result<Value, BPlusTreeError> {
        Ok(self.try_insert(key, value)?.unwrap_or(value))
    }

    /// Flush the index file to durable storage.
    pub fn sync(&mut self) -> Result<(), BPlusTreeError> {
        Ok(self.store.sync()?)
    }

    /// Acquire the file for one logical operation.
    pub(super) fn session(&mut self) -> Result<Session<'_>, BPlusTreeError> {
        let io = self.store.acquire()?;
        Ok(Session {
            io,
            meta: &mut self.meta,
            meta_dirty: false,
        })
    }
}

/// One logical operation over the tree, holding the file open throughout.
pub(super) struct Session<'a> {
    io: FileGuard<'a>,
    meta: &'a mut Meta,
    meta_dirty: bool,
}

impl Session<'_> {
    pub(super) fn meta(&self) -> &Meta {
        &*self.meta
    }

    pub(super) fn read_leaf(&mut self, offset: Offset) -> Result<LeafNode, BPlusTreeError> {
        let order = self.meta.order;
        let bytes = self.io.read(offset, leaf_record_size(order))?;
        Ok(LeafNode::decode(&bytes, order)?)
    }

    pub(super) fn read_internal(&mut self, offset: Offset) -> Result<InternalNode, BPlusTreeError> {
        let order = self.meta.order;
        let bytes = self.io.read(offset, internal_record_size(order))?;
        Ok(InternalNode::decode(&bytes, order)?)
    }

    pub(super) fn write_leaf(&mut self, offset: Offset, leaf: &LeafNode) -> Result<(), BPlusTreeError> {
        let record = leaf.encode(self.meta.order);
        Ok(self.io.write(offset, record.as_bytes())?)
    }

    fn write_internal(&mut self, offset: Offset, node: &InternalNode) -> Result<(), BPlusTreeError> {
        let record = node.encode(self.meta.order);
        Ok(self.io.write(offset, record.as_bytes())?)
    }

    /// Append a new leaf at the end of the file.
    fn append_leaf(&mut self, leaf: &LeafNode) -> Result<Offset, BPlusTreeError> {
        let record = leaf.encode(self.meta.order);
        let offset = self.io.append(record.as_bytes())?;

        self.meta.leaf_node_count += 1;
        self.meta_dirty = true;

        Ok(offset)
    }

    /// Store a new internal node, filling the reserved index region first.
    fn alloc_internal(&mut self, node: &InternalNode) -> Result<Offset, BPlusTreeError> {
        let record = node.encode(self.meta.order);
        let slot = self.meta.internal_node_count;

        let offset = if slot < self.meta.index_slots() {
            let offset = self.meta.index_slot_offset(slot).ok_or_else(|| {
                BPlusTreeError::Corrupt(format!("index slot {slot} is not addressable"))
            })?;
            self.io.write(offset, record.as_bytes())?;
            offset
        } else {
            self.io.append(record.as_bytes())?
        };

        self.meta.internal_node_count += 1;
        self.meta_dirty = true;

        Ok(offset)
    }

    fn persist_meta(&mut self) -> Result<(), BPlusTreeError> {
        if self.meta_dirty {
            let record = self.meta.encode();
            self.io.write(0, record.as_bytes())?;
            self.meta_dirty = false;
        }
        Ok(())
    }

    /// Walk from the root to the leaf that should contain `key`.
    ///
    /// Returns the internal nodes visited, root first, and the leaf offset.
    pub(super) fn descend(&mut self, key: &Key) -> Result<(Vec<Offset>, Offset), BPlusTreeError> {
        let height = self.meta.height;
        let mut path = Vec::new();
        let mut offset = self.meta.root_offset;

        for _ in 0..height {
            let node = self.read_internal(offset)?;
            if node.entries.is_empty() {
                return Err(BPlusTreeError::Corrupt(format!(
                    "empty internal node at offset {offset}"
                )));
            }
            path.push(offset);
            offset = node.entries[node.child_index(key)].child;
        }

        tracing::trace!(leaf = offset, levels = height, "descended to leaf");
        Ok((path, offset))
    }

    fn insert(&mut self, key: Key, value: Value) -> Result<Option<Value>, BPlusTreeError> {
        let (path, leaf_offset) = self.descend(&key)?;
        let mut leaf = self.read_leaf(leaf_offset)?;

        let idx = match leaf.find_index(&key) {
            Ok(i) => return Ok(Some(leaf.entries[i].value)),
            Err(i) => i,
        };

        let full = leaf.is_full(self.meta.order);
        leaf.entries.insert(idx, LeafEntry { key, value });

        if !full {
            self.write_leaf(leaf_offset, &leaf)?;
            return Ok(None);
        }

        // The leaf now holds `order` entries; split it in two.
        let mut right = leaf.split();
        right.prev = Some(leaf_offset);
        right.next = leaf.next;
        let right_offset = self.append_leaf(&right)?;

        if let Some(next_offset) = right.next {
            let mut next = self.read_leaf(next_offset)?;
            next.prev = Some(right_offset);
            self.write_leaf(next_offset, &next)?;
        }

        leaf.next = Some(right_offset);
        self.write_leaf(leaf_offset, &leaf)?;

        tracing::debug!(
            left = leaf_offset,
            right = right_offset,
            left_entries = leaf.entries.len(),
            right_entries = right.entries.len(),
            "split leaf"
        );

        self.promote(path, leaf_offset, right.entries[0].key, right_offset)?;
        self.persist_meta()?;

        Ok(None)
    }

    /// Insert `(key, right)` into the parents recorded in `path`, splitting
    /// upward until a parent has room or a new root is created.
    fn promote(
        &mut self,
        mut path: Vec<Offset>,
        mut left: Offset,
        mut key: Key,
        mut right: Offset,
    ) -> Result<(), BPlusTreeError> {
        let order = self.meta.order;

        while let Some(parent_offset) = path.pop() {
            let mut parent = self.read_internal(parent_offset)?;
            parent.insert(key, right);

            if !parent.is_overfull(order) {
                return self.write_internal(parent_offset, &parent);
            }

            let sibling = parent.split();
            self.write_internal(parent_offset, &parent)?;
            let sibling_offset = self.alloc_internal(&sibling)?;

            tracing::debug!(
                left = parent_offset,
                right = sibling_offset,
                "split internal node"
            );

            left = parent_offset;
            key = sibling.entries[0].key;
            right = sibling_offset;
        }

        let root = InternalNode::new_root(left, key, right);
        let root_offset = self.alloc_internal(&root)?;
        self.meta.root_offset = root_offset;
        self.meta.height += 1;

        tracing::debug!(root = root_offset, height = self.meta.height, "grew new root");
        Ok(())
    }
}

/// Errors that can occur during tree operations.
#[derive(Debug)]
pub enum BPlusTreeError {
    /// File I/O error.
    File(FileError),
    /// A node record could not be decoded.
    Record(RecordError),
    /// Missing, corrupt or incompatible meta record.
    Meta(MetaError),
    /// Requested order outside the supported range.
    InvalidOrder(u32),
    /// Requested index region too large to address.
    InvalidIndexSlots(u64),
    /// The tree structure violates an invariant.
    Corrupt(String),
}

impl std::fmt::Display for BPlusTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Record(e) => write!(f, "record error: {e}"),
            Self::Meta(e) => write!(f, "incompatible index file: {e}"),
            Self::InvalidOrder(order) => write!(
                f,
                "invalid order {order} (must be {MIN_ORDER}..={MAX_ORDER})"
            ),
            Self::InvalidIndexSlots(slots) => write!(
                f,
                "invalid index slot count {slots}: reserved region is not addressable"
            ),
            Self::Corrupt(msg) => write!(f, "corrupt tree: {msg}"),
        }
    }
}

impl std::error::Error for BPlusTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            Self::Record(e) => Some(e),
            Self::Meta(e) => Some(e),
            Self::InvalidOrder(_) | Self::InvalidIndexSlots(_) | Self::Corrupt(_) => None,
        }
    }
}

impl From<FileError> for BPlusTreeError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<RecordError> for BPlusTreeError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

impl From<MetaError> for BPlusTreeError {
    fn from(e: MetaError) -> Self {
        Self::Meta(e)
    }
}
