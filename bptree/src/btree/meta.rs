//! Tree metadata record.
//!
//! The meta record sits at offset 0 and is the sole source of the tree's
//! shape: its order, how many nodes exist, where the root lives and how many
//! internal levels sit above the leaves.

#![allow(clippy::cast_possible_truncation)]

use crate::btree::node::{KEY_SIZE, VALUE_SIZE, internal_record_size, leaf_record_size};
use crate::storage::{Offset, RecordBuf, RecordError};

/// Magic number identifying an index file: "BPTINDEX"
pub const MAGIC: [u8; 8] = *b"BPTINDEX";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the meta record in bytes.
pub const META_SIZE: usize = 72;

/// Meta size as u64 for offset calculations.
pub const META_SIZE_U64: u64 = META_SIZE as u64;

/// Smallest supported order. Order 2 would leave leaves with one slot and
/// splits with an empty half.
pub const MIN_ORDER: u32 = 3;

/// Largest supported order.
pub const MAX_ORDER: u32 = 1024;

/// Meta record field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const ORDER: usize = 12;
    pub const KEY_SIZE: usize = 16;
    pub const VALUE_SIZE: usize = 20;
    pub const INDEX_SIZE: usize = 24;
    pub const INTERNAL_NODE_COUNT: usize = 32;
    pub const LEAF_NODE_COUNT: usize = 40;
    pub const HEIGHT: usize = 48;
    pub const ROOT_OFFSET: usize = 56;
    pub const CHECKSUM: usize = 64;
    // 68-71: reserved
}

/// In-memory copy of the meta record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Meta {
    /// Max children per internal node; leaves hold `order - 1` entries.
    pub order: u32,
    /// Key size in bytes, fixed at creation.
    pub key_size: u32,
    /// Value size in bytes, fixed at creation.
    pub value_size: u32,
    /// Bytes reserved after the meta record for internal nodes.
    pub index_size: u64,
    /// Internal nodes created so far.
    pub internal_node_count: u64,
    /// Leaf nodes created so far.
    pub leaf_node_count: u64,
    /// Internal levels above the leaves. 0 means the root is a leaf.
    pub height: u64,
    /// Location of the current root node.
    pub root_offset: Offset,
}

impl Meta {
    /// Meta for a fresh tree: one empty leaf root, no internal nodes.
    ///
    /// The root leaf lives right after the reserved index region. Returns
    /// `None` if `index_slots` reserves more than a file offset can address.
    #[must_use]
    pub fn new(order: u32, index_slots: u64) -> Option<Self> {
        let index_size = reserved_size(order, index_slots)?;
        Some(Self {
            order,
            key_size: KEY_SIZE as u32,
            value_size: VALUE_SIZE as u32,
            index_size,
            internal_node_count: 0,
            leaf_node_count: 1,
            height: 0,
            root_offset: META_SIZE_U64 + index_size,
        })
    }

    /// Number of internal node slots in the reserved region.
    #[must_use]
    pub fn index_slots(&self) -> u64 {
        self.index_size / internal_record_size(self.order) as u64
    }

    /// Offset of the `slot`th internal node slot in the reserved region.
    #[must_use]
    pub fn index_slot_offset(&self, slot: u64) -> Option<Offset> {
        slot.checked_mul(internal_record_size(self.order) as u64)?
            .checked_add(META_SIZE_U64)
    }

    /// Smallest valid file length for this layout: meta, index region and
    /// the initial root leaf.
    #[must_use]
    pub fn min_file_len(&self) -> Option<u64> {
        layout_len(self.order, self.index_size)
    }

    /// Serialize the meta record.
    #[must_use]
    pub fn encode(&self) -> RecordBuf {
        let mut record = RecordBuf::zeroed(META_SIZE);

        record.write_bytes(offsets::MAGIC, &MAGIC);
        record.write_u32(offsets::FORMAT_VERSION, FORMAT_VERSION);
        record.write_u32(offsets::ORDER, self.order);
        record.write_u32(offsets::KEY_SIZE, self.key_size);
        record.write_u32(offsets::VALUE_SIZE, self.value_size);
        record.write_u64(offsets::INDEX_SIZE, self.index_size);
        record.write_u64(offsets::INTERNAL_NODE_COUNT, self.internal_node_count);
        record.write_u64(offsets::LEAF_NODE_COUNT, self.leaf_node_count);
        record.write_u64(offsets::HEIGHT, self.height);
        record.write_u64(offsets::ROOT_OFFSET, self.root_offset);

        let checksum = record.checksum(offsets::CHECKSUM);
        record.write_u32(offsets::CHECKSUM, checksum);

        record
    }

    /// Deserialize and validate a meta record.
    ///
    /// Rejects records written with a different format, key size, value size
    /// or an out-of-range order, since every other record size follows from
    /// those fields.
    pub fn decode(bytes: &[u8]) -> Result<Self, MetaError> {
        let record = RecordBuf::from_bytes(bytes, META_SIZE)?;

        let mut magic = [0u8; 8];
        magic.copy_from_slice(record.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(MetaError::InvalidMagic(magic));
        }

        let format_version = record.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(MetaError::UnsupportedVersion(format_version));
        }

        let stored = record.read_u32(offsets::CHECKSUM);
        let computed = record.checksum(offsets::CHECKSUM);
        if stored != computed {
            return Err(MetaError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let key_size = record.read_u32(offsets::KEY_SIZE);
        if key_size as usize != KEY_SIZE {
            return Err(MetaError::KeySizeMismatch(key_size));
        }

        let value_size = record.read_u32(offsets::VALUE_SIZE);
        if value_size as usize != VALUE_SIZE {
            return Err(MetaError::ValueSizeMismatch(value_size));
        }

        let order = record.read_u32(offsets::ORDER);
        if !(MIN_ORDER..=MAX_ORDER).contains(&order) {
            return Err(MetaError::InvalidOrder(order));
        }

        let index_size = record.read_u64(offsets::INDEX_SIZE);
        if index_size % internal_record_size(order) as u64 != 0
            || layout_len(order, index_size).is_none()
        {
            return Err(MetaError::IndexSizeMismatch(index_size));
        }

        let meta = Self {
            order,
            key_size,
            value_size,
            index_size,
            internal_node_count: record.read_u64(offsets::INTERNAL_NODE_COUNT),
            leaf_node_count: record.read_u64(offsets::LEAF_NODE_COUNT),
            height: record.read_u64(offsets::HEIGHT),
            root_offset: record.read_u64(offsets::ROOT_OFFSET),
        };

        let single_leaf = meta.internal_node_count == 0 && meta.leaf_node_count == 1;
        if (meta.height == 0) != single_leaf || meta.leaf_node_count == 0 {
            return Err(MetaError::HeightMismatch {
                height: meta.height,
                internal_nodes: meta.internal_node_count,
                leaf_nodes: meta.leaf_node_count,
            });
        }

        Ok(meta)
    }

    /// Check the layout described by the meta against the file's length.
    pub fn check_file_len(&self, file_len: u64) -> Result<(), MetaError> {
        let Some(min_len) = self.min_file_len() else {
            return Err(MetaError::IndexSizeMismatch(self.index_size));
        };
        if file_len < min_len {
            return Err(MetaError::FileTooShort {
                expected: min_len,
                actual: file_len,
            });
        }
        if self.root_offset < META_SIZE_U64 || self.root_offset >= file_len {
            return Err(MetaError::RootOutOfBounds {
                root_offset: self.root_offset,
                file_len,
            });
        }
        Ok(())
    }
}

/// Bytes reserved for `index_slots` internal nodes, or `None` if the
/// resulting layout does not fit in a u64 file offset.
#[must_use]
pub fn reserved_size(order: u32, index_slots: u64) -> Option<u64> {
    let index_size = index_slots.checked_mul(internal_record_size(order) as u64)?;
    layout_len(order, index_size)?;
    Some(index_size)
}

/// Meta record, index region and one leaf, if that length is addressable.
fn layout_len(order: u32, index_size: u64) -> Option<u64> {
    META_SIZE_U64
        .checked_add(index_size)?
        .checked_add(leaf_record_size(order) as u64)
}

/// Errors that can occur when reading a meta record.
#[derive(Debug)]
pub enum MetaError {
    /// The record itself could not be decoded.
    Record(RecordError),
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Stored checksum does not match the record contents.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// File was written with a different key size.
    KeySizeMismatch(u32),
    /// File was written with a different value size.
    ValueSizeMismatch(u32),
    /// Order outside the supported range.
    InvalidOrder(u32),
    /// Index region is not a whole number of internal records, or does not
    /// fit in the file's address space.
    IndexSizeMismatch(u64),
    /// File is shorter than the layout requires.
    FileTooShort { expected: u64, actual: u64 },
    /// Root offset points outside the node area of the file.
    RootOutOfBounds { root_offset: Offset, file_len: u64 },
    /// Height disagrees with the node counters.
    HeightMismatch {
        height: u64,
        internal_nodes: u64,
        leaf_nodes: u64,
    },
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record(e) => write!(f, "meta record: {e}"),
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "meta checksum mismatch: expected {expected}, got {actual}")
            }
            Self::KeySizeMismatch(size) => {
                write!(f, "key size mismatch: file has {size}, expected {KEY_SIZE}")
            }
            Self::ValueSizeMismatch(size) => {
                write!(
                    f,
                    "value size mismatch: file has {size}, expected {VALUE_SIZE}"
                )
            }
            Self::InvalidOrder(order) => write!(
                f,
                "invalid order {order} (must be {MIN_ORDER}..={MAX_ORDER})"
            ),
            Self::IndexSizeMismatch(size) => {
                write!(f, "index size {size} does not describe a valid index region")
            }
            Self::FileTooShort { expected, actual } => {
                write!(f, "file too short: expected at least {expected} bytes, got {actual}")
            }
            Self::RootOutOfBounds {
                root_offset,
                file_len,
            } => write!(
                f,
                "root offset {root_offset} out of bounds (file length: {file_len})"
            ),
            Self::HeightMismatch {
                height,
                internal_nodes,
                leaf_nodes,
            } => write!(
                f,
                "height {height} inconsistent with {internal_nodes} internal and {leaf_nodes} leaf nodes"
            ),
        }
    }
}

impl std::error::Error for MetaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Record(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RecordError> for MetaError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_roundtrip() {
        let mut meta = Meta::new(4, 8).expect("layout");
        meta.internal_node_count = 3;
        meta.leaf_node_count = 7;
        meta.height = 2;
        meta.root_offset = 4096;

        let record = meta.encode();
        assert_eq!(record.as_bytes().len(), META_SIZE);

        let restored = Meta::decode(record.as_bytes()).expect("should parse");
        assert_eq!(restored, meta);
    }

    #[test]
    fn test_fresh_meta_layout() {
        let meta = Meta::new(4, 2).expect("layout");

        assert_eq!(meta.index_size, 2 * internal_record_size(4) as u64);
        assert_eq!(meta.index_slots(), 2);
        assert_eq!(meta.index_slot_offset(0), Some(META_SIZE_U64));
        assert_eq!(meta.root_offset, META_SIZE_U64 + meta.index_size);
        assert_eq!(meta.height, 0);
        assert_eq!(meta.leaf_node_count, 1);
    }

    #[test]
    fn test_meta_invalid_magic() {
        let mut bytes = Meta::new(4, 1).expect("layout").encode().into_bytes();
        bytes[..8].copy_from_slice(b"BADMAGIC");

        assert!(matches!(
            Meta::decode(&bytes),
            Err(MetaError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_meta_checksum_mismatch() {
        let mut bytes = Meta::new(4, 1).expect("layout").encode().into_bytes();
        bytes[offsets::HEIGHT] ^= 0xFF;

        assert!(matches!(
            Meta::decode(&bytes),
            Err(MetaError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_meta_truncated() {
        let bytes = Meta::new(4, 1).expect("layout").encode().into_bytes();

        assert!(matches!(
            Meta::decode(&bytes[..40]),
            Err(MetaError::Record(RecordError::Truncated { .. }))
        ));
    }

    #[test]
    fn test_meta_key_size_mismatch() {
        let mut meta = Meta::new(4, 1).expect("layout");
        meta.key_size = 32;
        let bytes = meta.encode().into_bytes();

        assert!(matches!(
            Meta::decode(&bytes),
            Err(MetaError::KeySizeMismatch(32))
        ));
    }

    #[test]
    fn test_meta_height_mismatch() {
        let mut meta = Meta::new(4, 1).expect("layout");
        meta.height = 1;
        let bytes = meta.encode().into_bytes();

        assert!(matches!(
            Meta::decode(&bytes),
            Err(MetaError::HeightMismatch { .. })
        ));
    }

    #[test]
    fn test_check_file_len() {
        let meta = Meta::new(4, 1).expect("layout");

        let min_len = meta.min_file_len().expect("min len");

        assert!(meta.check_file_len(min_len).is_ok());
        assert!(matches!(
            meta.check_file_len(min_len - 1),
            Err(MetaError::FileTooShort { .. })
        ));
    }

    #[test]
    fn test_reserved_size_overflow() {
        assert_eq!(reserved_size(4, 2), Some(2 * internal_record_size(4) as u64));
        assert_eq!(reserved_size(4, u64::MAX / 8), None);
        assert!(Meta::new(4, u64::MAX / 8).is_none());

        // Fits the multiplication but not the meta record and root leaf.
        let record = internal_record_size(4) as u64;
        assert_eq!(reserved_size(4, u64::MAX / record), None);
    }

    #[test]
    fn test_meta_unaddressable_index_size() {
        let mut meta = Meta::new(4, 1).expect("layout");
        let record = internal_record_size(4) as u64;
        meta.index_size = (u64::MAX / record) * record;
        let bytes = meta.encode().into_bytes();

        assert!(matches!(
            Meta::decode(&bytes),
            Err(MetaError::IndexSizeMismatch(_))
        ));
        assert!(matches!(
            meta.check_file_len(u64::MAX),
            Err(MetaError::IndexSizeMismatch(_))
        ));
    }
}
