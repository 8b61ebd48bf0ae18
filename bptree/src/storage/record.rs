//! Fixed-size record buffers.
//!
//! Every on-disk record (meta, internal node, leaf node) is encoded into a
//! buffer whose length depends only on the tree's order, never on how many
//! slots are populated. All integers are little-endian.

/// A zeroed, fixed-length byte buffer with typed accessors.
pub struct RecordBuf {
    data: Vec<u8>,
}

impl RecordBuf {
    /// Create a zeroed record of `size` bytes.
    #[must_use]
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    /// Wrap bytes read from disk, checking they cover a full record.
    pub fn from_bytes(bytes: &[u8], size: usize) -> Result<Self, RecordError> {
        if bytes.len() < size {
            return Err(RecordError::Truncated {
                expected: size,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            data: bytes[..size].to_vec(),
        })
    }

    /// Get the raw record bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the record, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u32 at the given offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.data[offset..offset + 4]);
        u32::from_le_bytes(buf)
    }

    /// Write a u32 at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u64 at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    /// Write a u64 at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// CRC32 of the first `len` bytes.
    #[must_use]
    pub fn checksum(&self, len: usize) -> u32 {
        crc32fast::hash(&self.data[..len])
    }
}

impl std::fmt::Debug for RecordBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBuf")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// Errors raised while decoding a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Fewer bytes than one full record.
    Truncated { expected: usize, actual: usize },
    /// Populated slot count exceeds the record's capacity.
    InvalidCount { count: usize, capacity: usize },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { expected, actual } => {
                write!(f, "truncated record: expected {expected} bytes, got {actual}")
            }
            Self::InvalidCount { count, capacity } => {
                write!(f, "record holds {count} entries but capacity is {capacity}")
            }
        }
    }
}

impl std::error::Error for RecordError {}
