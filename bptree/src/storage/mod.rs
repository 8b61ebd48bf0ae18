//! Byte-level storage for the index file.
//!
//! - [`FileStore`]: read-at-offset, write-at-offset and append over a single
//!   file, opened once per logical operation through a [`FileGuard`]
//! - [`RecordBuf`]: fixed-size little-endian record buffers used by every
//!   on-disk record codec

mod file;
mod record;

pub use file::{FileError, FileGuard, FileStore, Offset};
pub use record::{RecordBuf, RecordError};
