//! Random-access file store backing a tree.
//!
//! The store owns the path of the index file and, while at least one
//! [`FileGuard`] is alive, an open handle to it. Every read, write and
//! append acquires a guard of its own, so a single logical operation that
//! wraps itself in an outer guard reuses one handle for all of its I/O and
//! the file is closed when the outermost guard drops.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

/// A byte offset into the index file.
pub type Offset = u64;

/// File store for a single index file.
///
/// # Invariants
///
/// - `file.is_some()` iff `depth > 0`
/// - `depth` equals the number of live guards
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    file: Option<File>,
    depth: usize,
}

impl FileStore {
    /// Create a store for an existing file. Nothing is opened yet.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
            depth: 0,
        }
    }

    /// Create (or truncate) the backing file and return a store for it.
    pub fn create(path: &Path) -> Result<Self, FileError> {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(FileError::Io)?;

        Ok(Self::new(path))
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live guards.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Whether the backing file is currently open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Acquire the backing file for the lifetime of the returned guard.
    ///
    /// The file is opened read/write without truncation on the first
    /// acquisition; nested acquisitions only bump the depth counter.
    pub fn acquire(&mut self) -> Result<FileGuard<'_>, FileError> {
        if self.depth == 0 {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&self.path)
                .map_err(FileError::Io)?;
            tracing::trace!(path = %self.path.display(), "opened index file");
            self.file = Some(file);
        }
        self.depth += 1;

        Ok(FileGuard { store: self })
    }

    fn release(&mut self) {
        debug_assert!(self.depth > 0, "release without matching acquire");
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.file = None;
            tracing::trace!(path = %self.path.display(), "closed index file");
        }
    }

    fn handle(&mut self) -> Result<&mut File, FileError> {
        self.file.as_mut().ok_or(FileError::NotOpen)
    }

    /// Read exactly `size` bytes at `offset`.
    pub fn read(&mut self, offset: Offset, size: usize) -> Result<Vec<u8>, FileError> {
        let mut io = self.acquire()?;
        let file = io.handle()?;

        file.seek(SeekFrom::Start(offset)).map_err(FileError::Io)?;

        // Not read_exact: a short read reports how many bytes were available.
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            match file.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(FileError::ShortRead {
                        offset,
                        expected: size,
                        actual: filled,
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(FileError::Io(e)),
            }
        }

        Ok(buf)
    }

    /// Overwrite bytes in place at `offset`.
    ///
    /// Writing past the end of the file extends it; the rest of the file is
    /// never truncated.
    pub fn write(&mut self, offset: Offset, bytes: &[u8]) -> Result<(), FileError> {
        let mut io = self.acquire()?;
        let file = io.handle()?;

        file.seek(SeekFrom::Start(offset)).map_err(FileError::Io)?;
        file.write_all(bytes).map_err(FileError::Io)?;

        Ok(())
    }

    /// Write `bytes` at the end of the file, returning where they landed.
    pub fn append(&mut self, bytes: &[u8]) -> Result<Offset, FileError> {
        let mut io = self.acquire()?;
        let file = io.handle()?;

        let offset = file.seek(SeekFrom::End(0)).map_err(FileError::Io)?;
        file.write_all(bytes).map_err(FileError::Io)?;

        Ok(offset)
    }

    /// Current length of the backing file in bytes.
    pub fn file_len(&mut self) -> Result<u64, FileError> {
        let mut io = self.acquire()?;
        let file = io.handle()?;
        let metadata = file.metadata().map_err(FileError::Io)?;
        Ok(metadata.len())
    }

    /// Flush file contents to durable storage.
    pub fn sync(&mut self) -> Result<(), FileError> {
        let mut io = self.acquire()?;
        io.handle()?.sync_all().map_err(FileError::Io)
    }
}

/// Scoped acquisition of a [`FileStore`].
///
/// Dereferences to the store so nested operations go through the same
/// handle. Dropping the guard releases one level of nesting.
#[derive(Debug)]
pub struct FileGuard<'a> {
    store: &'a mut FileStore,
}

impl Deref for FileGuard<'_> {
    type Target = FileStore;

    fn deref(&self) -> &FileStore {
        self.store
    }
}

impl DerefMut for FileGuard<'_> {
    fn deref_mut(&mut self) -> &mut FileStore {
        self.store
    }
}

impl Drop for FileGuard<'_> {
    fn drop(&mut self) {
        self.store.release();
    }
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// The file ended before `expected` bytes could be read.
    ShortRead {
        offset: Offset,
        expected: usize,
        actual: usize,
    },
    /// An operation reached the handle without an active guard.
    NotOpen,
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ShortRead {
                offset,
                expected,
                actual,
            } => write!(
                f,
                "short read at offset {offset}: expected {expected} bytes, got {actual}"
            ),
            Self::NotOpen => write!(f, "file is not open"),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::ShortRead { .. } | Self::NotOpen => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("store.bpt");
        let mut store = FileStore::create(&path).expect("create store");

        store.write(0, b"hello world").expect("write");
        assert_eq!(store.read(0, 11).expect("read"), b"hello world");
        assert_eq!(store.read(6, 5).expect("read"), b"world");
    }

    #[test]
    fn test_write_in_place_does_not_truncate() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("store.bpt");
        let mut store = FileStore::create(&path).expect("create store");

        store.write(0, b"aaaaaaaaaa").expect("write");
        store.write(2, b"bb").expect("overwrite");

        assert_eq!(store.file_len().expect("len"), 10);
        assert_eq!(store.read(0, 10).expect("read"), b"aabbaaaaaa");
    }

    #[test]
    fn test_write_past_end_extends_file() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("store.bpt");
        let mut store = FileStore::create(&path).expect("create store");

        store.write(100, b"xyz").expect("write");
        assert_eq!(store.file_len().expect("len"), 103);
        assert_eq!(store.read(0, 4).expect("read hole"), vec![0u8; 4]);
    }

    #[test]
    fn test_append_returns_landing_offset() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("store.bpt");
        let mut store = FileStore::create(&path).expect("create store");

        assert_eq!(store.append(b"first").expect("append"), 0);
        assert_eq!(store.append(b"second").expect("append"), 5);
        assert_eq!(store.read(5, 6).expect("read"), b"second");
    }

    #[test]
    fn test_short_read() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("store.bpt");
        let mut store = FileStore::create(&path).expect("create store");
        store.write(0, b"abc").expect("write");

        let result = store.read(1, 10);
        assert!(matches!(
            result,
            Err(FileError::ShortRead {
                offset: 1,
                expected: 10,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_nested_guards_share_one_handle() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("store.bpt");
        let mut store = FileStore::create(&path).expect("create store");
        assert!(!store.is_open());

        {
            let mut outer = store.acquire().expect("outer");
            assert_eq!(outer.depth(), 1);
            {
                let inner = outer.acquire().expect("inner");
                assert_eq!(inner.depth(), 2);
                assert!(inner.is_open());
            }
            assert_eq!(outer.depth(), 1);
            assert!(outer.is_open());

            outer.append(b"data").expect("append through guard");
            assert_eq!(outer.depth(), 1);
        }

        assert_eq!(store.depth(), 0);
        assert!(!store.is_open());
    }

    #[test]
    fn test_acquire_missing_file() {
        let dir = tempdir().expect("create temp dir");
        let mut store = FileStore::new(&dir.path().join("missing.bpt"));

        assert!(matches!(store.acquire(), Err(FileError::Io(_))));
        assert_eq!(store.depth(), 0);
    }

    #[test]
    fn test_file_error_display() {
        let e = FileError::ShortRead {
            offset: 64,
            expected: 72,
            actual: 8,
        };
        assert!(e.to_string().contains("offset 64"));
        assert!(e.to_string().contains("expected 72"));
    }
}
