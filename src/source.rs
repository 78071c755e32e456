//! Byte source abstraction.
//!
//! The demuxer never assumes the whole file is resident; it asks the source
//! for absolute byte ranges, one chunk at a time.

use std::io::{self, Read, Seek, SeekFrom};

/// A random-access byte provider.
///
/// `fetch_range` returns the bytes in `[start, end)`. Implementations may
/// clamp the range to the data they actually hold.
pub trait ByteSource {
    /// Fetch the bytes in `[start, end)`.
    fn fetch_range(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>>;
}

/// A byte source backed by an in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    /// Wrap a buffer as a byte source.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Total size in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// True if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ByteSource for MemorySource {
    fn fetch_range(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        let len = self.data.len() as u64;
        let start = start.min(len) as usize;
        let end = end.clamp(start as u64, len) as usize;
        Ok(self.data[start..end].to_vec())
    }
}

/// A byte source backed by any seekable reader, e.g. a [`std::fs::File`].
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: R,
}

impl<R: Read + Seek> ReaderSource<R> {
    /// Wrap a reader as a byte source.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Get the underlying reader back.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ByteSource for ReaderSource<R> {
    fn fetch_range(&mut self, start: u64, end: u64) -> io::Result<Vec<u8>> {
        self.inner.seek(SeekFrom::Start(start))?;
        let mut buf = vec![0u8; end.saturating_sub(start) as usize];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn memory_source_ranges() {
        let mut src = MemorySource::new(vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(src.len(), 8);
        assert_eq!(src.fetch_range(2, 5).unwrap(), vec![2, 3, 4]);
        assert_eq!(src.fetch_range(6, 100).unwrap(), vec![6, 7]);
        assert!(src.fetch_range(100, 200).unwrap().is_empty());
    }

    #[test]
    fn reader_source_ranges() {
        let mut src = ReaderSource::new(Cursor::new(vec![10u8, 11, 12, 13, 14]));
        assert_eq!(src.fetch_range(1, 4).unwrap(), vec![11, 12, 13]);
        assert_eq!(src.fetch_range(0, 1).unwrap(), vec![10]);
    }
}
