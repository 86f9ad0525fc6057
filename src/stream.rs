//! The minimal "byte-oriented seekable stream" and "IP-wildcard iterator"
//! collaborators the codec needs (spec.md §1, SPEC_FULL.md §4.7a).
//!
//! Grounded on `examples/NLnetLabs-rotonda-store/src/store.rs`'s
//! `StorageBackend` trait — a small contract the codec is written against,
//! with exactly one concrete implementation provided in-crate
//! (`FileStream` here plays the role `InMemStorage` plays there). This is
//! *not* a reimplementation of SiLK's own buffered/compressed generic file
//! header stream; it is the narrow `Read + Write + Seek` surface
//! `codec` actually consumes.

use std::fs::File;
use std::io::{Read, Seek, Write};

use crate::af::IpBlock;

/// A byte-oriented seekable stream the codec reads/writes through, plus a
/// declaration of which byte order it was written in (spec.md §1, §4.7:
/// "The file header records native byte order of the writer").
pub trait Stream: Read + Write + Seek {
    /// `true` if this stream's content (when it already holds a file) was
    /// written in the current platform's native byte order. A fresh stream
    /// with nothing written yet returns `true` (native is what `codec` will
    /// write).
    fn is_native_byte_order(&self) -> bool {
        true
    }
}

/// A plain file-backed stream (spec.md §6: `Save(path)`/`Load(path)`).
pub struct FileStream {
    file: File,
    foreign_byte_order: bool,
}

impl FileStream {
    pub fn new(file: File) -> Self {
        FileStream {
            file,
            foreign_byte_order: false,
        }
    }

    /// Marks this stream as holding content written in the non-native byte
    /// order, set by `codec::header` once it has read the order flag.
    pub(crate) fn set_foreign_byte_order(&mut self, foreign: bool) {
        self.foreign_byte_order = foreign;
    }
}

impl Read for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for FileStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileStream {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Stream for FileStream {
    fn is_native_byte_order(&self) -> bool {
        !self.foreign_byte_order
    }
}

/// An in-memory stream, used by `tests/` for round-tripping without
/// touching the filesystem and by `ProcessStream` callers who already hold
/// the file content in a buffer.
pub struct MemStream {
    buf: std::io::Cursor<Vec<u8>>,
}

impl MemStream {
    pub fn new() -> Self {
        MemStream {
            buf: std::io::Cursor::new(Vec::new()),
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        MemStream {
            buf: std::io::Cursor::new(data),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf.into_inner()
    }
}

impl Default for MemStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Read for MemStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.buf.read(buf)
    }
}

impl Write for MemStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.buf.flush()
    }
}

impl Seek for MemStream {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        self.buf.seek(pos)
    }
}

impl Stream for MemStream {}

/// An IP-wildcard iterator: yields CIDR blocks in ascending order
/// (SPEC_FULL.md §4.7a). No wildcard *parsing* is implemented — out of
/// scope, same as spec.md's non-goals; this is the consumer-side contract
/// `InsertWildcard`/`RemoveWildcard` accept.
pub trait WildcardIter: Iterator<Item = IpBlock> {}

/// A `Vec`-backed [`WildcardIter`] (already sorted by the caller), the
/// thing `InsertRange`/`RemoveRange` build internally from
/// [`crate::algo::range_to_cidrs`], and what tests use directly.
pub struct VecWildcardIter {
    inner: std::vec::IntoIter<IpBlock>,
}

impl VecWildcardIter {
    pub fn new(blocks: Vec<IpBlock>) -> Self {
        VecWildcardIter {
            inner: blocks.into_iter(),
        }
    }
}

impl Iterator for VecWildcardIter {
    type Item = IpBlock;
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl WildcardIter for VecWildcardIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_stream_round_trips_bytes() {
        let mut s = MemStream::new();
        s.write_all(b"IPST").unwrap();
        s.seek(std::io::SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 4];
        s.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"IPST");
    }

    #[test]
    fn vec_wildcard_iter_yields_in_order() {
        let blocks = vec![IpBlock::V4(0x0a000000, 24), IpBlock::V4(0x0a000100, 24)];
        let it = VecWildcardIter::new(blocks.clone());
        let collected: Vec<_> = it.collect();
        assert_eq!(collected, blocks);
    }
}
