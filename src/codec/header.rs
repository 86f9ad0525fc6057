//! Fixed file header shared by all five format versions (SPEC_FULL.md
//! §4.7a, "Header framing"): magic bytes, version, byte order, and the
//! version-2/version-4 compatibility fields (IP family, leaf size) spec.md
//! §4.7 calls out ("Version 2 and version 4 include header compatibility
//! fields; writer must validate that they reflect the actual IP family and
//! leaf size").

use std::io::{Read, Write};

use crate::error::{IpSetError, Result};
use crate::stream::Stream;

pub const MAGIC: [u8; 4] = *b"IPST";

/// Which address family a version-3/version-4 body holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repr {
    V4,
    V6,
}

#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    pub version: u8,
    /// `true` if the stream's fixed fields need byte-swapping on read
    /// (spec.md §4.7, "Byte order").
    pub foreign_byte_order: bool,
    pub repr: Repr,
    /// Leaf size in bytes, validated by the writer against the actual
    /// content (spec.md §4.7).
    pub leaf_size: u8,
}

fn host_is_little() -> bool {
    cfg!(target_endian = "little")
}

pub fn write_header<S: Stream>(stream: &mut S, version: u8, repr: Repr, leaf_size: u8) -> Result<()> {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&MAGIC);
    buf[4] = version;
    buf[5] = if host_is_little() { 1 } else { 0 };
    buf[6] = match repr {
        Repr::V4 => 0,
        Repr::V6 => 1,
    };
    buf[7] = leaf_size;
    stream.write_all(&buf).map_err(|_| IpSetError::FileIo)
}

pub fn read_header<S: Stream>(stream: &mut S) -> Result<FileHeader> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf).map_err(|_| IpSetError::FileHeader)?;
    if buf[0..4] != MAGIC {
        return Err(IpSetError::FileType);
    }
    let version = buf[4];
    if !(2..=5).contains(&version) {
        return Err(IpSetError::FileVersion);
    }
    let writer_little = buf[5] != 0;
    let repr = match buf[6] {
        0 => Repr::V4,
        1 => Repr::V6,
        _ => return Err(IpSetError::FileHeader),
    };
    Ok(FileHeader {
        version,
        foreign_byte_order: writer_little != host_is_little(),
        repr,
        leaf_size: buf[7],
    })
}

/// Reads a fixed-size field and byte-swaps it if the header declared a
/// foreign byte order (spec.md §4.7: "the reader byte-swaps each fixed
/// field as it is consumed").
pub fn read_u32<S: Stream>(stream: &mut S, header: &FileHeader) -> Result<u32> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).map_err(|_| IpSetError::FileIo)?;
    let v = u32::from_ne_bytes(buf);
    Ok(if header.foreign_byte_order { v.swap_bytes() } else { v })
}

pub fn read_u64<S: Stream>(stream: &mut S, header: &FileHeader) -> Result<u64> {
    let mut buf = [0u8; 8];
    stream.read_exact(&mut buf).map_err(|_| IpSetError::FileIo)?;
    let v = u64::from_ne_bytes(buf);
    Ok(if header.foreign_byte_order { v.swap_bytes() } else { v })
}

pub fn read_u16<S: Stream>(stream: &mut S, header: &FileHeader) -> Result<u16> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).map_err(|_| IpSetError::FileIo)?;
    let v = u16::from_ne_bytes(buf);
    Ok(if header.foreign_byte_order { v.swap_bytes() } else { v })
}

pub fn write_u16<S: Stream>(stream: &mut S, v: u16) -> Result<()> {
    stream.write_all(&v.to_ne_bytes()).map_err(|_| IpSetError::FileIo)
}

pub fn read_u8<S: Stream>(stream: &mut S) -> Result<u8> {
    let mut buf = [0u8; 1];
    stream.read_exact(&mut buf).map_err(|_| IpSetError::FileIo)?;
    Ok(buf[0])
}

pub fn write_u32<S: Stream>(stream: &mut S, v: u32) -> Result<()> {
    stream.write_all(&v.to_ne_bytes()).map_err(|_| IpSetError::FileIo)
}

pub fn write_u64<S: Stream>(stream: &mut S, v: u64) -> Result<()> {
    stream.write_all(&v.to_ne_bytes()).map_err(|_| IpSetError::FileIo)
}

pub fn write_u8<S: Stream>(stream: &mut S, v: u8) -> Result<()> {
    stream.write_all(&[v]).map_err(|_| IpSetError::FileIo)
}
