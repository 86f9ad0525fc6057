//! Version 3 ("Radix"): a direct dump of the node pool then the leaf pool
//! (spec.md §4.7 table, row 3). Supports both IPv4 and IPv6 radix trees.
//!
//! Each node/leaf's address is written as two `u64`s (high, low) regardless
//! of address family — for IPv4 the high word and the low 96 bits of the
//! low word are always zero. This trades the spec table's distinct
//! `leaf_size`/`node_size` per family (8/36 for V4, 24/52 for V6) for one
//! uniform record shape; noted as a deviation in `DESIGN.md` alongside the
//! module-level note in `codec/mod.rs` about why literal byte parity with
//! the external SiLK struct layout isn't attempted.

use std::io::{Seek, SeekFrom};

use crate::af::{AddressFamily, IpBlock, V6Addr};
use crate::arena::Arena;
use crate::error::{IpSetError, Result};
use crate::node::{Leaf, Node, Root};
use crate::radix::RadixTree;
use crate::stream::Stream;

use super::header::{self, FileHeader, Repr};

/// On-wire size of one node/leaf record, regardless of address family
/// (both store their `ip` as two `u64`s — see this module's doc comment).
/// Kept in step with `mmap.rs`'s own `NODE_RECORD_LEN`/`LEAF_RECORD_LEN`,
/// which parses the same layout directly out of a memory map.
const NODE_RECORD_LEN: u64 = (16 * 4 + 2 + 2 + 1 + 8 + 8) as u64;
const LEAF_RECORD_LEN: u64 = (1 + 8 + 8) as u64;

fn repr_of<F: AddressFamily>() -> Repr {
    if F::BITS == 32 {
        Repr::V4
    } else {
        Repr::V6
    }
}

fn write_ip<F: AddressFamily, S: Stream>(stream: &mut S, ip: F) -> Result<()> {
    let v = ip.to_u128();
    header::write_u64(stream, (v >> 64) as u64)?;
    header::write_u64(stream, v as u64)
}

fn read_ip<F: AddressFamily, S: Stream>(stream: &mut S, header: &FileHeader) -> Result<F> {
    let hi = header::read_u64(stream, header)?;
    let lo = header::read_u64(stream, header)?;
    Ok(F::from_u128(((hi as u128) << 64) | lo as u128))
}

fn write_node<F: AddressFamily, S: Stream>(stream: &mut S, node: &Node<F>) -> Result<()> {
    for &c in &node.children {
        header::write_u32(stream, c)?;
    }
    header::write_u16(stream, node.child_is_leaf)?;
    header::write_u16(stream, node.child_repeated)?;
    header::write_u8(stream, node.prefix)?;
    write_ip(stream, node.ip)
}

fn read_node<F: AddressFamily, S: Stream>(stream: &mut S, header: &FileHeader) -> Result<Node<F>> {
    let mut children = [0u32; 16];
    for c in &mut children {
        *c = header::read_u32(stream, header)?;
    }
    let child_is_leaf = header::read_u16(stream, header)?;
    let child_repeated = header::read_u16(stream, header)?;
    let prefix = header::read_u8(stream)?;
    let ip = read_ip(stream, header)?;
    Ok(Node {
        children,
        child_is_leaf,
        child_repeated,
        prefix,
        ip,
    })
}

fn write_leaf<F: AddressFamily, S: Stream>(stream: &mut S, leaf: &Leaf<F>) -> Result<()> {
    header::write_u8(stream, leaf.prefix)?;
    write_ip(stream, leaf.ip)
}

fn read_leaf<F: AddressFamily, S: Stream>(stream: &mut S, header: &FileHeader) -> Result<Leaf<F>> {
    let prefix = header::read_u8(stream)?;
    let ip = read_ip(stream, header)?;
    Ok(Leaf { prefix, ip })
}

fn encode_generic<F: AddressFamily, S: Stream>(stream: &mut S, tree: &RadixTree<F>) -> Result<()> {
    header::write_header(stream, 3, repr_of::<F>(), 0)?;
    let nodes = tree.nodes().slice_from_one();
    let leaves = tree.leaves().slice_from_one();
    header::write_u32(stream, nodes.len() as u32)?;
    header::write_u32(stream, leaves.len() as u32)?;
    let root = tree.root();
    header::write_u32(stream, root.index)?;
    header::write_u8(stream, if root.is_leaf { 1 } else { 0 })?;
    for n in nodes {
        write_node(stream, n)?;
    }
    for l in leaves {
        write_leaf(stream, l)?;
    }
    Ok(())
}

fn decode_generic<F: AddressFamily, S: Stream>(stream: &mut S, header: &FileHeader) -> Result<RadixTree<F>> {
    let node_count = header::read_u32(stream, header)? as usize;
    let leaf_count = header::read_u32(stream, header)? as usize;

    // spec.md §9 Open Question: a header whose counts disagree with the
    // actual stream length is tolerated only when it declares an empty
    // tree (`leaf_count == 0`, and therefore `node_count == 0` too — a
    // tree with no leaves has no nodes either); anything else is corrupt.
    // Checked against the remaining stream length before the root fields
    // and node/leaf records are read, so a stream truncated anywhere past
    // the two counts is caught rather than surfacing as a raw `FileIo`
    // error partway through `read_node`/`read_leaf`. Mirrors `mmap.rs`'s
    // version of this check for the memory-mapped fast path.
    let root_fields_len = 4 + 1u64; // root_index (u32) + root_is_leaf (u8)
    let needed = (node_count as u64)
        .checked_mul(NODE_RECORD_LEN)
        .and_then(|n| (leaf_count as u64).checked_mul(LEAF_RECORD_LEN).map(|l| (n, l)))
        .and_then(|(n, l)| n.checked_add(l))
        .and_then(|body| body.checked_add(root_fields_len))
        .ok_or(IpSetError::Corrupt)?;
    let cur = stream.stream_position().map_err(|_| IpSetError::FileIo)?;
    let end = stream.seek(SeekFrom::End(0)).map_err(|_| IpSetError::FileIo)?;
    stream.seek(SeekFrom::Start(cur)).map_err(|_| IpSetError::FileIo)?;
    if end.saturating_sub(cur) < needed {
        if node_count == 0 && leaf_count == 0 {
            return Ok(RadixTree::new());
        }
        return Err(IpSetError::Corrupt);
    }

    let root_index = header::read_u32(stream, header)?;
    let root_is_leaf = header::read_u8(stream)? != 0;

    let mut nodes = Vec::with_capacity(node_count);
    for _ in 0..node_count {
        nodes.push(read_node::<F, S>(stream, header)?);
    }
    let mut leaves = Vec::with_capacity(leaf_count);
    for _ in 0..leaf_count {
        leaves.push(read_leaf::<F, S>(stream, header)?);
    }
    if root_index as usize > node_count.max(leaf_count) {
        return Err(IpSetError::Corrupt);
    }
    let root = if root_index == 0 {
        Root::default()
    } else {
        Root {
            index: root_index,
            is_leaf: root_is_leaf,
        }
    };
    Ok(RadixTree::from_parts(
        Arena::from_records(nodes),
        Arena::from_records(leaves),
        root,
    ))
}

pub fn encode_v4<S: Stream>(stream: &mut S, tree: &RadixTree<u32>) -> Result<()> {
    encode_generic(stream, tree)
}

pub fn encode_v6<S: Stream>(stream: &mut S, tree: &RadixTree<V6Addr>) -> Result<()> {
    encode_generic(stream, tree)
}

pub fn decode_v4<S: Stream>(stream: &mut S, header: &FileHeader) -> Result<RadixTree<u32>> {
    decode_generic(stream, header)
}

pub fn decode_v6<S: Stream>(stream: &mut S, header: &FileHeader) -> Result<RadixTree<V6Addr>> {
    decode_generic(stream, header)
}

/// Streams the leaf pool straight off the wire without building a
/// [`RadixTree`] (spec.md §4.7 "Stream visitor": "decodes the file into a
/// callback... without materializing a set"). The node pool carries only
/// branching structure, never CIDR content by itself, so it is skipped
/// with one `seek` rather than parsed; leaves are written in ascending
/// order by `encode_generic` (ultimately `algo::clean`'s `SortLeaves`), so
/// this reproduces the same emission order `decode_generic` +
/// `collect_leaves` would have, one `read_leaf` at a time.
fn visit_generic<F: AddressFamily, S: Stream>(
    stream: &mut S,
    header: &FileHeader,
    visitor: &mut impl FnMut(IpBlock) -> bool,
    wrap: impl Fn(F, u8) -> IpBlock,
) -> Result<()> {
    let node_count = header::read_u32(stream, header)? as usize;
    let leaf_count = header::read_u32(stream, header)? as usize;

    let skip = (node_count as u64)
        .checked_mul(NODE_RECORD_LEN)
        .ok_or(IpSetError::Corrupt)?;
    let root_fields_len = 4 + 1u64;
    let needed = (leaf_count as u64)
        .checked_mul(LEAF_RECORD_LEN)
        .and_then(|l| l.checked_add(skip))
        .and_then(|body| body.checked_add(root_fields_len))
        .ok_or(IpSetError::Corrupt)?;
    let cur = stream.stream_position().map_err(|_| IpSetError::FileIo)?;
    let end = stream.seek(SeekFrom::End(0)).map_err(|_| IpSetError::FileIo)?;
    stream.seek(SeekFrom::Start(cur)).map_err(|_| IpSetError::FileIo)?;
    if end.saturating_sub(cur) < needed {
        if node_count == 0 && leaf_count == 0 {
            return Ok(());
        }
        return Err(IpSetError::Corrupt);
    }

    // Skip root_index/root_is_leaf (irrelevant here — the leaf pool alone
    // carries every block) then the node pool.
    stream
        .seek(SeekFrom::Current(root_fields_len as i64 + skip as i64))
        .map_err(|_| IpSetError::FileIo)?;

    for _ in 0..leaf_count {
        let leaf = read_leaf::<F, S>(stream, header)?;
        if !visitor(wrap(leaf.ip, leaf.prefix)) {
            return Ok(());
        }
    }
    Ok(())
}

pub fn visit_v4<S: Stream>(
    stream: &mut S,
    header: &FileHeader,
    visitor: &mut impl FnMut(IpBlock) -> bool,
) -> Result<()> {
    visit_generic::<u32, S>(stream, header, visitor, IpBlock::V4)
}

pub fn visit_v6<S: Stream>(
    stream: &mut S,
    header: &FileHeader,
    visitor: &mut impl FnMut(IpBlock) -> bool,
) -> Result<()> {
    visit_generic::<V6Addr, S>(stream, header, visitor, IpBlock::V6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::collect_leaves;
    use crate::stream::MemStream;
    use std::io::Seek;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> u32 {
        u32::from_be_bytes([a, b, c, d])
    }

    #[test]
    fn round_trips_v4_tree() {
        let mut t: RadixTree<u32> = RadixTree::new();
        t.insert(v4(10, 0, 0, 0), 24).unwrap();
        t.insert(v4(192, 168, 0, 0), 16).unwrap();

        let mut s = MemStream::new();
        encode_v4(&mut s, &t).unwrap();
        s.seek(std::io::SeekFrom::Start(0)).unwrap();
        let h = header::read_header(&mut s).unwrap();
        let back = decode_v4(&mut s, &h).unwrap();

        assert!(back.contains(v4(10, 0, 0, 5)));
        assert!(back.contains(v4(192, 168, 5, 5)));
        assert!(!back.contains(v4(172, 16, 0, 0)));
    }

    #[test]
    fn round_trips_v6_tree() {
        let mut t: RadixTree<V6Addr> = RadixTree::new();
        t.insert(V6Addr::new(0x2001_0db8_0000_0000, 0), 32).unwrap();

        let mut s = MemStream::new();
        encode_v6(&mut s, &t).unwrap();
        s.seek(std::io::SeekFrom::Start(0)).unwrap();
        let h = header::read_header(&mut s).unwrap();
        let back = decode_v6(&mut s, &h).unwrap();

        assert_eq!(collect_leaves(&back), collect_leaves(&t));
    }

    /// spec.md §9 Open Question: a v3 stream that's too short to hold the
    /// body its own counts imply, but whose counts are both zero, decodes
    /// as an empty set via the ordinary buffered path (not just the mmap
    /// fast path `mmap.rs` also covers).
    #[test]
    fn short_stream_with_zero_counts_decodes_as_empty() {
        let mut s = MemStream::new();
        header::write_header(&mut s, 3, Repr::V4, 0).unwrap();
        header::write_u32(&mut s, 0).unwrap(); // node_count
        header::write_u32(&mut s, 0).unwrap(); // leaf_count
        // Stream ends here: root_index/root_is_leaf are never written.
        s.seek(std::io::SeekFrom::Start(0)).unwrap();
        let h = header::read_header(&mut s).unwrap();
        let back = decode_v4(&mut s, &h).unwrap();
        assert!(back.is_empty());
    }

    /// The same short-stream tolerance applies to the streaming visitor.
    #[test]
    fn short_stream_with_zero_counts_visits_nothing() {
        let mut s = MemStream::new();
        header::write_header(&mut s, 3, Repr::V4, 0).unwrap();
        header::write_u32(&mut s, 0).unwrap();
        header::write_u32(&mut s, 0).unwrap();
        s.seek(std::io::SeekFrom::Start(0)).unwrap();
        let h = header::read_header(&mut s).unwrap();
        let mut calls = 0;
        visit_v4(&mut s, &h, &mut |_| {
            calls += 1;
            true
        })
        .unwrap();
        assert_eq!(calls, 0);
    }

    /// A short stream whose counts are *not* both zero is still corrupt.
    #[test]
    fn short_stream_with_nonzero_counts_is_corrupt() {
        let mut s = MemStream::new();
        header::write_header(&mut s, 3, Repr::V4, 0).unwrap();
        header::write_u32(&mut s, 1).unwrap(); // node_count
        header::write_u32(&mut s, 0).unwrap(); // leaf_count
        // No node/leaf/root bytes follow.
        s.seek(std::io::SeekFrom::Start(0)).unwrap();
        let h = header::read_header(&mut s).unwrap();
        assert_eq!(decode_v4(&mut s, &h).unwrap_err(), IpSetError::Corrupt);
    }
}
