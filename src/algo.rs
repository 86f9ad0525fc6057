//! Algorithms invoked by [`crate::set::IpSet`] (spec.md §4.5, component C5):
//! Clean (CombineAdjacent/Compact/SortLeaves), Mask/MaskAndFill, set algebra,
//! Flat↔Radix and IPv4↔IPv6 conversion, and range→CIDR decomposition.
//!
//! **Grounding note on Clean.** The textual algorithm in spec.md §4.5
//! splices leaves in place inside the arena (merge right-hand siblings into
//! the left, then compact holes, then sort the survivors). This
//! implementation reaches the same end state — a minimal, sorted, hole-free
//! leaf pool — by extracting every leaf the tree currently holds (a tree is
//! *always* a disjoint cover regardless of dirtiness: Insert's `Ok`/`Subset`
//! handling already prevents overlapping or nested leaves from ever being
//! stored, so only adjacency-merging/compaction/sortedness can be "dirty"),
//! running the merge pass on that flat list to a fixpoint, and reinserting
//! the result in ascending order into fresh arenas. Because the merged list
//! is already disjoint and maximal, reinsertion never re-triggers the
//! `Subset` widen-in-place path, so the rebuilt leaf pool comes out
//! hole-free and address-sorted for free — one pass stands in for
//! CombineAdjacent+Compact+SortLeaves. Noted in DESIGN.md as a deliberate
//! simplification: same final state, different route to it.
//!
//! Range/mask arithmetic is done in `u128` (spec.md §9: `AddressFamily`
//! polymorphism — [`crate::af::AddressFamily::to_u128`]/`from_u128` let one
//! generic implementation serve both the 32-bit and 128-bit address
//! widths), grounded on the range→CIDR decomposition in
//! `examples/other_examples/41879be1_Ukko-Ylijumala-miniutils-rs__src-iptools-collapsing.rs.rs`
//! (`range_to_cidrs`/`mask_u128`), reimplemented against `AddressFamily`
//! instead of `std::net::IpAddr`.

use std::collections::BTreeSet;

use crate::af::{AddressFamily, V6Addr};
use crate::error::{IpSetError, Result};
use crate::flat::FlatV4;
use crate::radix::RadixTree;

/// Walks every leaf currently reachable from the root, once per distinct
/// leaf (repeated child slots are skipped; invariant 5 guarantees the
/// leftmost slot is always the "real" reference). Tolerates a dirty tree:
/// correctness here never depended on sortedness or merged-ness, only on
/// the no-overlap invariant Insert/Remove already maintain unconditionally.
pub(crate) fn collect_leaves<F: AddressFamily>(tree: &RadixTree<F>) -> Vec<(F, u8)> {
    let mut out = Vec::new();
    if tree.is_empty() {
        return out;
    }
    let root = tree.root();
    walk(tree, root.index, root.is_leaf, &mut out);
    out
}

fn walk<F: AddressFamily>(tree: &RadixTree<F>, index: u32, is_leaf: bool, out: &mut Vec<(F, u8)>) {
    if is_leaf {
        let leaf = tree.leaves().get(index).expect("live leaf index");
        out.push((leaf.ip, leaf.prefix));
        return;
    }
    let node = tree.nodes().get(index).expect("live node index");
    for s in 0..16u8 {
        if node.children[s as usize] != 0 && !node.is_repeated_slot(s) {
            walk(tree, node.children[s as usize], node.is_leaf_slot(s), out);
        }
    }
}

/// One merge pass: sort ascending, then fold every pair of siblings that
/// share a parent block into that parent (spec.md §4.5, "CombineAdjacent").
/// Returns whether anything was merged, so the caller can iterate to a
/// fixpoint (a merge can expose a new merge one level up).
fn merge_once<F: AddressFamily>(leaves: &mut Vec<(F, u8)>) -> bool {
    leaves.sort_by_key(|&(ip, _)| ip);
    let mut out = Vec::with_capacity(leaves.len());
    let mut merged_any = false;
    let mut i = 0;
    while i < leaves.len() {
        if i + 1 < leaves.len() {
            let (ip_a, p_a) = leaves[i];
            let (ip_b, p_b) = leaves[i + 1];
            if p_a == p_b && p_a > 0 {
                let parent = p_a - 1;
                if ip_a.is_masked(parent) && ip_b == ip_a.flip_bit(parent) {
                    out.push((ip_a.mask(parent), parent));
                    merged_any = true;
                    i += 2;
                    continue;
                }
            }
        }
        out.push(leaves[i]);
        i += 1;
    }
    *leaves = out;
    merged_any
}

fn combine_adjacent_list<F: AddressFamily>(mut leaves: Vec<(F, u8)>) -> Vec<(F, u8)> {
    while merge_once(&mut leaves) {}
    leaves
}

/// Rebuilds `tree` from a disjoint, maximally-merged leaf list, ascending.
fn rebuild<F: AddressFamily>(tree: &mut RadixTree<F>, leaves: Vec<(F, u8)>) -> Result<()> {
    let mut fresh = RadixTree::new();
    for (ip, prefix) in leaves {
        fresh.insert(ip, prefix)?;
    }
    *tree = fresh;
    Ok(())
}

/// CombineAdjacent (spec.md §4.5): merge every pair of leaves that share a
/// common parent block until no more merges are possible.
pub fn combine_adjacent<F: AddressFamily>(tree: &mut RadixTree<F>) -> Result<()> {
    let leaves = combine_adjacent_list(collect_leaves(tree));
    rebuild(tree, leaves)
}

/// Compact (spec.md §4.5): a no-op here, since [`combine_adjacent`]'s
/// rebuild-from-scratch already leaves both arenas hole-free (every insert
/// during rebuild only ever acquires from the unused tail, having been
/// handed an already-disjoint, already-merged list — see the module-level
/// grounding note).
pub fn compact<F: AddressFamily>(_tree: &mut RadixTree<F>) {}

/// SortLeaves (spec.md §4.5): likewise a no-op — rebuilding from an
/// ascending-sorted list already fills the leaf pool in address order.
pub fn sort_leaves<F: AddressFamily>(_tree: &mut RadixTree<F>) {}

/// Clean (spec.md §4.5): CombineAdjacent, then Compact, then SortLeaves.
pub fn clean<F: AddressFamily>(tree: &mut RadixTree<F>) -> Result<()> {
    combine_adjacent(tree)?;
    compact(tree);
    sort_leaves(tree);
    Ok(())
}

/// Masks `v` (an address of width `bits`, held in the low `bits` bits of a
/// `u128`) down to its top `prefix` bits.
fn mask_u128(v: u128, bits: u8, prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else if prefix >= bits {
        v
    } else {
        let shift = bits - prefix;
        (v >> shift) << shift
    }
}

/// Shared expansion for Mask/MaskAndFill (spec.md §4.5): for every occupied
/// block of width `2^(AW-p_mask)`, record its base. A leaf coarser than
/// `p_mask` spans `2^(p_mask-leaf.prefix)` such blocks; one no coarser than
/// `p_mask` touches exactly one.
fn touched_mask_blocks<F: AddressFamily>(leaves: &[(F, u8)], p_mask: u8) -> BTreeSet<u128> {
    let bits = F::BITS;
    let mut set = BTreeSet::new();
    for &(ip, prefix) in leaves {
        let ipv = ip.to_u128();
        if prefix >= p_mask {
            set.insert(mask_u128(ipv, bits, p_mask));
        } else {
            let count: u128 = 1u128 << (p_mask - prefix);
            let block_size: u128 = 1u128 << (bits - p_mask);
            let base0 = mask_u128(ipv, bits, prefix);
            for i in 0..count {
                set.insert(base0 + i * block_size);
            }
        }
    }
    set
}

/// Mask(p_mask) (spec.md §4.5): keep a single address per occupied
/// `p_mask`-width block.
pub fn mask<F: AddressFamily>(tree: &mut RadixTree<F>, p_mask: u8) -> Result<()> {
    if p_mask > F::BITS {
        return Err(IpSetError::Prefix);
    }
    let leaves = collect_leaves(tree);
    let bases = touched_mask_blocks(&leaves, p_mask);
    let singletons: Vec<(F, u8)> = bases
        .into_iter()
        .map(|b| (F::from_u128(b), F::BITS))
        .collect();
    rebuild(tree, combine_adjacent_list(singletons))
}

/// MaskAndFill(p_mask) (spec.md §4.5): keep the whole occupied `p_mask`-width
/// block rather than a singleton.
pub fn mask_and_fill<F: AddressFamily>(tree: &mut RadixTree<F>, p_mask: u8) -> Result<()> {
    if p_mask > F::BITS {
        return Err(IpSetError::Prefix);
    }
    let leaves = collect_leaves(tree);
    let bases = touched_mask_blocks(&leaves, p_mask);
    let blocks: Vec<(F, u8)> = bases.into_iter().map(|b| (F::from_u128(b), p_mask)).collect();
    rebuild(tree, combine_adjacent_list(blocks))
}

/// Union(A, B) (spec.md §4.5): walk B, inserting each block into A.
pub fn union<F: AddressFamily>(a: &mut RadixTree<F>, b: &RadixTree<F>) -> Result<()> {
    for (ip, prefix) in collect_leaves(b) {
        a.insert(ip, prefix)?;
    }
    Ok(())
}

/// Subtract(A, B) (spec.md §4.5): walk B, removing each block from A.
pub fn subtract<F: AddressFamily>(a: &mut RadixTree<F>, b: &RadixTree<F>) -> Result<()> {
    for (ip, prefix) in collect_leaves(b) {
        a.remove(ip, prefix)?;
    }
    Ok(())
}

fn to_ranges<F: AddressFamily>(leaves: &[(F, u8)]) -> Vec<(u128, u128)> {
    let bits = F::BITS;
    let mut v: Vec<(u128, u128)> = leaves
        .iter()
        .map(|&(ip, prefix)| {
            let base = ip.to_u128();
            let block = if prefix >= bits {
                1u128
            } else {
                1u128 << (bits - prefix)
            };
            (base, base + block - 1)
        })
        .collect();
    v.sort_unstable();
    v
}

/// Two-pointer overlap merge over two sorted, disjoint range lists
/// (spec.md §4.5, "Intersect"): "maintain the current A-range ...
/// advancing whichever side ends first."
fn intersect_ranges(a: &[(u128, u128)], b: &[(u128, u128)]) -> Vec<(u128, u128)> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let (a0, a1) = a[i];
        let (b0, b1) = b[j];
        let lo = a0.max(b0);
        let hi = a1.min(b1);
        if lo <= hi {
            out.push((lo, hi));
        }
        if a1 < b1 {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Intersect(A, B) (spec.md §4.5): overlap of A and B's address ranges,
/// decomposed back into maximal CIDR blocks.
pub fn intersect<F: AddressFamily>(a: &mut RadixTree<F>, b: &RadixTree<F>) -> Result<()> {
    let ra = to_ranges(&collect_leaves(a));
    let rb = to_ranges(&collect_leaves(b));
    let mut blocks = Vec::new();
    for (begin, end) in intersect_ranges(&ra, &rb) {
        blocks.extend(range_to_cidrs(F::from_u128(begin), F::from_u128(end)));
    }
    rebuild(a, combine_adjacent_list(blocks))
}

/// Decomposes the inclusive range `[begin, end]` into the minimal sequence
/// of maximal CIDR blocks (spec.md §6, `InsertRange`/`RemoveRange`):
/// greedy, picking at each step the largest block starting at the current
/// address that is both alignment-compatible and doesn't overshoot `end`.
pub fn range_to_cidrs<F: AddressFamily>(begin: F, end: F) -> Vec<(F, u8)> {
    let bits = F::BITS;
    let endv = end.to_u128();
    let mut start = begin.to_u128();
    let mut out = Vec::new();

    if bits == 128 && start == 0 && endv == u128::MAX {
        return vec![(F::zero(), 0)];
    }
    if start > endv {
        return out;
    }

    loop {
        let tz = if start == 0 {
            bits as u32
        } else {
            start.trailing_zeros().min(bits as u32)
        };
        let remaining = endv - start + 1;
        let max_fit = 127u32.saturating_sub(remaining.leading_zeros());
        let block_bits = tz.min(max_fit);
        let prefix = bits - block_bits as u8;
        out.push((F::from_u128(start), prefix));

        if block_bits >= 128 {
            break;
        }
        let block_size: u128 = 1u128 << block_bits;
        match start.checked_add(block_size) {
            Some(v) if v <= endv => start = v,
            _ => break,
        }
    }
    out
}

/// Radix→Flat (spec.md §4.5): iterate the radix leaves and set each block
/// in a fresh [`FlatV4`].
pub fn radix_to_flat(tree: &RadixTree<u32>) -> FlatV4 {
    let mut flat = FlatV4::new();
    for (ip, prefix) in collect_leaves(tree) {
        flat.insert_cidr(ip, prefix);
    }
    flat
}

/// Flat→Radix (spec.md §4.5): iterate the flat bitmap's maximal CIDR blocks
/// and insert each into a fresh [`RadixTree`].
pub fn flat_to_radix(flat: &FlatV4) -> Result<RadixTree<u32>> {
    let mut tree = RadixTree::new();
    for (ip, prefix) in flat.cidr_iter() {
        tree.insert(ip, prefix)?;
    }
    Ok(tree)
}

/// IPv4→IPv6, in place conceptually (spec.md §4.5): every `(ip, prefix)`
/// becomes `(::ffff:0:0 | ip, prefix + 96)`.
pub fn convert_v4_to_v6(tree: &RadixTree<u32>) -> Result<RadixTree<V6Addr>> {
    let mut out = RadixTree::new();
    for (ip, prefix) in collect_leaves(tree) {
        let v6 = V6Addr::new(0, 0xffff_0000_0000 | ip as u64);
        out.insert(v6, prefix + 96)?;
    }
    Ok(out)
}

/// IPv6→IPv4 (spec.md §4.5): legal only when every leaf lies within
/// `::ffff:0:0/96`; returns [`IpSetError::Ipv6`] otherwise.
pub fn convert_v6_to_v4(tree: &RadixTree<V6Addr>) -> Result<RadixTree<u32>> {
    let mut out = RadixTree::new();
    for (ip, prefix) in collect_leaves(tree) {
        if prefix < 96 || ip.mask(96) != V6Addr::V4_MAPPED_PREFIX {
            return Err(IpSetError::Ipv6);
        }
        out.insert(ip.lo as u32, prefix - 96)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> u32 {
        u32::from_be_bytes([a, b, c, d])
    }

    #[test]
    fn clean_merges_adjacent_slash24s() {
        let mut t: RadixTree<u32> = RadixTree::new();
        t.insert(v4(10, 0, 0, 0), 24).unwrap();
        t.insert(v4(10, 0, 1, 0), 24).unwrap();
        clean(&mut t).unwrap();
        let leaves = collect_leaves(&t);
        assert_eq!(leaves, vec![(v4(10, 0, 0, 0), 23)]);
    }

    #[test]
    fn clean_is_order_independent() {
        let mut a: RadixTree<u32> = RadixTree::new();
        a.insert(v4(10, 0, 1, 0), 24).unwrap();
        a.insert(v4(10, 0, 0, 0), 24).unwrap();
        a.insert(v4(10, 0, 2, 0), 24).unwrap();
        clean(&mut a).unwrap();

        let mut b: RadixTree<u32> = RadixTree::new();
        b.insert(v4(10, 0, 2, 0), 24).unwrap();
        b.insert(v4(10, 0, 0, 0), 24).unwrap();
        b.insert(v4(10, 0, 1, 0), 24).unwrap();
        clean(&mut b).unwrap();

        assert_eq!(collect_leaves(&a), collect_leaves(&b));
    }

    #[test]
    fn mask_keeps_one_address_per_block() {
        let mut t: RadixTree<u32> = RadixTree::new();
        t.insert(v4(10, 0, 0, 0), 22).unwrap();
        mask(&mut t, 24).unwrap();
        let leaves = collect_leaves(&t);
        assert_eq!(leaves.len(), 4);
        assert!(leaves.iter().all(|&(_, p)| p == 32));
    }

    #[test]
    fn mask_and_fill_keeps_whole_blocks() {
        let mut t: RadixTree<u32> = RadixTree::new();
        t.insert(v4(10, 0, 0, 0), 22).unwrap();
        mask_and_fill(&mut t, 24).unwrap();
        assert!(t.contains(v4(10, 0, 3, 200)));
        let leaves = collect_leaves(&t);
        assert_eq!(leaves, vec![(v4(10, 0, 0, 0), 22)]);
    }

    #[test]
    fn union_intersect_subtract() {
        let mut a: RadixTree<u32> = RadixTree::new();
        a.insert(v4(10, 0, 0, 0), 8).unwrap();
        a.insert(v4(11, 0, 0, 0), 8).unwrap();
        let mut b: RadixTree<u32> = RadixTree::new();
        b.insert(v4(10, 0, 0, 0), 16).unwrap();
        b.insert(v4(11, 255, 0, 0), 16).unwrap();

        let mut i = a.clone();
        intersect(&mut i, &b).unwrap();
        clean(&mut i).unwrap();
        assert_eq!(
            collect_leaves(&i),
            vec![(v4(10, 0, 0, 0), 16), (v4(11, 255, 0, 0), 16)]
        );

        let mut s = a.clone();
        subtract(&mut s, &b).unwrap();
        assert!(!s.contains(v4(10, 0, 5, 5)));
        assert!(s.contains(v4(10, 1, 5, 5)));

        let mut u: RadixTree<u32> = RadixTree::new();
        u.insert(v4(192, 168, 0, 0), 24).unwrap();
        union(&mut u, &b).unwrap();
        assert!(u.contains(v4(10, 0, 5, 5)));
        assert!(u.contains(v4(192, 168, 0, 5)));
    }

    #[test]
    fn range_to_cidrs_examples() {
        let out = range_to_cidrs(v4(172, 16, 0, 4), v4(172, 16, 0, 7));
        assert_eq!(out, vec![(v4(172, 16, 0, 4), 30)]);
    }

    #[test]
    fn range_to_cidrs_full_v6_space() {
        let out = range_to_cidrs(V6Addr::ZERO, V6Addr::new(u64::MAX, u64::MAX));
        assert_eq!(out, vec![(V6Addr::ZERO, 0)]);
    }

    #[test]
    fn v4_v6_roundtrip() {
        let mut t: RadixTree<u32> = RadixTree::new();
        t.insert(v4(10, 0, 0, 0), 24).unwrap();
        let v6 = convert_v4_to_v6(&t).unwrap();
        assert!(v6.contains(V6Addr::new(0, 0xffff_0000_0000 | v4(10, 0, 0, 5) as u64)));
        let back = convert_v6_to_v4(&v6).unwrap();
        assert_eq!(collect_leaves(&back), collect_leaves(&t));
    }

    #[test]
    fn v6_to_v4_rejects_non_mapped() {
        let mut t: RadixTree<V6Addr> = RadixTree::new();
        t.insert(V6Addr::new(0x2001_0db8_0000_0000, 0), 32).unwrap();
        assert_eq!(convert_v6_to_v4(&t).unwrap_err(), IpSetError::Ipv6);
    }
}
