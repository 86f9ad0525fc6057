//! A single iterator type servicing both the Flat and Radix in-memory
//! variants (spec.md §4.6, component C6).
//!
//! Grounded on `examples/NLnetLabs-rotonda-store/src/query.rs`'s small
//! `QueryResult`/`MatchOptions` enums for "knobs that change what an
//! otherwise-uniform traversal yields" — here the CIDR-vs-address mode and
//! the [`V6Policy`] projection play that role. Because [`crate::algo::clean`]
//! always leaves a radix tree's leaf pool sorted and hole-free (see that
//! module's grounding note), the "Radix path" the spec describes as a
//! cursor over `leaves[1..leaf_count)` collapses here to a linear scan over
//! a leaf snapshot taken at construction time — no node-walk state machine
//! is needed.

use crate::af::{AddressFamily, IpBlock, V6Addr, V6Policy};
use crate::algo::collect_leaves;
use crate::error::{IpSetError, Result};
use crate::flat::FlatV4;
use crate::radix::RadixTree;

/// Whether an iterator yields maximal CIDR blocks or individual addresses
/// (spec.md §4.6: "a CIDR-or-addresses mode").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CidrMode {
    Cidr,
    Address,
}

/// Expands a `(ip, prefix)` CIDR block into its individual addresses, for
/// [`CidrMode::Address`] iteration.
enum AddrExpand<F: AddressFamily> {
    Done,
    Remaining { next: F, last: F },
}

impl<F: AddressFamily> AddrExpand<F> {
    fn new(ip: F, prefix: u8) -> Self {
        let base = ip.mask(prefix);
        let last = if prefix >= F::BITS {
            base
        } else {
            F::from_u128(base.to_u128() | ((1u128 << (F::BITS - prefix)) - 1))
        };
        AddrExpand::Remaining { next: base, last }
    }

    fn next(&mut self) -> Option<F> {
        match *self {
            AddrExpand::Done => None,
            AddrExpand::Remaining { next, last } => {
                let out = next;
                *self = if next == last {
                    AddrExpand::Done
                } else {
                    AddrExpand::Remaining {
                        next: next.checked_add_one().expect("bounded by `last`"),
                        last,
                    }
                };
                Some(out)
            }
        }
    }
}

/// Iterates a single address family's leaf list (radix) or `cidr_iter`
/// (flat), honoring [`CidrMode`]. The projection step from raw `(F,
/// prefix)` pairs to [`IpBlock`]/[`V6Policy`] happens one layer up in
/// [`SetIter`], since it needs to see both families at once.
enum Source {
    V4Radix(std::vec::IntoIter<(u32, u8)>),
    V4Flat(Vec<(u32, u8)>, usize),
    V6Radix(std::vec::IntoIter<(V6Addr, u8)>),
}

impl Source {
    fn next_block(&mut self) -> Option<IpBlock> {
        match self {
            Source::V4Radix(it) => it.next().map(|(ip, p)| IpBlock::V4(ip, p)),
            Source::V4Flat(v, i) => {
                let b = v.get(*i).copied();
                *i += 1;
                b.map(|(ip, p)| IpBlock::V4(ip, p))
            }
            Source::V6Radix(it) => it.next().map(|(ip, p)| IpBlock::V6(ip, p)),
        }
    }
}

/// The CIDR/address iterator over one or two address families (spec.md
/// §4.6). Constructed by [`crate::set::IpSet`], never directly.
pub struct SetIter {
    mode: CidrMode,
    policy: V6Policy,
    v4: Option<Source>,
    v6: Option<Source>,
    expand_v4: Option<AddrExpand<u32>>,
    expand_v6: Option<AddrExpand<V6Addr>>,
}

impl SetIter {
    /// A set backed by [`FlatV4`] has no V6 content by construction; `v6`
    /// is `None`.
    pub(crate) fn from_flat(flat: &FlatV4, mode: CidrMode, policy: V6Policy) -> Self {
        let blocks: Vec<(u32, u8)> = flat.cidr_iter().collect();
        SetIter {
            mode,
            policy,
            v4: Some(Source::V4Flat(blocks, 0)),
            v6: None,
            expand_v4: None,
            expand_v6: None,
        }
    }

    /// A set backed by a V4 [`RadixTree`].
    pub(crate) fn from_radix_v4(tree: &RadixTree<u32>, mode: CidrMode, policy: V6Policy) -> Result<Self> {
        let mut leaves = collect_leaves(tree);
        leaves.sort_by_key(|&(ip, _)| ip);
        Ok(SetIter {
            mode,
            policy,
            v4: Some(Source::V4Radix(leaves.into_iter())),
            v6: None,
            expand_v4: None,
            expand_v6: None,
        })
    }

    /// A set backed by a V6 [`RadixTree`] (spec.md §4.6's "cursor starts at
    /// the leftmost leaf under `::ffff:0:0/96`" requirement for `AsV4`/
    /// `OnlyV6` is implemented by filtering at projection time below, since
    /// the underlying leaf list is already fully sorted).
    pub(crate) fn from_radix_v6(tree: &RadixTree<V6Addr>, mode: CidrMode, policy: V6Policy) -> Result<Self> {
        if matches!(policy, V6Policy::AsV4 | V6Policy::Ignore) {
            // These policies only ever emit V4 blocks (or nothing); a
            // RequireClean-like guard isn't needed since collect_leaves
            // tolerates dirtiness, but iteration over a V6-only tree with
            // Ignore/AsV4 is legitimately allowed to yield zero items.
        }
        let mut leaves = collect_leaves(tree);
        leaves.sort_by_key(|&(ip, _)| ip);
        Ok(SetIter {
            mode,
            policy,
            v4: None,
            v6: Some(Source::V6Radix(leaves.into_iter())),
            expand_v4: None,
            expand_v6: None,
        })
    }

    /// A set holding both IPv4 and IPv6 content at once (spec.md §4.6's
    /// `Mix` policy: each family's blocks are yielded in their own
    /// ascending order, V4 first, not merged into a single numeric
    /// ordering across families).
    pub(crate) fn from_mixed(
        mut v4_leaves: Vec<(u32, u8)>,
        mut v6_leaves: Vec<(V6Addr, u8)>,
        mode: CidrMode,
        policy: V6Policy,
    ) -> Self {
        v4_leaves.sort_by_key(|&(ip, _)| ip);
        v6_leaves.sort_by_key(|&(ip, _)| ip);
        SetIter {
            mode,
            policy,
            v4: Some(Source::V4Radix(v4_leaves.into_iter())),
            v6: Some(Source::V6Radix(v6_leaves.into_iter())),
            expand_v4: None,
            expand_v6: None,
        }
    }

    fn next_raw(&mut self) -> Option<IpBlock> {
        loop {
            if let Some(exp) = &mut self.expand_v4 {
                if let Some(ip) = exp.next() {
                    return Some(IpBlock::V4(ip, 32));
                }
                self.expand_v4 = None;
            }
            if let Some(exp) = &mut self.expand_v6 {
                if let Some(ip) = exp.next() {
                    return Some(IpBlock::V6(ip, 128));
                }
                self.expand_v6 = None;
            }

            let block = if let Some(src) = &mut self.v4 {
                match src.next_block() {
                    Some(b) => Some(b),
                    None => {
                        self.v4 = None;
                        continue;
                    }
                }
            } else if let Some(src) = &mut self.v6 {
                match src.next_block() {
                    Some(b) => Some(b),
                    None => {
                        self.v6 = None;
                        continue;
                    }
                }
            } else {
                None
            };

            let block = block?;
            if self.mode == CidrMode::Address {
                match block {
                    IpBlock::V4(ip, p) => {
                        self.expand_v4 = Some(AddrExpand::new(ip, p));
                    }
                    IpBlock::V6(ip, p) => {
                        self.expand_v6 = Some(AddrExpand::new(ip, p));
                    }
                }
                continue;
            }
            return Some(block);
        }
    }

    /// Applies the [`V6Policy`] projection to a raw block, possibly
    /// dropping it or reinterpreting its family (spec.md §4.6).
    fn project(&self, block: IpBlock) -> Option<IpBlock> {
        project_block(self.policy, block)
    }
}

/// Applies a [`V6Policy`] projection to a raw `(ip, prefix)` block,
/// possibly dropping it or reinterpreting its family (spec.md §4.6). A
/// free function so [`crate::codec::process_stream`] can apply the same
/// projection to blocks read directly off the wire, without a [`SetIter`].
pub(crate) fn project_block(policy: V6Policy, block: IpBlock) -> Option<IpBlock> {
    match (policy, block) {
        (V6Policy::Mix, b) => Some(b),
        (V6Policy::Ignore, IpBlock::V4(..)) => Some(block),
        (V6Policy::Ignore, IpBlock::V6(..)) => None,
        (V6Policy::OnlyV6, IpBlock::V6(..)) => Some(block),
        (V6Policy::OnlyV6, IpBlock::V4(..)) => None,
        (V6Policy::AsV4, IpBlock::V4(..)) => Some(block),
        (V6Policy::AsV4, IpBlock::V6(ip, prefix)) => {
            if prefix >= 96 && ip.mask(96) == V6Addr::V4_MAPPED_PREFIX {
                Some(IpBlock::V4(ip.lo as u32, prefix - 96))
            } else {
                None
            }
        }
        (V6Policy::Force, IpBlock::V6(..)) => Some(block),
        (V6Policy::Force, IpBlock::V4(ip, prefix)) => {
            let v6 = V6Addr::new(0, 0xffff_0000_0000 | ip as u64);
            Some(IpBlock::V6(v6, prefix + 96))
        }
    }
}

/// Expands a single (already-projected) CIDR block into its individual
/// addresses, calling `visitor` once per address; stops early and returns
/// `false` the moment `visitor` does. Lets [`crate::codec::process_stream`]
/// honor [`CidrMode::Address`] while still visiting one wire record at a
/// time rather than collecting into a [`SetIter`].
pub(crate) fn for_each_address(block: IpBlock, mut visitor: impl FnMut(IpBlock) -> bool) -> bool {
    match block {
        IpBlock::V4(ip, prefix) => {
            let mut expand = AddrExpand::new(ip, prefix);
            while let Some(a) = expand.next() {
                if !visitor(IpBlock::V4(a, 32)) {
                    return false;
                }
            }
        }
        IpBlock::V6(ip, prefix) => {
            let mut expand = AddrExpand::new(ip, prefix);
            while let Some(a) = expand.next() {
                if !visitor(IpBlock::V6(a, 128)) {
                    return false;
                }
            }
        }
    }
    true
}

impl Iterator for SetIter {
    type Item = IpBlock;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = self.next_raw()?;
            if let Some(projected) = self.project(raw) {
                return Some(projected);
            }
        }
    }
}

/// Validates that `tree` is clean enough to iterate in Radix mode (spec.md
/// §4.6: "a pointer to the set, which must be clean for Radix"). A tree
/// with at most one leaf is trivially clean.
pub(crate) fn require_clean<F: AddressFamily>(tree: &RadixTree<F>, is_clean: bool) -> Result<()> {
    if is_clean {
        Ok(())
    } else {
        Err(IpSetError::RequireClean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> u32 {
        u32::from_be_bytes([a, b, c, d])
    }

    #[test]
    fn radix_cidr_iteration_is_sorted() {
        let mut t: RadixTree<u32> = RadixTree::new();
        t.insert(v4(10, 0, 1, 0), 24).unwrap();
        t.insert(v4(10, 0, 0, 0), 24).unwrap();
        algo::clean(&mut t).unwrap();
        let it = SetIter::from_radix_v4(&t, CidrMode::Cidr, V6Policy::Mix).unwrap();
        let blocks: Vec<_> = it.collect();
        assert_eq!(blocks, vec![IpBlock::V4(v4(10, 0, 0, 0), 23)]);
    }

    #[test]
    fn address_mode_expands_block() {
        let mut t: RadixTree<u32> = RadixTree::new();
        t.insert(v4(10, 0, 0, 4), 30).unwrap();
        let it = SetIter::from_radix_v4(&t, CidrMode::Address, V6Policy::Mix).unwrap();
        let addrs: Vec<_> = it.collect();
        assert_eq!(
            addrs,
            vec![
                IpBlock::V4(v4(10, 0, 0, 4), 32),
                IpBlock::V4(v4(10, 0, 0, 5), 32),
                IpBlock::V4(v4(10, 0, 0, 6), 32),
                IpBlock::V4(v4(10, 0, 0, 7), 32),
            ]
        );
    }

    #[test]
    fn as_v4_projects_mapped_prefix_and_skips_rest() {
        let mut t: RadixTree<V6Addr> = RadixTree::new();
        t.insert(V6Addr::new(0, 0xffff_0000_0000 | v4(10, 0, 0, 0) as u64), 120)
            .unwrap();
        t.insert(V6Addr::new(0x2001_0db8_0000_0000, 0), 32).unwrap();
        let it = SetIter::from_radix_v6(&t, CidrMode::Cidr, V6Policy::AsV4).unwrap();
        let blocks: Vec<_> = it.collect();
        assert_eq!(blocks, vec![IpBlock::V4(v4(10, 0, 0, 0), 24)]);
    }

    #[test]
    fn only_v6_skips_v4_mapped_block() {
        let mut t: RadixTree<V6Addr> = RadixTree::new();
        t.insert(V6Addr::new(0, 0xffff_0000_0000 | v4(10, 0, 0, 0) as u64), 120)
            .unwrap();
        t.insert(V6Addr::new(0x2001_0db8_0000_0000, 0), 32).unwrap();
        let it = SetIter::from_radix_v6(&t, CidrMode::Cidr, V6Policy::OnlyV6).unwrap();
        let blocks: Vec<_> = it.collect();
        assert_eq!(blocks, vec![IpBlock::V6(V6Addr::new(0x2001_0db8_0000_0000, 0), 32)]);
    }

    #[test]
    fn ignore_drops_v6_in_mixed_source() {
        let mut t: RadixTree<u32> = RadixTree::new();
        t.insert(v4(10, 0, 0, 0), 24).unwrap();
        let it = SetIter::from_radix_v4(&t, CidrMode::Cidr, V6Policy::Ignore).unwrap();
        let blocks: Vec<_> = it.collect();
        assert_eq!(blocks, vec![IpBlock::V4(v4(10, 0, 0, 0), 24)]);
    }
}
