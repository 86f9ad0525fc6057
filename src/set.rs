//! `IpSet`, the public facade (spec.md §3 "SetFacade", §6 "External
//! interfaces", component C4).
//!
//! Grounded on the facade role `examples/NLnetLabs-rotonda-store/src/tree.rs`'s
//! `TreeBitMap<AF, Meta>` plays over its own storage backend: one owning
//! type dispatching to the concrete in-memory representation, with
//! `Drop`-based resource release replacing the teacher's (and the original
//! SiLK library's) explicit destroy call (spec.md §5, SPEC_FULL.md §5).

use std::fs::File;
use std::net::IpAddr;
use std::path::Path;

use crate::af::{AddressFamily, IpBlock, V6Addr, V6Policy};
use crate::algo;
use crate::codec::{self, DecodedSet};
use crate::env::{self, IncoreFormat, RecordVersion};
use crate::error::{IpSetError, Result};
use crate::flat::FlatV4;
use crate::iter::{CidrMode, SetIter};
use crate::radix::RadixTree;
use crate::stats::{PoolStats, SetStats};
use crate::stream::{FileStream, Stream, WildcardIter};

/// How the IPv4 side is currently stored (spec.md §6, `SKIPSET_INCORE_FORMAT`).
enum V4Repr {
    Flat(FlatV4),
    Radix(RadixTree<u32>),
}

/// A set of IPv4 and/or IPv6 addresses and CIDR blocks (spec.md §3's
/// "SetFacade"). `Create` is [`IpSet::new`]; `Destroy` is `Drop`.
pub struct IpSet {
    support_ipv6: bool,
    v4: V4Repr,
    v6: Option<RadixTree<V6Addr>>,
    /// Whether `v4`/`v6`'s radix tree (if any) needs [`Self::clean`] before
    /// a Radix-path iterator may be constructed (spec.md §4.6).
    v4_dirty: bool,
    v6_dirty: bool,
    /// spec.md §3's `no_autoconvert`: when true, inserting an IPv6 address
    /// into a set not already IPv6-capable fails with
    /// [`IpSetError::Ipv6`] instead of promoting the set on demand.
    no_autoconvert: bool,
}

impl IpSet {
    /// `Create(support_ipv6)` (spec.md §6). The initial IPv4 representation
    /// follows `SKIPSET_INCORE_FORMAT` (spec.md §6).
    pub fn new(support_ipv6: bool) -> Self {
        let v4 = match env::incore_format() {
            IncoreFormat::Flat => V4Repr::Flat(FlatV4::new()),
            IncoreFormat::Radix => V4Repr::Radix(RadixTree::new()),
        };
        IpSet {
            support_ipv6,
            v4,
            v6: None,
            v4_dirty: false,
            v6_dirty: false,
            no_autoconvert: false,
        }
    }

    pub fn is_v6(&self) -> bool {
        self.support_ipv6
    }

    /// Sets spec.md §3's `no_autoconvert` flag: once true, inserting an
    /// IPv6 address into a set that isn't already IPv6-capable returns
    /// [`IpSetError::Ipv6`] instead of promoting the set in place.
    pub fn set_no_autoconvert(&mut self, no_autoconvert: bool) {
        self.no_autoconvert = no_autoconvert;
    }

    /// `ContainsV6` (spec.md §6): true if the set actually holds any IPv6
    /// content, as opposed to merely being v6-capable.
    pub fn contains_v6(&self) -> bool {
        self.v6.as_ref().is_some_and(|t| !t.is_empty())
    }

    /// Returns the IPv6 tree, promoting this set to IPv6-capable on demand
    /// unless `no_autoconvert` forbids it (spec.md §3).
    fn require_v6(&mut self) -> Result<&mut RadixTree<V6Addr>> {
        if !self.support_ipv6 {
            if self.no_autoconvert {
                return Err(IpSetError::Ipv6);
            }
            self.support_ipv6 = true;
        }
        Ok(self.v6.get_or_insert_with(RadixTree::new))
    }

    /// `Insert(ip, prefix)` (spec.md §6).
    pub fn insert(&mut self, ip: IpAddr, prefix: u8) -> Result<()> {
        match ip {
            IpAddr::V4(a) => self.insert_v4(u32::from(a), prefix),
            IpAddr::V6(a) => self.insert_v6(V6Addr::from(a), prefix),
        }
    }

    fn insert_v4(&mut self, ip: u32, prefix: u8) -> Result<()> {
        log::trace!("insert_v4 {:08x}/{}", ip, prefix);
        if prefix > 32 {
            return Err(IpSetError::Prefix);
        }
        match &mut self.v4 {
            V4Repr::Flat(f) => {
                f.insert_cidr(ip, prefix);
                Ok(())
            }
            V4Repr::Radix(t) => {
                t.insert(ip, prefix)?;
                self.v4_dirty = true;
                if t.take_leaves_grew() {
                    algo::clean(t)?;
                    self.v4_dirty = false;
                }
                Ok(())
            }
        }
    }

    fn insert_v6(&mut self, ip: V6Addr, prefix: u8) -> Result<()> {
        log::trace!("insert_v6 {:?}/{}", ip, prefix);
        if prefix > 128 {
            return Err(IpSetError::Prefix);
        }
        let t = self.require_v6()?;
        t.insert(ip, prefix)?;
        self.v6_dirty = true;
        if t.take_leaves_grew() {
            algo::clean(t)?;
            self.v6_dirty = false;
        }
        Ok(())
    }

    /// `Remove(ip, prefix)` (spec.md §6).
    pub fn remove(&mut self, ip: IpAddr, prefix: u8) -> Result<()> {
        log::trace!("remove {}/{}", ip, prefix);
        match ip {
            IpAddr::V4(a) => match &mut self.v4 {
                V4Repr::Flat(f) => {
                    f.remove_cidr(u32::from(a), prefix);
                    Ok(())
                }
                V4Repr::Radix(t) => {
                    t.remove(u32::from(a), prefix)?;
                    self.v4_dirty = true;
                    Ok(())
                }
            },
            IpAddr::V6(a) => {
                if let Some(t) = &mut self.v6 {
                    t.remove(V6Addr::from(a), prefix)?;
                    self.v6_dirty = true;
                }
                Ok(())
            }
        }
    }

    /// `RemoveAll` (spec.md §6).
    pub fn remove_all(&mut self) {
        log::debug!("remove_all");
        self.v4 = match env::incore_format() {
            IncoreFormat::Flat => V4Repr::Flat(FlatV4::new()),
            IncoreFormat::Radix => V4Repr::Radix(RadixTree::new()),
        };
        self.v6 = None;
        self.v4_dirty = false;
        self.v6_dirty = false;
    }

    /// `InsertWildcard(w)` (spec.md §6).
    pub fn insert_wildcard(&mut self, w: impl WildcardIter) -> Result<()> {
        log::trace!("insert_wildcard");
        for block in w {
            match block {
                IpBlock::V4(ip, p) => self.insert_v4(ip, p)?,
                IpBlock::V6(ip, p) => self.insert_v6(ip, p)?,
            }
        }
        Ok(())
    }

    /// `RemoveWildcard(w)` (spec.md §6).
    pub fn remove_wildcard(&mut self, w: impl WildcardIter) -> Result<()> {
        log::trace!("remove_wildcard");
        for block in w {
            let (ip, p) = match block {
                IpBlock::V4(ip, p) => (IpAddr::from(std::net::Ipv4Addr::from(ip)), p),
                IpBlock::V6(ip, p) => (std::net::IpAddr::from(std::net::Ipv6Addr::from(ip)), p),
            };
            self.remove(ip, p)?;
        }
        Ok(())
    }

    /// `InsertRange(begin, end)` (SPEC_FULL.md §4.5, "Range insertion").
    pub fn insert_range(&mut self, begin: IpAddr, end: IpAddr) -> Result<()> {
        log::trace!("insert_range {}..={}", begin, end);
        match (begin, end) {
            (IpAddr::V4(b), IpAddr::V4(e)) => {
                for (ip, p) in algo::range_to_cidrs(u32::from(b), u32::from(e)) {
                    self.insert_v4(ip, p)?;
                }
                Ok(())
            }
            (IpAddr::V6(b), IpAddr::V6(e)) => {
                for (ip, p) in algo::range_to_cidrs(V6Addr::from(b), V6Addr::from(e)) {
                    self.insert_v6(ip, p)?;
                }
                Ok(())
            }
            _ => Err(IpSetError::BadInput),
        }
    }

    /// `RemoveRange(begin, end)` (SPEC_FULL.md §6, added alongside
    /// `InsertRange` for symmetry).
    pub fn remove_range(&mut self, begin: IpAddr, end: IpAddr) -> Result<()> {
        log::trace!("remove_range {}..={}", begin, end);
        match (begin, end) {
            (IpAddr::V4(b), IpAddr::V4(e)) => {
                for (ip, p) in algo::range_to_cidrs(u32::from(b), u32::from(e)) {
                    self.remove(std::net::Ipv4Addr::from(ip).into(), p)?;
                }
                Ok(())
            }
            (IpAddr::V6(b), IpAddr::V6(e)) => {
                for (ip, p) in algo::range_to_cidrs(V6Addr::from(b), V6Addr::from(e)) {
                    self.remove(std::net::Ipv6Addr::from(ip).into(), p)?;
                }
                Ok(())
            }
            _ => Err(IpSetError::BadInput),
        }
    }

    /// `Contains(ip)` (spec.md §6).
    pub fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(a) => match &self.v4 {
                V4Repr::Flat(f) => f.contains(u32::from(a)),
                V4Repr::Radix(t) => t.contains(u32::from(a)),
            },
            IpAddr::V6(a) => self.v6.as_ref().is_some_and(|t| t.contains(V6Addr::from(a))),
        }
    }

    /// `ContainsAny(other)` (spec.md §6): true if any block of `other`
    /// overlaps a block of `self`, per address family.
    pub fn contains_any(&self, other: &IpSet) -> bool {
        let a4 = self.v4_leaves();
        let b4 = other.v4_leaves();
        if a4.iter().any(|&(aip, ap)| b4.iter().any(|&(bip, bp)| blocks_overlap(aip, ap, bip, bp))) {
            return true;
        }
        if let (Some(at), Some(bt)) = (&self.v6, &other.v6) {
            let a6 = algo::collect_leaves(at);
            let b6 = algo::collect_leaves(bt);
            return a6.iter().any(|&(aip, ap)| b6.iter().any(|&(bip, bp)| blocks_overlap(aip, ap, bip, bp)));
        }
        false
    }

    fn v4_leaves(&self) -> Vec<(u32, u8)> {
        match &self.v4 {
            V4Repr::Flat(f) => f.cidr_iter().collect(),
            V4Repr::Radix(t) => algo::collect_leaves(t),
        }
    }

    /// `Union(other)` (spec.md §4.5, §6).
    pub fn union(&mut self, other: &IpSet) -> Result<()> {
        let other_v4 = other.v4_leaves();
        log::debug!("union with {} v4 block(s)", other_v4.len());
        for (ip, prefix) in other_v4 {
            self.insert_v4(ip, prefix)?;
        }
        if let Some(ot) = &other.v6 {
            for (ip, prefix) in algo::collect_leaves(ot) {
                self.insert_v6(ip, prefix)?;
            }
        }
        Ok(())
    }

    /// `Subtract(other)` (spec.md §4.5, §6).
    pub fn subtract(&mut self, other: &IpSet) -> Result<()> {
        log::trace!("subtract");
        for (ip, prefix) in other.v4_leaves() {
            self.remove(IpAddr::from(std::net::Ipv4Addr::from(ip)), prefix)?;
        }
        if let Some(ot) = &other.v6 {
            for (ip, prefix) in algo::collect_leaves(ot) {
                self.remove(std::net::IpAddr::from(std::net::Ipv6Addr::from(ip)), prefix)?;
            }
        }
        Ok(())
    }

    /// `Intersect(other)` (spec.md §4.5, §6). Requires both sides to be
    /// (or become) Radix-backed for v4, since [`algo::intersect`] operates
    /// on [`RadixTree`].
    pub fn intersect(&mut self, other: &IpSet) -> Result<()> {
        log::trace!("intersect");
        let mut a = RadixTree::new();
        for (ip, prefix) in self.v4_leaves() {
            a.insert(ip, prefix)?;
        }
        let mut b = RadixTree::new();
        for (ip, prefix) in other.v4_leaves() {
            b.insert(ip, prefix)?;
        }
        algo::intersect(&mut a, &b)?;
        self.v4 = match env::incore_format() {
            IncoreFormat::Flat => V4Repr::Flat(algo::radix_to_flat(&a)),
            IncoreFormat::Radix => V4Repr::Radix(a),
        };
        self.v4_dirty = false;

        match (&mut self.v6, &other.v6) {
            (Some(av6), Some(bv6)) => {
                algo::intersect(av6, bv6)?;
                self.v6_dirty = false;
            }
            (Some(_), None) => self.v6 = None,
            _ => {}
        }
        Ok(())
    }

    /// `Mask(p_mask)` (spec.md §4.5, §6).
    pub fn mask(&mut self, p_mask: u8) -> Result<()> {
        log::trace!("mask /{}", p_mask);
        self.with_v4_radix(|t| algo::mask(t, p_mask))?;
        if let Some(t) = &mut self.v6 {
            algo::mask(t, p_mask)?;
            self.v6_dirty = false;
        }
        Ok(())
    }

    /// `MaskAndFill(p_mask)` (spec.md §4.5, §6).
    pub fn mask_and_fill(&mut self, p_mask: u8) -> Result<()> {
        log::trace!("mask_and_fill /{}", p_mask);
        self.with_v4_radix(|t| algo::mask_and_fill(t, p_mask))?;
        if let Some(t) = &mut self.v6 {
            algo::mask_and_fill(t, p_mask)?;
            self.v6_dirty = false;
        }
        Ok(())
    }

    /// Runs `f` against a Radix view of the V4 side, converting back to
    /// the original representation afterward (`Mask`/`MaskAndFill` are
    /// specified in terms of the leaf pool regardless of in-core format).
    fn with_v4_radix(&mut self, f: impl FnOnce(&mut RadixTree<u32>) -> Result<()>) -> Result<()> {
        match &mut self.v4 {
            V4Repr::Radix(t) => {
                f(t)?;
                self.v4_dirty = false;
                Ok(())
            }
            V4Repr::Flat(flat) => {
                let mut t = algo::flat_to_radix(flat)?;
                f(&mut t)?;
                *flat = algo::radix_to_flat(&t);
                Ok(())
            }
        }
    }

    /// `Clean` (spec.md §4.5, §6). A no-op for the Flat side, which is
    /// always canonical.
    pub fn clean(&mut self) -> Result<()> {
        log::trace!("clean");
        if let V4Repr::Radix(t) = &mut self.v4 {
            algo::clean(t)?;
            self.v4_dirty = false;
        }
        if let Some(t) = &mut self.v6 {
            algo::clean(t)?;
            self.v6_dirty = false;
        }
        Ok(())
    }

    /// `Convert(ip_version)` (spec.md §4.5, §6): `to_v6 == true` promotes
    /// IPv4 content in place to `::ffff:0:0/96`-mapped IPv6; `to_v6 ==
    /// false` demotes, failing with [`IpSetError::Ipv6`] if content exists
    /// outside that mapped block.
    pub fn convert(&mut self, to_v6: bool) -> Result<()> {
        log::debug!("convert to_v6={}", to_v6);
        if to_v6 {
            let v4_tree = match &self.v4 {
                V4Repr::Radix(t) => t.clone(),
                V4Repr::Flat(f) => algo::flat_to_radix(f)?,
            };
            let mapped = algo::convert_v4_to_v6(&v4_tree)?;
            let v6 = self.require_v6()?;
            algo::union(v6, &mapped)?;
            self.v4 = V4Repr::Flat(FlatV4::new());
            self.v6_dirty = true;
            Ok(())
        } else {
            let Some(v6) = &self.v6 else { return Ok(()) };
            let demoted = algo::convert_v6_to_v4(v6)?;
            match &mut self.v4 {
                V4Repr::Radix(t) => algo::union(t, &demoted)?,
                V4Repr::Flat(f) => {
                    for (ip, prefix) in algo::collect_leaves(&demoted) {
                        f.insert_cidr(ip, prefix);
                    }
                }
            }
            self.v6 = None;
            self.v6_dirty = false;
            Ok(())
        }
    }

    /// `CountAddresses` (spec.md §6): `(low 64 bits, overflowed, approx as
    /// f64)`. The full 128-bit range never overflows a `u128` internally;
    /// `overflow` reports whether the true count needed more than 64 bits.
    pub fn count_addresses(&self) -> (u64, bool, f64) {
        let total = self.count_addresses_u128();
        let low = total as u64;
        let overflow = total > u128::from(u64::MAX);
        (low, overflow, total as f64)
    }

    /// Decimal-string form that handles the full 128-bit range (spec.md
    /// §6: "also a decimal-string form that handles the full 128-bit
    /// range").
    pub fn count_addresses_decimal(&self) -> String {
        self.count_addresses_u128().to_string()
    }

    fn count_addresses_u128(&self) -> u128 {
        let v4: u128 = self
            .v4_leaves()
            .iter()
            .map(|&(_, p)| 1u128 << (32 - p))
            .sum();
        let v6: u128 = self
            .v6
            .as_ref()
            .map(|t| {
                algo::collect_leaves(t)
                    .iter()
                    .map(|&(_, p)| 1u128 << (128 - p as u32))
                    .sum()
            })
            .unwrap_or(0);
        v4 + v6
    }

    /// `Iterator(Cidr, v6policy)` (spec.md §6, §4.6).
    pub fn iter_cidr(&self, policy: V6Policy) -> Result<SetIter> {
        self.make_iter(CidrMode::Cidr, policy)
    }

    /// `Iterator(Address, v6policy)` (spec.md §6, §4.6).
    pub fn iter_addr(&self, policy: V6Policy) -> Result<SetIter> {
        self.make_iter(CidrMode::Address, policy)
    }

    fn make_iter(&self, mode: CidrMode, policy: V6Policy) -> Result<SetIter> {
        let Some(v6_tree) = &self.v6 else {
            return match &self.v4 {
                V4Repr::Flat(f) => Ok(SetIter::from_flat(f, mode, policy)),
                V4Repr::Radix(t) => {
                    if self.v4_dirty {
                        return Err(IpSetError::RequireClean);
                    }
                    SetIter::from_radix_v4(t, mode, policy)
                }
            };
        };
        if self.v6_dirty {
            return Err(IpSetError::RequireClean);
        }
        let v4_leaves = match &self.v4 {
            V4Repr::Flat(f) => f.cidr_iter().collect(),
            V4Repr::Radix(t) => {
                if self.v4_dirty {
                    return Err(IpSetError::RequireClean);
                }
                algo::collect_leaves(t)
            }
        };
        let v6_leaves = algo::collect_leaves(v6_tree);
        Ok(SetIter::from_mixed(v4_leaves, v6_leaves, mode, policy))
    }

    /// `Read(stream)` (spec.md §6).
    pub fn read<S: Stream>(stream: &mut S) -> Result<Self> {
        let decoded = codec::read(stream)?;
        Ok(Self::from_decoded(decoded))
    }

    fn from_decoded(decoded: DecodedSet) -> Self {
        match decoded {
            DecodedSet::FlatV4(f) => IpSet {
                support_ipv6: false,
                v4: V4Repr::Flat(f),
                v6: None,
                v4_dirty: false,
                v6_dirty: false,
                no_autoconvert: false,
            },
            DecodedSet::RadixV4(t) => IpSet {
                support_ipv6: false,
                v4: V4Repr::Radix(t),
                v6: None,
                v4_dirty: false,
                v6_dirty: false,
                no_autoconvert: false,
            },
            DecodedSet::RadixV6(t) => IpSet {
                support_ipv6: true,
                v4: V4Repr::Flat(FlatV4::new()),
                v6: Some(t),
                v4_dirty: false,
                v6_dirty: false,
                no_autoconvert: false,
            },
        }
    }

    /// `Write(stream)` (spec.md §6): writes using `SILK_IPSET_RECORD_VERSION`
    /// or the version's own default when unset.
    pub fn write<S: Stream>(&self, stream: &mut S) -> Result<()> {
        self.write_version(stream, env::record_version())
    }

    pub fn write_version<S: Stream>(&self, stream: &mut S, version: RecordVersion) -> Result<()> {
        let decoded = self.to_decoded()?;
        codec::write(stream, &decoded, version)
    }

    fn to_decoded(&self) -> Result<DecodedSet> {
        if let Some(t) = &self.v6 {
            if !t.is_empty() {
                return Ok(DecodedSet::RadixV6(t.clone()));
            }
        }
        Ok(match &self.v4 {
            V4Repr::Flat(f) => DecodedSet::FlatV4(f.clone()),
            V4Repr::Radix(t) => DecodedSet::RadixV4(t.clone()),
        })
    }

    /// `Save(path)` (spec.md §6).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let mut stream = FileStream::new(file);
        self.write(&mut stream)
    }

    /// `Load(path)` (spec.md §6). Tries the memory-mapped fast path for
    /// native-byte-order version-3 files first (spec.md §4.1, §4.7); falls
    /// back to the ordinary buffered read for every other case.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        if let Some(decoded) = crate::mmap::try_load_v3(&file)? {
            return Ok(Self::from_decoded(decoded));
        }
        let mut stream = FileStream::new(file);
        Self::read(&mut stream)
    }

    /// `ProcessStream(stream, visitor, v6policy, cidr_mode)` (spec.md §6):
    /// streaming decode without materializing a set, projecting each wire
    /// block through `policy`/`mode` the same way [`Self::iter_cidr`]/
    /// [`Self::iter_addr`] project a set's leaves.
    pub fn process_stream<S: Stream>(
        stream: &mut S,
        visitor: impl FnMut(IpBlock) -> bool,
        policy: V6Policy,
        mode: CidrMode,
    ) -> Result<()> {
        codec::process_stream(stream, visitor, policy, mode)
    }
}

fn blocks_overlap<F: AddressFamily>(a: F, ap: u8, b: F, bp: u8) -> bool {
    let p = ap.min(bp);
    a.mask(p) == b.mask(p)
}

impl Drop for IpSet {
    fn drop(&mut self) {
        if !env::destroy_print() {
            return;
        }
        let stats = SetStats {
            is_v6: self.support_ipv6,
            nodes: match &self.v4 {
                V4Repr::Radix(t) => Some(PoolStats {
                    in_use: t.nodes().in_use(),
                    free_count: t.nodes().free_count(),
                    capacity: t.nodes().capacity(),
                    record_size: std::mem::size_of::<crate::node::Node<u32>>(),
                }),
                V4Repr::Flat(_) => None,
            },
            leaves: match &self.v4 {
                V4Repr::Radix(t) => Some(PoolStats {
                    in_use: t.leaves().in_use(),
                    free_count: t.leaves().free_count(),
                    capacity: t.leaves().capacity(),
                    record_size: std::mem::size_of::<crate::node::Leaf<u32>>(),
                }),
                V4Repr::Flat(_) => None,
            },
            leaf_count: self.v4_leaves().len(),
        };
        log::debug!("{stats}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn v4addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn insert_and_contains_v4() {
        let mut s = IpSet::new(false);
        s.insert(v4addr("10.0.0.0"), 24).unwrap();
        assert!(s.contains(v4addr("10.0.0.5")));
        assert!(!s.contains(v4addr("10.0.1.5")));
    }

    #[test]
    fn insert_v6_autoconverts_by_default() {
        let mut s = IpSet::new(false);
        s.insert("2001:db8::".parse().unwrap(), 32).unwrap();
        assert!(s.is_v6());
        assert!(s.contains_v6());
    }

    #[test]
    fn insert_v6_fails_with_no_autoconvert() {
        let mut s = IpSet::new(false);
        s.set_no_autoconvert(true);
        let err = s.insert("2001:db8::".parse().unwrap(), 32).unwrap_err();
        assert_eq!(err, IpSetError::Ipv6);
    }

    #[test]
    fn union_and_subtract() {
        let mut a = IpSet::new(false);
        a.insert(v4addr("10.0.0.0"), 8).unwrap();
        let mut b = IpSet::new(false);
        b.insert(v4addr("192.168.0.0"), 16).unwrap();
        a.union(&b).unwrap();
        assert!(a.contains(v4addr("192.168.5.5")));

        a.subtract(&b).unwrap();
        assert!(!a.contains(v4addr("192.168.5.5")));
        assert!(a.contains(v4addr("10.1.1.1")));
    }

    #[test]
    fn mask_reduces_to_singletons() {
        let mut s = IpSet::new(false);
        s.insert(v4addr("10.0.0.0"), 22).unwrap();
        s.mask(24).unwrap();
        let blocks: Vec<_> = s.iter_cidr(V6Policy::Mix).unwrap().collect();
        assert_eq!(blocks.len(), 4);
    }

    #[test]
    fn count_addresses_sums_blocks() {
        let mut s = IpSet::new(false);
        s.insert(v4addr("10.0.0.0"), 24).unwrap();
        let (low, overflow, approx) = s.count_addresses();
        assert_eq!(low, 256);
        assert!(!overflow);
        assert_eq!(approx, 256.0);
    }

    #[test]
    fn convert_round_trip() {
        let mut s = IpSet::new(true);
        s.insert(v4addr("10.0.0.0"), 24).unwrap();
        s.convert(true).unwrap();
        assert!(s.contains_v6());
        s.convert(false).unwrap();
        assert!(s.contains(v4addr("10.0.0.5")));
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut s = IpSet::new(false);
        s.insert(v4addr("10.0.0.0"), 24).unwrap();
        s.insert(Ipv4Addr::new(192, 168, 1, 0).into(), 25).unwrap();
        let tmp = tempfile::NamedTempFile::new().unwrap();
        s.save(tmp.path()).unwrap();
        let loaded = IpSet::load(tmp.path()).unwrap();
        assert!(loaded.contains(v4addr("10.0.0.5")));
        assert!(loaded.contains(v4addr("192.168.1.10")));
        assert!(!loaded.contains(v4addr("192.168.1.200")));
    }
}
