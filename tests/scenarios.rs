//! Concrete scenarios from spec.md §8, run against the public `IpSet` API.

mod common {
    pub fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }
}

use ipsetstore::{CidrMode, IpBlock, IpSet, IpSetError, V6Policy};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

fn v4(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn v6(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Scenario 1: two adjacent /24s combine into a /23 on Clean.
#[test]
fn adjacent_slash24s_combine_to_slash23() {
    common::init();
    let mut s = IpSet::new(false);
    s.insert(v4("10.0.0.0"), 24).unwrap();
    s.insert(v4("10.0.1.0"), 24).unwrap();
    s.clean().unwrap();

    let blocks: Vec<IpBlock> = s.iter_cidr(V6Policy::Mix).unwrap().collect();
    assert_eq!(blocks, vec![IpBlock::V4(u32::from(Ipv4Addr::new(10, 0, 0, 0)), 23)]);
}

/// Scenario 2: removing one address from a /23 leaves 511 addresses,
/// decomposed into maximal CIDR blocks around the hole.
#[test]
fn removing_one_address_leaves_maximal_blocks() {
    common::init();
    let mut s = IpSet::new(false);
    s.insert(v4("10.0.0.0"), 23).unwrap();
    s.remove(v4("10.0.0.42"), 32).unwrap();
    s.clean().unwrap();

    let (low, overflow, _) = s.count_addresses();
    assert_eq!(low, 511);
    assert!(!overflow);

    let blocks: Vec<IpBlock> = s.iter_cidr(V6Policy::Mix).unwrap().collect();
    // disjoint, ascending, and none of them contain .42
    let mut prev_end: Option<u32> = None;
    for b in &blocks {
        let IpBlock::V4(base, prefix) = *b else { panic!("v4-only set") };
        assert!(base.trailing_zeros() >= (32 - prefix as u32) || prefix == 32);
        if let Some(end) = prev_end {
            assert!(base > end, "blocks must be strictly ascending and disjoint");
        }
        let size = 1u32.checked_shl((32 - prefix) as u32).unwrap_or(0);
        prev_end = Some(base.wrapping_add(size.wrapping_sub(1)));
    }
    assert!(!s.contains(v4("10.0.0.42")));
    assert!(s.contains(v4("10.0.0.41")));
    assert!(s.contains(v4("10.0.0.43")));
}

/// Scenario 3: a v6 set mixing a mapped-v4 block and a native v6 block.
#[test]
fn mapped_v4_block_projects_under_policies() {
    common::init();
    let mut s = IpSet::new(true);
    s.insert(v6("::ffff:0:0"), 96).unwrap();
    s.insert(v6("2001:db8::"), 32).unwrap();
    assert!(s.contains_v6());

    let err = s.convert(false).unwrap_err();
    assert_eq!(err, IpSetError::Ipv6);

    s.clean().unwrap();
    let as_v4: Vec<IpBlock> = s.iter_cidr(V6Policy::AsV4).unwrap().collect();
    assert_eq!(as_v4, vec![IpBlock::V4(0, 0)]);

    let only_v6: Vec<IpBlock> = s.iter_cidr(V6Policy::OnlyV6).unwrap().collect();
    assert!(only_v6.iter().all(|b| b.is_v6()));
    assert!(only_v6
        .iter()
        .any(|b| matches!(b, IpBlock::V6(ip, 32) if *ip == ipsetstore::V6Addr::from("2001:db8::".parse::<Ipv6Addr>().unwrap()))));
}

/// Scenario 4: two disjoint, non-adjacent /24s written as version 2 and
/// read back unchanged.
#[test]
fn version2_round_trip_preserves_disjoint_slash24s() {
    common::init();
    let mut s = IpSet::new(false);
    s.insert(v4("10.0.0.0"), 24).unwrap();
    s.insert(v4("11.0.0.0"), 24).unwrap();

    let tmp = tempfile::NamedTempFile::new().unwrap();
    s.write_version(
        &mut ipsetstore::FileStream::new(std::fs::File::create(tmp.path()).unwrap()),
        ipsetstore::RecordVersion::V2,
    )
    .unwrap();

    let loaded = IpSet::load(tmp.path()).unwrap();
    let mut blocks: Vec<IpBlock> = loaded.iter_cidr(V6Policy::Mix).unwrap().collect();
    blocks.sort();
    assert_eq!(
        blocks,
        vec![
            IpBlock::V4(u32::from(Ipv4Addr::new(10, 0, 0, 0)), 24),
            IpBlock::V4(u32::from(Ipv4Addr::new(11, 0, 0, 0)), 24),
        ]
    );
}

/// Scenario 5: intersecting two sets of /8s against two /16s yields the
/// overlap only.
#[test]
fn intersect_yields_overlap_only() {
    common::init();
    let mut a = IpSet::new(false);
    a.insert(v4("10.0.0.0"), 8).unwrap();
    a.insert(v4("11.0.0.0"), 8).unwrap();

    let mut b = IpSet::new(false);
    b.insert(v4("10.0.0.0"), 16).unwrap();
    b.insert(v4("11.255.0.0"), 16).unwrap();

    a.intersect(&b).unwrap();
    a.clean().unwrap();

    let mut blocks: Vec<IpBlock> = a.iter_cidr(V6Policy::Mix).unwrap().collect();
    blocks.sort();
    assert_eq!(
        blocks,
        vec![
            IpBlock::V4(u32::from(Ipv4Addr::new(10, 0, 0, 0)), 16),
            IpBlock::V4(u32::from(Ipv4Addr::new(11, 255, 0, 0)), 16),
        ]
    );
}

/// Scenario 6: stream-decoding a version-4 IPv6 file under `AsV4` collapses
/// the mapped block into one call; under `Mix` both blocks are visited.
#[test]
fn process_stream_v4_file_under_policies() {
    common::init();
    let mut s = IpSet::new(true);
    s.insert(v6("2001:db8::"), 32).unwrap();
    s.insert(v6("::ffff:a00:0"), 120).unwrap();

    let mut mem = ipsetstore::MemStream::new();
    s.write_version(&mut mem, ipsetstore::RecordVersion::V4).unwrap();
    let bytes = mem.into_inner();

    let mut mix_count = 0;
    let mut mix_reader = ipsetstore::MemStream::from_vec(bytes.clone());
    IpSet::process_stream(
        &mut mix_reader,
        |_| {
            mix_count += 1;
            true
        },
        V6Policy::Mix,
        CidrMode::Cidr,
    )
    .unwrap();
    assert_eq!(mix_count, 2);

    let mut as_v4_blocks = Vec::new();
    let mut as_v4_reader = ipsetstore::MemStream::from_vec(bytes);
    IpSet::process_stream(
        &mut as_v4_reader,
        |b| {
            as_v4_blocks.push(b);
            true
        },
        V6Policy::AsV4,
        CidrMode::Cidr,
    )
    .unwrap();
    assert_eq!(as_v4_blocks, vec![IpBlock::V4(u32::from(Ipv4Addr::new(10, 0, 0, 0)), 24)]);
}
