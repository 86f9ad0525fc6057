//! Structural diagnostics (spec.md §6, `SKIPSET_DESTROY_PRINT`; SPEC_FULL.md
//! component C10).
//!
//! Grounded on `StrideStats`/`CreatedNodes`'s shape in the teacher's
//! original `stats.rs` — a small `Debug`/`Display`-able struct holding
//! per-category counts plus a derived memory estimate — adapted from
//! per-stride-depth node counts (meaningful only for the teacher's
//! variable-stride tree) to per-pool occupancy/fragmentation counts, which
//! are what this crate's fixed-stride arenas actually track.

use std::fmt;

/// A snapshot of one [`crate::arena::Arena`]'s occupancy, taken on demand
/// (typically right before a set is dropped, when `SKIPSET_DESTROY_PRINT`
/// is set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub in_use: usize,
    pub free_count: usize,
    pub capacity: usize,
    pub record_size: usize,
}

impl PoolStats {
    pub fn mem_usage(&self) -> usize {
        self.capacity * self.record_size
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in use, {} free, {} capacity ({}k)",
            self.in_use,
            self.free_count,
            self.capacity,
            self.mem_usage() / 1024
        )
    }
}

/// Combined diagnostics for one [`crate::radix::RadixTree`] or
/// [`crate::flat::FlatV4`]-backed set, surfaced via `Debug`/`Display` (spec.md
/// §6's `Destroy`/`SKIPSET_DESTROY_PRINT`: "dump structural diagnostics on
/// drop when set").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetStats {
    pub is_v6: bool,
    pub nodes: Option<PoolStats>,
    pub leaves: Option<PoolStats>,
    pub leaf_count: usize,
}

impl fmt::Display for SetStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ipset ({}): {} leaves", if self.is_v6 { "v6" } else { "v4" }, self.leaf_count)?;
        if let Some(n) = self.nodes {
            writeln!(f, "  nodes:  {n}")?;
        }
        if let Some(l) = self.leaves {
            writeln!(f, "  leaves: {l}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_usage_scales_with_capacity_and_record_size() {
        let p = PoolStats {
            in_use: 3,
            free_count: 1,
            capacity: 8,
            record_size: 64,
        };
        assert_eq!(p.mem_usage(), 512);
    }
}
