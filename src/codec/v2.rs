//! Version 2 ("Classc"): a sorted sequence of /24 blocks, each a base
//! address plus a 256-bit bitmap (spec.md §4.7 table, row 2). IPv4 only.

use crate::af::IpBlock;
use crate::error::{IpSetError, Result};
use crate::flat::FlatV4;
use crate::stream::Stream;

use super::header::{self, FileHeader, Repr};

/// One on-disk record: base address of a `/24` (top 24 bits, low 8 zero)
/// followed by its 256-bit membership bitmap (8×`u32`).
const WORDS_PER_RECORD: usize = 8;

/// Emits one record per non-empty `/24`, reading each of its 8 bitmap
/// words directly off the slot rather than testing every address bit by
/// bit — `word_at` expands a `Full`/`Empty` slot on the fly, so a coarse
/// insert (e.g. `/8`) costs one pass over its /24s, not its addresses.
pub fn encode<S: Stream>(stream: &mut S, flat: &FlatV4) -> Result<()> {
    header::write_header(stream, 2, Repr::V4, 4)?;
    for top in 0..crate::flat::SLOTS {
        if !flat.slot_occupied(top) {
            continue;
        }
        for block in 0..(crate::flat::WORDS_PER_SLOT / WORDS_PER_RECORD) {
            let mut bitmap = [0u32; WORDS_PER_RECORD];
            let mut any = false;
            for (i, w) in bitmap.iter_mut().enumerate() {
                *w = flat.word_at(top, block * WORDS_PER_RECORD + i);
                any |= *w != 0;
            }
            if !any {
                continue;
            }
            let base = ((top as u32) << 16) | ((block as u32) * WORDS_PER_RECORD as u32 * 32);
            header::write_u32(stream, base)?;
            for &w in &bitmap {
                header::write_u32(stream, w)?;
            }
        }
    }
    Ok(())
}

fn read_record<S: Stream>(stream: &mut S, header: &FileHeader) -> Result<Option<(u32, [u32; WORDS_PER_RECORD])>> {
    let base = match header::read_u32(stream, header) {
        Ok(v) => v,
        Err(IpSetError::FileIo) => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut bitmap = [0u32; WORDS_PER_RECORD];
    for w in &mut bitmap {
        *w = header::read_u32(stream, header)?;
    }
    Ok(Some((base, bitmap)))
}

pub fn decode<S: Stream>(stream: &mut S, header: &FileHeader) -> Result<FlatV4> {
    let mut flat = FlatV4::new();
    while let Some((base, bitmap)) = read_record(stream, header)? {
        for (i, &word) in bitmap.iter().enumerate() {
            let mut w = word;
            while w != 0 {
                let bit = w.leading_zeros();
                let addr = base + (i as u32) * 32 + bit;
                flat.insert_cidr(addr, 32);
                w &= !(1 << (31 - bit));
            }
        }
    }
    Ok(flat)
}

/// Streaming visitor (spec.md §4.7): "version 2 does extra work to coalesce
/// contiguous full /24s into larger blocks before emitting."
pub fn visit<S: Stream>(
    stream: &mut S,
    header: &FileHeader,
    visitor: &mut impl FnMut(IpBlock) -> bool,
) -> Result<()> {
    let mut pending_full_base: Option<u32> = None;
    let mut pending_full_count: u32 = 0;

    let flush_full = |visitor: &mut dyn FnMut(IpBlock) -> bool, base: u32, count: u32| -> bool {
        let mut remaining = count;
        let mut cur = base;
        while remaining > 0 {
            let tz = if cur == 0 { 32 } else { cur.trailing_zeros() };
            let max_pow = 31u32.saturating_sub((remaining as u32).leading_zeros());
            let block_slash24s = tz.saturating_sub(8).min(max_pow).min(24);
            let prefix = 24u8.saturating_sub(block_slash24s as u8);
            if !visitor(IpBlock::V4(cur, prefix)) {
                return false;
            }
            let step = 1u32 << block_slash24s;
            cur += step << 8;
            remaining -= step;
        }
        true
    };

    while let Some((base, bitmap)) = read_record(stream, header)? {
        let full = bitmap.iter().all(|&w| w == u32::MAX);
        if full {
            match pending_full_base {
                Some(pbase) if pbase + pending_full_count * 256 == base => {
                    pending_full_count += 1;
                }
                Some(pbase) => {
                    if !flush_full(visitor, pbase, pending_full_count) {
                        return Ok(());
                    }
                    pending_full_base = Some(base);
                    pending_full_count = 1;
                }
                None => {
                    pending_full_base = Some(base);
                    pending_full_count = 1;
                }
            }
            continue;
        }
        if let Some(pbase) = pending_full_base.take() {
            if !flush_full(visitor, pbase, pending_full_count) {
                return Ok(());
            }
            pending_full_count = 0;
        }
        for (i, &word) in bitmap.iter().enumerate() {
            let mut w = word;
            while w != 0 {
                let bit = w.leading_zeros();
                let addr = base + (i as u32) * 32 + bit;
                if !visitor(IpBlock::V4(addr, 32)) {
                    return Ok(());
                }
                w &= !(1 << (31 - bit));
            }
        }
    }
    if let Some(pbase) = pending_full_base {
        flush_full(visitor, pbase, pending_full_count);
    }
    Ok(())
}
