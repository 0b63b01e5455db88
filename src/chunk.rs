//! Byte-span chunks in virtual-offset space, and the optimizer that merges
//! and trims them against a linear-index-derived minimum offset.

use crate::voffset::VirtualOffset;

/// A half-open byte span `[begin, end)` in virtual-offset space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub begin: VirtualOffset,
    pub end: VirtualOffset,
}

impl Chunk {
    pub fn new(begin: VirtualOffset, end: VirtualOffset) -> Self {
        debug_assert!(begin <= end, "chunk begin must not exceed end");
        Self { begin, end }
    }
}

/// Byte-address slack tolerated when deciding whether two chunks' compressed
/// blocks are "adjacent" for merging purposes. The BAI format merges only
/// truly adjacent/overlapping blocks, so this defaults to zero; it exists as
/// a parameter rather than a hardcoded zero so callers merging against a
/// coarser block granularity can widen it.
pub const DEFAULT_MERGE_SLOP: u64 = 0;

/// Sorts, drops chunks entirely below `min_vo`, and merges adjacent or
/// overlapping chunks using [`DEFAULT_MERGE_SLOP`].
pub fn optimize(chunks: &[Chunk], min_vo: VirtualOffset) -> Vec<Chunk> {
    optimize_with_slop(chunks, min_vo, DEFAULT_MERGE_SLOP)
}

/// As [`optimize`], but with an explicit merge slop in bytes of compressed
/// block address.
pub fn optimize_with_slop(chunks: &[Chunk], min_vo: VirtualOffset, merge_slop: u64) -> Vec<Chunk> {
    let mut sorted: Vec<Chunk> = chunks
        .iter()
        .copied()
        .filter(|c| c.end >= min_vo)
        .collect();
    sorted.sort_by(|a, b| a.begin.cmp(&b.begin).then(a.end.cmp(&b.end)));

    let mut merged: Vec<Chunk> = Vec::with_capacity(sorted.len());
    for chunk in sorted {
        match merged.last_mut() {
            Some(last)
                if last.end.block_address() + merge_slop >= chunk.begin.block_address() =>
            {
                if chunk.end > last.end {
                    last.end = chunk.end;
                }
            }
            _ => merged.push(chunk),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vo(addr: u64, off: u16) -> VirtualOffset {
        VirtualOffset::new(addr, off)
    }

    #[test]
    fn test_optimize_drops_below_min_vo() {
        let chunks = [Chunk::new(vo(0, 0), vo(1, 0)), Chunk::new(vo(5, 0), vo(10, 0))];
        let result = optimize(&chunks, vo(3, 0));
        assert_eq!(result, vec![Chunk::new(vo(5, 0), vo(10, 0))]);
    }

    #[test]
    fn test_optimize_merges_adjacent_blocks() {
        let chunks = [
            Chunk::new(vo(0, 0), vo(5, 0)),
            Chunk::new(vo(5, 10), vo(8, 0)),
        ];
        let result = optimize(&chunks, VirtualOffset::MIN);
        assert_eq!(result, vec![Chunk::new(vo(0, 0), vo(8, 0))]);
    }

    #[test]
    fn test_optimize_keeps_disjoint_blocks_separate() {
        let chunks = [
            Chunk::new(vo(0, 0), vo(5, 0)),
            Chunk::new(vo(7, 0), vo(8, 0)),
        ];
        let result = optimize(&chunks, VirtualOffset::MIN);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_optimize_sorts_unordered_input() {
        let chunks = [
            Chunk::new(vo(10, 0), vo(12, 0)),
            Chunk::new(vo(0, 0), vo(2, 0)),
        ];
        let result = optimize(&chunks, VirtualOffset::MIN);
        assert_eq!(result[0].begin, vo(0, 0));
        assert_eq!(result[1].begin, vo(10, 0));
    }

    #[test]
    fn test_optimize_is_idempotent() {
        let chunks = [
            Chunk::new(vo(0, 0), vo(5, 0)),
            Chunk::new(vo(3, 0), vo(9, 0)),
            Chunk::new(vo(20, 0), vo(21, 0)),
        ];
        let once = optimize(&chunks, VirtualOffset::MIN);
        let twice = optimize(&once, VirtualOffset::MIN);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_optimize_result_is_non_overlapping_and_ascending() {
        let chunks = [
            Chunk::new(vo(0, 0), vo(5, 0)),
            Chunk::new(vo(100, 0), vo(105, 0)),
            Chunk::new(vo(3, 0), vo(12, 0)),
        ];
        let result = optimize(&chunks, VirtualOffset::MIN);
        for pair in result.windows(2) {
            assert!(pair[0].end <= pair[1].begin);
        }
    }
}
