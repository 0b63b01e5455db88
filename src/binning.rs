//! Hierarchical bin arithmetic for the six-level BAI-shaped binning scheme.
//!
//! A reference range `[start, end)` is placed in the smallest bin that fully
//! contains it. Bin widths shrink geometrically from the top (one bin
//! spanning all of `BIN_GENOMIC_SPAN`) down through five more levels, each
//! `1 << LEVEL_SHIFT` times finer than its parent. Level offsets are chosen
//! so that bin numbers across all levels are disjoint, which is what lets a
//! single `u32` double as a flat map key regardless of level.
//!
//! These constants are part of the on-disk wire format: readers and writers
//! must agree on bin numbering exactly, so this module exposes only the
//! fixed six-level scheme rather than a configurable one.

use crate::error::IndexError;

/// Number of bin levels.
const NUM_LEVELS: usize = 6;
/// First bin number at each level, coarsest (level 0) to finest (level 5).
pub const LEVEL_STARTS: [u32; NUM_LEVELS] = [0, 1, 9, 73, 585, 4681];
/// One past the largest valid bin number; also the reserved meta-bin id.
pub const MAX_BINS: u32 = 37450;
/// Genomic span covered by the single level-0 bin: 512 MiB.
pub const BIN_GENOMIC_SPAN: u64 = 1 << 29;
/// Width, in bases, of one linear-index window.
pub const LINEAR_WINDOW: u32 = 1 << 14;

/// Number of bin levels in the fixed scheme.
pub fn num_levels() -> usize {
    NUM_LEVELS
}

/// First bin number of `level`.
///
/// # Errors
/// Returns [`IndexError::Corrupt`] if `level` is out of `[0, num_levels())`.
pub fn first_bin_of_level(level: usize) -> Result<u32, IndexError> {
    LEVEL_STARTS
        .get(level)
        .copied()
        .ok_or_else(|| IndexError::Corrupt {
            reason: format!("level {level} out of range"),
        })
}

/// Number of bins at `level`.
pub fn level_size(level: usize) -> Result<u32, IndexError> {
    if level + 1 < NUM_LEVELS {
        Ok(LEVEL_STARTS[level + 1] - LEVEL_STARTS[level])
    } else if level == NUM_LEVELS - 1 {
        Ok(MAX_BINS - LEVEL_STARTS[level] - 1)
    } else {
        Err(IndexError::Corrupt {
            reason: format!("level {level} out of range"),
        })
    }
}

/// The level owning `bin`, i.e. the highest level whose first bin is `<= bin`.
pub fn level_of_bin(bin: u32) -> Result<usize, IndexError> {
    if bin >= MAX_BINS {
        return Err(IndexError::Corrupt {
            reason: format!("bin {bin} >= MAX_BINS"),
        });
    }
    LEVEL_STARTS
        .iter()
        .rposition(|&start| start <= bin)
        .ok_or_else(|| IndexError::Corrupt {
            reason: format!("bin {bin} has no owning level"),
        })
}

/// 1-based inclusive first locus covered by `bin`.
pub fn first_locus_in_bin(bin: u32) -> Result<u64, IndexError> {
    let level = level_of_bin(bin)?;
    let offset_in_level = u64::from(bin - LEVEL_STARTS[level]);
    let width = BIN_GENOMIC_SPAN / u64::from(level_size(level)?);
    Ok(offset_in_level * width + 1)
}

/// 1-based inclusive last locus covered by `bin`.
pub fn last_locus_in_bin(bin: u32) -> Result<u64, IndexError> {
    let level = level_of_bin(bin)?;
    let offset_in_level = u64::from(bin - LEVEL_STARTS[level]);
    let width = BIN_GENOMIC_SPAN / u64::from(level_size(level)?);
    Ok((offset_in_level + 1) * width)
}

/// Smallest bin fully containing the half-open 0-based range `[beg, end)`.
///
/// Undefined (panics) for `beg >= end`, per `spec.md` §4.1.
pub fn region_to_bin(beg: u64, end: u64) -> u32 {
    assert!(beg < end, "region_to_bin requires beg < end");
    let end = end - 1;
    for (level, &shift) in [14u32, 17, 20, 23, 26].iter().enumerate() {
        if beg >> shift == end >> shift {
            return LEVEL_STARTS[NUM_LEVELS - 1 - level] + (beg >> shift) as u32;
        }
    }
    0
}

/// All bins that might overlap the 1-based inclusive region `[start1, end1]`.
///
/// Returns an empty vector if `start1 > end1` after masking to 29 bits, which
/// callers should treat as "no overlap possible" rather than an error.
pub fn region_to_bins(start1: u64, end1: u64) -> Vec<u32> {
    let mask = BIN_GENOMIC_SPAN - 1;
    let start = (start1 - 1) & mask;
    let end = (end1 - 1).min(mask) & mask;
    if start > end {
        return Vec::new();
    }

    let mut bins = vec![0u32];
    for (i, &shift) in [26u32, 23, 20, 17, 14].iter().enumerate() {
        let level = i + 1;
        let lo = LEVEL_STARTS[level] + (start >> shift) as u32;
        let hi = LEVEL_STARTS[level] + (end >> shift) as u32;
        bins.extend(lo..=hi);
    }
    bins
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_level_starts_consistency() {
        for level in 0..num_levels() - 1 {
            assert_eq!(
                first_bin_of_level(level + 1).unwrap() - first_bin_of_level(level).unwrap(),
                level_size(level).unwrap()
            );
        }
    }

    #[test]
    fn test_max_bins() {
        let last = num_levels() - 1;
        assert_eq!(
            first_bin_of_level(last).unwrap() + level_size(last).unwrap() + 1,
            MAX_BINS
        );
    }

    #[test]
    fn test_locus_span_matches_level_width() {
        for bin in [0u32, 1, 9, 73, 585, 4681, MAX_BINS - 1] {
            let level = level_of_bin(bin).unwrap();
            let first = first_locus_in_bin(bin).unwrap();
            let last = last_locus_in_bin(bin).unwrap();
            assert!(first <= last);
            assert_eq!(
                last - first + 1,
                BIN_GENOMIC_SPAN / u64::from(level_size(level).unwrap())
            );
        }
    }

    #[test]
    fn test_region_to_bin_contained_in_region_to_bins() {
        let cases = [(100_000_000u64, 100_000_100u64), (0, 1000), (1, 2), (0, 1 << 29)];
        for (beg, end) in cases {
            let bin = region_to_bin(beg, end);
            let bins = region_to_bins(beg + 1, end);
            assert!(bins.contains(&0));
            assert!(
                bins.contains(&bin),
                "region_to_bins({beg},{end}) = {bins:?} missing bin {bin}"
            );
        }
    }

    #[test]
    fn test_region_to_bin_known_values() {
        // A 100-base region fits inside a single 16384-base (shift-14) window,
        // so it lands in the finest level regardless of its absolute offset.
        assert_eq!(region_to_bin(100_000_000, 100_000_100), 4681 + 6103);
        assert_eq!(region_to_bin(0, 1000), 4681);
        assert_eq!(region_to_bin(0, 1 << 14), 4681);
        assert_eq!(region_to_bin(1 << 14, 2 << 14), 4682);
    }

    #[test]
    fn test_region_to_bins_unique_and_bounded() {
        let bins = region_to_bins(1, 10_000_000);
        let unique: HashSet<_> = bins.iter().collect();
        assert_eq!(bins.len(), unique.len());
        assert!(bins.iter().all(|&b| b < MAX_BINS));
    }

    #[test]
    fn test_region_to_bins_empty_when_end_before_start() {
        assert!(region_to_bins(200, 100).is_empty());
    }

    proptest! {
        #[test]
        fn test_region_to_bins_properties(start in 1u64..1_000_000, len in 1u64..1_000_000) {
            let end = start + len;
            let bins = region_to_bins(start, end);
            prop_assert!(!bins.is_empty());
            let unique: HashSet<_> = bins.iter().collect();
            prop_assert_eq!(bins.len(), unique.len());
            prop_assert!(bins.iter().all(|&b| b < MAX_BINS));

            let bin = region_to_bin(start - 1, end);
            prop_assert!(bins.contains(&bin));
        }
    }
}
