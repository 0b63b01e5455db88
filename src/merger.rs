//! Concatenates per-segment index artifacts into a single artifact
//! equivalent to one built over the concatenation of their underlying data
//! files.

use tracing::info;

use crate::binning;
use crate::chunk::{self, Chunk};
use crate::error::IndexError;
use crate::metadata::ReferenceMetadata;
use crate::voffset::VirtualOffset;
use crate::writer::{IndexArtifact, PerReferenceIndex};

/// Merges `segments`, each paired with the byte length of its own data-file
/// portion. Segment `k`'s virtual offsets are shifted by the sum of the
/// preceding segments' lengths; the caller is responsible for having
/// actually appended the segments' data at those offsets.
pub fn merge(segments: &[(IndexArtifact, u64)]) -> Result<IndexArtifact, IndexError> {
    let mut offset = 0u64;
    let mut shifted = Vec::with_capacity(segments.len());
    for (index, (artifact, length)) in segments.iter().enumerate() {
        info!(segment = index, offset, length, "merging segment");
        shifted.push(shift_artifact(artifact, offset)?);
        offset += length;
    }
    combine(&shifted)
}

fn shift_chunk(chunk: &Chunk, offset: u64) -> Result<Chunk, IndexError> {
    Ok(Chunk::new(
        shift_vo(chunk.begin, offset)?,
        shift_vo(chunk.end, offset)?,
    ))
}

fn shift_vo(vo: VirtualOffset, offset: u64) -> Result<VirtualOffset, IndexError> {
    let new_address = vo
        .block_address()
        .checked_add(offset)
        .filter(|&a| a < (1 << 48))
        .ok_or_else(|| IndexError::BadConcatenation {
            reason: format!(
                "shifting virtual offset {vo} by {offset} bytes overflows the 48-bit block address"
            ),
        })?;
    Ok(VirtualOffset::new(new_address, vo.block_offset()))
}

fn shift_artifact(artifact: &IndexArtifact, offset: u64) -> Result<IndexArtifact, IndexError> {
    if offset == 0 {
        return Ok(IndexArtifact {
            references: artifact
                .references
                .iter()
                .map(|r| PerReferenceIndex {
                    bins: r.bins.clone(),
                    linear: r.linear.clone(),
                    metadata: r.metadata,
                })
                .collect(),
            no_coordinate_count: artifact.no_coordinate_count,
        });
    }

    let mut references = Vec::with_capacity(artifact.references.len());
    for reference in &artifact.references {
        let mut bins = Vec::with_capacity(reference.bins.len());
        for (bin_id, chunks) in &reference.bins {
            if *bin_id == binning::MAX_BINS {
                continue;
            }
            let shifted_chunks = chunks
                .iter()
                .map(|c| shift_chunk(c, offset))
                .collect::<Result<Vec<_>, _>>()?;
            bins.push((*bin_id, shifted_chunks));
        }

        let linear = reference
            .linear
            .iter()
            .map(|vo| shift_vo(*vo, offset))
            .collect::<Result<Vec<_>, _>>()?;

        let metadata = match reference.metadata {
            Some(m) => Some(ReferenceMetadata {
                first_vo: shift_vo(m.first_vo, offset)?,
                last_vo: shift_vo(m.last_vo, offset)?,
                aligned_count: m.aligned_count,
                unaligned_count: m.unaligned_count,
            }),
            None => None,
        };
        if let Some(m) = metadata {
            bins.push((binning::MAX_BINS, m.to_chunks().to_vec()));
        }

        references.push(PerReferenceIndex {
            bins,
            linear,
            metadata,
        });
    }

    Ok(IndexArtifact {
        references,
        no_coordinate_count: artifact.no_coordinate_count,
    })
}

fn combine(segments: &[IndexArtifact]) -> Result<IndexArtifact, IndexError> {
    let n_references = segments
        .iter()
        .map(|a| a.references.len())
        .max()
        .unwrap_or(0);

    let mut references = Vec::with_capacity(n_references);
    for r in 0..n_references {
        references.push(combine_reference(segments, r)?);
    }

    let no_coordinate_count = segments.iter().map(|a| a.no_coordinate_count).sum();

    Ok(IndexArtifact {
        references,
        no_coordinate_count,
    })
}

fn combine_reference(segments: &[IndexArtifact], r: usize) -> Result<PerReferenceIndex, IndexError> {
    use std::collections::BTreeMap;

    let mut bins: BTreeMap<u32, Vec<Chunk>> = BTreeMap::new();
    let mut linear: Vec<VirtualOffset> = Vec::new();
    let mut metadata: Option<ReferenceMetadata> = None;

    for artifact in segments {
        let Some(reference) = artifact.references.get(r) else {
            continue;
        };

        for (bin_id, chunks) in &reference.bins {
            bins.entry(*bin_id).or_default().extend_from_slice(chunks);
        }

        if reference.linear.len() > linear.len() {
            let pad_value = linear.last().copied().unwrap_or(VirtualOffset::MIN);
            linear.resize(reference.linear.len(), pad_value);
        }
        let pad_value = reference.linear.last().copied().unwrap_or(VirtualOffset::MIN);
        for (i, slot) in linear.iter_mut().enumerate() {
            let segment_value = reference.linear.get(i).copied().unwrap_or(pad_value);
            *slot = (*slot).min(segment_value);
        }

        if let Some(m) = reference.metadata {
            metadata = Some(match metadata {
                None => m,
                Some(acc) => ReferenceMetadata {
                    first_vo: acc.first_vo.min(m.first_vo),
                    last_vo: acc.last_vo.max(m.last_vo),
                    aligned_count: acc.aligned_count + m.aligned_count,
                    unaligned_count: acc.unaligned_count + m.unaligned_count,
                },
            });
        }
    }

    let mut bins: Vec<(u32, Vec<Chunk>)> = bins
        .into_iter()
        .map(|(bin_id, chunks)| (bin_id, chunk::optimize(&chunks, VirtualOffset::MIN)))
        .collect();
    bins.sort_by_key(|(bin_id, _)| *bin_id);
    if let Some(m) = metadata {
        bins.push((binning::MAX_BINS, m.to_chunks().to_vec()));
    }

    Ok(PerReferenceIndex {
        bins,
        linear,
        metadata,
    })
}
