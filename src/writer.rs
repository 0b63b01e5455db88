//! Stateful builder that consumes a coordinate-sorted record stream and
//! produces a serialized index artifact.

use std::io::{self, Write};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::binning;
use crate::chunk::Chunk;
use crate::error::IndexError;
use crate::linear_index::LinearIndex;
use crate::metadata::ReferenceMetadata;
use crate::voffset::VirtualOffset;

const MAGIC: &[u8; 4] = b"BAI\x01";

/// One reference's finalized bins, linear index, and metadata, ready to
/// serialize.
#[derive(Debug, Default)]
pub struct PerReferenceIndex {
    pub bins: Vec<(u32, Vec<Chunk>)>,
    pub linear: Vec<VirtualOffset>,
    pub metadata: Option<ReferenceMetadata>,
}

/// The full on-disk artifact: one entry per reference, plus the trailing
/// no-coordinate count.
#[derive(Debug, Default)]
pub struct IndexArtifact {
    pub references: Vec<PerReferenceIndex>,
    pub no_coordinate_count: u64,
}

impl IndexArtifact {
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(MAGIC)?;
        out.write_all(&(self.references.len() as i32).to_le_bytes())?;
        for reference in &self.references {
            out.write_all(&(reference.bins.len() as i32).to_le_bytes())?;
            for (bin_id, chunks) in &reference.bins {
                out.write_all(&bin_id.to_le_bytes())?;
                out.write_all(&(chunks.len() as i32).to_le_bytes())?;
                for c in chunks {
                    out.write_all(&c.begin.as_u64().to_le_bytes())?;
                    out.write_all(&c.end.as_u64().to_le_bytes())?;
                }
            }
            out.write_all(&(reference.linear.len() as i32).to_le_bytes())?;
            for vo in &reference.linear {
                out.write_all(&vo.as_u64().to_le_bytes())?;
            }
        }
        out.write_all(&self.no_coordinate_count.to_le_bytes())?;
        Ok(())
    }
}

struct OpenReference {
    bins: FxHashMap<u32, Vec<Chunk>>,
    linear: LinearIndex,
    first_vo: Option<VirtualOffset>,
    last_vo: Option<VirtualOffset>,
    aligned: u64,
    unaligned: u64,
    last_bin: Option<u32>,
}

impl OpenReference {
    fn new() -> Self {
        Self {
            bins: FxHashMap::default(),
            linear: LinearIndex::new(),
            first_vo: None,
            last_vo: None,
            aligned: 0,
            unaligned: 0,
            last_bin: None,
        }
    }

    fn finalize(self) -> PerReferenceIndex {
        let min_vo = self.linear.entries().first().copied().unwrap_or(VirtualOffset::MIN);
        let mut bins: Vec<(u32, Vec<Chunk>)> = self
            .bins
            .into_iter()
            .map(|(bin_id, chunks)| (bin_id, crate::chunk::optimize(&chunks, min_vo)))
            .collect();
        bins.sort_by_key(|(bin_id, _)| *bin_id);

        let mut linear = self.linear;
        linear.finalize();

        let metadata = match (self.first_vo, self.last_vo) {
            (Some(first), Some(last)) => {
                let mut m = ReferenceMetadata::new(first, last);
                m.aligned_count = self.aligned;
                m.unaligned_count = self.unaligned;
                Some(m)
            }
            _ => None,
        };

        if let Some(meta) = metadata {
            bins.push((binning::MAX_BINS, meta.to_chunks().to_vec()));
        }

        PerReferenceIndex {
            bins,
            linear: linear.entries(),
            metadata,
        }
    }
}

/// Stateful builder: `INIT -> BUILDING_REF(r) -> EMIT_REF(r) -> ... -> FINISHED`.
/// Transitions are driven solely by [`Indexer::process_record`] and
/// [`Indexer::finish`]; there are no retries, and errors are terminal.
pub struct Indexer {
    references: Vec<PerReferenceIndex>,
    current_ref: Option<i32>,
    open: Option<OpenReference>,
    last_start: u32,
    no_coord_count: u64,
}

impl Default for Indexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer {
    pub fn new() -> Self {
        Self {
            references: Vec::new(),
            current_ref: None,
            open: None,
            last_start: 0,
            no_coord_count: 0,
        }
    }

    fn transition_to(&mut self, reference_index: i32) {
        if let Some(open) = self.open.take() {
            let finalized = open.finalize();
            let slot = self.current_ref.expect("open reference implies current_ref set") as usize;
            debug!(
                reference = slot,
                bins = finalized.bins.len(),
                "finalized reference"
            );
            if self.references.len() <= slot {
                self.references.resize_with(slot + 1, Default::default);
            }
            self.references[slot] = finalized;
        }
        if self.references.len() <= reference_index as usize {
            self.references
                .resize_with(reference_index as usize + 1, Default::default);
        }
        debug!(reference = reference_index, "starting reference");
        self.current_ref = Some(reference_index);
        self.open = Some(OpenReference::new());
    }

    /// `reference_index < 0` designates an unplaced, unmapped record.
    pub fn process_record(
        &mut self,
        reference_index: i32,
        start1: u32,
        end1: u32,
        begin_vo: VirtualOffset,
        end_vo: VirtualOffset,
        unmapped: bool,
    ) -> Result<(), IndexError> {
        if reference_index < 0 {
            self.no_coord_count += 1;
            return Ok(());
        }

        match self.current_ref {
            Some(last_ref) if reference_index < last_ref => {
                warn!(reference_index, last_ref, "reference moved backward");
                return Err(IndexError::OutOfOrder {
                    reference_index,
                    previous_reference_index: last_ref,
                    start: start1,
                    previous_start: self.last_start,
                });
            }
            Some(last_ref) if reference_index == last_ref && start1 < self.last_start => {
                warn!(start1, previous_start = self.last_start, "start moved backward");
                return Err(IndexError::OutOfOrder {
                    reference_index,
                    previous_reference_index: last_ref,
                    start: start1,
                    previous_start: self.last_start,
                });
            }
            Some(last_ref) if reference_index != last_ref => self.transition_to(reference_index),
            None => self.transition_to(reference_index),
            _ => {}
        }
        self.last_start = start1;

        let bin = binning::region_to_bin(u64::from(start1 - 1), u64::from(end1));
        let open = self.open.as_mut().expect("transitioned into an open reference");

        let chunks = open.bins.entry(bin).or_default();
        match (open.last_bin, chunks.last_mut()) {
            (Some(last_bin), Some(tail)) if last_bin == bin => {
                tail.end = end_vo;
            }
            _ => chunks.push(Chunk::new(begin_vo, end_vo)),
        }
        open.last_bin = Some(bin);

        open.linear.update(start1, end1, begin_vo);

        open.first_vo = Some(open.first_vo.map_or(begin_vo, |v| v.min(begin_vo)));
        open.last_vo = Some(open.last_vo.map_or(end_vo, |v| v.max(end_vo)));
        if unmapped {
            open.unaligned += 1;
        } else {
            open.aligned += 1;
        }

        Ok(())
    }

    /// Finalizes the current reference (if any), fills any trailing
    /// references with empty structures up to `total_references` if given,
    /// and returns the completed artifact.
    pub fn finish(mut self) -> Result<IndexArtifact, IndexError> {
        if let Some(open) = self.open.take() {
            let finalized = open.finalize();
            let slot = self.current_ref.expect("open implies current_ref") as usize;
            if self.references.len() <= slot {
                self.references.resize_with(slot + 1, Default::default);
            }
            self.references[slot] = finalized;
        }
        Ok(IndexArtifact {
            references: self.references,
            no_coordinate_count: self.no_coord_count,
        })
    }

    /// Pads the artifact with empty references up to `total` (used when the
    /// sequence dictionary has more references than were ever observed).
    pub fn finish_with_total_references(self, total: usize) -> Result<IndexArtifact, IndexError> {
        let mut artifact = self.finish()?;
        if artifact.references.len() < total {
            artifact
                .references
                .resize_with(total, Default::default);
        }
        Ok(artifact)
    }
}
