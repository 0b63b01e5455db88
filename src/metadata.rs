//! Per-reference metadata: the record-count and virtual-offset summary
//! stashed in the synthetic `bin_id == MAX_BINS` bin.
//!
//! The wire format reuses [`Chunk`](crate::chunk::Chunk) to carry this data
//! (two chunks: one pair of VOs, one pair of counters bit-reinterpreted as
//! VOs). That type confusion is a wire-format detail only; everywhere else
//! in this crate metadata is a dedicated [`ReferenceMetadata`] value.

use crate::chunk::Chunk;
use crate::voffset::VirtualOffset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceMetadata {
    pub first_vo: VirtualOffset,
    pub last_vo: VirtualOffset,
    pub aligned_count: u64,
    pub unaligned_count: u64,
}

impl ReferenceMetadata {
    pub fn new(first_vo: VirtualOffset, last_vo: VirtualOffset) -> Self {
        Self {
            first_vo,
            last_vo,
            aligned_count: 0,
            unaligned_count: 0,
        }
    }

    /// Encodes as the two chunks the meta-bin stores on disk.
    ///
    /// The second "chunk" is a pair of counters bit-reinterpreted as virtual
    /// offsets, not a real byte span, so it's built as a raw struct literal
    /// rather than through `Chunk::new` — `aligned_count` and
    /// `unaligned_count` have no ordering relationship with each other.
    pub fn to_chunks(self) -> [Chunk; 2] {
        [
            Chunk::new(self.first_vo, self.last_vo),
            Chunk {
                begin: VirtualOffset::from(self.aligned_count),
                end: VirtualOffset::from(self.unaligned_count),
            },
        ]
    }

    /// Decodes the two chunks the meta-bin stores on disk.
    pub fn from_chunks(chunks: &[Chunk]) -> Option<Self> {
        let [vo_chunk, count_chunk] = chunks else {
            return None;
        };
        Some(Self {
            first_vo: vo_chunk.begin,
            last_vo: vo_chunk.end,
            aligned_count: count_chunk.begin.as_u64(),
            unaligned_count: count_chunk.end.as_u64(),
        })
    }
}
