//! Consumes an [`IndexFileBuffer`], verifies the format, and answers region
//! queries by decoding exactly as much of the file as each operation needs.

use std::collections::HashSet;

use rustc_hash::FxHashMap;
use tracing::{error, trace};

use crate::binning;
use crate::buffer::IndexFileBuffer;
use crate::chunk::{self, Chunk};
use crate::error::IndexError;
use crate::metadata::ReferenceMetadata;
use crate::voffset::VirtualOffset;

const MAGIC: &[u8; 4] = b"BAI\x01";

/// Materialized, query-restricted slice of one reference's on-disk index, as
/// described in `IndexReader::query` step (f).
#[derive(Debug, Default)]
pub struct QueryResult {
    pub bins: FxHashMap<u32, Vec<Chunk>>,
    pub linear: Vec<VirtualOffset>,
    pub metadata: Option<ReferenceMetadata>,
}

pub struct IndexReader<B> {
    buffer: B,
    n_references: usize,
    data_start: u64,
    seq_offset_cache: Vec<Option<u64>>,
}

impl<B: IndexFileBuffer> IndexReader<B> {
    pub fn open(mut buffer: B) -> Result<Self, IndexError> {
        let mut magic = [0u8; 4];
        buffer.read_bytes(&mut magic)?;
        if &magic != MAGIC {
            error!("index file failed magic verification");
            return Err(IndexError::BadMagic);
        }
        let n_ref = read_count(&mut buffer)?;
        let n_references = n_ref as usize;
        let data_start = buffer.position();
        Ok(Self {
            buffer,
            n_references,
            data_start,
            seq_offset_cache: vec![None; n_references + 1],
        })
    }

    pub fn number_of_references(&self) -> usize {
        self.n_references
    }

    /// Seeks the buffer to the start of reference `target`'s record,
    /// `target == number_of_references()` meaning "just past the last
    /// reference", using and populating the per-sequence offset cache.
    pub fn skip_to_sequence(&mut self, target: usize) -> Result<(), IndexError> {
        if let Some(pos) = self.seq_offset_cache[target] {
            trace!(target, pos, "sequence offset cache hit");
            self.buffer.seek(pos)?;
            return Ok(());
        }
        trace!(target, "sequence offset cache miss");

        let mut from = 0usize;
        let mut pos = self.data_start;
        if target > 0 {
            if let Some(p) = self.seq_offset_cache[target - 1] {
                from = target - 1;
                pos = p;
            } else if let Some((i, p)) = (0..target)
                .rev()
                .find_map(|i| self.seq_offset_cache[i].map(|p| (i, p)))
            {
                from = i;
                pos = p;
            }
        }

        self.buffer.seek(pos)?;
        for r in from..target {
            self.skip_one_reference()?;
            self.seq_offset_cache[r + 1] = Some(self.buffer.position());
        }
        Ok(())
    }

    /// Skips past one reference's bins and linear index, leaving the buffer
    /// positioned at the start of the next reference.
    fn skip_one_reference(&mut self) -> Result<(), IndexError> {
        let n_bin = read_count(&mut self.buffer)?;
        for _ in 0..n_bin {
            let _bin_id = read_bin_id(&mut self.buffer)?;
            let n_chunk = read_count(&mut self.buffer)?;
            self.buffer.skip_bytes(16 * n_chunk as u64)?;
        }
        let n_intv = read_count(&mut self.buffer)?;
        self.buffer.skip_bytes(8 * n_intv as u64)?;
        Ok(())
    }

    /// Metadata for one reference, or `None` for an out-of-range reference
    /// id or a reference with no synthetic meta-bin (old-format files).
    pub fn get_metadata(&mut self, ref_id: usize) -> Result<Option<ReferenceMetadata>, IndexError> {
        if ref_id >= self.n_references {
            return Ok(None);
        }
        self.skip_to_sequence(ref_id)?;
        let n_bin = read_count(&mut self.buffer)?;
        let mut metadata = None;
        for _ in 0..n_bin {
            let bin_id = read_bin_id(&mut self.buffer)?;
            let n_chunk = read_count(&mut self.buffer)?;
            if bin_id == binning::MAX_BINS {
                let chunks = read_chunks(&mut self.buffer, n_chunk)?;
                metadata = ReferenceMetadata::from_chunks(&chunks);
            } else {
                self.buffer.skip_bytes(16 * n_chunk as u64)?;
            }
        }
        Ok(metadata)
    }

    /// `None` when the trailing count is absent (legacy file).
    pub fn get_no_coordinate_count(&mut self) -> Result<Option<u64>, IndexError> {
        self.skip_to_sequence(self.n_references)?;
        match self.buffer.read_i64() {
            Ok(v) => Ok(Some(v as u64)),
            Err(IndexError::Truncated) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The latest linear-index entry across all references, in file order,
    /// or `None` if no reference has any linear-index entries.
    pub fn get_start_of_last_linear_bin(&mut self) -> Result<Option<VirtualOffset>, IndexError> {
        self.buffer.seek(self.data_start)?;
        let mut latest = None;
        for r in 0..self.n_references {
            let n_bin = read_count(&mut self.buffer)?;
            for _ in 0..n_bin {
                let _bin_id = read_bin_id(&mut self.buffer)?;
                let n_chunk = read_count(&mut self.buffer)?;
                self.buffer.skip_bytes(16 * n_chunk as u64)?;
            }
            let n_intv = read_count(&mut self.buffer)?;
            if n_intv > 0 {
                self.buffer.skip_bytes(8 * (n_intv as u64 - 1))?;
                latest = Some(VirtualOffset::from(read_u64(&mut self.buffer)?));
            }
            self.seq_offset_cache[r + 1] = Some(self.buffer.position());
        }
        Ok(latest)
    }

    /// Materializes the bins/linear-index slice/metadata restricted to a
    /// query, per the algorithm in `IndexReader::query`.
    pub fn query(
        &mut self,
        ref_id: usize,
        start1: u32,
        end1: u32,
    ) -> Result<Option<QueryResult>, IndexError> {
        if ref_id >= self.n_references {
            return Ok(None);
        }
        let candidates = binning::region_to_bins(u64::from(start1), u64::from(end1));
        if candidates.is_empty() {
            return Ok(None);
        }
        let candidate_set: HashSet<u32> = candidates.into_iter().collect();

        self.skip_to_sequence(ref_id)?;
        let n_bin = read_count(&mut self.buffer)?;
        let mut bins = FxHashMap::default();
        let mut metadata = None;
        for _ in 0..n_bin {
            let bin_id = read_bin_id(&mut self.buffer)?;
            let n_chunk = read_count(&mut self.buffer)?;
            if candidate_set.contains(&bin_id) {
                bins.insert(bin_id, read_chunks(&mut self.buffer, n_chunk)?);
            } else if bin_id == binning::MAX_BINS {
                metadata = ReferenceMetadata::from_chunks(&read_chunks(&mut self.buffer, n_chunk)?);
            } else {
                self.buffer.skip_bytes(16 * n_chunk as u64)?;
            }
        }

        let n_intv = read_count(&mut self.buffer)?;
        let w1 = ((start1 - 1) >> binning::LINEAR_WINDOW.trailing_zeros()) as i64;
        let w2 = if end1 > 0 {
            ((end1 - 1) >> binning::LINEAR_WINDOW.trailing_zeros()) as i64
        } else {
            i64::from(n_intv) - 1
        };
        let actual_stop = w2.min(i64::from(n_intv) - 1);

        let linear = if w1 < i64::from(n_intv) {
            self.buffer.skip_bytes(8 * w1 as u64)?;
            let count = (actual_stop - w1 + 1).max(0);
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                entries.push(VirtualOffset::from(read_u64(&mut self.buffer)?));
            }
            entries
        } else {
            Vec::new()
        };

        Ok(Some(QueryResult {
            bins,
            linear,
            metadata,
        }))
    }

    /// Convenience wrapper over [`Self::query`] that gathers every candidate
    /// bin's chunks and runs them through [`chunk::optimize`] using the
    /// query's linear-index lower bound, producing the ordered byte spans a
    /// caller actually wants to read.
    pub fn query_chunks(
        &mut self,
        ref_id: usize,
        start1: u32,
        end1: u32,
    ) -> Result<Vec<Chunk>, IndexError> {
        let Some(result) = self.query(ref_id, start1, end1)? else {
            return Ok(Vec::new());
        };
        let min_vo = result.linear.first().copied().unwrap_or(VirtualOffset::MIN);
        let all_chunks: Vec<Chunk> = result.bins.into_values().flatten().collect();
        Ok(chunk::optimize(&all_chunks, min_vo))
    }
}

fn read_count<B: IndexFileBuffer>(buffer: &mut B) -> Result<i32, IndexError> {
    let value = buffer.read_i32()?;
    if value < 0 {
        error!(value, "negative count field");
        return Err(IndexError::Corrupt {
            reason: format!("negative count field: {value}"),
        });
    }
    Ok(value)
}

fn read_bin_id<B: IndexFileBuffer>(buffer: &mut B) -> Result<u32, IndexError> {
    let raw = buffer.read_i32()?;
    if raw < 0 || raw as u32 > binning::MAX_BINS {
        return Err(IndexError::Corrupt {
            reason: format!("bin id {raw} out of range"),
        });
    }
    Ok(raw as u32)
}

fn read_u64<B: IndexFileBuffer>(buffer: &mut B) -> Result<u64, IndexError> {
    Ok(buffer.read_i64()? as u64)
}

/// Reads `n_chunk` raw VO pairs without enforcing `begin <= end`: this is
/// also used to decode the meta-bin's second pseudo-chunk, whose fields are
/// record counters with no ordering relationship to each other.
fn read_chunks<B: IndexFileBuffer>(buffer: &mut B, n_chunk: i32) -> Result<Vec<Chunk>, IndexError> {
    let mut chunks = Vec::with_capacity(n_chunk as usize);
    for _ in 0..n_chunk {
        let begin = VirtualOffset::from(read_u64(buffer)?);
        let end = VirtualOffset::from(read_u64(buffer)?);
        chunks.push(Chunk { begin, end });
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Indexer;
    use std::io::Cursor;

    struct VecBuffer {
        data: Vec<u8>,
        pos: u64,
    }

    impl IndexFileBuffer for VecBuffer {
        fn read_bytes(&mut self, out: &mut [u8]) -> Result<(), IndexError> {
            let start = self.pos as usize;
            let end = start + out.len();
            let slice = self.data.get(start..end).ok_or(IndexError::Truncated)?;
            out.copy_from_slice(slice);
            self.pos = end as u64;
            Ok(())
        }
        fn read_i32(&mut self) -> Result<i32, IndexError> {
            let mut buf = [0u8; 4];
            self.read_bytes(&mut buf)?;
            Ok(i32::from_le_bytes(buf))
        }
        fn read_i64(&mut self) -> Result<i64, IndexError> {
            let lower = self.read_i32()? as u32;
            let upper = self.read_i32()? as u32;
            Ok((((upper as u64) << 32) | (lower as u64)) as i64)
        }
        fn skip_bytes(&mut self, n: u64) -> Result<(), IndexError> {
            let new_pos = self.pos + n;
            if new_pos as usize > self.data.len() {
                return Err(IndexError::Truncated);
            }
            self.pos = new_pos;
            Ok(())
        }
        fn seek(&mut self, pos: u64) -> Result<(), IndexError> {
            if pos as usize > self.data.len() {
                return Err(IndexError::Truncated);
            }
            self.pos = pos;
            Ok(())
        }
        fn position(&self) -> u64 {
            self.pos
        }
    }

    fn build_single_record_index() -> Vec<u8> {
        let mut indexer = Indexer::new();
        indexer
            .process_record(
                0,
                1000,
                1099,
                VirtualOffset::new(0, 0),
                VirtualOffset::new(0, 0x90),
                false,
            )
            .unwrap();
        let artifact = indexer.finish().unwrap();
        let mut buf = Cursor::new(Vec::new());
        artifact.write_to(&mut buf).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_open_rejects_bad_magic() {
        let buffer = VecBuffer {
            data: b"XXXX\0\0\0\0".to_vec(),
            pos: 0,
        };
        assert!(matches!(
            IndexReader::open(buffer),
            Err(IndexError::BadMagic)
        ));
    }

    #[test]
    fn test_query_single_record() {
        let data = build_single_record_index();
        let buffer = VecBuffer { data, pos: 0 };
        let mut reader = IndexReader::open(buffer).unwrap();
        assert_eq!(reader.number_of_references(), 1);

        let chunks = reader.query_chunks(0, 1000, 1099).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].begin, VirtualOffset::new(0, 0));
        assert_eq!(chunks[0].end, VirtualOffset::new(0, 0x90));
    }

    #[test]
    fn test_query_out_of_range_reference_is_none() {
        let data = build_single_record_index();
        let buffer = VecBuffer { data, pos: 0 };
        let mut reader = IndexReader::open(buffer).unwrap();
        assert!(reader.query(5, 1, 10).unwrap().is_none());
    }

    #[test]
    fn test_get_no_coordinate_count_present() {
        let data = build_single_record_index();
        let buffer = VecBuffer { data, pos: 0 };
        let mut reader = IndexReader::open(buffer).unwrap();
        assert_eq!(reader.get_no_coordinate_count().unwrap(), Some(0));
    }

    #[test]
    fn test_get_no_coordinate_count_absent_on_legacy_file() {
        let mut data = build_single_record_index();
        let truncated_len = data.len() - 8;
        data.truncate(truncated_len);
        let buffer = VecBuffer { data, pos: 0 };
        let mut reader = IndexReader::open(buffer).unwrap();
        assert_eq!(reader.get_no_coordinate_count().unwrap(), None);
    }

    #[test]
    fn test_get_metadata_counts() {
        let data = build_single_record_index();
        let buffer = VecBuffer { data, pos: 0 };
        let mut reader = IndexReader::open(buffer).unwrap();
        let meta = reader.get_metadata(0).unwrap().unwrap();
        assert_eq!(meta.aligned_count, 1);
        assert_eq!(meta.unaligned_count, 0);
    }
}
