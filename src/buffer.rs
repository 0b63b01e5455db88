//! Little-endian random-access reading over either a memory-mapped region or
//! an on-demand paged file. Callers pick the implementation at construction
//! time; nothing here chooses one at runtime on their behalf.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use memmap2::Mmap;

use crate::error::IndexError;

/// Little-endian, sequential-or-seekable reads over the index file.
pub trait IndexFileBuffer {
    fn read_bytes(&mut self, out: &mut [u8]) -> Result<(), IndexError>;
    fn read_i32(&mut self) -> Result<i32, IndexError>;
    fn read_i64(&mut self) -> Result<i64, IndexError>;
    fn skip_bytes(&mut self, n: u64) -> Result<(), IndexError>;
    fn seek(&mut self, pos: u64) -> Result<(), IndexError>;
    fn position(&self) -> u64;
}

/// An in-memory buffer, useful for round-tripping an artifact without
/// touching disk (tests, benchmarks, merging freshly-built segments).
impl IndexFileBuffer for std::io::Cursor<Vec<u8>> {
    fn read_bytes(&mut self, out: &mut [u8]) -> Result<(), IndexError> {
        self.read_exact(out).map_err(|_| IndexError::Truncated)
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
        Seek::seek(self, SeekFrom::Current(n as i64))
            .map(|_| ())
            .map_err(|_| IndexError::Truncated)
    }

    fn seek(&mut self, pos: u64) -> Result<(), IndexError> {
        Seek::seek(self, SeekFrom::Start(pos))
            .map(|_| ())
            .map_err(|_| IndexError::Truncated)
    }

    fn position(&self) -> u64 {
        // Cursor's own inherent `position` (distinct from the trait method
        // of the same name we're implementing here).
        std::io::Cursor::position(self)
    }
}

/// Backed by a read-only `mmap`; seeking is O(1) pointer arithmetic.
pub struct MemoryMappedBuffer {
    mmap: Mmap,
    pos: u64,
}

impl MemoryMappedBuffer {
    pub fn open(file: &File) -> Result<Self, IndexError> {
        let mmap = unsafe { Mmap::map(file)? };
        Ok(Self { mmap, pos: 0 })
    }
}

impl IndexFileBuffer for MemoryMappedBuffer {
    fn read_bytes(&mut self, out: &mut [u8]) -> Result<(), IndexError> {
        let start = self.pos as usize;
        let end = start + out.len();
        let slice = self.mmap.get(start..end).ok_or(IndexError::Truncated)?;
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
        // The format does not 8-byte-align i64s; reading straight from the
        // mapping is fine here since the mapping has no alignment
        // requirement, but we still decompose into two i32 reads to match
        // the paged implementation's on-disk contract exactly.
        let lower = self.read_i32()? as u32;
        let upper = self.read_i32()? as u32;
        Ok((((upper as u64) << 32) | (lower as u64)) as i64)
    }

    fn skip_bytes(&mut self, n: u64) -> Result<(), IndexError> {
        let new_pos = self.pos + n;
        if new_pos as usize > self.mmap.len() {
            return Err(IndexError::Truncated);
        }
        self.pos = new_pos;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<(), IndexError> {
        if pos as usize > self.mmap.len() {
            return Err(IndexError::Truncated);
        }
        self.pos = pos;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

const PAGE_SIZE: usize = 4096;

/// Owns a random-access file handle and a single 4 KiB page buffer.
pub struct PagedBuffer {
    file: File,
    file_len: u64,
    page: [u8; PAGE_SIZE],
    page_start: Option<u64>,
    pos: u64,
}

impl PagedBuffer {
    pub fn open(file: File) -> Result<Self, IndexError> {
        let file_len = file.metadata()?.len();
        Ok(Self {
            file,
            file_len,
            page: [0u8; PAGE_SIZE],
            page_start: None,
            pos: 0,
        })
    }

    fn ensure_page(&mut self, addr: u64) -> Result<(), IndexError> {
        let page_addr = addr - (addr % PAGE_SIZE as u64);
        if self.page_start == Some(page_addr) {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(page_addr))?;
        let to_read = PAGE_SIZE.min((self.file_len - page_addr) as usize);
        self.page[..to_read].fill(0);
        self.file.read_exact(&mut self.page[..to_read])?;
        self.page_start = Some(page_addr);
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, IndexError> {
        if self.pos >= self.file_len {
            return Err(IndexError::Truncated);
        }
        self.ensure_page(self.pos)?;
        let page_start = self.page_start.expect("page just ensured");
        let byte = self.page[(self.pos - page_start) as usize];
        self.pos += 1;
        Ok(byte)
    }
}

impl IndexFileBuffer for PagedBuffer {
    fn read_bytes(&mut self, out: &mut [u8]) -> Result<(), IndexError> {
        for slot in out.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(())
    }

    fn read_i32(&mut self) -> Result<i32, IndexError> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_i64(&mut self) -> Result<i64, IndexError> {
        // BAI does not 8-byte-align i64 fields; decompose into two
        // little-endian i32 reads and combine as (upper<<32)|lower.
        let lower = self.read_i32()? as u32;
        let upper = self.read_i32()? as u32;
        Ok((((upper as u64) << 32) | (lower as u64)) as i64)
    }

    fn skip_bytes(&mut self, n: u64) -> Result<(), IndexError> {
        let new_pos = self.pos + n;
        if new_pos > self.file_len {
            return Err(IndexError::Truncated);
        }
        self.pos = new_pos;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<(), IndexError> {
        if pos > self.file_len {
            return Err(IndexError::Truncated);
        }
        self.pos = pos;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::TestDir;
    use std::fs;

    /// Writes `bytes` to a fresh on-disk file under a scratch test
    /// directory, returning the directory (kept alive for the file's
    /// lifetime) and a freshly opened handle to it.
    fn write_test_file(prefix: &str, bytes: &[u8]) -> (TestDir, File) {
        let dir = TestDir::new(prefix).unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, bytes).unwrap();
        let file = File::open(&path).unwrap();
        (dir, file)
    }

    #[test]
    fn test_paged_i32_roundtrip() {
        let (_dir, file) = write_test_file("paged_i32_roundtrip", &42i32.to_le_bytes());
        let mut buf = PagedBuffer::open(file).unwrap();
        assert_eq!(buf.read_i32().unwrap(), 42);
    }

    #[test]
    fn test_paged_i64_split_across_two_i32_reads() {
        let value: i64 = 0x0102_0304_0506_0708;
        let (_dir, file) = write_test_file("paged_i64_split", &value.to_le_bytes());
        let mut buf = PagedBuffer::open(file).unwrap();
        assert_eq!(buf.read_i64().unwrap(), value);
    }

    #[test]
    fn test_paged_crosses_page_boundary() {
        let mut bytes = vec![0u8; PAGE_SIZE - 2];
        bytes.extend_from_slice(&99i32.to_le_bytes());
        let (_dir, file) = write_test_file("paged_crosses_page_boundary", &bytes);
        let mut buf = PagedBuffer::open(file).unwrap();
        buf.skip_bytes((PAGE_SIZE - 2) as u64).unwrap();
        assert_eq!(buf.read_i32().unwrap(), 99);
    }

    #[test]
    fn test_paged_truncated_read_fails() {
        let (_dir, file) = write_test_file("paged_truncated_read_fails", &[1, 2, 3]);
        let mut buf = PagedBuffer::open(file).unwrap();
        assert!(matches!(buf.read_i32(), Err(IndexError::Truncated)));
    }

    #[test]
    fn test_mmap_i32_roundtrip() {
        let (_dir, file) = write_test_file("mmap_i32_roundtrip", &7i32.to_le_bytes());
        let mut buf = MemoryMappedBuffer::open(&file).unwrap();
        assert_eq!(buf.read_i32().unwrap(), 7);
    }

    #[test]
    fn test_mmap_seek_and_position() {
        let (_dir, file) = write_test_file("mmap_seek_and_position", &[0, 0, 0, 0, 5, 0, 0, 0]);
        let mut buf = MemoryMappedBuffer::open(&file).unwrap();
        buf.seek(4).unwrap();
        assert_eq!(buf.position(), 4);
        assert_eq!(buf.read_i32().unwrap(), 5);
    }
}
