//! Page-granular storage: fixed-size pages drawn from a buffer pool, one
//! file per table, and the bincode codec for record groups and metadata.
//!
//! File layout (`<db>/<table>.tbl`):
//! - page 0: `[u32 LE length][bincode table metadata]`, zero-padded to 4096
//! - pages >= 1: `[u32 LE length][bincode record group]`

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use common::{DbError, DbResult, PageId};

pub mod codec;

pub const PAGE_SIZE: usize = 4096;

/// Bytes of the little-endian length prefix at the start of every used page.
const LEN_PREFIX: usize = 4;

/// Largest payload a single page can frame.
pub const PAGE_CAPACITY: usize = PAGE_SIZE - LEN_PREFIX;

/// A fixed-size byte block, the unit of I/O. The backing buffer comes from a
/// `PagePool` and goes back to it when the owning cache evicts the page.
#[derive(Debug)]
pub struct Page {
    pub id: PageId,
    pub data: Box<[u8]>,
    pub dirty: bool,
}

impl Page {
    pub fn new(id: PageId, data: Box<[u8]>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            id,
            data,
            dirty: false,
        }
    }

    /// Frame `payload` into the page and mark it dirty.
    pub fn write_payload(&mut self, payload: &[u8]) -> DbResult<()> {
        if payload.len() > PAGE_CAPACITY {
            return Err(DbError::Storage(format!(
                "payload of {} bytes exceeds page capacity {}",
                payload.len(),
                PAGE_CAPACITY
            )));
        }
        let len = payload.len() as u32;
        self.data[..LEN_PREFIX].copy_from_slice(&len.to_le_bytes());
        self.data[LEN_PREFIX..LEN_PREFIX + payload.len()].copy_from_slice(payload);
        // Zero the tail so stale bytes never outlive the previous payload.
        self.data[LEN_PREFIX + payload.len()..].fill(0);
        self.dirty = true;
        Ok(())
    }

    /// The framed payload, empty for a never-written page.
    pub fn payload(&self) -> DbResult<&[u8]> {
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&self.data[..LEN_PREFIX]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > PAGE_CAPACITY {
            return Err(DbError::Storage(format!(
                "page {} declares {} payload bytes, max is {}",
                self.id.0, len, PAGE_CAPACITY
            )));
        }
        Ok(&self.data[LEN_PREFIX..LEN_PREFIX + len])
    }

    /// Reclaim the backing buffer for pooling.
    pub fn into_buffer(self) -> Box<[u8]> {
        self.data
    }
}

/// Free list of page buffers, so a miss storm reuses allocations instead of
/// churning the allocator.
#[derive(Debug, Default)]
pub struct PagePool {
    free: Vec<Box<[u8]>>,
}

impl PagePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> Box<[u8]> {
        match self.free.pop() {
            Some(mut buf) => {
                buf.fill(0);
                buf
            }
            None => vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    pub fn release(&mut self, buf: Box<[u8]>) {
        if buf.len() == PAGE_SIZE {
            self.free.push(buf);
        }
    }

    pub fn pooled(&self) -> usize {
        self.free.len()
    }
}

/// Page-granular access to one table's backing file.
#[derive(Debug)]
pub struct TableFile {
    file: File,
    path: PathBuf,
}

impl TableFile {
    pub fn open(path: &Path) -> DbResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_pages(&self) -> DbResult<u64> {
        Ok(self.file.metadata()?.len() / PAGE_SIZE as u64)
    }

    /// Read a page into `buf`. Returns `false` (and zeroes the buffer) when
    /// the page has never been written.
    pub fn read_page(&mut self, pid: PageId, buf: &mut [u8]) -> DbResult<bool> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        if pid.0 >= self.num_pages()? {
            buf.fill(0);
            return Ok(false);
        }
        self.file.seek(SeekFrom::Start(pid.0 * PAGE_SIZE as u64))?;
        self.file.read_exact(buf)?;
        Ok(true)
    }

    /// Write one full page at `pageNo * 4096`.
    pub fn write_page(&mut self, pid: PageId, buf: &[u8]) -> DbResult<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        self.file.seek(SeekFrom::Start(pid.0 * PAGE_SIZE as u64))?;
        self.file.write_all(buf)?;
        self.file.flush()?;
        Ok(())
    }

    /// Frame and write the metadata payload into page 0.
    pub fn write_metadata(&mut self, payload: &[u8]) -> DbResult<()> {
        if payload.len() > PAGE_CAPACITY {
            return Err(DbError::Storage(format!(
                "table metadata of {} bytes exceeds page capacity",
                payload.len()
            )));
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        let len = payload.len() as u32;
        buf[..LEN_PREFIX].copy_from_slice(&len.to_le_bytes());
        buf[LEN_PREFIX..LEN_PREFIX + payload.len()].copy_from_slice(payload);
        self.write_page(PageId(0), &buf)
    }

    /// The metadata payload from page 0, or `None` for a fresh file.
    pub fn read_metadata(&mut self) -> DbResult<Option<Vec<u8>>> {
        if self.num_pages()? == 0 {
            return Ok(None);
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        self.read_page(PageId(0), &mut buf)?;
        let mut len_bytes = [0u8; LEN_PREFIX];
        len_bytes.copy_from_slice(&buf[..LEN_PREFIX]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len == 0 {
            return Ok(None);
        }
        if len > PAGE_CAPACITY {
            return Err(DbError::Storage(format!(
                "metadata page declares {len} bytes, max is {PAGE_CAPACITY}"
            )));
        }
        Ok(Some(buf[LEN_PREFIX..LEN_PREFIX + len].to_vec()))
    }
}
