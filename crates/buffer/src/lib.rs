//! Bounded page cache with LRU eviction and write-back.
//!
//! The cache sits between a table and its backing file:
//! - pages load lazily on miss and are served from memory afterwards
//! - a full cache evicts the least recently used page, writing it back
//!   first when dirty
//! - evicted buffers return to the table's `PagePool`
//!
//! Each table owns one cache, so the configured capacity bounds the
//! steady-state page memory per table.


use common::{DbResult, PageId, TableId};
use lru::LruCache;
use std::num::NonZeroUsize;
use storage::{Page, PagePool, TableFile};

#[derive(Debug)]
pub struct PageCache {
    table: TableId,
    capacity: usize,
    cache: LruCache<(TableId, PageId), Page>,
    pool: PagePool,
}

impl PageCache {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(table: TableId, capacity: usize) -> Self {
        assert!(capacity > 0, "page cache capacity must be > 0");
        Self {
            table,
            capacity,
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
            pool: PagePool::new(),
        }
    }

    /// Fetch a page, loading it from `file` on miss. Updates recency.
    pub fn get(&mut self, pid: PageId, file: &mut TableFile) -> DbResult<&mut Page> {
        let key = (self.table, pid);
        if self.cache.contains(&key) {
            return Ok(self.cache.get_mut(&key).expect("present after contains"));
        }

        let mut buf = self.pool.acquire();
        file.read_page(pid, &mut buf)?;
        let page = Page::new(pid, buf);

        self.evict_if_full(file)?;
        self.cache.push(key, page);
        Ok(self.cache.get_mut(&key).expect("just inserted"))
    }

    /// Frame `payload` into the page, marking it dirty.
    pub fn write(&mut self, pid: PageId, file: &mut TableFile, payload: &[u8]) -> DbResult<()> {
        let page = self.get(pid, file)?;
        page.write_payload(payload)
    }

    /// Write back every dirty resident page and mark it clean.
    pub fn flush(&mut self, file: &mut TableFile) -> DbResult<()> {
        for (key, page) in self.cache.iter_mut() {
            if page.dirty {
                file.write_page(key.1, &page.data)?;
                page.dirty = false;
            }
        }
        Ok(())
    }

    /// Flush, then drop every resident page back into the pool. Used by
    /// table close.
    pub fn clear(&mut self, file: &mut TableFile) -> DbResult<()> {
        self.flush(file)?;
        while let Some((_, page)) = self.cache.pop_lru() {
            self.pool.release(page.into_buffer());
        }
        Ok(())
    }

    pub fn resident(&self) -> usize {
        self.cache.len()
    }

    fn evict_if_full(&mut self, file: &mut TableFile) -> DbResult<()> {
        if self.cache.len() < self.capacity {
            return Ok(());
        }
        if let Some(((table, pid), page)) = self.cache.pop_lru() {
            if page.dirty {
                log::debug!("evicting dirty page {} with write-back", pid.0);
                if let Err(err) = file.write_page(pid, &page.data) {
                    // Keep the dirty page resident rather than losing it.
                    self.cache.push((table, pid), page);
                    return Err(err);
                }
            }
            self.pool.release(page.into_buffer());
        }
        Ok(())
    }
}
