//! The unit of storage: one table combines its metadata, an in-memory write
//! buffer, page-backed persistent record groups, and its index set.
//!
//! Write path: records buffer in the memtable (shadowing any paged version)
//! until the byte budget trips, then flush drains them into appended data
//! pages and relocates their hash-index slots. A live record therefore exists
//! in exactly one place, memtable or page.
//!
//! Open path: the primary hash index is rebuilt by scanning data pages;
//! B-tree indexes load from their sidecar files, falling back to a full
//! rebuild when a sidecar is missing, corrupt, or stale.


use std::path::{Path, PathBuf};

use buffer::PageCache;
use common::{
    CancellationToken, ColumnDef, DbError, DbResult, EngineConfig, PageId, Record, TableId,
};
use hash::RecordSlot;
use index::IndexManager;
use memtable::MemTable;
use serde::{Deserialize, Serialize};
use storage::{codec, TableFile, PAGE_CAPACITY};
use types::Value;

/// Bincode prefix of a record group's `Vec` length under the legacy config.
const GROUP_OVERHEAD: usize = 8;

/// Table metadata persisted in page 0 of the table file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub table_id: u64,
    pub columns: Vec<ColumnDef>,
    /// Columns carrying a B-tree index, in creation order.
    pub indexed_columns: Vec<String>,
    /// Number of data pages written so far; data occupies pages `1..=n`.
    pub data_pages: u64,
}

#[derive(Debug)]
pub struct Table {
    meta: TableMeta,
    dir: PathBuf,
    file: TableFile,
    cache: PageCache,
    mem: MemTable,
    indexes: IndexManager,
}

impl Table {
    /// Create a fresh table file with a metadata page and no records.
    pub fn create(
        dir: &Path,
        name: &str,
        table_id: u64,
        columns: Vec<ColumnDef>,
        config: &EngineConfig,
    ) -> DbResult<Table> {
        validate_columns(name, &columns)?;
        let mut file = TableFile::open(&table_path(dir, name))?;
        let meta = TableMeta {
            name: name.to_string(),
            table_id,
            columns,
            indexed_columns: Vec::new(),
            data_pages: 0,
        };
        file.write_metadata(&codec::encode(&meta)?)?;
        Ok(Self::assemble(meta, dir, file, config))
    }

    /// Open a previously-created table and rebuild its indexes.
    pub fn open(dir: &Path, name: &str, config: &EngineConfig) -> DbResult<Table> {
        let mut file = TableFile::open(&table_path(dir, name))?;
        let meta_bytes = file
            .read_metadata()?
            .ok_or_else(|| DbError::Storage(format!("table '{name}' has no metadata page")))?;
        let meta: TableMeta = codec::decode(&meta_bytes)?;
        let mut table = Self::assemble(meta, dir, file, config);
        table.rebuild_primary()?;
        table.restore_btrees()?;
        Ok(table)
    }

    /// Open when the table file already holds metadata, create otherwise.
    /// An existing table must agree on its column layout.
    pub fn open_or_create(
        dir: &Path,
        name: &str,
        table_id: u64,
        columns: Vec<ColumnDef>,
        config: &EngineConfig,
    ) -> DbResult<Table> {
        let mut probe = TableFile::open(&table_path(dir, name))?;
        match probe.read_metadata()? {
            Some(_) => {
                drop(probe);
                let table = Self::open(dir, name, config)?;
                if table.meta.columns != columns {
                    return Err(DbError::Catalog(format!(
                        "table '{name}' on disk does not match the bound schema"
                    )));
                }
                Ok(table)
            }
            None => {
                drop(probe);
                Self::create(dir, name, table_id, columns, config)
            }
        }
    }

    fn assemble(meta: TableMeta, dir: &Path, file: TableFile, config: &EngineConfig) -> Table {
        let table_id = TableId(meta.table_id);
        Table {
            meta,
            dir: dir.to_path_buf(),
            file,
            cache: PageCache::new(table_id, config.page_cache_pages),
            mem: MemTable::new(config.memtable_capacity_bytes),
            indexes: IndexManager::new(config.adaptive_index_threshold, config.btree_order),
        }
    }

    // ---- Introspection ----

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.meta.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.meta.columns.iter().find(|c| c.name == name)
    }

    pub fn ordinal(&self, column: &str) -> DbResult<usize> {
        self.meta
            .columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| {
                DbError::Query(format!(
                    "unknown column '{column}' on table '{}'",
                    self.meta.name
                ))
            })
    }

    /// Number of live records, memtable and pages combined.
    pub fn count(&self) -> usize {
        self.indexes.primary().len()
    }

    pub fn data_pages(&self) -> u64 {
        self.meta.data_pages
    }

    pub fn has_btree(&self, column: &str) -> bool {
        self.indexes.has_btree(column)
    }

    pub fn statistics(&self) -> Vec<index::ColumnStats> {
        self.indexes.statistics()
    }

    pub fn buffered(&self) -> usize {
        self.mem.len()
    }

    // ---- CRUD ----

    /// Store `record` under `id`. The record's slot 0 must carry the same id.
    pub fn insert(&mut self, id: &str, record: Record) -> DbResult<()> {
        if id.is_empty() {
            return Err(DbError::Query("primary key must be non-empty".into()));
        }
        if record.id() != Some(id) {
            return Err(DbError::Query(format!(
                "record primary key does not match '{id}'"
            )));
        }
        if self.indexes.primary().contains(id) {
            return Err(DbError::DuplicateKey(id.to_string()));
        }

        let encoded_len = codec::record_size(&record)?;
        self.indexes.index_record(id, &record);
        self.indexes
            .primary_mut()
            .insert(id.to_string(), RecordSlot::Mem);
        self.mem.insert(id.to_string(), record, encoded_len);

        if self.mem.is_over_capacity() {
            log::debug!(
                "memtable for '{}' over capacity ({} bytes), flushing",
                self.meta.name,
                self.mem.bytes()
            );
            self.flush()?;
        }
        Ok(())
    }

    /// Point read: memtable first, then the page the hash index names.
    pub fn find(&mut self, id: &str) -> DbResult<Option<Record>> {
        if let Some(record) = self.mem.get(id) {
            return Ok(Some(record.clone()));
        }
        match self.indexes.primary().find(id) {
            Some(RecordSlot::Page(pid)) => {
                let group = self.read_group(pid)?;
                Ok(group.into_iter().find(|r| r.id() == Some(id)))
            }
            _ => Ok(None),
        }
    }

    /// Replace the record stored under `id`, refreshing every index.
    pub fn update(&mut self, id: &str, record: Record) -> DbResult<()> {
        if record.id() != Some(id) {
            return Err(DbError::Query(format!(
                "record primary key does not match '{id}'"
            )));
        }
        let slot = self
            .indexes
            .primary()
            .find(id)
            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
        let old = match slot {
            RecordSlot::Mem => self.mem.get(id).cloned(),
            RecordSlot::Page(pid) => self.rewrite_group_without(pid, id)?,
        }
        .ok_or_else(|| DbError::NotFound(id.to_string()))?;

        self.indexes.unindex_record(id, &old);
        let encoded_len = codec::record_size(&record)?;
        self.indexes.index_record(id, &record);
        self.indexes.primary_mut().relocate(id, RecordSlot::Mem);
        self.mem.insert(id.to_string(), record, encoded_len);

        if self.mem.is_over_capacity() {
            self.flush()?;
        }
        Ok(())
    }

    /// Remove the record stored under `id` from storage and every index.
    pub fn delete(&mut self, id: &str) -> DbResult<()> {
        let slot = self
            .indexes
            .primary()
            .find(id)
            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
        let old = match slot {
            RecordSlot::Mem => self.mem.remove(id),
            RecordSlot::Page(pid) => self.rewrite_group_without(pid, id)?,
        }
        .ok_or_else(|| DbError::NotFound(id.to_string()))?;

        self.indexes.primary_mut().remove(id);
        self.indexes.unindex_record(id, &old);
        Ok(())
    }

    // ---- Scans ----

    /// Every live record, memtable plus pages, in unspecified order.
    pub fn select_all(&mut self, token: &CancellationToken) -> DbResult<Vec<Record>> {
        let mut out = Vec::with_capacity(self.count());
        for (_, record) in self.mem.iter() {
            token.check()?;
            out.push(record.clone());
        }
        for page_no in 1..=self.meta.data_pages {
            token.check()?;
            let group = self.read_group(PageId(page_no))?;
            out.extend(group);
        }
        Ok(out)
    }

    /// Records ascending by `column`; requires a B-tree index on it.
    pub fn select_sorted(
        &mut self,
        column: &str,
        token: &CancellationToken,
    ) -> DbResult<Vec<Record>> {
        let ids = self.indexes.btree(column)?.all_sorted();
        self.fetch_records(&ids, token)
    }

    pub fn find_by_range(
        &mut self,
        column: &str,
        lo: &Value,
        hi: &Value,
        token: &CancellationToken,
    ) -> DbResult<Vec<Record>> {
        let ids = self.indexes.find_range(column, lo, hi)?;
        self.fetch_records(&ids, token)
    }

    pub fn find_greater_than(
        &mut self,
        column: &str,
        lo: &Value,
        token: &CancellationToken,
    ) -> DbResult<Vec<Record>> {
        let ids = self.indexes.find_greater_than(column, lo)?;
        self.fetch_records(&ids, token)
    }

    pub fn find_less_than(
        &mut self,
        column: &str,
        hi: &Value,
        token: &CancellationToken,
    ) -> DbResult<Vec<Record>> {
        let ids = self.indexes.find_less_than(column, hi)?;
        self.fetch_records(&ids, token)
    }

    /// Ids carrying exactly `value` in `column`, via the column's B-tree.
    pub fn find_ids_by_value(&self, column: &str, value: &Value) -> DbResult<Vec<String>> {
        self.indexes.find(column, value)
    }

    /// Fetch records for a list of primary keys, preserving list order.
    pub fn fetch_records(
        &mut self,
        ids: &[String],
        token: &CancellationToken,
    ) -> DbResult<Vec<Record>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            token.check()?;
            if let Some(record) = self.find(id)? {
                out.push(record);
            } else {
                log::debug!("index named id '{id}' but no record exists");
            }
        }
        Ok(out)
    }

    // ---- Index management ----

    /// Create a B-tree index over `column`, backfilled from live records.
    /// Creating an existing index is a no-op.
    pub fn create_index(&mut self, column: &str) -> DbResult<()> {
        let ordinal = self.ordinal(column)?;
        if self.indexes.has_btree(column) {
            return Ok(());
        }
        log::info!(
            "creating B-tree index on {}.{column}",
            self.meta.name
        );
        self.backfill_btree(column, ordinal)?;
        if !self.meta.indexed_columns.iter().any(|c| c == column) {
            self.meta.indexed_columns.push(column.to_string());
        }
        Ok(())
    }

    /// Count a query touching `column`; creates the adaptive index when the
    /// access counter crosses the configured threshold.
    pub fn note_access(&mut self, column: &str) -> DbResult<()> {
        if self.ordinal(column).is_err() {
            return Ok(());
        }
        if self.indexes.record_access(column) {
            log::info!(
                "adaptive threshold reached for {}.{column}, creating index",
                self.meta.name
            );
            self.create_index(column)?;
        }
        Ok(())
    }

    // ---- Durability ----

    /// Drain the memtable into appended data pages, write back dirty pages,
    /// persist index sidecars and the metadata page.
    ///
    /// A failed flush leaves every record reachable; the next flush retries
    /// whatever remained dirty.
    pub fn flush(&mut self) -> DbResult<()> {
        if !self.mem.is_empty() {
            let drained = self.mem.drain_sorted();

            if let Some((id, _, len)) = drained
                .iter()
                .find(|(_, _, len)| GROUP_OVERHEAD + len > PAGE_CAPACITY)
            {
                let message = format!(
                    "record '{id}' encodes to {len} bytes, too large for one page"
                );
                for (id, record, len) in drained {
                    self.mem.insert(id, record, len);
                }
                return Err(DbError::Storage(message));
            }

            let mut group: Vec<(String, Record)> = Vec::new();
            let mut group_bytes = GROUP_OVERHEAD;
            let mut groups: Vec<Vec<(String, Record)>> = Vec::new();
            for (id, record, len) in drained {
                if group_bytes + len > PAGE_CAPACITY && !group.is_empty() {
                    groups.push(std::mem::take(&mut group));
                    group_bytes = GROUP_OVERHEAD;
                }
                group_bytes += len;
                group.push((id, record));
            }
            if !group.is_empty() {
                groups.push(group);
            }

            for group in groups {
                let pid = PageId(self.meta.data_pages + 1);
                let records: Vec<Record> = group.iter().map(|(_, r)| r.clone()).collect();
                let payload = codec::encode_records(&records)?;
                self.cache.write(pid, &mut self.file, &payload)?;
                self.meta.data_pages += 1;
                for (id, _) in &group {
                    self.indexes
                        .primary_mut()
                        .relocate(id, RecordSlot::Page(pid));
                }
            }
            log::debug!(
                "flushed memtable of '{}' into pages, {} data pages total",
                self.meta.name,
                self.meta.data_pages
            );
        }

        self.file.write_metadata(&codec::encode(&self.meta)?)?;
        self.cache.flush(&mut self.file)?;
        self.persist_sidecars()?;
        Ok(())
    }

    /// Flush and release cached pages and file handles.
    pub fn close(&mut self) -> DbResult<()> {
        self.flush()?;
        self.cache.clear(&mut self.file)
    }

    // ---- Internals ----

    fn read_group(&mut self, pid: PageId) -> DbResult<Vec<Record>> {
        let page = self.cache.get(pid, &mut self.file)?;
        codec::decode_records(page.payload()?)
    }

    /// Rewrite a data page's record group without `id`, returning the
    /// removed record. The page is dirtied in cache, not written through.
    fn rewrite_group_without(&mut self, pid: PageId, id: &str) -> DbResult<Option<Record>> {
        let group = self.read_group(pid)?;
        let mut removed = None;
        let remaining: Vec<Record> = group
            .into_iter()
            .filter_map(|record| {
                if record.id() == Some(id) {
                    removed = Some(record);
                    None
                } else {
                    Some(record)
                }
            })
            .collect();
        if removed.is_some() {
            let payload = codec::encode_records(&remaining)?;
            self.cache.write(pid, &mut self.file, &payload)?;
        }
        Ok(removed)
    }

    fn rebuild_primary(&mut self) -> DbResult<()> {
        for page_no in 1..=self.meta.data_pages {
            let group = self.read_group(PageId(page_no))?;
            for record in group {
                if let Some(id) = record.id() {
                    self.indexes
                        .primary_mut()
                        .insert(id.to_string(), RecordSlot::Page(PageId(page_no)));
                }
            }
        }
        Ok(())
    }

    fn restore_btrees(&mut self) -> DbResult<()> {
        let columns = self.meta.indexed_columns.clone();
        for column in columns {
            let ordinal = self.ordinal(&column)?;
            match btree::BTreeIndex::load(&self.sidecar_path(&column)) {
                Ok(tree) if tree.len() == self.indexes.primary().len() => {
                    self.indexes.install_btree(&column, ordinal, tree);
                }
                Ok(stale) => {
                    log::warn!(
                        "sidecar for {}.{column} holds {} postings, table has {}; rebuilding",
                        self.meta.name,
                        stale.len(),
                        self.indexes.primary().len()
                    );
                    self.backfill_btree(&column, ordinal)?;
                }
                Err(DbError::IndexCorrupt(reason)) => {
                    log::warn!(
                        "rebuilding index {}.{column}: {reason}",
                        self.meta.name
                    );
                    self.backfill_btree(&column, ordinal)?;
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Build a fresh B-tree over `column` from every live record.
    fn backfill_btree(&mut self, column: &str, ordinal: usize) -> DbResult<()> {
        let token = CancellationToken::new();
        let records = self.select_all(&token)?;
        let tree = self.indexes.add_btree(column, ordinal);
        for record in &records {
            if let (Some(id), Some(value)) = (record.id(), record.value(ordinal)) {
                tree.insert(value.clone(), id.to_string());
            }
        }
        Ok(())
    }

    fn persist_sidecars(&mut self) -> DbResult<()> {
        let columns: Vec<String> = self.indexes.btree_columns().map(String::from).collect();
        if columns.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(self.sidecar_dir())?;
        for column in columns {
            let path = self.sidecar_path(&column);
            self.indexes.btree(&column)?.save(&path)?;
        }
        Ok(())
    }

    fn sidecar_dir(&self) -> PathBuf {
        self.dir.join(format!("{}_indexes", self.meta.name))
    }

    fn sidecar_path(&self, column: &str) -> PathBuf {
        self.sidecar_dir().join(format!("{column}.idx"))
    }
}

fn table_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.tbl"))
}

fn validate_columns(name: &str, columns: &[ColumnDef]) -> DbResult<()> {
    let pk_ok = columns
        .first()
        .map(|c| c.name == "id" && c.kind == types::ScalarKind::Id && !c.nullable)
        .unwrap_or(false);
    if !pk_ok {
        return Err(DbError::Catalog(format!(
            "table '{name}' must lead with a non-null 'id' column of kind Id"
        )));
    }
    Ok(())
}
