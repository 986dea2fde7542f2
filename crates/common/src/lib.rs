
use serde::{Deserialize, Serialize};
use std::{
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use thiserror::Error;
use types::{ScalarKind, Value};

/// Logical identifier for a page within a table file. Page 0 is reserved for
/// table metadata; data pages start at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageId(pub u64);

/// Logical identifier for a table registered in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u64);

/// Positional record representation backed by `types::Value`.
///
/// Slot 0 is always the primary key (`Value::Id`); the remaining slots follow
/// the owning table's column order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// The primary key, when slot 0 holds one.
    pub fn id(&self) -> Option<&str> {
        self.values.first().and_then(|v| v.as_id())
    }

    pub fn value(&self, ordinal: usize) -> Option<&Value> {
        self.values.get(ordinal)
    }

    pub fn set_value(&mut self, ordinal: usize, value: Value) {
        if ordinal < self.values.len() {
            self.values[ordinal] = value;
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Record::new(values)
    }
}

/// Describes one column of a table, as derived from an IDL field.
///
/// Relationship fields become foreign-key columns: a singular reference
/// `author: User` yields `authorId` (kind `Id`), a plural reference
/// `posts: [Post]` yields `postsIds` with `is_list` set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ScalarKind,
    pub nullable: bool,
    pub is_list: bool,
    pub is_foreign_key: bool,
    pub related_type: Option<String>,
}

impl ColumnDef {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind, nullable: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable,
            is_list: false,
            is_foreign_key: false,
            related_type: None,
        }
    }

    pub fn primary_key() -> Self {
        Self::scalar("id", ScalarKind::Id, false)
    }

    pub fn foreign_key(name: impl Into<String>, related_type: impl Into<String>, is_list: bool) -> Self {
        Self {
            name: name.into(),
            kind: ScalarKind::Id,
            nullable: true,
            is_list,
            is_foreign_key: true,
            related_type: Some(related_type.into()),
        }
    }

    /// True when a record must carry a non-null value for this column.
    pub fn required(&self) -> bool {
        !self.nullable && !self.is_foreign_key
    }
}

/// Canonical error type shared across engine subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("schema violation: type '{type_name}', record '{key}', field '{field}'")]
    SchemaViolation {
        type_name: String,
        key: String,
        field: String,
    },
    #[error("duplicate key '{0}'")]
    DuplicateKey(String),
    #[error("not found: '{0}'")]
    NotFound(String),
    #[error("query: {0}")]
    Query(String),
    #[error("catalog: {0}")]
    Catalog(String),
    #[error("storage: {0}")]
    Storage(String),
    /// An index sidecar could not be decoded. Recovered by rebuild during
    /// table open and never surfaced to callers.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Runtime configuration for the engine.
///
/// # Example
/// ```
/// use common::EngineConfig;
/// use std::path::PathBuf;
///
/// let config = EngineConfig::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .page_cache_pages(200)
///     .adaptive_index_threshold(5)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct EngineConfig {
    /// Directory holding `<table>.tbl` files and index sidecars.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Number of pages the page cache keeps resident.
    #[builder(default = 100)]
    pub page_cache_pages: usize,
    /// Byte budget of buffered writes before a table flushes to pages.
    #[builder(default = 16 * 1024 * 1024)]
    pub memtable_capacity_bytes: usize,
    /// Maximum children per B-tree node.
    #[builder(default = 32)]
    pub btree_order: usize,
    /// Query accesses on a column before a B-tree index is created for it.
    #[builder(default = 3)]
    pub adaptive_index_threshold: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db_data"),
            page_cache_pages: 100,
            memtable_capacity_bytes: 16 * 1024 * 1024,
            btree_order: 32,
            adaptive_index_threshold: 3,
        }
    }
}

/// Cooperative cancellation flag, polled between records and page operations.
///
/// Clones share the flag, so a caller can hand one to a long-running scan and
/// trip it from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Err(`Cancelled`) once the token has been tripped.
    pub fn check(&self) -> DbResult<()> {
        if self.is_cancelled() {
            Err(DbError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{
        CancellationToken, ColumnDef, DbError, DbResult, EngineConfig, PageId, Record, TableId,
    };
    pub use types::{ScalarKind, Value};
}
