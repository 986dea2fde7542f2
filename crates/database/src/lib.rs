//! Embedding facade over the engine.
//!
//! A `Database` owns the schema catalog for one data directory. The expected
//! flow: open with a config, bind a parsed IDL, optionally load a JSON seed
//! document, then run queries.
//!
//! # Example
//!
//! ```no_run
//! use common::EngineConfig;
//! use database::Database;
//! use executor::{Filter, Selection};
//! use schema::idl::{FieldDefinition, TypeDefinition};
//! use types::{ScalarKind, Value};
//!
//! let mut db = Database::open(EngineConfig::default());
//! db.bind_schema(&[TypeDefinition::new(
//!     "User",
//!     vec![FieldDefinition::scalar("name", ScalarKind::String, true)],
//! )])
//! .unwrap();
//! db.load_seed(r#"{"User": [{"id": "u1", "name": "Alice"}]}"#).unwrap();
//!
//! let response = db
//!     .query(&[Selection::new("users")
//!         .filtered(Filter::eq("id", Value::Id("u1".into())))])
//!     .unwrap();
//! assert!(response.errors.is_empty());
//! ```


use common::{CancellationToken, DbError, DbResult, EngineConfig};
use executor::{QueryExecutor, QueryResponse, Selection};
use schema::idl::TypeDefinition;
use schema::{load_seed, write_guard, SchemaCatalog, SeedReport};

pub struct Database {
    config: EngineConfig,
    catalog: Option<SchemaCatalog>,
}

impl Database {
    pub fn open(config: EngineConfig) -> Self {
        Self {
            config,
            catalog: None,
        }
    }

    /// Bind a parsed IDL, materializing one table per object type. Tables
    /// persisted by an earlier process reopen with their records intact.
    pub fn bind_schema(&mut self, defs: &[TypeDefinition]) -> DbResult<()> {
        let catalog = SchemaCatalog::bind(defs, self.config.clone())?;
        log::info!("schema bound: {} types", defs.len());
        self.catalog = Some(catalog);
        Ok(())
    }

    pub fn catalog(&self) -> DbResult<&SchemaCatalog> {
        self.catalog
            .as_ref()
            .ok_or_else(|| DbError::Catalog("no schema bound".into()))
    }

    /// Load a `{ TypeName: [record, ...] }` seed document. Per-record
    /// validation failures are collected in the report; loading continues.
    pub fn load_seed(&self, json: &str) -> DbResult<SeedReport> {
        load_seed(self.catalog()?, json)
    }

    pub fn query(&self, selections: &[Selection]) -> DbResult<QueryResponse> {
        Ok(QueryExecutor::new(self.catalog()?).execute(selections))
    }

    pub fn query_with_token(
        &self,
        selections: &[Selection],
        token: CancellationToken,
    ) -> DbResult<QueryResponse> {
        Ok(QueryExecutor::with_token(self.catalog()?, token).execute(selections))
    }

    pub fn table_names(&self) -> DbResult<Vec<String>> {
        Ok(self.catalog()?.table_names())
    }

    /// Live record count for one type.
    pub fn count(&self, type_name: &str) -> DbResult<usize> {
        let table = self.catalog()?.table(type_name)?;
        let guard = table
            .read()
            .map_err(|_| DbError::Storage("table lock poisoned".into()))?;
        Ok(guard.count())
    }

    /// Per-column access counters and index inventory for one type.
    pub fn statistics(&self, type_name: &str) -> DbResult<Vec<index_stats::ColumnStats>> {
        let table = self.catalog()?.table(type_name)?;
        let guard = table
            .read()
            .map_err(|_| DbError::Storage("table lock poisoned".into()))?;
        Ok(guard.statistics())
    }

    /// Flush every table's buffered writes, dirty pages and index sidecars.
    pub fn flush(&self) -> DbResult<()> {
        self.catalog()?.flush_all()
    }

    /// Flush and release every table.
    pub fn close(&mut self) -> DbResult<()> {
        if let Some(catalog) = &self.catalog {
            catalog.close_all()?;
        }
        self.catalog = None;
        Ok(())
    }

    /// Direct access to one table, for embedding code that bypasses the
    /// query layer.
    pub fn with_table<R>(
        &self,
        type_name: &str,
        f: impl FnOnce(&mut table::Table) -> DbResult<R>,
    ) -> DbResult<R> {
        let lock = self.catalog()?.table(type_name)?;
        let mut guard = write_guard(&lock)?;
        f(&mut guard)
    }
}

/// Re-export of the index statistics type, so embedders need not depend on
/// the index crate directly.
pub mod index_stats {
    pub use index::ColumnStats;
}
