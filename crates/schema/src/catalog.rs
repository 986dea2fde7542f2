//! Binding an IDL to storage: one table per object type, derived foreign-key
//! columns, and compiled descriptors for the executor.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use ahash::RandomState;
use common::{ColumnDef, DbError, DbResult, EngineConfig};
use hashbrown::{HashMap, HashSet};
use table::Table;

use crate::descriptor::TypeDescriptor;
use crate::idl::{TypeDefinition, TypeRef};

/// Acquire a table's write lock, mapping poisoning to a storage error.
pub fn write_guard(lock: &RwLock<Table>) -> DbResult<RwLockWriteGuard<'_, Table>> {
    lock.write()
        .map_err(|_| DbError::Storage("table lock poisoned".into()))
}

pub struct SchemaCatalog {
    config: EngineConfig,
    types: HashMap<String, TypeDescriptor, RandomState>,
    /// Ordered by table name so multi-table operations can lock ascending.
    tables: BTreeMap<String, Arc<RwLock<Table>>>,
}

impl SchemaCatalog {
    /// Materialize the catalog from a parsed IDL: validates type references,
    /// derives columns, and opens (or creates) one table per object type.
    pub fn bind(defs: &[TypeDefinition], config: EngineConfig) -> DbResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let mut known: HashSet<&str, RandomState> = HashSet::default();
        for def in defs {
            if !known.insert(def.name.as_str()) {
                return Err(DbError::Catalog(format!(
                    "type '{}' defined more than once",
                    def.name
                )));
            }
        }

        let mut types: HashMap<String, TypeDescriptor, RandomState> = HashMap::default();
        let mut tables = BTreeMap::new();
        for (idx, def) in defs.iter().enumerate() {
            let (columns, fields) = derive_columns(def, &known)?;
            let table = Table::open_or_create(
                &config.data_dir,
                &def.name,
                idx as u64 + 1,
                columns.clone(),
                &config,
            )?;
            log::debug!(
                "bound type '{}' to table with {} columns",
                def.name,
                columns.len()
            );
            tables.insert(def.name.clone(), Arc::new(RwLock::new(table)));
            types.insert(
                def.name.clone(),
                TypeDescriptor::new(def.name.clone(), columns, fields),
            );
        }

        Ok(Self {
            config,
            types,
            tables,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn descriptor(&self, type_name: &str) -> DbResult<&TypeDescriptor> {
        self.types
            .get(type_name)
            .ok_or_else(|| DbError::Catalog(format!("unknown type '{type_name}'")))
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    pub fn table(&self, type_name: &str) -> DbResult<Arc<RwLock<Table>>> {
        self.tables
            .get(type_name)
            .cloned()
            .ok_or_else(|| DbError::Catalog(format!("unknown type '{type_name}'")))
    }

    /// Table names in ascending order, the canonical lock order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Map a query selection name to a bound type: exact match first, then
    /// case-insensitive, then a trailing-`s` plural of either.
    pub fn resolve_type(&self, selection: &str) -> Option<&str> {
        if self.types.contains_key(selection) {
            return self.types.get_key_value(selection).map(|(k, _)| k.as_str());
        }
        let singular = selection.strip_suffix('s').unwrap_or(selection);
        self.tables
            .keys()
            .find(|name| {
                name.eq_ignore_ascii_case(selection) || name.eq_ignore_ascii_case(singular)
            })
            .map(String::as_str)
    }

    /// Flush every table, ascending by name.
    pub fn flush_all(&self) -> DbResult<()> {
        for lock in self.tables.values() {
            write_guard(lock)?.flush()?;
        }
        Ok(())
    }

    /// Flush and release every table, ascending by name.
    pub fn close_all(&self) -> DbResult<()> {
        for lock in self.tables.values() {
            write_guard(lock)?.close()?;
        }
        Ok(())
    }
}

fn derive_columns(
    def: &TypeDefinition,
    known: &HashSet<&str, RandomState>,
) -> DbResult<(Vec<ColumnDef>, Vec<(String, usize)>)> {
    let mut columns = vec![ColumnDef::primary_key()];
    let mut fields = vec![("id".to_string(), 0)];

    for field in &def.fields {
        if field.name == "id" {
            // The primary key is added automatically; a declared one is fine
            // as long as it really is an Id.
            if field.type_ref != TypeRef::Scalar(types::ScalarKind::Id) {
                return Err(DbError::Catalog(format!(
                    "field 'id' of type '{}' must be of kind Id",
                    def.name
                )));
            }
            continue;
        }
        match &field.type_ref {
            TypeRef::Scalar(kind) => {
                let mut column = ColumnDef::scalar(&field.name, *kind, !field.non_null);
                column.is_list = field.is_list;
                fields.push((field.name.clone(), columns.len()));
                columns.push(column);
            }
            TypeRef::Object(target) => {
                if !known.contains(target.as_str()) {
                    return Err(DbError::Catalog(format!(
                        "field '{}' of type '{}' references undefined type '{target}'",
                        field.name, def.name
                    )));
                }
                let column_name = if field.is_list {
                    format!("{}Ids", field.name)
                } else {
                    format!("{}Id", field.name)
                };
                let mut column = ColumnDef::foreign_key(column_name, target, field.is_list);
                column.nullable = !field.non_null;
                fields.push((field.name.clone(), columns.len()));
                columns.push(column);
            }
        }
    }

    Ok((columns, fields))
}
