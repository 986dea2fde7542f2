//! Query executor: resolves selection trees against the schema catalog.
//!
//! Per top-level selection the executor identifies the target type and table,
//! plans an access path (hash point read, B-tree point or range, or full
//! scan), applies residual predicates, orders, paginates, and projects the
//! requested shape. Relationship sub-selections resolve through one batched
//! point-read pass per related table, never per parent row.
//!
//! Failures inside per-record resolution land in the response's `errors`
//! list; the query keeps going. Only cancellation aborts the whole request.

pub mod ast;
mod filter;

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use common::{CancellationToken, DbError, DbResult, Record};
use schema::{write_guard, SchemaCatalog, TypeDescriptor};
use serde::Serialize;
use serde_json::{json, Map as JsonMap, Value as Json};
use table::Table;
use types::{ScalarKind, Value};

pub use ast::{Arguments, CompareOp, Direction, Filter, OrderBy, Selection};

type Guards<'a> = HashMap<String, RwLockWriteGuard<'a, Table>>;

/// One per-record resolution failure, pointing into the result tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ResolutionError {
    pub message: String,
    pub path: Vec<String>,
}

/// The executor's answer: a data tree shaped like the selection, plus any
/// per-record errors gathered along the way.
#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub data: Json,
    pub errors: Vec<ResolutionError>,
}

/// Lifecycle of one selection's execution, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueryState {
    Parsed,
    Planned,
    Executing,
    Complete,
    Failed,
}

pub struct QueryExecutor<'a> {
    catalog: &'a SchemaCatalog,
    token: CancellationToken,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(catalog: &'a SchemaCatalog) -> Self {
        Self {
            catalog,
            token: CancellationToken::new(),
        }
    }

    /// Attach a caller-held cancellation token; it is polled between records.
    pub fn with_token(catalog: &'a SchemaCatalog, token: CancellationToken) -> Self {
        Self { catalog, token }
    }

    /// Execute a parsed query: every top-level selection resolves
    /// independently, with partial success.
    pub fn execute(&self, selections: &[Selection]) -> QueryResponse {
        let mut data = JsonMap::new();
        let mut errors = Vec::new();

        for selection in selections {
            let key = selection.output_key().to_string();
            match self.execute_selection(selection, &mut errors) {
                Ok(value) => {
                    data.insert(key, value);
                }
                Err(err) => {
                    let cancelled = matches!(err, DbError::Cancelled);
                    data.insert(key.clone(), Json::Null);
                    errors.push(ResolutionError {
                        message: err.to_string(),
                        path: vec![key],
                    });
                    if cancelled {
                        break;
                    }
                }
            }
        }

        QueryResponse {
            data: Json::Object(data),
            errors,
        }
    }

    fn execute_selection(
        &self,
        selection: &Selection,
        errors: &mut Vec<ResolutionError>,
    ) -> DbResult<Json> {
        let mut state = QueryState::Parsed;
        log::debug!("selection '{}' {state:?}", selection.field);
        let type_name = self
            .catalog
            .resolve_type(&selection.field)
            .ok_or_else(|| {
                DbError::Query(format!("unknown query root '{}'", selection.field))
            })?
            .to_string();

        // Lock every table the selection can touch, ascending by name.
        let mut involved = BTreeSet::new();
        self.collect_types(&type_name, &selection.nested, &mut involved)?;
        let locks: Vec<(String, Arc<RwLock<Table>>)> = involved
            .iter()
            .map(|name| Ok((name.clone(), self.catalog.table(name)?)))
            .collect::<DbResult<_>>()?;
        let mut guards: Guards<'_> = HashMap::new();
        for (name, lock) in &locks {
            guards.insert(name.clone(), write_guard(lock)?);
        }

        let descriptor = self.catalog.descriptor(&type_name)?;
        let args = &selection.arguments;
        let result = self.run_selection(
            selection, &type_name, descriptor, &mut guards, args, errors, &mut state,
        );
        match &result {
            Ok(_) => log::debug!("selection '{}' complete", selection.field),
            Err(err) => {
                state = QueryState::Failed;
                log::debug!("selection '{}' {state:?}: {err}", selection.field);
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_selection(
        &self,
        selection: &Selection,
        type_name: &str,
        descriptor: &TypeDescriptor,
        guards: &mut Guards<'_>,
        args: &Arguments,
        errors: &mut Vec<ResolutionError>,
        state: &mut QueryState,
    ) -> DbResult<Json> {
        let (mut candidates, presorted) = self.plan(descriptor, type_name, guards, args)?;
        *state = QueryState::Planned;
        log::debug!(
            "selection '{}' {state:?}: {} candidates",
            selection.field,
            candidates.len()
        );

        *state = QueryState::Executing;
        if let Some(f) = &args.filter {
            let mut kept = Vec::with_capacity(candidates.len());
            for record in candidates {
                self.token.check()?;
                if filter::eval(f, descriptor, &record)? {
                    kept.push(record);
                }
            }
            candidates = kept;
        }

        if !args.order_by.is_empty() && !presorted {
            let keys = self.resolve_sort_keys(descriptor, &args.order_by)?;
            candidates.sort_by(|a, b| compare_records(a, b, &keys));
        }

        let skip = non_negative(args.skip, "skip")?.unwrap_or(0);
        if skip > 0 {
            candidates.drain(..skip.min(candidates.len()));
        }
        if let Some(take) = non_negative(args.take, "take")? {
            candidates.truncate(take);
        }

        let path = vec![selection.output_key().to_string()];
        let rows =
            self.project_records(guards, descriptor, &candidates, &selection.nested, &path, errors)?;
        *state = QueryState::Complete;
        Ok(Json::Array(rows))
    }

    /// Choose the access path and materialize the candidate set.
    ///
    /// Returns the candidates plus whether they already carry the requested
    /// ordering. Residual predicates are the caller's post-filter; running
    /// the full filter over an index-narrowed set is harmless.
    fn plan(
        &self,
        descriptor: &TypeDescriptor,
        type_name: &str,
        guards: &mut Guards<'_>,
        args: &Arguments,
    ) -> DbResult<(Vec<Record>, bool)> {
        let table = guards
            .get_mut(type_name)
            .ok_or_else(|| DbError::Storage(format!("table '{type_name}' not locked")))?;

        // Count this query against every filter/order column it touches;
        // crossing the threshold creates the adaptive index right here.
        self.note_accesses(table, descriptor, args)?;

        if let Some(f) = &args.filter {
            if let Some(conds) = filter::conjuncts(f) {
                // Primary-key equality wins outright: hash lookup.
                for (column, op, value) in &conds {
                    if *op != CompareOp::Eq {
                        continue;
                    }
                    let Some(desc) = descriptor.field(column) else {
                        continue;
                    };
                    if desc.ordinal != 0 {
                        continue;
                    }
                    let coerced = filter::coerce_to_kind(ScalarKind::Id, value);
                    if let Some(id) = coerced.as_id() {
                        log::debug!("{type_name}: point read via primary key");
                        return Ok((table.find(id)?.into_iter().collect(), false));
                    }
                }

                // Most selective indexed equality: fewest matching ids.
                let mut best: Option<(Vec<String>, String)> = None;
                for (column, op, value) in &conds {
                    if *op != CompareOp::Eq {
                        continue;
                    }
                    let Some(desc) = descriptor.field(column) else {
                        continue;
                    };
                    if desc.ordinal == 0 || !table.has_btree(&desc.column) {
                        continue;
                    }
                    let coerced = filter::coerce_to_kind(desc.kind, value);
                    let ids = table.find_ids_by_value(&desc.column, &coerced)?;
                    if best.as_ref().map_or(true, |(b, _)| ids.len() < b.len()) {
                        best = Some((ids, desc.column.clone()));
                    }
                }
                if let Some((ids, column)) = best {
                    log::debug!("{type_name}: B-tree point read on '{column}'");
                    return Ok((table.fetch_records(&ids, &self.token)?, false));
                }

                // Indexed range predicate.
                for (column, op, value) in &conds {
                    let Some(desc) = descriptor.field(column) else {
                        continue;
                    };
                    if desc.ordinal == 0 || !table.has_btree(&desc.column) {
                        continue;
                    }
                    let coerced = filter::coerce_to_kind(desc.kind, value);
                    let records = match op {
                        CompareOp::Gt => {
                            table.find_greater_than(&desc.column, &coerced, &self.token)?
                        }
                        CompareOp::Gte => {
                            let eq_ids = table.find_ids_by_value(&desc.column, &coerced)?;
                            let mut records = table.fetch_records(&eq_ids, &self.token)?;
                            records.extend(table.find_greater_than(
                                &desc.column,
                                &coerced,
                                &self.token,
                            )?);
                            records
                        }
                        CompareOp::Lt => {
                            table.find_less_than(&desc.column, &coerced, &self.token)?
                        }
                        CompareOp::Lte => {
                            let mut records =
                                table.find_less_than(&desc.column, &coerced, &self.token)?;
                            let eq_ids = table.find_ids_by_value(&desc.column, &coerced)?;
                            records.extend(table.fetch_records(&eq_ids, &self.token)?);
                            records
                        }
                        CompareOp::Eq | CompareOp::Contains => continue,
                    };
                    log::debug!("{type_name}: B-tree range scan on '{}'", desc.column);
                    return Ok((records, false));
                }
            }
            // Disjunction or nothing indexed: scan and post-filter.
            log::debug!("{type_name}: full scan");
            return Ok((table.select_all(&self.token)?, false));
        }

        // No filter. A single indexed ordering key can come straight from
        // the index.
        if let [order] = args.order_by.as_slice() {
            if let Some(desc) = descriptor.field(&order.column) {
                if table.has_btree(&desc.column) {
                    log::debug!("{type_name}: sorted scan via index on '{}'", desc.column);
                    let mut records = table.select_sorted(&desc.column, &self.token)?;
                    if order.direction == Direction::Desc {
                        records.reverse();
                    }
                    return Ok((records, true));
                }
            }
        }

        Ok((table.select_all(&self.token)?, false))
    }

    fn note_accesses(
        &self,
        table: &mut Table,
        descriptor: &TypeDescriptor,
        args: &Arguments,
    ) -> DbResult<()> {
        let mut columns: Vec<&str> = Vec::new();
        if let Some(f) = &args.filter {
            filter::referenced_columns(f, &mut columns);
        }
        for order in &args.order_by {
            if !columns.contains(&order.column.as_str()) {
                columns.push(&order.column);
            }
        }
        for column in columns {
            let Some(desc) = descriptor.field(column) else {
                continue;
            };
            // The primary key has its hash index; list columns have no
            // meaningful ordering to index.
            if desc.ordinal == 0 || desc.is_list {
                continue;
            }
            table.note_access(&desc.column)?;
        }
        Ok(())
    }

    fn resolve_sort_keys(
        &self,
        descriptor: &TypeDescriptor,
        order_by: &[OrderBy],
    ) -> DbResult<Vec<(usize, Direction)>> {
        order_by
            .iter()
            .map(|order| {
                let desc = descriptor.field(&order.column).ok_or_else(|| {
                    DbError::Query(format!(
                        "unknown column '{}' in orderBy on type '{}'",
                        order.column, descriptor.type_name
                    ))
                })?;
                Ok((desc.ordinal, order.direction))
            })
            .collect()
    }

    /// Project records into the requested shape, resolving relationship
    /// sub-selections through batched lookups on the related tables.
    fn project_records(
        &self,
        guards: &mut Guards<'_>,
        descriptor: &TypeDescriptor,
        records: &[Record],
        selections: &[Selection],
        path: &[String],
        errors: &mut Vec<ResolutionError>,
    ) -> DbResult<Vec<Json>> {
        // Leaf selection: project every column under its column name.
        if selections.is_empty() {
            let mut rows = Vec::with_capacity(records.len());
            for record in records {
                self.token.check()?;
                let mut object = JsonMap::new();
                for (column, value) in descriptor.columns().iter().zip(&record.values) {
                    object.insert(column.name.clone(), value_to_json(value));
                }
                rows.push(Json::Object(object));
            }
            return Ok(rows);
        }

        // One batched fetch per relationship sub-selection.
        let mut relation_maps: HashMap<String, HashMap<String, Json>> = HashMap::new();
        for sub in selections {
            let Some(desc) = descriptor.field(&sub.field) else {
                return Err(DbError::Query(format!(
                    "unknown field '{}' on type '{}'",
                    sub.field, descriptor.type_name
                )));
            };
            let Some(related) = desc.related_type.clone() else {
                continue;
            };

            let mut seen = BTreeSet::new();
            let mut unique: Vec<String> = Vec::new();
            for record in records {
                collect_reference_ids(record.value(desc.ordinal), &mut seen, &mut unique);
            }

            let related_descriptor = self.catalog.descriptor(&related)?;
            let mut found: Vec<Record> = Vec::with_capacity(unique.len());
            {
                let related_table = guards.get_mut(&related).ok_or_else(|| {
                    DbError::Storage(format!("table '{related}' not locked"))
                })?;
                for id in &unique {
                    self.token.check()?;
                    if let Some(record) = related_table.find(id)? {
                        found.push(record);
                    }
                }
            }

            let mut sub_path = path.to_vec();
            sub_path.push(sub.output_key().to_string());
            let projected = self.project_records(
                guards,
                related_descriptor,
                &found,
                &sub.nested,
                &sub_path,
                errors,
            )?;
            let mut map: HashMap<String, Json> = HashMap::with_capacity(found.len());
            for (record, value) in found.iter().zip(projected) {
                if let Some(id) = record.id() {
                    map.insert(id.to_string(), value);
                }
            }
            relation_maps.insert(sub.output_key().to_string(), map);
        }

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            self.token.check()?;
            let mut object = JsonMap::new();
            for sub in selections {
                let key = sub.output_key();
                let desc = descriptor.field(&sub.field).ok_or_else(|| {
                    DbError::Query(format!(
                        "unknown field '{}' on type '{}'",
                        sub.field, descriptor.type_name
                    ))
                })?;
                let stored = record.value(desc.ordinal).unwrap_or(&Value::Null);

                if desc.is_foreign_key && !sub.nested.is_empty() {
                    let map = relation_maps.get(key);
                    let resolved = resolve_reference(stored, map, || {
                        errors.push(ResolutionError {
                            message: format!(
                                "related {} record not found",
                                desc.related_type.as_deref().unwrap_or("?")
                            ),
                            path: dangling_path(path, index, key),
                        });
                    });
                    object.insert(key.to_string(), resolved);
                } else {
                    object.insert(key.to_string(), value_to_json(stored));
                }
            }
            rows.push(Json::Object(object));
        }
        Ok(rows)
    }

    fn collect_types(
        &self,
        type_name: &str,
        selections: &[Selection],
        out: &mut BTreeSet<String>,
    ) -> DbResult<()> {
        out.insert(type_name.to_string());
        let descriptor = self.catalog.descriptor(type_name)?;
        for sub in selections {
            if let Some(desc) = descriptor.field(&sub.field) {
                if let Some(target) = desc.related_type.clone() {
                    self.collect_types(&target, &sub.nested, out)?;
                }
            }
        }
        Ok(())
    }
}

fn collect_reference_ids(
    value: Option<&Value>,
    seen: &mut BTreeSet<String>,
    unique: &mut Vec<String>,
) {
    match value {
        Some(Value::Id(id)) => {
            if seen.insert(id.clone()) {
                unique.push(id.clone());
            }
        }
        Some(Value::List(items)) => {
            for item in items {
                if let Value::Id(id) = item {
                    if seen.insert(id.clone()) {
                        unique.push(id.clone());
                    }
                }
            }
        }
        _ => {}
    }
}

/// Shape a foreign-key value through the resolved relation map. Dangling
/// references become null and report through `on_missing`.
fn resolve_reference(
    stored: &Value,
    map: Option<&HashMap<String, Json>>,
    mut on_missing: impl FnMut(),
) -> Json {
    match stored {
        Value::Id(id) => match map.and_then(|m| m.get(id)) {
            Some(resolved) => resolved.clone(),
            None => {
                on_missing();
                Json::Null
            }
        },
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if let Value::Id(id) = item {
                    match map.and_then(|m| m.get(id)) {
                        Some(resolved) => out.push(resolved.clone()),
                        None => {
                            on_missing();
                            out.push(Json::Null);
                        }
                    }
                }
            }
            Json::Array(out)
        }
        _ => Json::Null,
    }
}

fn dangling_path(path: &[String], index: usize, key: &str) -> Vec<String> {
    let mut out = path.to_vec();
    out.push(index.to_string());
    out.push(key.to_string());
    out
}

fn compare_records(a: &Record, b: &Record, keys: &[(usize, Direction)]) -> Ordering {
    for (ordinal, direction) in keys {
        let left = a.value(*ordinal).unwrap_or(&Value::Null);
        let right = b.value(*ordinal).unwrap_or(&Value::Null);
        let mut ord = left.total_cmp(right);
        if *direction == Direction::Desc {
            ord = ord.reverse();
        }
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

fn non_negative(value: Option<i64>, name: &str) -> DbResult<Option<usize>> {
    match value {
        None => Ok(None),
        Some(v) if v >= 0 => Ok(Some(v as usize)),
        Some(v) => Err(DbError::Query(format!(
            "argument '{name}' must be non-negative, got {v}"
        ))),
    }
}

fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Id(s) | Value::Text(s) => Json::String(s.clone()),
        Value::Int(i) => json!(i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Bool(b) => Json::Bool(*b),
        Value::DateTime(ms) => json!(ms),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Null => Json::Null,
    }
}
