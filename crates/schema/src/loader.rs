//! Seed loader: routes a `{ TypeName: [record, ...] }` JSON document into the
//! bound tables.
//!
//! Relationship fields accept either explicit `<field>Id` / `<field>Ids`
//! values or nested objects; nested objects are unwrapped to their id and
//! recursively loaded into their own table. A record failing validation is
//! reported and skipped; loading continues.

use common::{DbError, DbResult, Record};
use serde_json::Value as Json;
use types::{datetime_millis_from_rfc3339, ScalarKind, Value};

use crate::catalog::{write_guard, SchemaCatalog};

/// Outcome of one seed document load.
#[derive(Debug, Default)]
pub struct SeedReport {
    pub inserted: usize,
    pub errors: Vec<DbError>,
}

impl SeedReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn load_seed(catalog: &SchemaCatalog, json_text: &str) -> DbResult<SeedReport> {
    let document: Json = serde_json::from_str(json_text)
        .map_err(|e| DbError::Query(format!("seed document is not valid JSON: {e}")))?;
    let root = document
        .as_object()
        .ok_or_else(|| DbError::Query("seed document must be a JSON object".into()))?;

    let mut report = SeedReport::default();
    for (type_name, records) in root {
        if !catalog.has_type(type_name) {
            report.errors.push(DbError::SchemaViolation {
                type_name: type_name.clone(),
                key: String::new(),
                field: String::new(),
            });
            continue;
        }
        let Some(list) = records.as_array() else {
            report.errors.push(DbError::Query(format!(
                "seed entry for '{type_name}' must be an array"
            )));
            continue;
        };
        for item in list {
            load_record(catalog, type_name, item, false, &mut report)?;
        }
    }
    log::info!(
        "seed load finished: {} inserted, {} errors",
        report.inserted,
        report.errors.len()
    );
    Ok(report)
}

/// Load one record object. `nested` marks records reached through a
/// relationship sub-object, whose re-occurrence is not an error.
fn load_record(
    catalog: &SchemaCatalog,
    type_name: &str,
    json: &Json,
    nested: bool,
    report: &mut SeedReport,
) -> DbResult<()> {
    let descriptor = catalog.descriptor(type_name)?;

    let Some(object) = json.as_object() else {
        report.errors.push(DbError::Query(format!(
            "record of type '{type_name}' must be a JSON object"
        )));
        return Ok(());
    };
    let Some(id) = object.get("id").and_then(Json::as_str).filter(|s| !s.is_empty()) else {
        report.errors.push(DbError::SchemaViolation {
            type_name: type_name.to_string(),
            key: String::new(),
            field: "id".into(),
        });
        return Ok(());
    };

    // Sub-objects to route into their own tables once this record is built.
    let mut pending: Vec<(String, Json)> = Vec::new();

    let mut values = Vec::with_capacity(descriptor.columns().len());
    for desc in descriptor.fields() {
        let raw = object
            .get(&desc.column)
            .or_else(|| object.get(&desc.field));

        let value = match raw {
            None | Some(Json::Null) => Value::Null,
            Some(json_value) => {
                if desc.is_foreign_key {
                    match convert_foreign_key(desc.related_type.as_deref(), desc.is_list, json_value, &mut pending) {
                        Some(v) => v,
                        None => {
                            report.errors.push(violation(type_name, id, &desc.field));
                            return Ok(());
                        }
                    }
                } else {
                    match convert_scalar(desc.kind, desc.is_list, json_value) {
                        Some(v) => v,
                        None => {
                            report.errors.push(violation(type_name, id, &desc.field));
                            return Ok(());
                        }
                    }
                }
            }
        };

        if value.is_null() && !desc.nullable && desc.ordinal != 0 {
            report.errors.push(violation(type_name, id, &desc.field));
            return Ok(());
        }
        values.push(if desc.ordinal == 0 {
            Value::Id(id.to_string())
        } else {
            value
        });
    }

    let table = catalog.table(type_name)?;
    let insert_result = write_guard(&table)?.insert(id, Record::new(values));
    match insert_result {
        Ok(()) => report.inserted += 1,
        // A nested object seen twice is the same seed record, not a fault.
        Err(DbError::DuplicateKey(_)) if nested => {}
        Err(err) => report.errors.push(err),
    }

    for (target, sub_object) in pending {
        load_record(catalog, &target, &sub_object, true, report)?;
    }
    Ok(())
}

fn violation(type_name: &str, key: &str, field: &str) -> DbError {
    DbError::SchemaViolation {
        type_name: type_name.to_string(),
        key: key.to_string(),
        field: field.to_string(),
    }
}

/// Convert a relationship value: an id string, a nested object carrying an
/// id, or (for plural relationships) an array of either.
fn convert_foreign_key(
    related_type: Option<&str>,
    is_list: bool,
    json: &Json,
    pending: &mut Vec<(String, Json)>,
) -> Option<Value> {
    let target = related_type?;
    if is_list {
        let items = json.as_array()?;
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            ids.push(extract_reference(target, item, pending)?);
        }
        Some(Value::List(ids))
    } else {
        Some(extract_reference(target, json, pending)?)
    }
}

fn extract_reference(target: &str, json: &Json, pending: &mut Vec<(String, Json)>) -> Option<Value> {
    match json {
        Json::String(id) if !id.is_empty() => Some(Value::Id(id.clone())),
        Json::Object(object) => {
            let id = object.get("id")?.as_str().filter(|s| !s.is_empty())?;
            pending.push((target.to_string(), json.clone()));
            Some(Value::Id(id.to_string()))
        }
        _ => None,
    }
}

fn convert_scalar(kind: ScalarKind, is_list: bool, json: &Json) -> Option<Value> {
    if is_list {
        let items = json.as_array()?;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(convert_scalar_single(kind, item)?);
        }
        return Some(Value::List(out));
    }
    convert_scalar_single(kind, json)
}

fn convert_scalar_single(kind: ScalarKind, json: &Json) -> Option<Value> {
    match kind {
        ScalarKind::Id => json
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| Value::Id(s.to_string())),
        ScalarKind::String => json.as_str().map(|s| Value::Text(s.to_string())),
        ScalarKind::Int => json.as_i64().map(Value::Int),
        ScalarKind::Float => json.as_f64().map(Value::Float),
        ScalarKind::Boolean => json.as_bool().map(Value::Bool),
        ScalarKind::DateTime => match json {
            Json::Number(n) => n.as_i64().map(Value::DateTime),
            Json::String(text) => datetime_millis_from_rfc3339(text).map(Value::DateTime),
            _ => None,
        },
    }
}
