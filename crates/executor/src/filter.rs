//! Predicate evaluation over positional records.

use common::{DbError, DbResult, Record};
use schema::TypeDescriptor;
use std::cmp::Ordering;
use types::{datetime_millis_from_rfc3339, ScalarKind, Value};

use crate::ast::{CompareOp, Filter};

/// Evaluate a filter tree against one record.
pub fn eval(filter: &Filter, descriptor: &TypeDescriptor, record: &Record) -> DbResult<bool> {
    match filter {
        Filter::And(parts) => {
            for part in parts {
                if !eval(part, descriptor, record)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Filter::Or(parts) => {
            for part in parts {
                if eval(part, descriptor, record)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Filter::Cond { column, op, value } => eval_cond(column, *op, value, descriptor, record),
    }
}

fn eval_cond(
    column: &str,
    op: CompareOp,
    value: &Value,
    descriptor: &TypeDescriptor,
    record: &Record,
) -> DbResult<bool> {
    let desc = descriptor.field(column).ok_or_else(|| {
        DbError::Query(format!(
            "unknown column '{column}' in filter on type '{}'",
            descriptor.type_name
        ))
    })?;
    let stored = record.value(desc.ordinal).unwrap_or(&Value::Null);
    let coerced = coerce_to_kind(desc.kind, value);

    match op {
        CompareOp::Eq => match (stored, &coerced) {
            (Value::Null, Value::Null) => Ok(true),
            (Value::Null, _) | (_, Value::Null) => Ok(false),
            _ => stored.eq_same_type(&coerced).ok_or_else(|| {
                type_mismatch(column, stored, &coerced)
            }),
        },
        CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
            if coerced.is_null() {
                return Err(DbError::Query(format!(
                    "ordering comparison on '{column}' requires a non-null operand"
                )));
            }
            if stored.is_null() {
                return Ok(false);
            }
            let ord = stored
                .cmp_same_type(&coerced)
                .ok_or_else(|| type_mismatch(column, stored, &coerced))?;
            Ok(match op {
                CompareOp::Gt => ord == Ordering::Greater,
                CompareOp::Gte => ord != Ordering::Less,
                CompareOp::Lt => ord == Ordering::Less,
                CompareOp::Lte => ord != Ordering::Greater,
                _ => unreachable!(),
            })
        }
        CompareOp::Contains => match stored {
            Value::Null => Ok(false),
            Value::Text(text) | Value::Id(text) => {
                let needle = coerced.as_str().ok_or_else(|| {
                    DbError::Query(format!(
                        "contains on text column '{column}' requires a string operand"
                    ))
                })?;
                Ok(text.contains(needle))
            }
            Value::List(items) => Ok(items
                .iter()
                .any(|item| item.eq_same_type(&coerced) == Some(true))),
            _ => Err(DbError::Query(format!(
                "contains is not supported on column '{column}'"
            ))),
        },
    }
}

fn type_mismatch(column: &str, stored: &Value, operand: &Value) -> DbError {
    DbError::Query(format!(
        "type mismatch filtering '{column}': stored {stored:?}, operand {operand:?}"
    ))
}

/// Nudge a filter operand towards the column's scalar kind, so callers can
/// write `{authorId: {equals: "u1"}}` with a plain string or a DateTime
/// bound as RFC 3339 text.
pub fn coerce_to_kind(kind: ScalarKind, value: &Value) -> Value {
    match (kind, value) {
        (ScalarKind::Id, Value::Text(s)) => Value::Id(s.clone()),
        (ScalarKind::String, Value::Id(s)) => Value::Text(s.clone()),
        (ScalarKind::Float, Value::Int(i)) => Value::Float(*i as f64),
        (ScalarKind::DateTime, Value::Int(ms)) => Value::DateTime(*ms),
        (ScalarKind::DateTime, Value::Text(text)) => datetime_millis_from_rfc3339(text)
            .map(Value::DateTime)
            .unwrap_or_else(|| value.clone()),
        _ => value.clone(),
    }
}

/// Flatten a filter into its top-level conjuncts. Returns `None` when a
/// disjunction participates, in which case no single predicate can narrow the
/// candidate set.
pub fn conjuncts(filter: &Filter) -> Option<Vec<(&str, CompareOp, &Value)>> {
    let mut out = Vec::new();
    collect_conjuncts(filter, &mut out).then_some(out)
}

fn collect_conjuncts<'f>(
    filter: &'f Filter,
    out: &mut Vec<(&'f str, CompareOp, &'f Value)>,
) -> bool {
    match filter {
        Filter::Cond { column, op, value } => {
            out.push((column.as_str(), *op, value));
            true
        }
        Filter::And(parts) => parts.iter().all(|part| collect_conjuncts(part, out)),
        Filter::Or(_) => false,
    }
}

/// Every column name referenced anywhere in the filter tree.
pub fn referenced_columns<'f>(filter: &'f Filter, out: &mut Vec<&'f str>) {
    match filter {
        Filter::Cond { column, .. } => {
            if !out.contains(&column.as_str()) {
                out.push(column.as_str());
            }
        }
        Filter::And(parts) | Filter::Or(parts) => {
            for part in parts {
                referenced_columns(part, out);
            }
        }
    }
}
