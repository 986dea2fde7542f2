use std::cmp::Ordering;
use std::fmt;

/// The six scalar kinds the schema language can assign to a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ScalarKind {
    Id,
    String,
    Int,
    Float,
    Boolean,
    DateTime,
}

impl ScalarKind {
    /// Resolve a scalar type name as it appears in an IDL document.
    pub fn parse(name: &str) -> Option<ScalarKind> {
        match name {
            "ID" | "Id" => Some(ScalarKind::Id),
            "String" => Some(ScalarKind::String),
            "Int" => Some(ScalarKind::Int),
            "Float" => Some(ScalarKind::Float),
            "Boolean" => Some(ScalarKind::Boolean),
            "DateTime" => Some(ScalarKind::DateTime),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Id => "Id",
            ScalarKind::String => "String",
            ScalarKind::Int => "Int",
            ScalarKind::Float => "Float",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::DateTime => "DateTime",
        };
        f.write_str(name)
    }
}

/// A single stored cell. `DateTime` carries epoch milliseconds; `Id` is a
/// non-empty opaque string distinct from ordinary text.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Id(String),
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(i64),
    List(Vec<Value>),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            Value::Id(s) => Some(s),
            _ => None,
        }
    }

    /// Text content of either string-shaped variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Id(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The scalar kind of this value, if it is a non-null scalar.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Value::Id(_) => Some(ScalarKind::Id),
            Value::Text(_) => Some(ScalarKind::String),
            Value::Int(_) => Some(ScalarKind::Int),
            Value::Float(_) => Some(ScalarKind::Float),
            Value::Bool(_) => Some(ScalarKind::Boolean),
            Value::DateTime(_) => Some(ScalarKind::DateTime),
            Value::List(_) | Value::Null => None,
        }
    }

    /// True when this value can be stored in a column of `kind`.
    pub fn conforms_to(&self, kind: ScalarKind) -> bool {
        match (self, kind) {
            (Value::Null, _) => true,
            (Value::List(items), _) => items.iter().all(|v| v.conforms_to(kind)),
            _ => self.scalar_kind() == Some(kind),
        }
    }

    /// Compare two values of the same variant. Cross-variant comparisons
    /// return `None`; the caller decides whether that is a type error.
    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Id(a), Value::Id(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => Some(a.total_cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        self.cmp_same_type(other).map(|ord| ord == Ordering::Equal)
    }

    /// Total order over all variants, used by sorting and B-tree keys.
    /// Null sorts first, then values grouped by variant.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match self.cmp_same_type(other) {
            Some(ord) => ord,
            None => match (self, other) {
                (Value::List(a), Value::List(b)) => {
                    for (x, y) in a.iter().zip(b.iter()) {
                        let ord = x.total_cmp(y);
                        if ord != Ordering::Equal {
                            return ord;
                        }
                    }
                    a.len().cmp(&b.len())
                }
                _ => self.type_rank().cmp(&other.type_rank()),
            },
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::DateTime(_) => 4,
            Value::Id(_) => 5,
            Value::Text(_) => 6,
            Value::List(_) => 7,
        }
    }
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn datetime_millis_from_rfc3339(text: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn cmp_same_type_works() {
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Int(2)), Some(Less));
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Text("1".into())), None);
        assert_eq!(
            Value::DateTime(100).cmp_same_type(&Value::DateTime(99)),
            Some(Greater)
        );
    }

    #[test]
    fn ids_and_text_do_not_compare() {
        assert_eq!(
            Value::Id("u1".into()).cmp_same_type(&Value::Text("u1".into())),
            None
        );
        assert_eq!(
            Value::Id("u1".into()).eq_same_type(&Value::Id("u1".into())),
            Some(true)
        );
    }

    #[test]
    fn float_ordering_is_total() {
        assert_eq!(
            Value::Float(1.0).cmp_same_type(&Value::Float(2.0)),
            Some(Less)
        );
        assert_eq!(
            Value::Float(f64::NAN).cmp_same_type(&Value::Float(f64::NAN)),
            Some(Equal)
        );
    }

    #[test]
    fn truthiness_is_strict() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(1).as_bool(), None);
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn conformance_checks_kind() {
        assert!(Value::Id("u1".into()).conforms_to(ScalarKind::Id));
        assert!(!Value::Text("u1".into()).conforms_to(ScalarKind::Id));
        assert!(Value::Null.conforms_to(ScalarKind::Int));
        assert!(
            Value::List(vec![Value::Id("a".into()), Value::Id("b".into())])
                .conforms_to(ScalarKind::Id)
        );
        assert!(!Value::List(vec![Value::Int(1)]).conforms_to(ScalarKind::Id));
    }

    #[test]
    fn total_order_groups_null_first() {
        assert_eq!(Value::Null.total_cmp(&Value::Int(i64::MIN)), Less);
        assert_eq!(Value::Bool(true).total_cmp(&Value::Int(0)), Less);
    }

    #[test]
    fn scalar_kind_parses_idl_names() {
        assert_eq!(ScalarKind::parse("ID"), Some(ScalarKind::Id));
        assert_eq!(ScalarKind::parse("DateTime"), Some(ScalarKind::DateTime));
        assert_eq!(ScalarKind::parse("User"), None);
    }

    #[test]
    fn rfc3339_parses_to_millis() {
        assert_eq!(
            datetime_millis_from_rfc3339("1970-01-01T00:00:01Z"),
            Some(1000)
        );
        assert_eq!(datetime_millis_from_rfc3339("not a date"), None);
    }

    #[test]
    fn serde_round_trip_stability() {
        let vals = vec![
            Value::Id("u1".into()),
            Value::Text("Ada".into()),
            Value::Int(-42),
            Value::Float(2.5),
            Value::Bool(true),
            Value::DateTime(1_700_000_000_000),
            Value::List(vec![Value::Id("a".into())]),
            Value::Null,
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(vals, back);
    }

    proptest! {
        // Order symmetry: if a < b, then b > a
        #[test]
        fn order_is_antisymmetric(i in any::<i64>(), j in any::<i64>()) {
            let a = Value::Int(i);
            let b = Value::Int(j);
            prop_assert_eq!(a.total_cmp(&b), b.total_cmp(&a).reverse());
        }

        #[test]
        fn eq_reflexive(val in any::<i64>()) {
            let v = Value::DateTime(val);
            prop_assert_eq!(v.eq_same_type(&v), Some(true));
        }

        // Text comparisons align with standard String ordering
        #[test]
        fn text_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::Text(a.clone());
            let vb = Value::Text(b.clone());
            prop_assert_eq!(va.cmp_same_type(&vb), Some(a.cmp(&b)));
        }

        #[test]
        fn float_total_order_transitive_with_int_rank(x in any::<f64>()) {
            // Floats always rank above ints in the cross-type order.
            prop_assert_eq!(Value::Int(0).total_cmp(&Value::Float(x)), Less);
        }
    }
}
