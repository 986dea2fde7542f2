//! The query surface the executor consumes.
//!
//! The query-language tokenizer and parser live outside the engine; they hand
//! over selection trees in this shape. Builder-style helpers exist so embedding
//! code and tests can assemble queries without a parser.

use types::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
}

/// A filter tree: conjunctions, disjunctions, and leaf predicates of the form
/// `{column: {op: value}}`.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Cond {
        column: String,
        op: CompareOp,
        value: Value,
    },
}

impl Filter {
    pub fn cond(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Filter::Cond {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::cond(column, CompareOp::Eq, value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Arguments {
    pub filter: Option<Filter>,
    pub order_by: Vec<OrderBy>,
    pub take: Option<i64>,
    pub skip: Option<i64>,
}

/// One field request in a query, possibly carrying arguments and a nested
/// selection set for relationship traversal.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub field: String,
    pub alias: Option<String>,
    pub arguments: Arguments,
    pub nested: Vec<Selection>,
}

impl Selection {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            alias: None,
            arguments: Arguments::default(),
            nested: Vec::new(),
        }
    }

    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn filtered(mut self, filter: Filter) -> Self {
        self.arguments.filter = Some(filter);
        self
    }

    pub fn ordered(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.arguments.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn take(mut self, take: i64) -> Self {
        self.arguments.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: i64) -> Self {
        self.arguments.skip = Some(skip);
        self
    }

    pub fn select(mut self, nested: Selection) -> Self {
        self.nested.push(nested);
        self
    }

    /// The key this selection produces in the response object.
    pub fn output_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field)
    }
}
