//! The IDL surface the catalog consumes.
//!
//! The tokenizer and parser live outside the engine; they hand over this AST.
//! A `TypeRef` either names one of the six scalar kinds or another object
//! type, in which case the field is a relationship.

use types::ScalarKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeRef {
    Scalar(ScalarKind),
    Object(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDefinition {
    pub name: String,
    pub type_ref: TypeRef,
    pub non_null: bool,
    pub is_list: bool,
}

impl FieldDefinition {
    pub fn scalar(name: impl Into<String>, kind: ScalarKind, non_null: bool) -> Self {
        Self {
            name: name.into(),
            type_ref: TypeRef::Scalar(kind),
            non_null,
            is_list: false,
        }
    }

    pub fn scalar_list(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            type_ref: TypeRef::Scalar(kind),
            non_null: false,
            is_list: true,
        }
    }

    /// A singular relationship: `author: User`.
    pub fn object(name: impl Into<String>, target: impl Into<String>, non_null: bool) -> Self {
        Self {
            name: name.into(),
            type_ref: TypeRef::Object(target.into()),
            non_null,
            is_list: false,
        }
    }

    /// A plural relationship: `posts: [Post]`.
    pub fn object_list(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_ref: TypeRef::Object(target.into()),
            non_null: false,
            is_list: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
}

impl TypeDefinition {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }
}
