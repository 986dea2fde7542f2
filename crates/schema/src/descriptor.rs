//! Compiled per-type lookup tables, built once at schema bind so the executor
//! never walks field lists at query time.

use ahash::RandomState;
use common::ColumnDef;
use hashbrown::HashMap;
use types::ScalarKind;

/// Where a selected field lands in the record layout.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDescriptor {
    /// Field name as written in the IDL (`author`).
    pub field: String,
    /// Backing column name (`authorId` for relationships).
    pub column: String,
    pub ordinal: usize,
    pub kind: ScalarKind,
    pub nullable: bool,
    pub is_list: bool,
    pub is_foreign_key: bool,
    pub related_type: Option<String>,
}

/// One object type's compiled layout: field name or column name → descriptor.
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    pub type_name: String,
    columns: Vec<ColumnDef>,
    descriptors: Vec<FieldDescriptor>,
    lookup: HashMap<String, usize, RandomState>,
}

impl TypeDescriptor {
    pub fn new(type_name: String, columns: Vec<ColumnDef>, fields: Vec<(String, usize)>) -> Self {
        let descriptors: Vec<FieldDescriptor> = fields
            .into_iter()
            .map(|(field, ordinal)| {
                let col = &columns[ordinal];
                FieldDescriptor {
                    field,
                    column: col.name.clone(),
                    ordinal,
                    kind: col.kind,
                    nullable: col.nullable,
                    is_list: col.is_list,
                    is_foreign_key: col.is_foreign_key,
                    related_type: col.related_type.clone(),
                }
            })
            .collect();

        let mut lookup: HashMap<String, usize, RandomState> = HashMap::default();
        for (idx, desc) in descriptors.iter().enumerate() {
            lookup.insert(desc.field.clone(), idx);
            lookup.insert(desc.column.clone(), idx);
        }

        Self {
            type_name,
            columns,
            descriptors,
            lookup,
        }
    }

    /// Resolve a selected field or a filter/order column to its descriptor.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.lookup.get(name).map(|idx| &self.descriptors[*idx])
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.descriptors.iter()
    }

    /// Columns a seed record must provide a value for.
    pub fn required_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| !c.nullable)
    }
}
