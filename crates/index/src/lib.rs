//! Per-table index collection: the mandatory primary-key hash index, any
//! number of B-tree indexes over columns, and the access counters that drive
//! adaptive index creation.
//!
//! The manager only tracks; building an index over existing records is the
//! owning table's job, since only the table can iterate live records.

use ahash::RandomState;
use btree::BTreeIndex;
use common::{DbError, DbResult, Record};
use hash::HashIndex;
use hashbrown::HashMap;
use types::Value;

/// A B-tree index bound to the column ordinal it projects.
#[derive(Debug)]
pub struct ColumnIndex {
    pub ordinal: usize,
    pub tree: BTreeIndex,
}

/// Access counters and inventory for one column, as reported by
/// [`IndexManager::statistics`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnStats {
    pub column: String,
    pub accesses: u32,
    pub indexed: bool,
}

#[derive(Debug)]
pub struct IndexManager {
    primary: HashIndex,
    btrees: HashMap<String, ColumnIndex, RandomState>,
    access_counts: HashMap<String, u32, RandomState>,
    threshold: u32,
    btree_order: usize,
}

impl IndexManager {
    pub fn new(threshold: u32, btree_order: usize) -> Self {
        Self {
            primary: HashIndex::new(),
            btrees: HashMap::default(),
            access_counts: HashMap::default(),
            threshold,
            btree_order,
        }
    }

    pub fn primary(&self) -> &HashIndex {
        &self.primary
    }

    pub fn primary_mut(&mut self) -> &mut HashIndex {
        &mut self.primary
    }

    pub fn has_btree(&self, column: &str) -> bool {
        self.btrees.contains_key(column)
    }

    pub fn btree(&self, column: &str) -> DbResult<&BTreeIndex> {
        self.btrees
            .get(column)
            .map(|ci| &ci.tree)
            .ok_or_else(|| DbError::Query(format!("no index on column '{column}'")))
    }

    pub fn btree_columns(&self) -> impl Iterator<Item = &str> {
        self.btrees.keys().map(String::as_str)
    }

    /// Register an empty B-tree over `column`; the caller backfills it.
    /// Re-registering is a no-op.
    pub fn add_btree(&mut self, column: &str, ordinal: usize) -> &mut BTreeIndex {
        &mut self
            .btrees
            .entry(column.to_string())
            .or_insert_with(|| ColumnIndex {
                ordinal,
                tree: BTreeIndex::new(self.btree_order),
            })
            .tree
    }

    /// Install an already-built tree (sidecar load).
    pub fn install_btree(&mut self, column: &str, ordinal: usize, tree: BTreeIndex) {
        self.btrees
            .insert(column.to_string(), ColumnIndex { ordinal, tree });
    }

    /// Count one query touching `column`. Returns `true` exactly when the
    /// counter crosses the threshold for a still-unindexed column, which is
    /// the signal to create a B-tree. Counters keep accumulating afterwards
    /// for diagnostics.
    pub fn record_access(&mut self, column: &str) -> bool {
        let count = self.access_counts.entry(column.to_string()).or_insert(0);
        *count += 1;
        *count == self.threshold && !self.btrees.contains_key(column)
    }

    pub fn statistics(&self) -> Vec<ColumnStats> {
        let mut stats: Vec<ColumnStats> = self
            .access_counts
            .iter()
            .map(|(column, accesses)| ColumnStats {
                column: column.clone(),
                accesses: *accesses,
                indexed: self.btrees.contains_key(column),
            })
            .collect();
        for column in self.btrees.keys() {
            if !self.access_counts.contains_key(column) {
                stats.push(ColumnStats {
                    column: column.clone(),
                    accesses: 0,
                    indexed: true,
                });
            }
        }
        stats.sort_by(|a, b| a.column.cmp(&b.column));
        stats
    }

    /// Add `record`'s projections to every B-tree.
    pub fn index_record(&mut self, id: &str, record: &Record) {
        for ci in self.btrees.values_mut() {
            if let Some(value) = record.value(ci.ordinal) {
                ci.tree.insert(value.clone(), id.to_string());
            }
        }
    }

    /// Remove `record`'s projections from every B-tree.
    pub fn unindex_record(&mut self, id: &str, record: &Record) {
        for ci in self.btrees.values_mut() {
            if let Some(value) = record.value(ci.ordinal) {
                ci.tree.remove(value, id);
            }
        }
    }

    pub fn find(&self, column: &str, value: &Value) -> DbResult<Vec<String>> {
        Ok(self.btree(column)?.find(value))
    }

    pub fn find_range(&self, column: &str, lo: &Value, hi: &Value) -> DbResult<Vec<String>> {
        Ok(self.btree(column)?.find_range(lo, hi))
    }

    pub fn find_greater_than(&self, column: &str, lo: &Value) -> DbResult<Vec<String>> {
        Ok(self.btree(column)?.find_greater_than(lo))
    }

    pub fn find_less_than(&self, column: &str, hi: &Value) -> DbResult<Vec<String>> {
        Ok(self.btree(column)?.find_less_than(hi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Record;
    use pretty_assertions::assert_eq;

    fn record(id: &str, age: i64) -> Record {
        Record::new(vec![Value::Id(id.into()), Value::Int(age)])
    }

    #[test]
    fn access_counter_fires_once_at_threshold() {
        let mut manager = IndexManager::new(3, 8);
        assert!(!manager.record_access("age"));
        assert!(!manager.record_access("age"));
        assert!(manager.record_access("age"));
        // Past the threshold the signal never repeats.
        assert!(!manager.record_access("age"));

        let stats = manager.statistics();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].accesses, 4);
        assert!(!stats[0].indexed);
    }

    #[test]
    fn threshold_does_not_fire_for_indexed_column() {
        let mut manager = IndexManager::new(2, 8);
        manager.add_btree("age", 1);
        assert!(!manager.record_access("age"));
        assert!(!manager.record_access("age"));
    }

    #[test]
    fn index_record_projects_into_every_btree() {
        let mut manager = IndexManager::new(3, 8);
        manager.add_btree("age", 1);

        manager.index_record("u1", &record("u1", 30));
        manager.index_record("u2", &record("u2", 20));
        assert_eq!(manager.find("age", &Value::Int(30)).unwrap(), vec!["u1"]);
        assert_eq!(
            manager
                .find_range("age", &Value::Int(0), &Value::Int(99))
                .unwrap(),
            vec!["u2", "u1"]
        );

        manager.unindex_record("u1", &record("u1", 30));
        assert!(manager.find("age", &Value::Int(30)).unwrap().is_empty());
    }

    #[test]
    fn missing_index_is_a_query_error() {
        let manager = IndexManager::new(3, 8);
        assert!(matches!(
            manager.find("ghost", &Value::Int(1)),
            Err(DbError::Query(_))
        ));
    }

    #[test]
    fn statistics_include_unqueried_indexes() {
        let mut manager = IndexManager::new(3, 8);
        manager.add_btree("name", 1);
        manager.record_access("age");

        let stats = manager.statistics();
        assert_eq!(
            stats,
            vec![
                ColumnStats {
                    column: "age".into(),
                    accesses: 1,
                    indexed: false
                },
                ColumnStats {
                    column: "name".into(),
                    accesses: 0,
                    indexed: true
                },
            ]
        );
    }
}
