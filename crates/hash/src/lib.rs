//! Primary-key hash index: `Id` string → record location.
//!
//! Exactly one exists per table, created automatically. O(1) average find,
//! rebuilt from persisted pages on table open.

use ahash::RandomState;
use common::PageId;
use hashbrown::HashMap;

/// Where a live record currently resides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordSlot {
    /// Buffered in the memtable, not yet flushed.
    Mem,
    /// Persisted in the record group of this data page.
    Page(PageId),
}

#[derive(Debug, Default)]
pub struct HashIndex {
    map: HashMap<String, RecordSlot, RandomState>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: String, slot: RecordSlot) {
        self.map.insert(id, slot);
    }

    pub fn remove(&mut self, id: &str) -> Option<RecordSlot> {
        self.map.remove(id)
    }

    pub fn find(&self, id: &str) -> Option<RecordSlot> {
        self.map.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.map.contains_key(id)
    }

    /// Point an id at a new slot; flush uses this to move Mem entries onto
    /// their data page.
    pub fn relocate(&mut self, id: &str, slot: RecordSlot) {
        if let Some(existing) = self.map.get_mut(id) {
            *existing = slot;
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, RecordSlot)> {
        self.map.iter().map(|(id, slot)| (id.as_str(), *slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn insert_find_remove() {
        let mut index = HashIndex::new();
        index.insert("u1".into(), RecordSlot::Mem);
        index.insert("u2".into(), RecordSlot::Page(PageId(3)));

        assert_eq!(index.find("u1"), Some(RecordSlot::Mem));
        assert_eq!(index.find("u2"), Some(RecordSlot::Page(PageId(3))));
        assert_eq!(index.find("u3"), None);

        assert_eq!(index.remove("u1"), Some(RecordSlot::Mem));
        assert_eq!(index.find("u1"), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn relocate_moves_mem_entry_to_page() {
        let mut index = HashIndex::new();
        index.insert("u1".into(), RecordSlot::Mem);
        index.relocate("u1", RecordSlot::Page(PageId(7)));
        assert_eq!(index.find("u1"), Some(RecordSlot::Page(PageId(7))));

        // Relocating an unknown id is a no-op, not an insert.
        index.relocate("ghost", RecordSlot::Mem);
        assert!(!index.contains("ghost"));
    }

    #[test]
    fn reinsert_overwrites_slot() {
        let mut index = HashIndex::new();
        index.insert("u1".into(), RecordSlot::Page(PageId(1)));
        index.insert("u1".into(), RecordSlot::Page(PageId(2)));
        assert_eq!(index.find("u1"), Some(RecordSlot::Page(PageId(2))));
        assert_eq!(index.len(), 1);
    }
}
