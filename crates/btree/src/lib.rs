//! Ordered B+tree index over one typed column.
//!
//! Maps a comparable key to the set of primary keys carrying that value, so
//! duplicate column values are supported; within one key, ids keep insertion
//! order. Nodes live in an arena and reference each other by slot id, which
//! keeps serialization trivial: the sidecar file is the bincode image of the
//! arena.
//!
//! Supports point lookup, inclusive ranges, open-ended comparisons, and full
//! sorted traversal via the leaf chain.

mod node;


use std::cmp::Ordering;
use std::mem;
use std::ops::Bound;
use std::path::Path;

use common::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use types::Value;

pub use node::{Node, NodeId};

/// Default maximum children per node.
pub const DEFAULT_ORDER: usize = 32;

#[derive(Debug)]
pub struct BTreeIndex {
    order: usize,
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    root: NodeId,
    /// Number of `(key, id)` postings in the tree.
    len: usize,
}

/// On-disk shape of the sidecar file.
#[derive(Serialize, Deserialize)]
struct SidecarImage {
    order: usize,
    root: NodeId,
    len: usize,
    nodes: Vec<Node>,
    free: Vec<NodeId>,
}

impl BTreeIndex {
    /// # Panics
    ///
    /// Panics if `order < 3`; a smaller node cannot split.
    pub fn new(order: usize) -> Self {
        assert!(order >= 3, "btree order must be at least 3");
        Self {
            order,
            nodes: vec![Node::empty_leaf()],
            free: Vec::new(),
            root: 0,
            len: 0,
        }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of `(key, id)` postings.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Record `id` under `key`. Duplicate keys accumulate ids in insertion
    /// order.
    pub fn insert(&mut self, key: Value, id: String) {
        if let Some((sep, right)) = self.insert_rec(self.root, key, id) {
            let old_root = self.root;
            self.root = self.alloc(Node::Internal {
                keys: vec![sep],
                children: vec![old_root, right],
            });
        }
        self.len += 1;
    }

    /// Remove one `(key, id)` posting. Removing an absent pair is a no-op;
    /// returns whether anything was removed.
    pub fn remove(&mut self, key: &Value, id: &str) -> bool {
        let removed = self.remove_rec(self.root, key, id);
        if removed {
            self.len -= 1;
            self.collapse_root();
        }
        removed
    }

    /// Ids recorded under exactly `key`, in insertion order. Empty when the
    /// key is absent.
    pub fn find(&self, key: &Value) -> Vec<String> {
        let leaf = self.find_leaf(key);
        if let Node::Leaf { keys, postings, .. } = self.node(leaf) {
            let lb = lower_bound(keys, key);
            if lb < keys.len() && keys[lb].total_cmp(key) == Ordering::Equal {
                return postings[lb].clone();
            }
        }
        Vec::new()
    }

    /// Ids whose key lies in `[lo, hi]`, ascending by key, insertion order
    /// within a key. An inverted range yields nothing.
    pub fn find_range(&self, lo: &Value, hi: &Value) -> Vec<String> {
        if lo.total_cmp(hi) == Ordering::Greater {
            return Vec::new();
        }
        self.scan(Bound::Included(lo), Bound::Included(hi))
    }

    /// Ids with key strictly above `lo`.
    pub fn find_greater_than(&self, lo: &Value) -> Vec<String> {
        self.scan(Bound::Excluded(lo), Bound::Unbounded)
    }

    /// Ids with key strictly below `hi`.
    pub fn find_less_than(&self, hi: &Value) -> Vec<String> {
        self.scan(Bound::Unbounded, Bound::Excluded(hi))
    }

    /// Every id, ascending by key.
    pub fn all_sorted(&self) -> Vec<String> {
        self.scan(Bound::Unbounded, Bound::Unbounded)
    }

    /// In-order scan between two bounds.
    pub fn scan(&self, lo: Bound<&Value>, hi: Bound<&Value>) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = match lo {
            Bound::Included(key) | Bound::Excluded(key) => Some(self.find_leaf(key)),
            Bound::Unbounded => Some(self.leftmost_leaf()),
        };

        while let Some(leaf_id) = current {
            let Node::Leaf {
                keys,
                postings,
                next,
            } = self.node(leaf_id)
            else {
                break;
            };
            for (key, ids) in keys.iter().zip(postings.iter()) {
                let above_lo = match lo {
                    Bound::Included(bound) => key.total_cmp(bound) != Ordering::Less,
                    Bound::Excluded(bound) => key.total_cmp(bound) == Ordering::Greater,
                    Bound::Unbounded => true,
                };
                if !above_lo {
                    continue;
                }
                let below_hi = match hi {
                    Bound::Included(bound) => key.total_cmp(bound) != Ordering::Greater,
                    Bound::Excluded(bound) => key.total_cmp(bound) == Ordering::Less,
                    Bound::Unbounded => true,
                };
                if !below_hi {
                    return out;
                }
                out.extend(ids.iter().cloned());
            }
            current = *next;
        }
        out
    }

    // ---- Persistence ----

    /// Serialize the arena to a sidecar file.
    pub fn save(&self, path: &Path) -> DbResult<()> {
        let image = SidecarImage {
            order: self.order,
            root: self.root,
            len: self.len,
            nodes: self.nodes.clone(),
            free: self.free.clone(),
        };
        let bytes = storage::codec::encode(&image)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Deserialize a sidecar file. Any unreadable or implausible image comes
    /// back as `IndexCorrupt`, which the table recovers from by rebuilding.
    pub fn load(path: &Path) -> DbResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| DbError::IndexCorrupt(format!("sidecar unreadable: {e}")))?;
        let image: SidecarImage = storage::codec::decode(&bytes)
            .map_err(|e| DbError::IndexCorrupt(format!("sidecar undecodable: {e}")))?;
        if image.order < 3 || image.root >= image.nodes.len() {
            return Err(DbError::IndexCorrupt("sidecar image implausible".into()));
        }
        Ok(Self {
            order: image.order,
            nodes: image.nodes,
            free: image.free,
            root: image.root,
            len: image.len,
        })
    }

    // ---- Arena plumbing ----

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    fn take(&mut self, id: NodeId) -> Node {
        mem::replace(&mut self.nodes[id], Node::Free)
    }

    fn put(&mut self, id: NodeId, node: Node) {
        self.nodes[id] = node;
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id] = Node::Free;
        self.free.push(id);
    }

    // ---- Occupancy limits ----

    /// Maximum keys per node; one less than the child fan-out.
    fn max_keys(&self) -> usize {
        self.order - 1
    }

    /// Minimum children of a non-root internal node.
    fn min_children(&self) -> usize {
        self.order.div_ceil(2)
    }

    fn min_leaf_keys(&self) -> usize {
        self.max_keys() / 2
    }

    fn is_underfull(&self, id: NodeId) -> bool {
        match self.node(id) {
            Node::Leaf { keys, .. } => keys.len() < self.min_leaf_keys(),
            Node::Internal { children, .. } => children.len() < self.min_children(),
            Node::Free => false,
        }
    }

    fn can_lend(&self, id: NodeId) -> bool {
        match self.node(id) {
            Node::Leaf { keys, .. } => keys.len() > self.min_leaf_keys(),
            Node::Internal { children, .. } => children.len() > self.min_children(),
            Node::Free => false,
        }
    }

    // ---- Descent ----

    fn find_leaf(&self, key: &Value) -> NodeId {
        let mut current = self.root;
        loop {
            match self.node(current) {
                Node::Internal { keys, children } => {
                    current = children[child_index(keys, key)];
                }
                _ => return current,
            }
        }
    }

    fn leftmost_leaf(&self) -> NodeId {
        let mut current = self.root;
        loop {
            match self.node(current) {
                Node::Internal { children, .. } => current = children[0],
                _ => return current,
            }
        }
    }

    // ---- Insert ----

    fn insert_rec(&mut self, id: NodeId, key: Value, rid: String) -> Option<(Value, NodeId)> {
        match self.take(id) {
            Node::Leaf {
                mut keys,
                mut postings,
                next,
            } => {
                let lb = lower_bound(&keys, &key);
                if lb < keys.len() && keys[lb].total_cmp(&key) == Ordering::Equal {
                    postings[lb].push(rid);
                    self.put(
                        id,
                        Node::Leaf {
                            keys,
                            postings,
                            next,
                        },
                    );
                    return None;
                }
                keys.insert(lb, key);
                postings.insert(lb, vec![rid]);

                if keys.len() <= self.max_keys() {
                    self.put(
                        id,
                        Node::Leaf {
                            keys,
                            postings,
                            next,
                        },
                    );
                    return None;
                }

                let mid = keys.len() / 2;
                let right_keys = keys.split_off(mid);
                let right_postings = postings.split_off(mid);
                let sep = right_keys[0].clone();
                let right = self.alloc(Node::Leaf {
                    keys: right_keys,
                    postings: right_postings,
                    next,
                });
                self.put(
                    id,
                    Node::Leaf {
                        keys,
                        postings,
                        next: Some(right),
                    },
                );
                Some((sep, right))
            }
            Node::Internal {
                mut keys,
                mut children,
            } => {
                let idx = child_index(&keys, &key);
                let child = children[idx];
                // The slot sits as Free while we recurse; only `child` is
                // touched below us.
                let split = self.insert_rec(child, key, rid);

                if let Some((sep, new_child)) = split {
                    keys.insert(idx, sep);
                    children.insert(idx + 1, new_child);

                    if children.len() > self.order {
                        let mid = keys.len() / 2;
                        let sep_up = keys[mid].clone();
                        let right_keys = keys.split_off(mid + 1);
                        keys.truncate(mid);
                        let right_children = children.split_off(mid + 1);
                        let right = self.alloc(Node::Internal {
                            keys: right_keys,
                            children: right_children,
                        });
                        self.put(id, Node::Internal { keys, children });
                        return Some((sep_up, right));
                    }
                }
                self.put(id, Node::Internal { keys, children });
                None
            }
            Node::Free => None,
        }
    }

    // ---- Remove ----

    fn remove_rec(&mut self, id: NodeId, key: &Value, rid: &str) -> bool {
        match self.take(id) {
            Node::Leaf {
                mut keys,
                mut postings,
                next,
            } => {
                let mut removed = false;
                let lb = lower_bound(&keys, key);
                if lb < keys.len() && keys[lb].total_cmp(key) == Ordering::Equal {
                    if let Some(pos) = postings[lb].iter().position(|x| x == rid) {
                        postings[lb].remove(pos);
                        removed = true;
                        if postings[lb].is_empty() {
                            keys.remove(lb);
                            postings.remove(lb);
                        }
                    }
                }
                self.put(
                    id,
                    Node::Leaf {
                        keys,
                        postings,
                        next,
                    },
                );
                removed
            }
            Node::Internal { keys, children } => {
                let idx = child_index(&keys, key);
                let child = children[idx];
                self.put(id, Node::Internal { keys, children });
                let removed = self.remove_rec(child, key, rid);
                if removed {
                    self.rebalance_child(id, idx);
                }
                removed
            }
            Node::Free => false,
        }
    }

    /// Restore occupancy of `children[idx]` under `parent` after a removal,
    /// by borrowing from a sibling or merging with one.
    fn rebalance_child(&mut self, parent: NodeId, idx: usize) {
        let child = match self.node(parent) {
            Node::Internal { children, .. } => children[idx],
            _ => return,
        };
        if !self.is_underfull(child) {
            return;
        }

        let (left_sibling, right_sibling) = match self.node(parent) {
            Node::Internal { children, .. } => (
                idx.checked_sub(1).map(|i| children[i]),
                children.get(idx + 1).copied(),
            ),
            _ => return,
        };

        if let Some(left) = left_sibling {
            if self.can_lend(left) {
                self.borrow_from_left(parent, idx, left, child);
                return;
            }
        }
        if let Some(right) = right_sibling {
            if self.can_lend(right) {
                self.borrow_from_right(parent, idx, child, right);
                return;
            }
        }
        // No sibling can lend: merge. Prefer folding into the left sibling.
        if let Some(left) = left_sibling {
            self.merge(parent, idx - 1, left, child);
        } else if let Some(right) = right_sibling {
            self.merge(parent, idx, child, right);
        }
    }

    fn borrow_from_left(&mut self, parent: NodeId, idx: usize, left: NodeId, child: NodeId) {
        let mut parent_node = self.take(parent);
        let mut left_node = self.take(left);
        let mut child_node = self.take(child);

        if let (
            Node::Internal {
                keys: parent_keys, ..
            },
            Node::Leaf {
                keys: left_keys,
                postings: left_postings,
                ..
            },
            Node::Leaf {
                keys: child_keys,
                postings: child_postings,
                ..
            },
        ) = (&mut parent_node, &mut left_node, &mut child_node)
        {
            if let (Some(key), Some(ids)) = (left_keys.pop(), left_postings.pop()) {
                child_keys.insert(0, key.clone());
                child_postings.insert(0, ids);
                parent_keys[idx - 1] = key;
            }
        } else if let (
            Node::Internal {
                keys: parent_keys, ..
            },
            Node::Internal {
                keys: left_keys,
                children: left_children,
            },
            Node::Internal {
                keys: child_keys,
                children: child_children,
            },
        ) = (&mut parent_node, &mut left_node, &mut child_node)
        {
            if let (Some(sep_key), Some(moved)) = (left_keys.pop(), left_children.pop()) {
                let down = mem::replace(&mut parent_keys[idx - 1], sep_key);
                child_keys.insert(0, down);
                child_children.insert(0, moved);
            }
        }

        self.put(parent, parent_node);
        self.put(left, left_node);
        self.put(child, child_node);
    }

    fn borrow_from_right(&mut self, parent: NodeId, idx: usize, child: NodeId, right: NodeId) {
        let mut parent_node = self.take(parent);
        let mut child_node = self.take(child);
        let mut right_node = self.take(right);

        if let (
            Node::Internal {
                keys: parent_keys, ..
            },
            Node::Leaf {
                keys: child_keys,
                postings: child_postings,
                ..
            },
            Node::Leaf {
                keys: right_keys,
                postings: right_postings,
                ..
            },
        ) = (&mut parent_node, &mut child_node, &mut right_node)
        {
            if !right_keys.is_empty() {
                child_keys.push(right_keys.remove(0));
                child_postings.push(right_postings.remove(0));
                if let Some(new_first) = right_keys.first() {
                    parent_keys[idx] = new_first.clone();
                }
            }
        } else if let (
            Node::Internal {
                keys: parent_keys, ..
            },
            Node::Internal {
                keys: child_keys,
                children: child_children,
            },
            Node::Internal {
                keys: right_keys,
                children: right_children,
            },
        ) = (&mut parent_node, &mut child_node, &mut right_node)
        {
            if !right_children.is_empty() {
                let up = right_keys.remove(0);
                let down = mem::replace(&mut parent_keys[idx], up);
                child_keys.push(down);
                child_children.push(right_children.remove(0));
            }
        }

        self.put(parent, parent_node);
        self.put(child, child_node);
        self.put(right, right_node);
    }

    /// Fold `right` into `left`; they are adjacent children of `parent` and
    /// `sep_idx` is the separator between them.
    fn merge(&mut self, parent: NodeId, sep_idx: usize, left: NodeId, right: NodeId) {
        let mut parent_node = self.take(parent);
        let mut left_node = self.take(left);
        let right_node = self.take(right);

        // Siblings at one depth always share a shape.
        let merged = if let Node::Internal { keys, children } = &mut parent_node {
            match (&mut left_node, right_node) {
                (
                    Node::Leaf {
                        keys: left_keys,
                        postings: left_postings,
                        next: left_next,
                    },
                    Node::Leaf {
                        keys: right_keys,
                        postings: right_postings,
                        next: right_next,
                    },
                ) => {
                    left_keys.extend(right_keys);
                    left_postings.extend(right_postings);
                    *left_next = right_next;
                    keys.remove(sep_idx);
                    children.remove(sep_idx + 1);
                    true
                }
                (
                    Node::Internal {
                        keys: left_keys,
                        children: left_children,
                    },
                    Node::Internal {
                        keys: right_keys,
                        children: right_children,
                    },
                ) => {
                    let sep = keys.remove(sep_idx);
                    children.remove(sep_idx + 1);
                    left_keys.push(sep);
                    left_keys.extend(right_keys);
                    left_children.extend(right_children);
                    true
                }
                (_, put_back) => {
                    self.put(right, put_back);
                    false
                }
            }
        } else {
            false
        };

        self.put(parent, parent_node);
        self.put(left, left_node);
        if merged {
            self.release(right);
        }
    }

    /// Shrink the tree when the root internal node is down to one child.
    fn collapse_root(&mut self) {
        loop {
            let promote = match self.node(self.root) {
                Node::Internal { children, .. } if children.len() == 1 => children[0],
                _ => return,
            };
            let old_root = self.root;
            self.root = promote;
            self.release(old_root);
        }
    }

    // ---- Test support ----

    /// Walk the whole tree and assert the structural invariants. Only used
    /// by tests; panics on violation.
    #[doc(hidden)]
    pub fn check_invariants(&self) {
        let mut leaf_depths = Vec::new();
        self.check_node(self.root, true, 0, &mut leaf_depths);
        assert!(
            leaf_depths.windows(2).all(|w| w[0] == w[1]),
            "leaves at differing depths: {leaf_depths:?}"
        );

        let sorted = self.all_sorted();
        assert_eq!(sorted.len(), self.len, "posting count drifted");
    }

    fn check_node(&self, id: NodeId, is_root: bool, depth: usize, leaf_depths: &mut Vec<usize>) {
        match self.node(id) {
            Node::Leaf { keys, postings, .. } => {
                assert_eq!(keys.len(), postings.len());
                assert!(keys.len() <= self.max_keys());
                if !is_root {
                    assert!(keys.len() >= self.min_leaf_keys(), "leaf underfull");
                }
                assert!(
                    keys.windows(2)
                        .all(|w| w[0].total_cmp(&w[1]) == Ordering::Less),
                    "leaf keys not strictly sorted"
                );
                assert!(postings.iter().all(|ids| !ids.is_empty()));
                leaf_depths.push(depth);
            }
            Node::Internal { keys, children } => {
                assert_eq!(children.len(), keys.len() + 1);
                assert!(children.len() <= self.order);
                if !is_root {
                    assert!(children.len() >= self.min_children(), "internal underfull");
                } else {
                    assert!(children.len() >= 2, "root internal must branch");
                }
                assert!(
                    keys.windows(2)
                        .all(|w| w[0].total_cmp(&w[1]) == Ordering::Less),
                    "internal keys not strictly sorted"
                );
                for &child in children {
                    self.check_node(child, false, depth + 1, leaf_depths);
                }
            }
            Node::Free => panic!("free node reachable from root"),
        }
    }
}

impl Default for BTreeIndex {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER)
    }
}

/// First position whose key is not below `key`.
fn lower_bound(keys: &[Value], key: &Value) -> usize {
    keys.partition_point(|k| k.total_cmp(key) == Ordering::Less)
}

/// Child slot to descend into: past every separator at or below `key`.
fn child_index(keys: &[Value], key: &Value) -> usize {
    keys.partition_point(|k| k.total_cmp(key) != Ordering::Greater)
}
