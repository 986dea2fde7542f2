use serde::{Deserialize, Serialize};
use types::Value;

/// Arena slot index. Children reference nodes by id, never by pointer, which
/// keeps the tree cycle-free and makes the sidecar image a plain `Vec`.
pub type NodeId = usize;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Node {
    Internal {
        /// Separator keys, strictly sorted. `children[i]` holds keys below
        /// `keys[i]`; `children[keys.len()]` holds the rest.
        keys: Vec<Value>,
        children: Vec<NodeId>,
    },
    Leaf {
        /// Distinct keys, strictly sorted.
        keys: Vec<Value>,
        /// Record ids per key, in insertion order. Parallel to `keys`.
        postings: Vec<Vec<String>>,
        /// Right sibling in the leaf chain.
        next: Option<NodeId>,
    },
    /// A released arena slot awaiting reuse.
    Free,
}

impl Node {
    pub fn empty_leaf() -> Self {
        Node::Leaf {
            keys: Vec::new(),
            postings: Vec::new(),
            next: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}
