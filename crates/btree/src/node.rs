//! Tree node model.

use common::Position;
use serde::{Deserialize, Serialize};

/// Whether a node currently is the tree's root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RootStatus {
    Root,
    Internal,
}

/// Liveness of a branch link. Stale links are marked invalid rather than
/// removed from the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkStatus {
    Valid,
    Invalid,
}

/// A tree node, either a leaf holding entries or a branch holding
/// separators and child links.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node<K, V> {
    pub root_status: RootStatus,
    /// Position of the parent node; the root points at itself.
    pub parent: Position,
    /// Next leaf in ascending key order; `None` off the right edge and for
    /// branches.
    pub next_leaf: Option<Position>,
    pub body: NodeBody<K, V>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeBody<K, V> {
    /// Ordered keys with their values in parallel.
    Leaf { keys: Vec<K>, vals: Vec<V> },
    /// `refs[i]` bounds the subtree behind `links[i]` from above;
    /// `links.len() == refs.len() + 1`.
    Branch {
        refs: Vec<K>,
        links: Vec<Position>,
        link_status: Vec<LinkStatus>,
    },
}

impl<K, V> Node<K, V> {
    /// A fresh empty leaf, not yet the root of anything.
    pub fn leaf() -> Self {
        Self {
            root_status: RootStatus::Internal,
            parent: Position(0),
            next_leaf: None,
            body: NodeBody::Leaf {
                keys: Vec::new(),
                vals: Vec::new(),
            },
        }
    }

    /// A branch over the given separators and links.
    pub fn branch(refs: Vec<K>, links: Vec<Position>, link_status: Vec<LinkStatus>) -> Self {
        Self {
            root_status: RootStatus::Internal,
            parent: Position(0),
            next_leaf: None,
            body: NodeBody::Branch {
                refs,
                links,
                link_status,
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, NodeBody::Leaf { .. })
    }

    pub fn is_root(&self) -> bool {
        self.root_status == RootStatus::Root
    }

    /// Number of records: keys in a leaf, separators in a branch.
    pub fn filled(&self) -> usize {
        match &self.body {
            NodeBody::Leaf { keys, .. } => keys.len(),
            NodeBody::Branch { refs, .. } => refs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filled() == 0
    }

    /// Branch fields, if this is a branch.
    pub fn branch_parts(&self) -> Option<(&[K], &[Position], &[LinkStatus])> {
        match &self.body {
            NodeBody::Branch {
                refs,
                links,
                link_status,
            } => Some((refs, links, link_status)),
            NodeBody::Leaf { .. } => None,
        }
    }
}
