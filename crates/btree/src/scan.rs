//! Lazy ordered scans over the leaf chain.

use common::{Position, StoreError, StoreResult};

use crate::node::NodeBody;
use crate::tree::{BTree, KeyType, ValueType};

/// Iterator over `[lo, hi)` produced by [`BTree::range`].
///
/// Entries come out in ascending key order, one leaf at a time; the next
/// leaf is faulted in only when the current one is exhausted. The scan
/// borrows the tree mutably, so no mutation can interleave with it.
pub struct RangeScan<'t, K: KeyType, V: ValueType> {
    tree: &'t mut BTree<K, V>,
    entries: std::vec::IntoIter<(K, V)>,
    next_leaf: Option<Position>,
    upper: Option<K>,
    done: bool,
}

impl<'t, K: KeyType, V: ValueType> RangeScan<'t, K, V> {
    pub(crate) fn new(
        tree: &'t mut BTree<K, V>,
        entries: std::vec::IntoIter<(K, V)>,
        next_leaf: Option<Position>,
        upper: Option<K>,
    ) -> Self {
        Self {
            tree,
            entries,
            next_leaf,
            upper,
            done: false,
        }
    }
}

impl<K: KeyType, V: ValueType> Iterator for RangeScan<'_, K, V> {
    type Item = StoreResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some((k, v)) = self.entries.next() {
                if let Some(hi) = &self.upper
                    && k >= *hi
                {
                    self.done = true;
                    return None;
                }
                return Some(Ok((k, v)));
            }

            let pos = match self.next_leaf {
                Some(pos) => pos,
                None => {
                    self.done = true;
                    return None;
                }
            };
            let node = match self.tree.node_at(pos) {
                Ok(node) => node,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            self.next_leaf = node.next_leaf;
            match node.body {
                NodeBody::Leaf { keys, vals } => {
                    self.entries = keys
                        .into_iter()
                        .zip(vals)
                        .collect::<Vec<_>>()
                        .into_iter();
                }
                NodeBody::Branch { .. } => {
                    self.done = true;
                    return Some(Err(StoreError::Search(format!(
                        "leaf chain points at branch {pos}"
                    ))));
                }
            }
        }
    }
}
