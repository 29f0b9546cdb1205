//! Tree operations.
//!
//! All traversals start at the root page and go through the pager; nodes
//! refer to each other by position only. Descents split full children on
//! the way down, so an insertion never has to walk back up; removals
//! rebalance upward from the leaf with borrow-then-merge.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use allocator::FreeListAllocator;
use buffer::PagePool;
use common::{Config, Position, StoreError, StoreResult, sidecar_path};
use log::debug;
use pager::Pager;
use serde::{Serialize, de::DeserializeOwned};

use crate::codec;
use crate::fanout;
use crate::header::{MAGIC, TreeHeader};
use crate::node::{LinkStatus, Node, NodeBody, RootStatus};
use crate::scan::RangeScan;

/// Bounds a tree key must satisfy. `Default` exists for fan-out probing.
pub trait KeyType: Ord + Clone + Default + Debug + Serialize + DeserializeOwned {}
impl<T: Ord + Clone + Default + Debug + Serialize + DeserializeOwned> KeyType for T {}

/// Bounds a tree value must satisfy.
pub trait ValueType: Clone + Default + Debug + PartialEq + Serialize + DeserializeOwned {}
impl<T: Clone + Default + Debug + PartialEq + Serialize + DeserializeOwned> ValueType for T {}

/// Outcome of an insertion or update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inserted {
    /// A fresh entry went in; the tree grew by one.
    Entry,
    /// The key was already present; the tree did not grow.
    Nothing,
}

/// Outcome of a removal.
#[derive(Clone, Debug, PartialEq)]
pub enum Removed<V> {
    /// The entry existed; here is its value.
    Val(V),
    /// The key was not present.
    Nothing,
}

/// A persistent ordered map backed by a paged file.
pub struct BTree<K: KeyType, V: ValueType> {
    identifier: PathBuf,
    pager: Pager,
    root_pos: Position,
    size: u64,
    depth: u64,
    max_leaf: usize,
    max_branch: usize,
    _entry: PhantomData<(K, V)>,
}

impl<K: KeyType, V: ValueType> BTree<K, V> {
    /// Initialize a fresh tree: an empty leaf becomes the root.
    pub fn bare(identifier: impl Into<PathBuf>, config: &Config) -> StoreResult<Self> {
        let mut tree = Self::unopened(identifier, config)?;
        let root_pos = tree.pager.alloc()?;
        let mut root: Node<K, V> = Node::leaf();
        root.root_status = RootStatus::Root;
        root.parent = root_pos;
        tree.pager.place(root_pos, codec::make_page(&root)?)?;
        tree.root_pos = root_pos;
        Ok(tree)
    }

    /// Open a previously saved tree at the same identifier.
    pub fn open(identifier: impl Into<PathBuf>, config: &Config) -> StoreResult<Self> {
        let mut tree = Self::unopened(identifier, config)?;
        tree.load()?;
        Ok(tree)
    }

    fn unopened(identifier: impl Into<PathBuf>, config: &Config) -> StoreResult<Self> {
        let identifier = identifier.into();
        let pager = Pager::new(
            identifier.clone(),
            Box::new(FreeListAllocator::new(config.page_limit)),
            PagePool::lru(config.cache_frames),
        )?;
        let (max_leaf, max_branch) = fanout::capacities::<K, V>(config)?;
        Ok(Self {
            identifier,
            pager,
            root_pos: Position(0),
            size: 0,
            depth: 0,
            max_leaf,
            max_branch,
            _entry: PhantomData,
        })
    }

    pub fn identifier(&self) -> &Path {
        &self.identifier
    }

    /// Number of entries currently stored.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Levels of branches above the leaves.
    pub fn depth(&self) -> u64 {
        self.depth
    }

    pub fn max_records_leaf(&self) -> usize {
        self.max_leaf
    }

    pub fn max_records_branch(&self) -> usize {
        self.max_branch
    }

    // ---- Lookups ----

    /// Point lookup.
    pub fn get(&mut self, key: &K) -> StoreResult<Option<V>> {
        let mut pos = self.root_pos;
        loop {
            let node = self.node_at(pos)?;
            match node.body {
                NodeBody::Branch {
                    refs,
                    links,
                    link_status,
                } => {
                    let idx = refs.partition_point(|r| r < key);
                    if link_status[idx] != LinkStatus::Valid {
                        return Err(StoreError::Search(format!("invalid link in branch {pos}")));
                    }
                    pos = links[idx];
                }
                NodeBody::Leaf { keys, mut vals } => {
                    return Ok(match keys.binary_search(key) {
                        Ok(i) => Some(vals.swap_remove(i)),
                        Err(_) => None,
                    });
                }
            }
        }
    }

    pub fn contains(&mut self, key: &K) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Smallest entry, if any.
    pub fn min(&mut self) -> StoreResult<Option<(K, V)>> {
        self.corner(true)
    }

    /// Largest entry, if any.
    pub fn max(&mut self) -> StoreResult<Option<(K, V)>> {
        self.corner(false)
    }

    fn corner(&mut self, leftmost: bool) -> StoreResult<Option<(K, V)>> {
        let mut pos = self.root_pos;
        loop {
            let node = self.node_at(pos)?;
            match node.body {
                NodeBody::Branch {
                    links, link_status, ..
                } => {
                    let mut valid = links
                        .into_iter()
                        .zip(link_status)
                        .filter(|(_, s)| *s == LinkStatus::Valid)
                        .map(|(l, _)| l);
                    let next = if leftmost {
                        valid.next()
                    } else {
                        valid.last()
                    };
                    pos = next.ok_or_else(|| {
                        StoreError::Search(format!("branch {pos} has no valid link"))
                    })?;
                }
                NodeBody::Leaf { mut keys, mut vals } => {
                    if keys.is_empty() {
                        return Ok(None);
                    }
                    return Ok(if leftmost {
                        Some((keys.remove(0), vals.remove(0)))
                    } else if let (Some(k), Some(v)) = (keys.pop(), vals.pop()) {
                        Some((k, v))
                    } else {
                        None
                    });
                }
            }
        }
    }

    // ---- Insertion ----

    /// Insert `(key, val)`; an existing key is left untouched.
    pub fn insert(&mut self, key: K, val: V) -> StoreResult<Inserted> {
        self.put(key, val, false)
    }

    /// Insert `(key, val)`, overwriting the value of an existing key.
    pub fn update(&mut self, key: K, val: V) -> StoreResult<Inserted> {
        self.put(key, val, true)
    }

    fn put(&mut self, key: K, val: V, overwrite: bool) -> StoreResult<Inserted> {
        let root = self.node_at(self.root_pos)?;
        if root.filled() >= self.capacity_of(&root) {
            self.promote_root(root)?;
        }

        let mut pos = self.root_pos;
        loop {
            let mut node = self.node_at(pos)?;
            let (idx, child_pos) = match &mut node.body {
                NodeBody::Leaf { keys, vals } => {
                    let at = match keys.binary_search(&key) {
                        Ok(i) => {
                            if overwrite {
                                vals[i] = val;
                                self.write_node(pos, &node)?;
                            }
                            return Ok(Inserted::Nothing);
                        }
                        Err(i) => i,
                    };
                    keys.insert(at, key);
                    vals.insert(at, val);
                    self.write_node(pos, &node)?;
                    self.size += 1;
                    return Ok(Inserted::Entry);
                }
                NodeBody::Branch {
                    refs,
                    links,
                    link_status,
                } => {
                    let idx = refs.partition_point(|r| r < &key);
                    if link_status[idx] != LinkStatus::Valid {
                        return Err(StoreError::Insert(format!(
                            "invalid link in branch {pos}"
                        )));
                    }
                    (idx, links[idx])
                }
            };

            let child = self.node_at(child_pos)?;
            if child.filled() >= self.capacity_of(&child) {
                let (midkey, sibling_pos) = self.split_child(pos, &mut node, idx, child_pos, child)?;
                pos = if key <= midkey { child_pos } else { sibling_pos };
            } else {
                pos = child_pos;
            }
        }
    }

    /// The root is full: split it under a brand-new root branch.
    fn promote_root(&mut self, mut old_root: Node<K, V>) -> StoreResult<()> {
        let old_pos = self.root_pos;
        let new_root_pos = self.pager.alloc()?;
        let sibling_pos = self.pager.alloc()?;

        let (midkey, mut sibling) = split_node(&mut old_root)?;
        old_root.root_status = RootStatus::Internal;
        old_root.parent = new_root_pos;
        sibling.root_status = RootStatus::Internal;
        sibling.parent = new_root_pos;
        if old_root.is_leaf() {
            sibling.next_leaf = old_root.next_leaf;
            old_root.next_leaf = Some(sibling_pos);
        }

        let mut new_root = Node::branch(
            vec![midkey],
            vec![old_pos, sibling_pos],
            vec![LinkStatus::Valid, LinkStatus::Valid],
        );
        new_root.root_status = RootStatus::Root;
        new_root.parent = new_root_pos;

        self.adopt_children(&sibling, sibling_pos)?;
        self.write_node(old_pos, &old_root)?;
        self.write_node(sibling_pos, &sibling)?;
        self.write_node(new_root_pos, &new_root)?;
        self.root_pos = new_root_pos;
        self.depth += 1;
        debug!("root promoted to {new_root_pos}, depth now {}", self.depth);
        Ok(())
    }

    /// Split the full child at `links[idx]` of `parent`, writing all three
    /// touched nodes back. Returns the separator and the sibling position.
    fn split_child(
        &mut self,
        parent_pos: Position,
        parent: &mut Node<K, V>,
        idx: usize,
        child_pos: Position,
        mut child: Node<K, V>,
    ) -> StoreResult<(K, Position)> {
        let sibling_pos = self.pager.alloc()?;
        let (midkey, mut sibling) = split_node(&mut child)?;
        sibling.parent = child.parent;
        if child.is_leaf() {
            sibling.next_leaf = child.next_leaf;
            child.next_leaf = Some(sibling_pos);
        }

        match &mut parent.body {
            NodeBody::Branch {
                refs,
                links,
                link_status,
            } => {
                refs.insert(idx, midkey.clone());
                links.insert(idx + 1, sibling_pos);
                link_status.insert(idx + 1, LinkStatus::Valid);
            }
            NodeBody::Leaf { .. } => {
                return Err(StoreError::Insert(format!(
                    "cannot split under leaf {parent_pos}"
                )));
            }
        }

        self.adopt_children(&sibling, sibling_pos)?;
        self.write_node(child_pos, &child)?;
        self.write_node(sibling_pos, &sibling)?;
        self.write_node(parent_pos, parent)?;
        debug!("split {child_pos}, sibling at {sibling_pos}");
        Ok((midkey, sibling_pos))
    }

    // ---- Removal ----

    /// Remove `key`, rebalancing underfull nodes from the leaf upward.
    pub fn remove(&mut self, key: &K) -> StoreResult<Removed<V>> {
        let mut pos = self.root_pos;
        loop {
            let mut node = self.node_at(pos)?;
            match &mut node.body {
                NodeBody::Branch {
                    refs,
                    links,
                    link_status,
                } => {
                    let idx = refs.partition_point(|r| r < key);
                    if link_status[idx] != LinkStatus::Valid {
                        return Err(StoreError::Remove(format!(
                            "invalid link in branch {pos}"
                        )));
                    }
                    pos = links[idx];
                }
                NodeBody::Leaf { keys, vals } => {
                    let val = match keys.binary_search(key) {
                        Ok(i) => {
                            keys.remove(i);
                            vals.remove(i)
                        }
                        Err(_) => return Ok(Removed::Nothing),
                    };
                    self.write_node(pos, &node)?;
                    self.size -= 1;
                    self.rebalance(pos)?;
                    return Ok(Removed::Val(val));
                }
            }
        }
    }

    /// Repair an underfull node: borrow from a sibling when one can spare
    /// an entry, merge with one otherwise, then recurse on the parent.
    fn rebalance(&mut self, pos: Position) -> StoreResult<()> {
        let node = self.node_at(pos)?;
        if node.is_root() {
            return self.collapse_root();
        }
        if node.filled() >= self.min_of(&node) {
            return Ok(());
        }

        let parent_pos = node.parent;
        let parent = self.node_at(parent_pos)?;
        let (_, links, link_status) = parent
            .branch_parts()
            .ok_or_else(|| StoreError::Remove(format!("parent of {pos} is a leaf")))?;
        let idx = links
            .iter()
            .zip(link_status)
            .position(|(l, s)| *l == pos && *s == LinkStatus::Valid)
            .ok_or_else(|| {
                StoreError::Remove(format!("node {pos} not linked from its parent"))
            })?;

        let left = (idx > 0 && link_status[idx - 1] == LinkStatus::Valid)
            .then(|| links[idx - 1]);
        let right = (idx + 1 < links.len() && link_status[idx + 1] == LinkStatus::Valid)
            .then(|| links[idx + 1]);

        if let Some(lpos) = left {
            let sibling = self.node_at(lpos)?;
            if sibling.filled() > self.min_of(&sibling) {
                return self.borrow_from_left(parent_pos, idx, lpos, pos);
            }
        }
        if let Some(rpos) = right {
            let sibling = self.node_at(rpos)?;
            if sibling.filled() > self.min_of(&sibling) {
                return self.borrow_from_right(parent_pos, idx, pos, rpos);
            }
        }

        if let Some(lpos) = left {
            self.merge(parent_pos, idx - 1, lpos, pos)?;
        } else if let Some(rpos) = right {
            self.merge(parent_pos, idx, pos, rpos)?;
        } else {
            return Err(StoreError::Remove(format!(
                "underfull node {pos} has no valid sibling"
            )));
        }
        self.rebalance(parent_pos)
    }

    /// Move the left sibling's largest entry to the front of `pos` and
    /// refresh the separator between them.
    fn borrow_from_left(
        &mut self,
        parent_pos: Position,
        idx: usize,
        lpos: Position,
        pos: Position,
    ) -> StoreResult<()> {
        let mut parent = self.node_at(parent_pos)?;
        let mut left = self.node_at(lpos)?;
        let mut node = self.node_at(pos)?;
        let mut moved_child: Option<(Position, LinkStatus)> = None;

        match (&mut left.body, &mut node.body) {
            (
                NodeBody::Leaf { keys: lk, vals: lv },
                NodeBody::Leaf { keys: nk, vals: nv },
            ) => {
                let (k, v) = match (lk.pop(), lv.pop()) {
                    (Some(k), Some(v)) => (k, v),
                    _ => {
                        return Err(StoreError::Remove(format!(
                            "left sibling {lpos} has nothing to lend"
                        )));
                    }
                };
                nk.insert(0, k);
                nv.insert(0, v);
                let boundary = lk.last().cloned().ok_or_else(|| {
                    StoreError::Remove(format!("left sibling {lpos} drained below minimum"))
                })?;
                set_separator(&mut parent, idx - 1, boundary)?;
            }
            (
                NodeBody::Branch {
                    refs: lr,
                    links: ll,
                    link_status: ls,
                },
                NodeBody::Branch {
                    refs: nr,
                    links: nl,
                    link_status: ns,
                },
            ) => {
                let sep = separator(&parent, idx - 1)?;
                let (up, link, status) = match (lr.pop(), ll.pop(), ls.pop()) {
                    (Some(up), Some(link), Some(status)) => (up, link, status),
                    _ => {
                        return Err(StoreError::Remove(format!(
                            "left sibling {lpos} has nothing to lend"
                        )));
                    }
                };
                nr.insert(0, sep);
                nl.insert(0, link);
                ns.insert(0, status);
                moved_child = Some((link, status));
                set_separator(&mut parent, idx - 1, up)?;
            }
            _ => {
                return Err(StoreError::Remove(format!(
                    "siblings {lpos} and {pos} disagree on their variant"
                )));
            }
        }

        if let Some((child, LinkStatus::Valid)) = moved_child {
            let mut adopted = self.node_at(child)?;
            adopted.parent = pos;
            self.write_node(child, &adopted)?;
        }
        self.write_node(lpos, &left)?;
        self.write_node(pos, &node)?;
        self.write_node(parent_pos, &parent)?;
        debug!("borrowed from left sibling {lpos} into {pos}");
        Ok(())
    }

    /// Move the right sibling's smallest entry to the back of `pos` and
    /// refresh the separator between them.
    fn borrow_from_right(
        &mut self,
        parent_pos: Position,
        idx: usize,
        pos: Position,
        rpos: Position,
    ) -> StoreResult<()> {
        let mut parent = self.node_at(parent_pos)?;
        let mut node = self.node_at(pos)?;
        let mut right = self.node_at(rpos)?;
        let mut moved_child: Option<(Position, LinkStatus)> = None;

        match (&mut node.body, &mut right.body) {
            (
                NodeBody::Leaf { keys: nk, vals: nv },
                NodeBody::Leaf { keys: rk, vals: rv },
            ) => {
                if rk.is_empty() {
                    return Err(StoreError::Remove(format!(
                        "right sibling {rpos} has nothing to lend"
                    )));
                }
                let k = rk.remove(0);
                let v = rv.remove(0);
                set_separator(&mut parent, idx, k.clone())?;
                nk.push(k);
                nv.push(v);
            }
            (
                NodeBody::Branch {
                    refs: nr,
                    links: nl,
                    link_status: ns,
                },
                NodeBody::Branch {
                    refs: rr,
                    links: rl,
                    link_status: rs,
                },
            ) => {
                if rr.is_empty() || rl.is_empty() || rs.is_empty() {
                    return Err(StoreError::Remove(format!(
                        "right sibling {rpos} has nothing to lend"
                    )));
                }
                let sep = separator(&parent, idx)?;
                nr.push(sep);
                let link = rl.remove(0);
                let status = rs.remove(0);
                nl.push(link);
                ns.push(status);
                moved_child = Some((link, status));
                set_separator(&mut parent, idx, rr.remove(0))?;
            }
            _ => {
                return Err(StoreError::Remove(format!(
                    "siblings {pos} and {rpos} disagree on their variant"
                )));
            }
        }

        if let Some((child, LinkStatus::Valid)) = moved_child {
            let mut adopted = self.node_at(child)?;
            adopted.parent = pos;
            self.write_node(child, &adopted)?;
        }
        self.write_node(pos, &node)?;
        self.write_node(rpos, &right)?;
        self.write_node(parent_pos, &parent)?;
        debug!("borrowed from right sibling {rpos} into {pos}");
        Ok(())
    }

    /// Combine the nodes on both sides of separator `sep_idx` into a fresh
    /// page and drop that separator from the parent.
    fn merge(
        &mut self,
        parent_pos: Position,
        sep_idx: usize,
        lpos: Position,
        rpos: Position,
    ) -> StoreResult<()> {
        let mut parent = self.node_at(parent_pos)?;
        let left = self.node_at(lpos)?;
        let right = self.node_at(rpos)?;
        let merged_pos = self.pager.alloc()?;

        let mut merged = match (left.body, right.body) {
            (
                NodeBody::Leaf {
                    keys: mut lk,
                    vals: mut lv,
                },
                NodeBody::Leaf { keys: rk, vals: rv },
            ) => {
                lk.extend(rk);
                lv.extend(rv);
                let mut node = Node::leaf();
                node.body = NodeBody::Leaf { keys: lk, vals: lv };
                node.next_leaf = right.next_leaf;
                node
            }
            (
                NodeBody::Branch {
                    refs: mut lr,
                    links: mut ll,
                    link_status: mut ls,
                },
                NodeBody::Branch {
                    refs: rr,
                    links: rl,
                    link_status: rs,
                },
            ) => {
                // The separator comes down to keep |links| = |refs| + 1.
                lr.push(separator(&parent, sep_idx)?);
                lr.extend(rr);
                ll.extend(rl);
                ls.extend(rs);
                Node::branch(lr, ll, ls)
            }
            _ => {
                return Err(StoreError::Remove(format!(
                    "cannot merge leaf with branch under {parent_pos}"
                )));
            }
        };
        merged.root_status = RootStatus::Internal;
        merged.parent = parent_pos;
        let merged_is_leaf = merged.is_leaf();
        let merged_last_key = match &merged.body {
            NodeBody::Leaf { keys, .. } => keys.last().cloned(),
            NodeBody::Branch { .. } => None,
        };

        match &mut parent.body {
            NodeBody::Branch {
                refs,
                links,
                link_status,
            } => {
                if sep_idx >= refs.len() || sep_idx + 1 >= links.len() {
                    return Err(StoreError::Remove(format!(
                        "separator {sep_idx} out of bounds in branch {parent_pos}"
                    )));
                }
                refs.remove(sep_idx);
                links.remove(sep_idx + 1);
                link_status.remove(sep_idx + 1);
                links[sep_idx] = merged_pos;
                link_status[sep_idx] = LinkStatus::Valid;
                // Keep the convention that a separator equals the largest
                // key of the subtree to its left.
                if sep_idx < refs.len()
                    && let Some(last) = merged_last_key
                {
                    refs[sep_idx] = last;
                }
            }
            NodeBody::Leaf { .. } => {
                return Err(StoreError::Remove(format!(
                    "parent {parent_pos} of merged nodes is a leaf"
                )));
            }
        }

        self.adopt_children(&merged, merged_pos)?;
        self.write_node(merged_pos, &merged)?;
        self.write_node(parent_pos, &parent)?;
        if merged_is_leaf {
            self.repoint_predecessor(parent_pos, merged_pos)?;
        }
        debug!("merged {lpos} and {rpos} into {merged_pos}");
        Ok(())
    }

    /// A root branch left without separators has a single subtree; that
    /// subtree's top becomes the new root and the tree loses a level.
    fn collapse_root(&mut self) -> StoreResult<()> {
        loop {
            let root = self.node_at(self.root_pos)?;
            if root.is_leaf() || root.filled() > 0 {
                return Ok(());
            }
            let (_, links, link_status) = root.branch_parts().ok_or_else(|| {
                StoreError::Remove(format!("root {} is not a branch", self.root_pos))
            })?;
            let child_pos = links
                .iter()
                .zip(link_status)
                .find(|(_, s)| **s == LinkStatus::Valid)
                .map(|(l, _)| *l)
                .ok_or_else(|| {
                    StoreError::Remove(format!("root {} has no valid link", self.root_pos))
                })?;

            let mut child = self.node_at(child_pos)?;
            child.root_status = RootStatus::Root;
            child.parent = child_pos;
            self.write_node(child_pos, &child)?;
            self.root_pos = child_pos;
            self.depth -= 1;
            debug!("root collapsed to {child_pos}, depth now {}", self.depth);
        }
    }

    /// The merged leaf moved to a fresh page; make its predecessor's
    /// `next_leaf` follow. Ascends until an ancestor has a subtree to the
    /// left, then descends that subtree's rightmost valid path.
    fn repoint_predecessor(
        &mut self,
        parent_pos: Position,
        merged_pos: Position,
    ) -> StoreResult<()> {
        let mut child_pos = merged_pos;
        let mut cur_pos = parent_pos;
        loop {
            let cur = self.node_at(cur_pos)?;
            let (_, links, link_status) = cur.branch_parts().ok_or_else(|| {
                StoreError::Remove(format!("ancestor {cur_pos} is not a branch"))
            })?;
            let idx = links
                .iter()
                .position(|l| *l == child_pos)
                .ok_or_else(|| {
                    StoreError::Remove(format!("lost subtree {child_pos} under {cur_pos}"))
                })?;

            let left_subtree = links[..idx]
                .iter()
                .zip(&link_status[..idx])
                .rev()
                .find(|(_, s)| **s == LinkStatus::Valid)
                .map(|(l, _)| *l);

            if let Some(mut dpos) = left_subtree {
                loop {
                    let mut node = self.node_at(dpos)?;
                    if node.is_leaf() {
                        node.next_leaf = Some(merged_pos);
                        self.write_node(dpos, &node)?;
                        return Ok(());
                    }
                    let (_, links, link_status) = node.branch_parts().ok_or_else(|| {
                        StoreError::Remove(format!("ancestor {dpos} is not a branch"))
                    })?;
                    dpos = links
                        .iter()
                        .zip(link_status)
                        .rev()
                        .find(|(_, s)| **s == LinkStatus::Valid)
                        .map(|(l, _)| *l)
                        .ok_or_else(|| {
                            StoreError::Remove(format!("branch {dpos} has no valid link"))
                        })?;
                }
            }

            if cur.is_root() {
                // The merged leaf is the leftmost leaf; nothing points at it.
                return Ok(());
            }
            child_pos = cur_pos;
            cur_pos = cur.parent;
        }
    }

    // ---- Scans ----

    /// Lazy scan over `[lo, hi)`; `None` bounds are open ends.
    pub fn range(&mut self, lo: Option<&K>, hi: Option<&K>) -> StoreResult<RangeScan<'_, K, V>> {
        let mut pos = self.root_pos;
        loop {
            let node = self.node_at(pos)?;
            match node.body {
                NodeBody::Branch {
                    refs,
                    links,
                    link_status,
                } => {
                    let idx = match lo {
                        Some(k) => refs.partition_point(|r| r < k),
                        None => link_status
                            .iter()
                            .position(|s| *s == LinkStatus::Valid)
                            .ok_or_else(|| {
                                StoreError::Search(format!("branch {pos} has no valid link"))
                            })?,
                    };
                    if link_status[idx] != LinkStatus::Valid {
                        return Err(StoreError::Search(format!("invalid link in branch {pos}")));
                    }
                    pos = links[idx];
                }
                NodeBody::Leaf { keys, vals } => {
                    let start = match lo {
                        Some(k) => keys.partition_point(|x| x < k),
                        None => 0,
                    };
                    let entries: Vec<(K, V)> =
                        keys.into_iter().zip(vals).skip(start).collect();
                    return Ok(RangeScan::new(
                        self,
                        entries.into_iter(),
                        node.next_leaf,
                        hi.cloned(),
                    ));
                }
            }
        }
    }

    /// Lazy scan over every entry in key order.
    pub fn iter(&mut self) -> StoreResult<RangeScan<'_, K, V>> {
        self.range(None, None)
    }

    // ---- Persistence ----

    /// Write the header sidecar, then flush the pager.
    pub fn save(&mut self) -> StoreResult<()> {
        let header = TreeHeader {
            magic: MAGIC,
            root_pos: self.root_pos,
            size: self.size,
            depth: self.depth,
            max_records_leaf: self.max_leaf as i64,
            max_records_branch: self.max_branch as i64,
        };
        header.write_to(&sidecar_path(&self.identifier, "header"))?;
        self.pager.save()?;
        debug!("saved tree {} ({} entries)", self.identifier.display(), self.size);
        Ok(())
    }

    /// Read the header sidecar back, then reload the pager.
    pub fn load(&mut self) -> StoreResult<()> {
        let header = TreeHeader::read_from(&sidecar_path(&self.identifier, "header"))?;
        self.root_pos = header.root_pos;
        self.size = header.size;
        self.depth = header.depth;
        self.max_leaf = header.max_records_leaf as usize;
        self.max_branch = header.max_records_branch as usize;
        self.pager.load()
    }

    // ---- Node plumbing ----

    pub(crate) fn node_at(&mut self, pos: Position) -> StoreResult<Node<K, V>> {
        codec::from_page(self.pager.get(pos)?)
    }

    pub(crate) fn write_node(&mut self, pos: Position, node: &Node<K, V>) -> StoreResult<()> {
        self.pager.place(pos, codec::make_page(node)?)
    }

    pub(crate) fn root_pos(&self) -> Position {
        self.root_pos
    }

    pub(crate) fn pager(&self) -> &Pager {
        &self.pager
    }

    fn capacity_of(&self, node: &Node<K, V>) -> usize {
        if node.is_leaf() {
            self.max_leaf
        } else {
            self.max_branch
        }
    }

    /// Fewest records a non-root leaf may hold.
    pub(crate) fn min_records_leaf(&self) -> usize {
        self.max_leaf / 2
    }

    /// Fewest separators a non-root branch may hold. A branch split
    /// donates its pivot upward, so the smaller half keeps
    /// `(max - 1) / 2` separators.
    pub(crate) fn min_records_branch(&self) -> usize {
        self.max_branch.saturating_sub(1) / 2
    }

    fn min_of(&self, node: &Node<K, V>) -> usize {
        if node.is_leaf() {
            self.min_records_leaf()
        } else {
            self.min_records_branch()
        }
    }

    /// Point every valid child of a branch back at its (new) position.
    fn adopt_children(&mut self, node: &Node<K, V>, pos: Position) -> StoreResult<()> {
        if let NodeBody::Branch {
            links, link_status, ..
        } = &node.body
        {
            for (link, status) in links.iter().zip(link_status) {
                if *status == LinkStatus::Valid {
                    let mut child = self.node_at(*link)?;
                    child.parent = pos;
                    self.write_node(*link, &child)?;
                }
            }
        }
        Ok(())
    }
}

/// Split a full node in two. The left half keeps the smaller keys; the
/// returned key separates the halves. For a leaf the separator stays in
/// the left half (it is its largest key); for a branch it moves up.
fn split_node<K: KeyType, V: ValueType>(node: &mut Node<K, V>) -> StoreResult<(K, Node<K, V>)> {
    match &mut node.body {
        NodeBody::Leaf { keys, vals } => {
            if keys.is_empty() {
                return Err(StoreError::Insert("cannot split an empty leaf".into()));
            }
            let pivot = (keys.len() - 1) / 2;
            let right_keys = keys.split_off(pivot + 1);
            let right_vals = vals.split_off(pivot + 1);
            let midkey = keys[pivot].clone();
            let mut sibling = Node::leaf();
            sibling.body = NodeBody::Leaf {
                keys: right_keys,
                vals: right_vals,
            };
            Ok((midkey, sibling))
        }
        NodeBody::Branch {
            refs,
            links,
            link_status,
        } => {
            let pivot = (refs.len() - 1) / 2;
            let right_refs = refs.split_off(pivot + 1);
            let right_links = links.split_off(pivot + 1);
            let right_status = link_status.split_off(pivot + 1);
            // The pivot separator moves up, not into either half.
            let midkey = refs.pop().ok_or_else(|| {
                StoreError::Insert("cannot split a branch without separators".into())
            })?;
            Ok((midkey, Node::branch(right_refs, right_links, right_status)))
        }
    }
}

/// Read the parent separator at `idx`.
fn separator<K: KeyType, V: ValueType>(parent: &Node<K, V>, idx: usize) -> StoreResult<K> {
    match &parent.body {
        NodeBody::Branch { refs, .. } => refs.get(idx).cloned().ok_or_else(|| {
            StoreError::Remove(format!("separator {idx} out of bounds"))
        }),
        NodeBody::Leaf { .. } => Err(StoreError::Remove("parent is a leaf".into())),
    }
}

/// Overwrite the parent separator at `idx`.
fn set_separator<K: KeyType, V: ValueType>(
    parent: &mut Node<K, V>,
    idx: usize,
    key: K,
) -> StoreResult<()> {
    match &mut parent.body {
        NodeBody::Branch { refs, .. } => match refs.get_mut(idx) {
            Some(slot) => {
                *slot = key;
                Ok(())
            }
            None => Err(StoreError::Remove(format!(
                "separator {idx} out of bounds"
            ))),
        },
        NodeBody::Leaf { .. } => Err(StoreError::Remove("parent is a leaf".into())),
    }
}
