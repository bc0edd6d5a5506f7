use std::cmp::Ordering;

use slab::Slab;
use tracing::trace;

use crate::fs::cache::CacheNode;
use crate::google_drive::DriveId;

/// Stable handle of a node inside a [`CacheTree`], valid until that node is removed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey(usize);

#[derive(Debug)]
struct TreeSlot {
    node: CacheNode,
    parent: Option<NodeKey>,
    left: Option<NodeKey>,
    right: Option<NodeKey>,
}

/// Unbalanced binary search tree of cache nodes keyed by remote id, stored in an arena.
///
/// Ids compare byte-wise. There is no rebalancing, [`CacheTree::depth`] is exposed to keep an
/// eye on degenerate shapes.
#[derive(Debug, Default)]
pub struct CacheTree {
    slots: Slab<TreeSlot>,
    root: Option<NodeKey>,
}

impl CacheTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, key: NodeKey) -> Option<&CacheNode> {
        self.slots.get(key.0).map(|slot| &slot.node)
    }
    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut CacheNode> {
        self.slots.get_mut(key.0).map(|slot| &mut slot.node)
    }

    pub fn find(&self, id: &DriveId) -> Option<NodeKey> {
        let mut current = self.root;
        while let Some(key) = current {
            let slot = &self.slots[key.0];
            current = match id.as_str().cmp(slot.node.id().as_str()) {
                Ordering::Less => slot.left,
                Ordering::Greater => slot.right,
                Ordering::Equal => return Some(key),
            };
        }
        None
    }

    /// Inserts `node` unless a node with the same id exists, returns the key of the node in the
    /// tree either way.
    pub fn insert(&mut self, node: CacheNode) -> NodeKey {
        let mut parent: Option<(NodeKey, Ordering)> = None;
        let mut current = self.root;
        while let Some(key) = current {
            let slot = &self.slots[key.0];
            let ordering = node.id().as_str().cmp(slot.node.id().as_str());
            current = match ordering {
                Ordering::Less => slot.left,
                Ordering::Greater => slot.right,
                Ordering::Equal => return key,
            };
            parent = Some((key, ordering));
        }
        let key = NodeKey(self.slots.insert(TreeSlot {
            node,
            parent: parent.map(|(key, _)| key),
            left: None,
            right: None,
        }));
        match parent {
            None => self.root = Some(key),
            Some((parent, Ordering::Less)) => self.slots[parent.0].left = Some(key),
            Some((parent, _)) => self.slots[parent.0].right = Some(key),
        }
        trace!("inserted node {:?}", key);
        key
    }

    /// Unlinks and evicts the node, returning its id. The keys of all other nodes stay valid.
    pub fn remove(&mut self, key: NodeKey) -> Option<DriveId> {
        let slot = self.slots.get(key.0)?;
        let (parent, left, right) = (slot.parent, slot.left, slot.right);
        match (left, right) {
            (None, None) => self.replace_child(parent, key, None),
            (Some(child), None) | (None, Some(child)) => {
                self.replace_child(parent, key, Some(child));
                self.slots[child.0].parent = parent;
            }
            (Some(left), Some(right)) => {
                let is_right_child = parent
                    .map(|p| self.slots[p.0].right == Some(key))
                    .unwrap_or(false);
                let replacement = if is_right_child {
                    self.leftmost(right)
                } else {
                    self.rightmost(left)
                };
                self.detach(replacement);
                // detaching may have changed the children of the removed node
                let slot = &self.slots[key.0];
                let (left, right) = (slot.left, slot.right);
                {
                    let moved = &mut self.slots[replacement.0];
                    moved.left = left;
                    moved.right = right;
                    moved.parent = parent;
                }
                for child in [left, right].into_iter().flatten() {
                    self.slots[child.0].parent = Some(replacement);
                }
                self.replace_child(parent, key, Some(replacement));
            }
        }
        let mut node = self.slots.remove(key.0).node;
        let id = std::mem::take(&mut node.fileinfo.id);
        node.evict();
        Some(id)
    }

    /// Tombstones the node, or removes it right away when nobody has it open.
    ///
    /// Returns whether the node left the tree.
    pub fn mark_deleted(&mut self, key: NodeKey) -> bool {
        let Some(node) = self.get_mut(key) else {
            return false;
        };
        if node.is_open() {
            node.deleted = true;
            false
        } else {
            self.remove(key);
            true
        }
    }

    /// Frees every node, children before their parents.
    pub fn clear(&mut self) {
        let mut pending: Vec<(NodeKey, bool)> = self.root.map(|k| (k, false)).into_iter().collect();
        while let Some((key, children_done)) = pending.pop() {
            if children_done {
                let mut slot = self.slots.remove(key.0);
                slot.node.evict();
                continue;
            }
            pending.push((key, true));
            let slot = &self.slots[key.0];
            for child in [slot.left, slot.right].into_iter().flatten() {
                pending.push((child, false));
            }
        }
        self.root = None;
    }

    /// Number of nodes on the longest root to leaf path
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending: Vec<(NodeKey, usize)> = self.root.map(|k| (k, 1)).into_iter().collect();
        while let Some((key, depth)) = pending.pop() {
            deepest = deepest.max(depth);
            let slot = &self.slots[key.0];
            for child in [slot.left, slot.right].into_iter().flatten() {
                pending.push((child, depth + 1));
            }
        }
        deepest
    }

    /// Ids in ascending order
    pub fn ids(&self) -> Vec<DriveId> {
        let mut ids = Vec::with_capacity(self.len());
        let mut stack = Vec::new();
        let mut current = self.root;
        while current.is_some() || !stack.is_empty() {
            while let Some(key) = current {
                stack.push(key);
                current = self.slots[key.0].left;
            }
            if let Some(key) = stack.pop() {
                let slot = &self.slots[key.0];
                ids.push(slot.node.id().clone());
                current = slot.right;
            }
        }
        ids
    }

    fn leftmost(&self, mut key: NodeKey) -> NodeKey {
        while let Some(left) = self.slots[key.0].left {
            key = left;
        }
        key
    }

    fn rightmost(&self, mut key: NodeKey) -> NodeKey {
        while let Some(right) = self.slots[key.0].right {
            key = right;
        }
        key
    }

    /// Splices out a node with at most one child.
    fn detach(&mut self, key: NodeKey) {
        let slot = &self.slots[key.0];
        let (parent, child) = (slot.parent, slot.left.or(slot.right));
        self.replace_child(parent, key, child);
        if let Some(child) = child {
            self.slots[child.0].parent = parent;
        }
    }

    fn replace_child(&mut self, parent: Option<NodeKey>, old: NodeKey, new: Option<NodeKey>) {
        let Some(parent) = parent else {
            self.root = new;
            return;
        };
        let slot = &mut self.slots[parent.0];
        if slot.left == Some(old) {
            slot.left = new;
        } else if slot.right == Some(old) {
            slot.right = new;
        }
    }
}
