use tracing::debug;

use super::{BPlusTree, InternalNode, Node, NodeId};
use crate::error::{DbError, Result};

impl<K: Clone, V> BPlusTree<K, V> {
    /// Removes `key` and returns the value it mapped to.
    ///
    /// An underflowing node first borrows from an adjacent sibling that has
    /// more than the minimum, otherwise it is merged with one; merges can
    /// cascade up to the root, which collapses when left with one child.
    pub fn remove(&mut self, key: &K) -> Result<V> {
        let (path, leaf_id) = self.descend(key)?;
        let compare = self.compare;
        let leaf = self.leaf_mut(leaf_id)?;
        let pos = leaf
            .search(key, compare)
            .map_err(|_| DbError::KeyNotFound)?;
        leaf.keys.remove(pos);
        let value = leaf.values.remove(pos);
        self.count -= 1;

        for (parent_id, slot) in path.into_iter().rev() {
            self.repair_child(parent_id, slot)?;
        }
        self.collapse_root()?;
        Ok(value)
    }

    /// Restores the invariants of `parent.children[slot]` after a removal
    /// somewhere beneath it.
    fn repair_child(&mut self, parent_id: NodeId, slot: usize) -> Result<()> {
        // Rotations and merges below pull separators straight out of the
        // parent, so the child's own separator must be exact first.
        self.refresh_separator(parent_id, slot)?;

        let (child_id, left_id, right_id) = {
            let parent = self.internal(parent_id)?;
            let child = *parent
                .children
                .get(slot)
                .ok_or_else(|| DbError::internal("repair slot out of range"))?;
            let left = slot.checked_sub(1).map(|i| parent.children[i]);
            let right = parent.children.get(slot + 1).copied();
            (child, left, right)
        };

        let child = self.node(child_id)?;
        if child.occupancy() >= self.min_occupancy(child) {
            return Ok(());
        }

        if let Some(left_id) = left_id {
            if self.can_lend(left_id)? {
                self.borrow_from_left(parent_id, slot)?;
                return self.refresh_around(parent_id, slot);
            }
        }
        if let Some(right_id) = right_id {
            if self.can_lend(right_id)? {
                self.borrow_from_right(parent_id, slot)?;
                return self.refresh_around(parent_id, slot);
            }
        }
        match (left_id, right_id) {
            (Some(_), _) => self.merge_children(parent_id, slot - 1)?,
            (None, Some(_)) => self.merge_children(parent_id, slot)?,
            (None, None) => {
                return Err(DbError::internal("underflowing node has no sibling"));
            }
        }
        self.refresh_around(parent_id, slot.saturating_sub(1))
    }

    fn can_lend(&self, id: NodeId) -> Result<bool> {
        let node = self.node(id)?;
        Ok(node.occupancy() > self.min_occupancy(node))
    }

    /// Sets `parent.keys[slot - 1]` to the smallest key under `children[slot]`.
    /// Slot 0 has no separator of its own and an empty leaf has no key yet.
    fn refresh_separator(&mut self, parent_id: NodeId, slot: usize) -> Result<()> {
        if slot == 0 {
            return Ok(());
        }
        let child_id = match self.internal(parent_id)?.children.get(slot) {
            Some(&id) => id,
            None => return Ok(()),
        };
        if let Some(min) = self.min_key(child_id)? {
            let parent = self.internal_mut(parent_id)?;
            if let Some(separator) = parent.keys.get_mut(slot - 1) {
                *separator = min;
            }
        }
        Ok(())
    }

    fn refresh_around(&mut self, parent_id: NodeId, slot: usize) -> Result<()> {
        for neighbour in slot.saturating_sub(1)..=slot + 1 {
            self.refresh_separator(parent_id, neighbour)?;
        }
        Ok(())
    }

    /// Moves the last entry (or child) of `children[slot - 1]` to the front
    /// of `children[slot]`.
    fn borrow_from_left(&mut self, parent_id: NodeId, slot: usize) -> Result<()> {
        let (left_id, child_id) = {
            let parent = self.internal(parent_id)?;
            (parent.children[slot - 1], parent.children[slot])
        };
        let mut left = self.take(left_id)?;
        let mut child = match self.take(child_id) {
            Ok(child) => child,
            Err(err) => {
                self.restore(left_id, left);
                return Err(err);
            }
        };
        let outcome = self
            .internal_mut(parent_id)
            .and_then(|parent| rotate_right(parent, slot - 1, &mut left, &mut child));
        self.restore(left_id, left);
        self.restore(child_id, child);
        outcome?;
        self.events.borrows += 1;
        Ok(())
    }

    /// Moves the first entry (or child) of `children[slot + 1]` to the end of
    /// `children[slot]`.
    fn borrow_from_right(&mut self, parent_id: NodeId, slot: usize) -> Result<()> {
        let (child_id, right_id) = {
            let parent = self.internal(parent_id)?;
            (parent.children[slot], parent.children[slot + 1])
        };
        let mut child = self.take(child_id)?;
        let mut right = match self.take(right_id) {
            Ok(right) => right,
            Err(err) => {
                self.restore(child_id, child);
                return Err(err);
            }
        };
        let outcome = self
            .internal_mut(parent_id)
            .and_then(|parent| rotate_left(parent, slot, &mut child, &mut right));
        self.restore(child_id, child);
        self.restore(right_id, right);
        outcome?;
        self.events.borrows += 1;
        Ok(())
    }

    /// Folds `children[left_slot + 1]` into `children[left_slot]` and drops
    /// the separator between them from the parent.
    fn merge_children(&mut self, parent_id: NodeId, left_slot: usize) -> Result<()> {
        let (left_id, right_id) = {
            let parent = self.internal(parent_id)?;
            (parent.children[left_slot], parent.children[left_slot + 1])
        };
        let right = self.take(right_id)?;
        let parent = self.internal_mut(parent_id)?;
        let separator = parent.keys.remove(left_slot);
        parent.children.remove(left_slot + 1);

        let merged_leaves = match (self.node_mut(left_id)?, right) {
            (Node::Leaf(left), Node::Leaf(right)) => {
                left.keys.extend(right.keys);
                left.values.extend(right.values);
                left.next = right.next;
                true
            }
            (Node::Internal(left), Node::Internal(right)) => {
                left.keys.push(separator);
                left.keys.extend(right.keys);
                left.children.extend(right.children);
                false
            }
            _ => return Err(DbError::internal("merging nodes from different levels")),
        };
        if merged_leaves {
            self.events.leaf_merges += 1;
        } else {
            self.events.internal_merges += 1;
        }
        self.release(right_id);
        Ok(())
    }

    /// Replaces an internal root that has a single child by that child.
    fn collapse_root(&mut self) -> Result<()> {
        loop {
            let only_child = match self.node(self.root)? {
                Node::Internal(root) if root.children.len() == 1 => root.children[0],
                _ => return Ok(()),
            };
            let old_root = self.root;
            self.take(old_root)?;
            self.release(old_root);
            self.root = only_child;
            self.height -= 1;
            debug!(
                height = self.height,
                nodes = self.node_count,
                "bptree.root.shrink"
            );
        }
    }
}

/// Rotation through `parent.keys[separator]` from `left` into `right`.
fn rotate_right<K: Clone, V>(
    parent: &mut InternalNode<K>,
    separator: usize,
    left: &mut Node<K, V>,
    right: &mut Node<K, V>,
) -> Result<()> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            let (key, value) = left
                .keys
                .pop()
                .zip(left.values.pop())
                .ok_or_else(|| DbError::internal("borrowing from an empty leaf"))?;
            parent.keys[separator] = key.clone();
            right.keys.insert(0, key);
            right.values.insert(0, value);
        }
        (Node::Internal(left), Node::Internal(right)) => {
            let (key, child) = left
                .keys
                .pop()
                .zip(left.children.pop())
                .ok_or_else(|| DbError::internal("borrowing from an empty internal node"))?;
            let pulled_down = std::mem::replace(&mut parent.keys[separator], key);
            right.keys.insert(0, pulled_down);
            right.children.insert(0, child);
        }
        _ => return Err(DbError::internal("rotating between different levels")),
    }
    Ok(())
}

/// Rotation through `parent.keys[separator]` from `right` into `left`.
fn rotate_left<K: Clone, V>(
    parent: &mut InternalNode<K>,
    separator: usize,
    left: &mut Node<K, V>,
    right: &mut Node<K, V>,
) -> Result<()> {
    match (left, right) {
        (Node::Leaf(left), Node::Leaf(right)) => {
            if right.keys.len() < 2 {
                return Err(DbError::internal("borrowing would empty the right leaf"));
            }
            let key = right.keys.remove(0);
            let value = right.values.remove(0);
            left.keys.push(key);
            left.values.push(value);
            parent.keys[separator] = right.keys[0].clone();
        }
        (Node::Internal(left), Node::Internal(right)) => {
            if right.keys.is_empty() {
                return Err(DbError::internal("borrowing from an empty internal node"));
            }
            let key = right.keys.remove(0);
            let child = right.children.remove(0);
            let pulled_down = std::mem::replace(&mut parent.keys[separator], key);
            left.keys.push(pulled_down);
            left.children.push(child);
        }
        _ => return Err(DbError::internal("rotating between different levels")),
    }
    Ok(())
}
