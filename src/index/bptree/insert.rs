use tracing::debug;

use super::{BPlusTree, InternalNode, LeafNode, Node, NodeId};
use crate::error::{DbError, Result};

/// Node buffers reserved before an insert mutates anything, so a failed
/// allocation can never leave a half-split tree behind.
struct SpareNodes<K, V> {
    leaf: Option<LeafNode<K, V>>,
    internals: Vec<InternalNode<K>>,
}

impl<K, V> SpareNodes<K, V> {
    fn none() -> Self {
        Self {
            leaf: None,
            internals: Vec::new(),
        }
    }

    fn take_leaf(&mut self) -> Result<LeafNode<K, V>> {
        self.leaf
            .take()
            .ok_or_else(|| DbError::internal("leaf split without reserved node"))
    }

    fn take_internal(&mut self) -> Result<InternalNode<K>> {
        self.internals
            .pop()
            .ok_or_else(|| DbError::internal("internal split without reserved node"))
    }
}

impl<K: Clone, V> BPlusTree<K, V> {
    /// Inserts `value` under `key`.
    ///
    /// Fails with [`DbError::DuplicateKey`] if the key is already present, and
    /// with [`DbError::AllocationFailure`] if the nodes a split would need
    /// cannot be reserved. Either way the tree is unchanged.
    pub fn put(&mut self, key: K, value: V) -> Result<()> {
        let (path, leaf_id) = self.descend(&key)?;
        let compare = self.compare;
        let (pos, leaf_len) = {
            let leaf = self.leaf(leaf_id)?;
            match leaf.search(&key, compare) {
                Ok(_) => return Err(DbError::DuplicateKey),
                Err(pos) => (pos, leaf.len()),
            }
        };

        let mut spare = self.reserve_splits(&path, leaf_len)?;

        let leaf = self.leaf_mut(leaf_id)?;
        leaf.keys.insert(pos, key);
        leaf.values.insert(pos, value);
        self.count += 1;

        if leaf_len < self.max_keys {
            return Ok(());
        }
        let (separator, right) = self.split_leaf(leaf_id, &mut spare)?;
        self.propagate_split(path, separator, right, &mut spare)
    }

    /// Reserves every buffer the pending insert can consume: one leaf if the
    /// target leaf is full, one internal node per full ancestor the split
    /// climbs through, and a new root if it climbs past the current one.
    fn reserve_splits(
        &mut self,
        path: &[(NodeId, usize)],
        leaf_len: usize,
    ) -> Result<SpareNodes<K, V>> {
        if leaf_len < self.max_keys {
            return Ok(SpareNodes::none());
        }
        let mut full_ancestors = 0;
        for &(id, _) in path.iter().rev() {
            if self.internal(id)?.keys.len() < self.max_keys {
                break;
            }
            full_ancestors += 1;
        }
        let new_internals = full_ancestors + usize::from(full_ancestors == path.len());
        let new_nodes = 1 + new_internals;
        if new_nodes > self.free.len() {
            self.nodes.try_reserve(new_nodes - self.free.len())?;
        }

        let leaf = LeafNode::try_with_capacity(self.max_keys + 1)?;
        let mut internals = Vec::new();
        internals.try_reserve_exact(new_internals)?;
        for _ in 0..new_internals {
            internals.push(InternalNode::try_with_capacity(self.max_keys)?);
        }
        Ok(SpareNodes {
            leaf: Some(leaf),
            internals,
        })
    }

    /// Moves the upper half of an overfull leaf into a new right sibling and
    /// links it into the leaf chain. Returns the sibling's first key.
    fn split_leaf(
        &mut self,
        leaf_id: NodeId,
        spare: &mut SpareNodes<K, V>,
    ) -> Result<(K, NodeId)> {
        let mut right = spare.take_leaf()?;
        let left = self.leaf_mut(leaf_id)?;
        let split_at = left.len().div_ceil(2);
        right.keys.extend(left.keys.drain(split_at..));
        right.values.extend(left.values.drain(split_at..));
        right.next = left.next;
        let separator = right
            .keys
            .first()
            .cloned()
            .ok_or_else(|| DbError::internal("leaf split produced an empty sibling"))?;

        let right_id = self.alloc(Node::Leaf(right));
        self.leaf_mut(leaf_id)?.next = Some(right_id);
        self.events.leaf_splits += 1;
        Ok((separator, right_id))
    }

    /// Splits an internal node holding one key too many. The left half keeps
    /// `ceil(children / 2)` children; the key between the halves is promoted.
    fn split_internal(
        &mut self,
        node_id: NodeId,
        spare: &mut SpareNodes<K, V>,
    ) -> Result<(K, NodeId)> {
        let mut right = spare.take_internal()?;
        let left = self.internal_mut(node_id)?;
        let keep = left.children.len().div_ceil(2);
        right.children.extend(left.children.drain(keep..));
        right.keys.extend(left.keys.drain(keep..));
        let promoted = left
            .keys
            .pop()
            .ok_or_else(|| DbError::internal("internal split without a median key"))?;

        let right_id = self.alloc(Node::Internal(right));
        self.events.internal_splits += 1;
        Ok((promoted, right_id))
    }

    /// Inserts `separator`/`right` into each ancestor on `path`, bottom-up,
    /// splitting full ancestors and growing a new root when the old one splits.
    fn propagate_split(
        &mut self,
        path: Vec<(NodeId, usize)>,
        mut separator: K,
        mut right: NodeId,
        spare: &mut SpareNodes<K, V>,
    ) -> Result<()> {
        let max_keys = self.max_keys;
        for (parent_id, slot) in path.into_iter().rev() {
            let parent = self.internal_mut(parent_id)?;
            parent.keys.insert(slot, separator);
            parent.children.insert(slot + 1, right);
            if parent.keys.len() <= max_keys {
                return Ok(());
            }
            (separator, right) = self.split_internal(parent_id, spare)?;
        }

        let mut root = spare.take_internal()?;
        root.keys.push(separator);
        root.children.push(self.root);
        root.children.push(right);
        self.root = self.alloc(Node::Internal(root));
        self.height += 1;
        debug!(
            height = self.height,
            nodes = self.node_count,
            "bptree.root.grow"
        );
        Ok(())
    }
}
