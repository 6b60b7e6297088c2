use std::cmp::Ordering;

use crate::error::Result;

/// Slot of a node inside the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(pub(crate) usize);

/// Key comparison supplied when the tree is created.
pub type KeyCompare<K> = fn(&K, &K) -> Ordering;

#[derive(Debug, Clone)]
pub(crate) enum Node<K, V> {
    Leaf(LeafNode<K, V>),
    Internal(InternalNode<K>),
}

impl<K, V> Node<K, V> {
    /// Entries for a leaf, children for an internal node.
    pub(crate) fn occupancy(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.len(),
            Node::Internal(internal) => internal.children.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LeafNode<K, V> {
    pub(crate) keys: Vec<K>,
    pub(crate) values: Vec<V>,
    pub(crate) next: Option<NodeId>,
}

impl<K, V> LeafNode<K, V> {
    /// Allocates an empty leaf able to hold `capacity` entries without growing.
    pub(crate) fn try_with_capacity(capacity: usize) -> Result<Self> {
        let mut keys = Vec::new();
        keys.try_reserve_exact(capacity)?;
        let mut values = Vec::new();
        values.try_reserve_exact(capacity)?;
        Ok(Self {
            keys,
            values,
            next: None,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    /// `Ok(pos)` if `key` is stored at `pos`, otherwise `Err(insert_pos)`.
    pub(crate) fn search(
        &self,
        key: &K,
        compare: KeyCompare<K>,
    ) -> std::result::Result<usize, usize> {
        self.keys.binary_search_by(|probe| compare(probe, key))
    }

    /// Position of the first key not less than `key`.
    pub(crate) fn lower_bound(&self, key: &K, compare: KeyCompare<K>) -> usize {
        self.keys
            .partition_point(|probe| compare(probe, key) == Ordering::Less)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InternalNode<K> {
    pub(crate) keys: Vec<K>,
    pub(crate) children: Vec<NodeId>,
}

impl<K> InternalNode<K> {
    /// Allocates an empty internal node that can hold one key and child
    /// beyond `max_keys` while a split is pending.
    pub(crate) fn try_with_capacity(max_keys: usize) -> Result<Self> {
        let mut keys = Vec::new();
        keys.try_reserve_exact(max_keys + 1)?;
        let mut children = Vec::new();
        children.try_reserve_exact(max_keys + 2)?;
        Ok(Self { keys, children })
    }

    /// Child slot to follow for `key`: the number of separators `<= key`,
    /// so a key equal to a separator goes to the right subtree.
    pub(crate) fn child_slot(&self, key: &K, compare: KeyCompare<K>) -> usize {
        self.keys
            .partition_point(|separator| compare(separator, key) != Ordering::Greater)
    }
}
