//! In-memory B+ tree mapping ordered keys to caller-defined values.
//!
//! Nodes live in an arena owned by the tree and refer to each other by
//! [`NodeId`]. Leaves hold the entries and are chained left to right so
//! range scans never re-descend; internal nodes hold only separators and
//! child ids. Separator `key[i]` is always the smallest key stored under
//! `child[i + 1]`.
//!
//! Occupancy bounds, with `order = max_keys + 1`:
//! - leaf: `ceil(max_keys / 2) ..= max_keys` entries
//! - internal: `ceil(order / 2) ..= order` children
//!
//! The root is exempt from the minimum. An empty tree is a single empty
//! leaf at height 1.

mod cursor;
mod insert;
mod node;
mod remove;
mod stats;
mod verify;


use crate::error::{DbError, Result};

pub use cursor::Range;
pub use node::KeyCompare;
pub use stats::TreeStats;

pub(crate) use node::{InternalNode, LeafNode, Node, NodeId};
use stats::StructuralCounters;

/// Smallest order accepted by [`BPlusTree::new`].
pub const MIN_ORDER: usize = 3;

/// Ordered index over unique keys.
#[derive(Debug, Clone)]
pub struct BPlusTree<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<NodeId>,
    root: NodeId,
    max_keys: usize,
    compare: KeyCompare<K>,
    count: usize,
    height: usize,
    node_count: usize,
    events: StructuralCounters,
}

impl<K: Ord + Clone, V> BPlusTree<K, V> {
    /// Creates an empty tree of the given order using the key's natural ordering.
    pub fn new(order: usize) -> Result<Self> {
        Self::with_comparator(order, <K as Ord>::cmp)
    }

    /// Creates an empty tree holding at most `max_keys` keys per node.
    pub fn with_max_keys(max_keys: usize) -> Result<Self> {
        if max_keys < MIN_ORDER - 1 {
            return Err(DbError::invalid(format!(
                "max_keys must be at least {}, got {max_keys}",
                MIN_ORDER - 1
            )));
        }
        Self::new(max_keys + 1)
    }
}

impl<K: Clone, V> BPlusTree<K, V> {
    /// Creates an empty tree of the given order ordered by `compare`.
    pub fn with_comparator(order: usize, compare: KeyCompare<K>) -> Result<Self> {
        if order < MIN_ORDER {
            return Err(DbError::invalid(format!(
                "order must be at least {MIN_ORDER}, got {order}"
            )));
        }
        let max_keys = order - 1;
        let root = LeafNode::try_with_capacity(max_keys + 1)?;
        let mut nodes = Vec::new();
        nodes.try_reserve(1)?;
        nodes.push(Some(Node::Leaf(root)));
        Ok(Self {
            nodes,
            free: Vec::new(),
            root: NodeId(0),
            max_keys,
            compare,
            count: 0,
            height: 1,
            node_count: 1,
            events: StructuralCounters::default(),
        })
    }

    /// Maximum number of keys a node may hold.
    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Maximum number of children an internal node may hold.
    pub fn order(&self) -> usize {
        self.max_keys + 1
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` when the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Node levels from root to leaf.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// O(1) snapshot of the maintained counters.
    pub fn stats(&self) -> TreeStats {
        TreeStats {
            count: self.count,
            height: self.height,
            node_count: self.node_count,
            max_keys: self.max_keys,
            leaf_splits: self.events.leaf_splits,
            internal_splits: self.events.internal_splits,
            leaf_merges: self.events.leaf_merges,
            internal_merges: self.events.internal_merges,
            borrows: self.events.borrows,
        }
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &K) -> Result<&V> {
        let leaf = self.leaf(self.find_leaf(key)?)?;
        match leaf.search(key, self.compare) {
            Ok(pos) => leaf
                .values
                .get(pos)
                .ok_or_else(|| DbError::internal("leaf value missing for key")),
            Err(_) => Err(DbError::KeyNotFound),
        }
    }

    /// Returns `true` if `key` is indexed.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_ok()
    }

    /// Walks from the root to the leaf that owns `key`.
    fn find_leaf(&self, key: &K) -> Result<NodeId> {
        let mut current = self.root;
        for _ in 1..self.height {
            current = match self.node(current)? {
                Node::Internal(internal) => {
                    let slot = internal.child_slot(key, self.compare);
                    internal
                        .children
                        .get(slot)
                        .copied()
                        .ok_or_else(|| DbError::internal("child slot out of range"))?
                }
                Node::Leaf(_) => return Err(DbError::internal("leaf above leaf level")),
            };
        }
        match self.node(current)? {
            Node::Leaf(_) => Ok(current),
            Node::Internal(_) => Err(DbError::internal("internal node at leaf level")),
        }
    }

    /// Like [`Self::find_leaf`] but records `(internal node, child slot)` for
    /// every level above the leaf, root first.
    fn descend(&self, key: &K) -> Result<(Vec<(NodeId, usize)>, NodeId)> {
        let mut path = Vec::with_capacity(self.height);
        let mut current = self.root;
        loop {
            match self.node(current)? {
                Node::Leaf(_) => break,
                Node::Internal(internal) => {
                    if path.len() + 1 >= self.height {
                        return Err(DbError::internal("descent deeper than tree height"));
                    }
                    let slot = internal.child_slot(key, self.compare);
                    let child = internal
                        .children
                        .get(slot)
                        .copied()
                        .ok_or_else(|| DbError::internal("child slot out of range"))?;
                    path.push((current, slot));
                    current = child;
                }
            }
        }
        if path.len() + 1 != self.height {
            return Err(DbError::internal("leaf reached above leaf level"));
        }
        Ok((path, current))
    }

    /// Smallest key stored under `id`, or `None` for an empty leaf.
    fn min_key(&self, id: NodeId) -> Result<Option<K>> {
        let mut current = id;
        for _ in 0..self.height {
            match self.node(current)? {
                Node::Leaf(leaf) => return Ok(leaf.keys.first().cloned()),
                Node::Internal(internal) => {
                    current = *internal
                        .children
                        .first()
                        .ok_or_else(|| DbError::internal("internal node without children"))?;
                }
            }
        }
        Err(DbError::internal("leftmost path longer than tree height"))
    }

    /// Leftmost leaf, where in-order traversal starts.
    fn first_leaf(&self) -> Result<NodeId> {
        let mut current = self.root;
        for _ in 0..self.height {
            match self.node(current)? {
                Node::Leaf(_) => return Ok(current),
                Node::Internal(internal) => {
                    current = *internal
                        .children
                        .first()
                        .ok_or_else(|| DbError::internal("internal node without children"))?;
                }
            }
        }
        Err(DbError::internal("leftmost path longer than tree height"))
    }

    fn min_leaf_entries(&self) -> usize {
        self.max_keys.div_ceil(2)
    }

    fn min_children(&self) -> usize {
        self.order().div_ceil(2)
    }

    /// Minimum occupancy for a non-root node of the same kind as `node`.
    fn min_occupancy(&self, node: &Node<K, V>) -> usize {
        match node {
            Node::Leaf(_) => self.min_leaf_entries(),
            Node::Internal(_) => self.min_children(),
        }
    }

    // Arena plumbing.

    fn node(&self, id: NodeId) -> Result<&Node<K, V>> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| DbError::internal(format!("dangling node reference {}", id.0)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node<K, V>> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| DbError::internal(format!("dangling node reference {}", id.0)))
    }

    fn leaf(&self, id: NodeId) -> Result<&LeafNode<K, V>> {
        match self.node(id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(DbError::internal("expected leaf node")),
        }
    }

    fn leaf_mut(&mut self, id: NodeId) -> Result<&mut LeafNode<K, V>> {
        match self.node_mut(id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(DbError::internal("expected leaf node")),
        }
    }

    fn internal(&self, id: NodeId) -> Result<&InternalNode<K>> {
        match self.node(id)? {
            Node::Internal(internal) => Ok(internal),
            Node::Leaf(_) => Err(DbError::internal("expected internal node")),
        }
    }

    fn internal_mut(&mut self, id: NodeId) -> Result<&mut InternalNode<K>> {
        match self.node_mut(id)? {
            Node::Internal(internal) => Ok(internal),
            Node::Leaf(_) => Err(DbError::internal("expected internal node")),
        }
    }

    /// Places `node` in a free slot. Callers reserve arena capacity first.
    fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        self.node_count += 1;
        if let Some(id) = self.free.pop() {
            self.nodes[id.0] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    /// Moves a node out of its slot; pair with [`Self::restore`] or [`Self::release`].
    fn take(&mut self, id: NodeId) -> Result<Node<K, V>> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or_else(|| DbError::internal(format!("dangling node reference {}", id.0)))
    }

    fn restore(&mut self, id: NodeId, node: Node<K, V>) {
        self.nodes[id.0] = Some(node);
    }

    /// Returns a slot emptied by [`Self::take`] to the free list.
    fn release(&mut self, id: NodeId) {
        self.free.push(id);
        self.node_count -= 1;
    }
}
