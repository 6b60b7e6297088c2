use std::cmp::Ordering;

use super::{BPlusTree, Node, NodeId};
use crate::error::{DbError, Result};

/// Key bounds a subtree must respect: `lower <= key < upper`.
struct Bounds<'a, K> {
    lower: Option<&'a K>,
    upper: Option<&'a K>,
}

struct Walk {
    visited: Vec<bool>,
    leaves: Vec<NodeId>,
    entries: usize,
}

impl<K: Clone, V> BPlusTree<K, V> {
    /// Returns `true` when every structural invariant holds.
    ///
    /// Diagnostic only; walks the whole tree.
    pub fn check_invariants(&self) -> bool {
        self.validate().is_ok()
    }

    /// Checks every structural invariant and reports the first violation as
    /// [`DbError::InternalError`]:
    /// occupancy bounds (root exempt from the minimum), strictly ascending
    /// keys, exact separators bounding their subtrees, uniform leaf depth,
    /// an acyclic leaf chain visiting every leaf in order, and counters
    /// matching the nodes and entries actually reachable.
    pub fn validate(&self) -> Result<()> {
        let mut walk = Walk {
            visited: vec![false; self.nodes.len()],
            leaves: Vec::new(),
            entries: 0,
        };
        let unbounded = Bounds {
            lower: None,
            upper: None,
        };
        self.check_node(self.root, 1, &unbounded, &mut walk)?;

        if walk.entries != self.count {
            return Err(DbError::internal(format!(
                "count is {} but leaves hold {} entries",
                self.count, walk.entries
            )));
        }
        let reachable = walk.visited.iter().filter(|seen| **seen).count();
        if reachable != self.node_count {
            return Err(DbError::internal(format!(
                "node_count is {} but {reachable} nodes are reachable",
                self.node_count
            )));
        }
        let live = self.nodes.iter().filter(|slot| slot.is_some()).count();
        if live != reachable {
            return Err(DbError::internal(format!(
                "{live} live arena slots but {reachable} reachable nodes"
            )));
        }
        self.check_leaf_chain(&walk.leaves)
    }

    /// Validates the subtree rooted at `id` and returns its smallest key.
    fn check_node(
        &self,
        id: NodeId,
        depth: usize,
        bounds: &Bounds<'_, K>,
        walk: &mut Walk,
    ) -> Result<Option<K>> {
        match walk.visited.get_mut(id.0) {
            Some(seen) if !*seen => *seen = true,
            Some(_) => {
                return Err(DbError::internal(format!(
                    "node {} reachable more than once",
                    id.0
                )))
            }
            None => return Err(DbError::internal(format!("node {} out of arena", id.0))),
        }
        let is_root = id == self.root;
        let node = self.node(id)?;

        match node {
            Node::Leaf(leaf) => {
                if depth != self.height {
                    return Err(DbError::internal(format!(
                        "leaf {} at depth {depth}, tree height {}",
                        id.0, self.height
                    )));
                }
                if leaf.keys.len() != leaf.values.len() {
                    return Err(DbError::internal(format!(
                        "leaf {} has {} keys but {} values",
                        id.0,
                        leaf.keys.len(),
                        leaf.values.len()
                    )));
                }
                self.check_occupancy(id, node, is_root)?;
                self.check_sorted(id, &leaf.keys)?;
                for key in &leaf.keys {
                    self.check_bounds(id, key, bounds)?;
                }
                walk.leaves.push(id);
                walk.entries += leaf.keys.len();
                Ok(leaf.keys.first().cloned())
            }
            Node::Internal(internal) => {
                if depth >= self.height {
                    return Err(DbError::internal(format!(
                        "internal node {} at depth {depth}, tree height {}",
                        id.0, self.height
                    )));
                }
                if internal.children.len() != internal.keys.len() + 1 {
                    return Err(DbError::internal(format!(
                        "internal node {} has {} keys but {} children",
                        id.0,
                        internal.keys.len(),
                        internal.children.len()
                    )));
                }
                self.check_occupancy(id, node, is_root)?;
                self.check_sorted(id, &internal.keys)?;
                for key in &internal.keys {
                    self.check_bounds(id, key, bounds)?;
                }

                let mut subtree_min = None;
                for (slot, &child) in internal.children.iter().enumerate() {
                    let child_bounds = Bounds {
                        lower: if slot == 0 {
                            bounds.lower
                        } else {
                            internal.keys.get(slot - 1)
                        },
                        upper: internal.keys.get(slot).or(bounds.upper),
                    };
                    let child_min = self.check_node(child, depth + 1, &child_bounds, walk)?;
                    if slot == 0 {
                        subtree_min = child_min;
                        continue;
                    }
                    let separator = &internal.keys[slot - 1];
                    let exact = child_min
                        .as_ref()
                        .is_some_and(|min| (self.compare)(min, separator) == Ordering::Equal);
                    if !exact {
                        return Err(DbError::internal(format!(
                            "separator {} of node {} is not the smallest key of its right subtree",
                            slot - 1,
                            id.0
                        )));
                    }
                }
                Ok(subtree_min)
            }
        }
    }

    fn check_occupancy(&self, id: NodeId, node: &Node<K, V>, is_root: bool) -> Result<()> {
        let occupancy = node.occupancy();
        let (max, kind) = match node {
            Node::Leaf(_) => (self.max_keys, "leaf"),
            Node::Internal(_) => (self.order(), "internal node"),
        };
        if occupancy > max {
            return Err(DbError::internal(format!(
                "{kind} {} holds {occupancy}, above maximum {max}",
                id.0
            )));
        }
        let min = match (is_root, node) {
            (true, Node::Leaf(_)) => 0,
            (true, Node::Internal(_)) => 2,
            (false, _) => self.min_occupancy(node),
        };
        if occupancy < min {
            return Err(DbError::internal(format!(
                "{kind} {} holds {occupancy}, below minimum {min}",
                id.0
            )));
        }
        Ok(())
    }

    fn check_sorted(&self, id: NodeId, keys: &[K]) -> Result<()> {
        let ascending = keys
            .windows(2)
            .all(|pair| (self.compare)(&pair[0], &pair[1]) == Ordering::Less);
        if ascending {
            Ok(())
        } else {
            Err(DbError::internal(format!(
                "keys of node {} are not strictly ascending",
                id.0
            )))
        }
    }

    fn check_bounds(&self, id: NodeId, key: &K, bounds: &Bounds<'_, K>) -> Result<()> {
        let above_lower = bounds
            .lower
            .map_or(true, |lower| (self.compare)(key, lower) != Ordering::Less);
        let below_upper = bounds
            .upper
            .map_or(true, |upper| (self.compare)(key, upper) == Ordering::Less);
        if above_lower && below_upper {
            Ok(())
        } else {
            Err(DbError::internal(format!(
                "node {} holds a key outside its parent's separators",
                id.0
            )))
        }
    }

    /// The chain from the leftmost leaf must visit exactly `leaves`, in order,
    /// and end there.
    fn check_leaf_chain(&self, leaves: &[NodeId]) -> Result<()> {
        let mut current = Some(self.first_leaf()?);
        for (position, &expected) in leaves.iter().enumerate() {
            match current {
                Some(id) if id == expected => current = self.leaf(id)?.next,
                Some(id) => {
                    return Err(DbError::internal(format!(
                        "leaf chain reaches node {} where leaf #{position} is node {}",
                        id.0, expected.0
                    )))
                }
                None => {
                    return Err(DbError::internal(format!(
                        "leaf chain ends after {position} of {} leaves",
                        leaves.len()
                    )))
                }
            }
        }
        match current {
            None => Ok(()),
            Some(id) => Err(DbError::internal(format!(
                "leaf chain continues past the last leaf into node {}",
                id.0
            ))),
        }
    }
}
