use std::cmp::Ordering;

use super::{BPlusTree, KeyCompare, LeafNode};
use crate::error::{DbError, Result};

/// Ascending iterator over entries, following the leaf chain.
///
/// The walk ends at a chain link that does not lead to a leaf; `validate`
/// reports such a link.
pub struct Range<'a, K, V> {
    tree: &'a BPlusTree<K, V>,
    leaf: Option<&'a LeafNode<K, V>>,
    pos: usize,
    high: Option<K>,
    compare: KeyCompare<K>,
}

impl<'a, K: Clone, V> Iterator for Range<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf = self.leaf?;
            if let (Some(key), Some(value)) = (leaf.keys.get(self.pos), leaf.values.get(self.pos)) {
                if let Some(high) = &self.high {
                    if (self.compare)(key, high) == Ordering::Greater {
                        self.leaf = None;
                        return None;
                    }
                }
                self.pos += 1;
                return Some((key, value));
            }
            self.leaf = leaf.next.and_then(|id| self.tree.leaf(id).ok());
            self.pos = 0;
        }
    }
}

impl<K: Clone, V> BPlusTree<K, V> {
    /// Iterates over every entry in ascending key order.
    pub fn iter(&self) -> Result<Range<'_, K, V>> {
        let leaf = self.leaf(self.first_leaf()?)?;
        Ok(Range {
            tree: self,
            leaf: Some(leaf),
            pos: 0,
            high: None,
            compare: self.compare,
        })
    }

    /// Iterates over entries with keys in `[low, high]`, ascending.
    ///
    /// Fails with [`DbError::InvalidArgument`] when `low > high`; a range
    /// holding no keys yields nothing.
    pub fn range(&self, low: &K, high: &K) -> Result<Range<'_, K, V>> {
        if (self.compare)(low, high) == Ordering::Greater {
            return Err(DbError::invalid("range low bound exceeds high bound"));
        }
        let leaf = self.leaf(self.find_leaf(low)?)?;
        Ok(Range {
            tree: self,
            leaf: Some(leaf),
            pos: leaf.lower_bound(low, self.compare),
            high: Some(high.clone()),
            compare: self.compare,
        })
    }

    /// Collects the entries in `[low, high]` into a list detached from the tree.
    ///
    /// Unlike [`Range`], a leaf chain link that does not lead to a leaf is
    /// reported as [`DbError::InternalError`] instead of ending the walk.
    pub fn get_range(&self, low: &K, high: &K) -> Result<Vec<(K, V)>>
    where
        V: Clone,
    {
        if (self.compare)(low, high) == Ordering::Greater {
            return Err(DbError::invalid("range low bound exceeds high bound"));
        }
        let mut hits = Vec::new();
        let mut leaf = self.leaf(self.find_leaf(low)?)?;
        let mut pos = leaf.lower_bound(low, self.compare);
        loop {
            let entries = leaf.keys.iter().zip(&leaf.values).skip(pos);
            for (key, value) in entries {
                if (self.compare)(key, high) == Ordering::Greater {
                    return Ok(hits);
                }
                hits.try_reserve(1)?;
                hits.push((key.clone(), value.clone()));
            }
            match leaf.next {
                Some(next) => {
                    leaf = self.leaf(next)?;
                    pos = 0;
                }
                None => return Ok(hits),
            }
        }
    }
}
