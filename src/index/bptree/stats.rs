use serde::Serialize;

/// Point-in-time view of the tree's maintained counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    /// Live entries.
    pub count: usize,
    /// Node levels from root to leaf; a lone leaf root is height 1.
    pub height: usize,
    /// Live nodes, leaves and internal nodes together.
    pub node_count: usize,
    /// Maximum keys per node, fixed at creation.
    pub max_keys: usize,
    /// Leaf splits performed since creation.
    pub leaf_splits: u64,
    /// Internal node splits performed since creation.
    pub internal_splits: u64,
    /// Leaf merges performed since creation.
    pub leaf_merges: u64,
    /// Internal node merges performed since creation.
    pub internal_merges: u64,
    /// Entries or children moved between siblings to repair an underflow.
    pub borrows: u64,
}

/// Structural event counters kept by the tree.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StructuralCounters {
    pub(crate) leaf_splits: u64,
    pub(crate) internal_splits: u64,
    pub(crate) leaf_merges: u64,
    pub(crate) internal_merges: u64,
    pub(crate) borrows: u64,
}
