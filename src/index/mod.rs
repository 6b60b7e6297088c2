//! Ordered index structures and their on-disk snapshot format.

pub mod bptree;
pub mod snapshot;

pub use bptree::{BPlusTree, KeyCompare, Range, TreeStats};
pub use snapshot::{FixedWidth, Snapshot};
