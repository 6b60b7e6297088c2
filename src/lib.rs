//! Pagedex: a small embedded storage engine.
//!
//! Rows are appended to a flat file of fixed-size records and found again
//! through an in-memory B+ tree that maps each row id to the row's
//! [`Location`] (page id and byte offset). The tree can be persisted as a
//! checksummed snapshot or rebuilt by replaying the row file.
//!
//! ```no_run
//! use pagedex::{Config, Engine, Row};
//!
//! # fn main() -> pagedex::Result<()> {
//! let mut engine = Engine::open(Config::in_dir("data"))?;
//! engine.insert(Row::new(1, "Alice", "Austin")?)?;
//! assert_eq!(engine.get(1)?.name, "Alice");
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cli;
pub mod db;
pub mod error;
pub mod index;
pub mod logging;
pub mod storage;

pub use db::{Config, DuplicatePolicy, Engine, EngineStats, IngestSummary, VerifyReport};
pub use error::{DbError, Result};
pub use index::{BPlusTree, TreeStats};
pub use storage::{Location, Row, RowRecord, RowStore, PAGE_SIZE};
