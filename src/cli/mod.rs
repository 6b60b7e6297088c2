#![forbid(unsafe_code)]

//! Command-line side of the engine: reading rows from CSV sources.

/// CSV row sources for bulk ingestion.
pub mod import;

pub use import::{read_rows, CsvColumns, CsvRows, CsvSource};
