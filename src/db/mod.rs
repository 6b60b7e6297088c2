//! The engine session: configuration plus the row store and index it owns.

mod config;
mod engine;

pub use config::{default_config_path, Config, DuplicatePolicy};
pub use engine::{Engine, EngineStats, IndexSource, IngestSummary, VerifyReport};
