use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DbError, Result};
use crate::index::bptree::MIN_ORDER;

/// What ingestion does with a row whose id is already indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Count the row as a duplicate and keep going.
    #[default]
    Skip,
    /// Stop the ingestion with `DuplicateKey`.
    Fail,
}

/// Engine settings, loadable from a TOML file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the row file and the snapshot.
    pub data_dir: PathBuf,
    /// Row store file name, relative to `data_dir`.
    pub row_file: String,
    /// Snapshot file name, relative to `data_dir`.
    pub snapshot_file: String,
    /// `max_keys` for an index built from scratch.
    pub max_keys: usize,
    /// Duplicate handling for ingestion.
    pub on_duplicate: DuplicatePolicy,
    /// Write a snapshot when the engine closes.
    pub snapshot_on_close: bool,
    /// Fsync the row file after every write batch.
    pub sync_on_append: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            row_file: "rows.bin".to_string(),
            snapshot_file: "index.snap".to_string(),
            max_keys: 64,
            on_duplicate: DuplicatePolicy::Skip,
            snapshot_on_close: true,
            sync_on_append: false,
        }
    }
}

impl Config {
    /// Settings rooted at `data_dir`, defaults otherwise.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Small nodes and no snapshot on close; handy for exercising splits.
    pub fn testing(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_keys: 4,
            snapshot_on_close: false,
            ..Self::default()
        }
    }

    /// Reads a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|source| {
            DbError::Config(format!("failed to read config {}: {source}", path.display()))
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| {
            DbError::Config(format!("failed to parse config {}: {source}", path.display()))
        })?;
        config.validate()?;
        debug!(path = %path.display(), "config.loaded");
        Ok(config)
    }

    /// Loads `explicit` if given, else the per-user config file if one
    /// exists, else the defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Rejects settings the engine cannot open with.
    pub fn validate(&self) -> Result<()> {
        if self.max_keys < MIN_ORDER - 1 {
            return Err(DbError::Config(format!(
                "max_keys must be at least {}, got {}",
                MIN_ORDER - 1,
                self.max_keys
            )));
        }
        if self.row_file.is_empty() || self.snapshot_file.is_empty() {
            return Err(DbError::Config("file names must not be empty".into()));
        }
        if self.row_file == self.snapshot_file {
            return Err(DbError::Config(
                "row_file and snapshot_file must differ".into(),
            ));
        }
        Ok(())
    }

    /// Full path of the row store file.
    pub fn row_path(&self) -> PathBuf {
        self.data_dir.join(&self.row_file)
    }

    /// Full path of the index snapshot file.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(&self.snapshot_file)
    }
}

/// `<config dir>/pagedex/config.toml` for the current user.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("pagedex").join("config.toml"))
}
