use std::fs;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::{Config, DuplicatePolicy};
use crate::cli::CsvSource;
use crate::error::{DbError, Result};
use crate::index::{snapshot, BPlusTree, TreeStats};
use crate::storage::{Location, Row, RowRecord, RowStore};

const MAX_FINDINGS: usize = 32;

/// Where the in-memory index came from when the engine opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexSource {
    /// Loaded from a snapshot matching the row store.
    Snapshot,
    /// Rebuilt by replaying the row store.
    Scan,
}

/// Outcome of a bulk ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Rows parsed from the source.
    pub rows_read: u64,
    /// Rows appended and indexed.
    pub inserted: u64,
    /// Rows skipped because their id was already indexed.
    pub duplicates: u64,
}

/// Snapshot of index and row store sizes.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Counters maintained by the tree.
    pub index: TreeStats,
    /// How the index was obtained at open or last rebuild.
    pub index_source: IndexSource,
    /// Row store size in bytes.
    pub row_store_bytes: u64,
    /// Records in the row store, including superseded versions and tombstones.
    pub row_records: u64,
}

/// Result of [`Engine::verify`].
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    /// `true` when no findings were recorded.
    pub success: bool,
    /// Index entries whose row was read back.
    pub entries_checked: u64,
    /// Problems found, capped at a fixed number.
    pub findings: Vec<String>,
}

impl VerifyReport {
    fn push(&mut self, finding: String) {
        self.success = false;
        if self.findings.len() < MAX_FINDINGS {
            self.findings.push(finding);
        }
    }
}

/// One open data directory: the row store and the index over it.
///
/// Every mutation goes through here so the row file and the index stay in
/// step. Single-threaded; callers serialize access.
#[derive(Debug)]
pub struct Engine {
    config: Config,
    rows: RowStore,
    index: BPlusTree<i64, Location>,
    index_source: IndexSource,
}

impl Engine {
    /// Opens or creates the data directory described by `config`.
    ///
    /// The snapshot is used when it was taken at the current row store length
    /// with the configured `max_keys`; otherwise the index is rebuilt by scan.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let rows = RowStore::open(&config.row_path())?;
        let snapshot_path = config.snapshot_path();

        let loaded = match snapshot::load::<i64, Location>(&snapshot_path) {
            Ok(Some(snap)) if snap.row_store_len != rows.len_bytes() => {
                warn!(
                    snapshot_len = snap.row_store_len,
                    row_store_len = rows.len_bytes(),
                    "engine.open.snapshot_stale"
                );
                None
            }
            Ok(Some(snap)) if snap.tree.max_keys() != config.max_keys => {
                debug!(
                    snapshot_max_keys = snap.tree.max_keys(),
                    max_keys = config.max_keys,
                    "engine.open.snapshot_reshaped"
                );
                None
            }
            Ok(snap) => snap.map(|snap| snap.tree),
            Err(DbError::Corruption(reason)) => {
                warn!(path = %snapshot_path.display(), %reason, "engine.open.snapshot_corrupt");
                None
            }
            Err(err) => return Err(err),
        };

        let (index, index_source) = match loaded {
            Some(tree) => (tree, IndexSource::Snapshot),
            None => (build_from_scan(&rows, config.max_keys)?, IndexSource::Scan),
        };
        info!(
            data_dir = %config.data_dir.display(),
            entries = index.len(),
            source = ?index_source,
            "engine.open"
        );
        Ok(Self {
            config,
            rows,
            index,
            index_source,
        })
    }

    /// Configuration the engine was opened with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Read-only view of the index.
    pub fn index(&self) -> &BPlusTree<i64, Location> {
        &self.index
    }

    /// Appends `row` and indexes it. A row whose id is already indexed is
    /// rejected with `DuplicateKey` before anything is written.
    pub fn insert(&mut self, row: Row) -> Result<Location> {
        let location = self.append_indexed(row)?;
        self.maybe_sync()?;
        Ok(location)
    }

    /// Inserts every row of `rows`, applying `policy` to duplicate ids.
    ///
    /// Stops at the first parse or storage error; rows before it stay inserted.
    pub fn ingest<I>(&mut self, rows: I, policy: DuplicatePolicy) -> Result<IngestSummary>
    where
        I: IntoIterator<Item = Result<Row>>,
    {
        let mut summary = IngestSummary::default();
        for row in rows {
            let row = row?;
            summary.rows_read += 1;
            let id = row.id;
            match self.append_indexed(row) {
                Ok(_) => summary.inserted += 1,
                Err(DbError::DuplicateKey) if policy == DuplicatePolicy::Skip => {
                    debug!(id, "engine.ingest.duplicate_skipped");
                    summary.duplicates += 1;
                }
                Err(err) => {
                    self.maybe_sync()?;
                    return Err(err);
                }
            }
        }
        self.maybe_sync()?;
        info!(
            rows_read = summary.rows_read,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "engine.ingest.complete"
        );
        Ok(summary)
    }

    /// Ingests a CSV file using the configured duplicate policy.
    pub fn ingest_csv(&mut self, source: &CsvSource) -> Result<IngestSummary> {
        let policy = self.config.on_duplicate;
        self.ingest(source.rows()?, policy)
    }

    /// Where the current version of `id` is stored.
    pub fn locate(&self, id: i64) -> Result<Location> {
        self.index.get(&id).copied()
    }

    /// Reads the current version of `id`.
    pub fn get(&mut self, id: i64) -> Result<Row> {
        let location = self.locate(id)?;
        self.read_live(id, location)
    }

    /// Rows with ids in `[low, high]`, ascending.
    pub fn range(&mut self, low: i64, high: i64) -> Result<Vec<Row>> {
        let hits = self.index.get_range(&low, &high)?;
        let mut rows = Vec::new();
        rows.try_reserve_exact(hits.len())?;
        for (id, location) in hits {
            rows.push(self.read_live(id, location)?);
        }
        Ok(rows)
    }

    /// Removes `id` and returns the row it held.
    pub fn remove(&mut self, id: i64) -> Result<Row> {
        let row = self.get(id)?;
        self.rows.append(&RowRecord::Tombstone(id))?;
        self.index.remove(&id)?;
        self.maybe_sync()?;
        debug!(id, "engine.remove");
        Ok(row)
    }

    /// Replaces the row stored under `row.id`; `KeyNotFound` if there is none.
    ///
    /// The index entry is rebound to the new version's location before the
    /// append; if either step fails, the entry points at the old version again.
    pub fn update(&mut self, row: Row) -> Result<Location> {
        let id = row.id;
        let previous = self.locate(id)?;
        let location = self.rows.next_location()?;
        if let Err(err) = self.rebind(id, location) {
            self.restore(id, previous);
            return Err(err);
        }
        if let Err(err) = self.rows.append(&RowRecord::Live(row)) {
            self.restore(id, previous);
            return Err(err);
        }
        self.maybe_sync()?;
        debug!(id, %location, "engine.update");
        Ok(location)
    }

    /// Index and row store figures for diagnostics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            index: self.index.stats(),
            index_source: self.index_source,
            row_store_bytes: self.rows.len_bytes(),
            row_records: self.rows.record_count(),
        }
    }

    /// Checks the index invariants, that every indexed location holds a live
    /// record for its id, and that replaying the row store yields the same
    /// entries as the index.
    pub fn verify(&mut self) -> Result<VerifyReport> {
        let mut report = VerifyReport {
            success: true,
            entries_checked: 0,
            findings: Vec::new(),
        };
        if let Err(err) = self.index.validate() {
            report.push(format!("index invariant violated: {err}"));
        }

        for (&id, &location) in self.index.iter()? {
            report.entries_checked += 1;
            match self.rows.read(location) {
                Ok(RowRecord::Live(row)) if row.id == id => {}
                Ok(RowRecord::Live(row)) => report.push(format!(
                    "id {id} points at {location}, which holds id {}",
                    row.id
                )),
                Ok(RowRecord::Tombstone(_)) => {
                    report.push(format!("id {id} points at a tombstone at {location}"))
                }
                Err(err) => report.push(format!("id {id} at {location}: {err}")),
            }
        }

        match build_from_scan(&self.rows, self.index.max_keys()) {
            Ok(replayed) => {
                let expected = replayed.iter()?;
                let actual = self.index.iter()?;
                if !expected.eq(actual) {
                    report.push("index differs from a replay of the row store".to_string());
                }
            }
            Err(err) => report.push(format!("row store replay failed: {err}")),
        }

        info!(
            success = report.success,
            entries = report.entries_checked,
            findings = report.findings.len(),
            "engine.verify"
        );
        Ok(report)
    }

    /// Discards the index and rebuilds it from the row store with the
    /// configured `max_keys`. Returns the number of indexed rows.
    pub fn rebuild_index(&mut self) -> Result<usize> {
        self.index = build_from_scan(&self.rows, self.config.max_keys)?;
        self.index_source = IndexSource::Scan;
        info!(entries = self.index.len(), "engine.rebuild");
        Ok(self.index.len())
    }

    /// Syncs the row store and writes the index snapshot.
    pub fn save_snapshot(&mut self) -> Result<()> {
        self.rows.sync()?;
        snapshot::save(
            &self.config.snapshot_path(),
            &self.index,
            self.rows.len_bytes(),
        )?;
        info!(entries = self.index.len(), "engine.snapshot.saved");
        Ok(())
    }

    /// Syncs the row store and, if configured, writes the snapshot.
    pub fn close(mut self) -> Result<()> {
        if self.config.snapshot_on_close {
            self.save_snapshot()
        } else {
            self.rows.sync()
        }
    }

    /// Indexes `row` at the next row store location, then appends it. A
    /// failed put writes nothing; a failed append takes the entry back out.
    fn append_indexed(&mut self, row: Row) -> Result<Location> {
        let id = row.id;
        let location = self.rows.next_location()?;
        self.index.put(id, location)?;
        if let Err(err) = self.rows.append(&RowRecord::Live(row)) {
            if let Err(undo) = self.index.remove(&id) {
                warn!(id, error = %undo, "engine.insert.rollback_failed");
            }
            return Err(err);
        }
        Ok(location)
    }

    fn rebind(&mut self, id: i64, location: Location) -> Result<()> {
        match self.index.remove(&id) {
            Ok(_) | Err(DbError::KeyNotFound) => {}
            Err(err) => return Err(err),
        }
        self.index.put(id, location)
    }

    fn restore(&mut self, id: i64, previous: Location) {
        if let Err(err) = self.rebind(id, previous) {
            warn!(id, location = %previous, error = %err, "engine.update.rollback_failed");
        }
    }

    fn read_live(&mut self, id: i64, location: Location) -> Result<Row> {
        match self.rows.read(location)? {
            RowRecord::Live(row) if row.id == id => Ok(row),
            RowRecord::Live(row) => Err(DbError::corruption(format!(
                "index maps id {id} to {location}, which holds id {}",
                row.id
            ))),
            RowRecord::Tombstone(_) => Err(DbError::corruption(format!(
                "index maps id {id} to a tombstone at {location}"
            ))),
        }
    }

    fn maybe_sync(&mut self) -> Result<()> {
        if self.config.sync_on_append {
            self.rows.sync()?;
        }
        Ok(())
    }
}

/// Replays the row store in file order: a live record (re)binds its id to
/// its location, a tombstone unbinds it.
fn build_from_scan(rows: &RowStore, max_keys: usize) -> Result<BPlusTree<i64, Location>> {
    let mut tree = BPlusTree::with_max_keys(max_keys)?;
    for entry in rows.scan()? {
        let (location, record) = entry?;
        match tree.remove(&record.id()) {
            Ok(_) | Err(DbError::KeyNotFound) => {}
            Err(err) => return Err(err),
        }
        if let RowRecord::Live(row) = record {
            tree.put(row.id, location)?;
        }
    }
    debug!(
        records = rows.record_count(),
        entries = tree.len(),
        "engine.index.rebuilt_from_scan"
    );
    Ok(tree)
}
