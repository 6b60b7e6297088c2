#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use pagedex::cli::CsvSource;
use pagedex::db::IndexSource;
use pagedex::{Config, DbError, DuplicatePolicy, Engine, Location, Row, PAGE_SIZE};
use tempfile::TempDir;

const PEOPLE_CSV: &str = "\
id,name,location
1,Alice,Austin
2,Bob,Boston
3,Charlie,Chicago
6,Frank,Fresno
7,Grace,Glasgow
8,Heidi,Helsinki
9,Ivan,Irvine
4,David,Denver
5,Eve,Edinburgh
";

fn write_csv(dir: &Path, name: &str, contents: &str) -> CsvSource {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write csv");
    CsvSource::new(path)
}

fn open(dir: &TempDir) -> Engine {
    Engine::open(Config::testing(dir.path().join("data"))).expect("open engine")
}

#[test]
fn ingest_then_query_points_and_ranges() {
    let dir = TempDir::new().unwrap();
    let mut engine = open(&dir);
    let source = write_csv(dir.path(), "people.csv", PEOPLE_CSV);

    let summary = engine.ingest_csv(&source).unwrap();
    assert_eq!(
        (summary.rows_read, summary.inserted, summary.duplicates),
        (9, 9, 0)
    );

    let stats = engine.stats();
    assert_eq!(stats.index.count, 9);
    assert_eq!(stats.index.max_keys, 4);
    assert!(stats.index.height > 1);
    assert_eq!(stats.row_records, 9);

    let charlie = engine.get(3).unwrap();
    assert_eq!(charlie, Row::new(3, "Charlie", "Chicago").unwrap());
    // Third row appended, 64-byte records.
    assert_eq!(engine.locate(3).unwrap(), Location::new(0, 128));

    let names: Vec<String> = engine
        .range(4, 7)
        .unwrap()
        .into_iter()
        .map(|row| row.name)
        .collect();
    assert_eq!(names, vec!["David", "Eve", "Frank", "Grace"]);
    assert!(engine.range(20, 30).unwrap().is_empty());
    assert!(matches!(engine.range(7, 4), Err(DbError::InvalidArgument(_))));
    assert!(engine.verify().unwrap().success);
}

#[test]
fn remove_update_and_duplicate_rules() {
    let dir = TempDir::new().unwrap();
    let mut engine = open(&dir);
    engine
        .ingest_csv(&write_csv(dir.path(), "people.csv", PEOPLE_CSV))
        .unwrap();

    let bob = engine.remove(2).unwrap();
    assert_eq!(bob.name, "Bob");
    assert!(matches!(engine.get(2), Err(DbError::KeyNotFound)));
    assert!(matches!(engine.remove(2), Err(DbError::KeyNotFound)));
    assert_eq!(engine.stats().index.count, 8);

    let location = engine
        .update(Row::new(3, "Charlie Updated", "Chicago").unwrap())
        .unwrap();
    assert_eq!(engine.locate(3).unwrap(), location);
    assert_eq!(engine.get(3).unwrap().name, "Charlie Updated");
    assert_eq!(engine.stats().index.count, 8);
    assert!(matches!(
        engine.update(Row::new(2, "Ghost", "Nowhere").unwrap()),
        Err(DbError::KeyNotFound)
    ));

    let records_before = engine.stats().row_records;
    let err = engine
        .insert(Row::new(3, "Charlie Duplicate", "Chicago").unwrap())
        .unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey));
    assert_eq!(engine.stats().row_records, records_before);
    assert_eq!(engine.get(3).unwrap().name, "Charlie Updated");
    assert!(engine.verify().unwrap().success);
}

#[test]
fn ingest_duplicate_policies() {
    let dir = TempDir::new().unwrap();
    let mut engine = open(&dir);
    let source = write_csv(
        dir.path(),
        "dupes.csv",
        "id,name,location\n1,Alice,Austin\n1,Alice Again,Austin\n2,Bob,Boston\n",
    );

    let summary = engine.ingest_csv(&source).unwrap();
    assert_eq!(
        (summary.rows_read, summary.inserted, summary.duplicates),
        (3, 2, 1)
    );
    assert_eq!(engine.get(1).unwrap().name, "Alice");

    let rows = vec![
        Ok(Row::new(5, "Eve", "Edinburgh").unwrap()),
        Ok(Row::new(2, "Bob", "Boston").unwrap()),
    ];
    let err = engine.ingest(rows, DuplicatePolicy::Fail).unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey));
    // Rows before the failure stay.
    assert_eq!(engine.get(5).unwrap().name, "Eve");
}

#[test]
fn snapshot_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        snapshot_on_close: true,
        ..Config::testing(dir.path().join("data"))
    };
    let mut engine = Engine::open(config.clone()).unwrap();
    engine
        .ingest_csv(&write_csv(dir.path(), "people.csv", PEOPLE_CSV))
        .unwrap();
    engine.remove(8).unwrap();
    let before: Vec<(i64, Location)> = engine
        .index()
        .iter()
        .unwrap()
        .map(|(k, v)| (*k, *v))
        .collect();
    engine.close().unwrap();
    assert!(config.snapshot_path().exists());

    let mut engine = Engine::open(config).unwrap();
    assert_eq!(engine.stats().index_source, IndexSource::Snapshot);
    let after: Vec<(i64, Location)> = engine
        .index()
        .iter()
        .unwrap()
        .map(|(k, v)| (*k, *v))
        .collect();
    assert_eq!(before, after);
    assert_eq!(engine.range(1, 9).unwrap().len(), 8);
    assert!(matches!(engine.get(8), Err(DbError::KeyNotFound)));
}

#[test]
fn reopen_without_snapshot_rebuilds_by_scan() {
    let dir = TempDir::new().unwrap();
    {
        let mut engine = open(&dir);
        engine
            .ingest_csv(&write_csv(dir.path(), "people.csv", PEOPLE_CSV))
            .unwrap();
        engine.remove(1).unwrap();
        engine
            .update(Row::new(9, "Ivan Updated", "Irvine").unwrap())
            .unwrap();
        engine.close().unwrap();
    }
    let mut engine = open(&dir);
    assert_eq!(engine.stats().index_source, IndexSource::Scan);
    assert_eq!(engine.stats().index.count, 8);
    assert!(matches!(engine.get(1), Err(DbError::KeyNotFound)));
    assert_eq!(engine.get(9).unwrap().name, "Ivan Updated");
    assert!(engine.verify().unwrap().success);
}

#[test]
fn locations_cross_page_boundaries() {
    let dir = TempDir::new().unwrap();
    let mut engine = open(&dir);
    let per_page = (PAGE_SIZE / 64) as i64;
    for id in 0..per_page * 3 {
        engine
            .insert(Row::new(id, format!("row{id}"), "here").unwrap())
            .unwrap();
    }
    assert_eq!(engine.locate(per_page).unwrap(), Location::new(1, 0));
    assert_eq!(engine.locate(per_page * 2 + 1).unwrap(), Location::new(2, 64));
    assert_eq!(
        engine.get(per_page * 2 + 1).unwrap().name,
        format!("row{}", per_page * 2 + 1)
    );
    let window = engine.range(per_page - 2, per_page + 1).unwrap();
    assert_eq!(window.len(), 4);
}

#[test]
fn truncated_row_file_is_reported_as_corruption() {
    let dir = TempDir::new().unwrap();
    let config = Config::testing(dir.path().join("data"));
    {
        let mut engine = Engine::open(config.clone()).unwrap();
        engine.insert(Row::new(1, "Alice", "Austin").unwrap()).unwrap();
        engine.close().unwrap();
    }
    let file = fs::OpenOptions::new()
        .append(true)
        .open(config.row_path())
        .unwrap();
    file.set_len(70).unwrap();
    let err = Engine::open(config).unwrap_err();
    assert_eq!(err.status(), "CORRUPTION");
}
