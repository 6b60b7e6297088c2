#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn setup() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let csv = dir.path().join("people.csv");
    fs::write(
        &csv,
        "id,name,location\n1,Alice,Austin\n2,Bob,Boston\n3,Charlie,Chicago\n4,David,Denver\n5,Eve,Edinburgh\n",
    )
    .expect("write csv");
    (dir, csv)
}

fn pagedex(data_dir: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = cargo_bin_cmd!("pagedex");
    cmd.env_remove("PAGEDEX_CONFIG")
        .env_remove("RUST_LOG")
        .env("XDG_CONFIG_HOME", data_dir)
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--max-keys")
        .arg("3")
        .args(args);
    cmd.assert()
}

fn json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("valid json output")
}

#[test]
fn import_get_range_in_json() {
    let (dir, csv) = setup();
    let data = dir.path().join("data");

    let out = pagedex(&data, &["--format", "json", "import", csv.to_str().unwrap()])
        .success()
        .get_output()
        .stdout
        .clone();
    let summary = json(&out);
    assert_eq!(summary["rows_read"], 5);
    assert_eq!(summary["inserted"], 5);
    assert_eq!(summary["duplicates"], 0);

    let out = pagedex(&data, &["--format", "json", "get", "3"])
        .success()
        .get_output()
        .stdout
        .clone();
    let row = json(&out);
    assert_eq!(row["name"], "Charlie");
    assert_eq!(row["location"], "Chicago");

    let out = pagedex(&data, &["--format", "json", "range", "2", "4"])
        .success()
        .get_output()
        .stdout
        .clone();
    let rows = json(&out);
    let ids: Vec<i64> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 3, 4]);
}

#[test]
fn text_output_and_mutations() {
    let (dir, csv) = setup();
    let data = dir.path().join("data");
    pagedex(&data, &["import", csv.to_str().unwrap()]).success();

    let out = pagedex(&data, &["get", "2"]).success().get_output().stdout.clone();
    assert_eq!(String::from_utf8(out).unwrap(), "2\tBob\tBoston\n");

    pagedex(&data, &["remove", "2"]).success();
    pagedex(&data, &["update", "3", "Charlie Updated", "Chicago"]).success();
    pagedex(&data, &["insert", "-7", "Negative", "Nowhere"]).success();

    let out = pagedex(&data, &["range", "-10", "3"])
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("-7\tNegative\tNowhere"), "{text}");
    assert!(text.contains("3\tCharlie Updated\tChicago"), "{text}");
    assert!(!text.contains("Bob"), "{text}");
    assert!(text.contains("(3 rows)"), "{text}");
}

#[test]
fn errors_report_status_and_exit_one() {
    let (dir, csv) = setup();
    let data = dir.path().join("data");
    pagedex(&data, &["import", csv.to_str().unwrap()]).success();

    let out = pagedex(&data, &["get", "42"]).code(1).get_output().stderr.clone();
    let stderr = String::from_utf8(out).unwrap();
    assert!(stderr.starts_with("error: KEY_NOT_FOUND"), "{stderr}");

    let out = pagedex(&data, &["insert", "1", "Alice", "Austin"])
        .code(1)
        .get_output()
        .stderr
        .clone();
    assert!(String::from_utf8(out).unwrap().contains("DUPLICATE_KEY"));

    let out = pagedex(&data, &["range", "5", "1"]).code(1).get_output().stderr.clone();
    assert!(String::from_utf8(out).unwrap().contains("INVALID_ARGUMENT"));
}

#[test]
fn import_fail_policy_stops_on_duplicates() {
    let (dir, csv) = setup();
    let data = dir.path().join("data");
    pagedex(&data, &["import", csv.to_str().unwrap()]).success();

    let out = pagedex(&data, &["--format", "json", "import", csv.to_str().unwrap()])
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json(&out)["duplicates"], 5);

    pagedex(
        &data,
        &["import", csv.to_str().unwrap(), "--on-duplicate", "fail"],
    )
    .code(1);
}

#[test]
fn stats_verify_snapshot_and_rebuild() {
    let (dir, csv) = setup();
    let data = dir.path().join("data");
    pagedex(&data, &["import", csv.to_str().unwrap()]).success();
    assert!(data.join("index.snap").exists());
    assert!(data.join("rows.bin").exists());

    let out = pagedex(&data, &["--format", "json", "stats"])
        .success()
        .get_output()
        .stdout
        .clone();
    let stats = json(&out);
    assert_eq!(stats["index"]["count"], 5);
    assert_eq!(stats["index"]["max_keys"], 3);
    assert_eq!(stats["index_source"], "snapshot");
    assert_eq!(stats["row_store_bytes"], 5 * 64);

    let out = pagedex(&data, &["--format", "json", "verify"])
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json(&out)["success"], true);

    let out = pagedex(&data, &["--format", "json", "rebuild"])
        .success()
        .get_output()
        .stdout
        .clone();
    assert_eq!(json(&out)["entries"], 5);

    pagedex(&data, &["snapshot"]).success();
}

#[test]
fn verify_exits_two_on_findings() {
    let (dir, csv) = setup();
    let data = dir.path().join("data");
    pagedex(&data, &["import", csv.to_str().unwrap()]).success();

    // Overwrite Bob's record with a tombstone so the snapshot points at it.
    let rows_path = data.join("rows.bin");
    let mut bytes = fs::read(&rows_path).unwrap();
    bytes[64] = 0x02;
    fs::write(&rows_path, &bytes).unwrap();

    let out = pagedex(&data, &["verify"]).code(2).get_output().stdout.clone();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("success=false"), "{text}");
    assert!(text.contains("tombstone"), "{text}");
}

#[test]
fn config_file_supplies_defaults() {
    let (dir, csv) = setup();
    let data = dir.path().join("configured");
    let config = dir.path().join("pagedex.toml");
    fs::write(
        &config,
        format!(
            "data_dir = {:?}\nrow_file = \"people.rows\"\nmax_keys = 5\n",
            data.to_str().unwrap()
        ),
    )
    .unwrap();

    let mut cmd = cargo_bin_cmd!("pagedex");
    cmd.env("PAGEDEX_CONFIG", &config)
        .args(["import", csv.to_str().unwrap()]);
    cmd.assert().success();
    assert!(data.join("people.rows").exists());

    let mut cmd = cargo_bin_cmd!("pagedex");
    cmd.args(["--config", config.to_str().unwrap(), "--format", "json", "stats"]);
    let out = cmd.assert().success().get_output().stdout.clone();
    assert_eq!(json(&out)["index"]["max_keys"], 5);
}
