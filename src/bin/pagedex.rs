//! Binary entry point for the pagedex command-line tool.
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;

use pagedex::cli::{CsvColumns, CsvSource};
use pagedex::db::{Config, DuplicatePolicy, Engine, EngineStats, IngestSummary, VerifyReport};
use pagedex::logging::init_logging;
use pagedex::{DbError, Location, Result, Row};

#[derive(Parser, Debug)]
#[command(
    name = "pagedex",
    version,
    about = "Row store with a B+ tree index over row ids",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "PAGEDEX_CONFIG",
        help = "TOML config file (defaults to the per-user config if present)"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_name = "DIR", help = "Directory holding the data files")]
    data_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "N", help = "Keys per node when building an index")]
    max_keys: Option<usize>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for results"
    )]
    format: OutputFormat,

    #[arg(long, global = true, value_name = "FILTER", help = "Log filter, e.g. debug or pagedex=trace")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Append every row of a CSV file and index it.
    Import(ImportCmd),
    /// Insert one row.
    Insert(RowArgs),
    /// Print the row stored under an id.
    Get {
        #[arg(allow_hyphen_values = true)]
        id: i64,
    },
    /// Print rows with ids in [LOW, HIGH].
    Range {
        #[arg(allow_hyphen_values = true)]
        low: i64,
        #[arg(allow_hyphen_values = true)]
        high: i64,
    },
    /// Remove the row stored under an id.
    Remove {
        #[arg(allow_hyphen_values = true)]
        id: i64,
    },
    /// Replace the row stored under an id.
    Update(RowArgs),
    /// Print index and row store statistics.
    Stats,
    /// Check the index against itself and the row store.
    Verify,
    /// Write the index snapshot now.
    Snapshot,
    /// Rebuild the index by replaying the row store.
    Rebuild,
}

#[derive(Args, Debug)]
struct ImportCmd {
    #[arg(value_name = "CSV")]
    path: PathBuf,

    #[arg(long, default_value = "id", help = "Column holding the row id")]
    id_column: String,

    #[arg(long, default_value = "name", help = "Column holding the name")]
    name_column: String,

    #[arg(long, default_value = "location", help = "Column holding the location")]
    location_column: String,

    #[arg(long, value_enum, help = "What to do with ids that are already indexed")]
    on_duplicate: Option<DuplicatePolicy>,
}

#[derive(Args, Debug)]
struct RowArgs {
    #[arg(allow_hyphen_values = true)]
    id: i64,
    name: String,
    location: String,
}

impl RowArgs {
    fn into_row(self) -> Result<Row> {
        Row::new(self.id, self.name, self.location)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct Placed {
    id: i64,
    location: Location,
}

#[derive(Serialize)]
struct IndexCount {
    entries: usize,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = init_logging(cli.log_level.as_deref()) {
        report_error(&err);
        process::exit(1);
    }
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            report_error(&err);
            process::exit(1);
        }
    }
}

fn report_error(err: &DbError) {
    eprintln!("error: {}: {err}", err.status());
}

fn run(cli: Cli) -> Result<i32> {
    let mut config = Config::discover(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(max_keys) = cli.max_keys {
        config.max_keys = max_keys;
    }
    if let Command::Import(cmd) = &cli.command {
        if let Some(policy) = cmd.on_duplicate {
            config.on_duplicate = policy;
        }
    }

    let format = cli.format;
    let mut engine = Engine::open(config)?;
    let mut exit_code = 0;
    match cli.command {
        Command::Import(cmd) => {
            let source = CsvSource {
                path: cmd.path,
                columns: CsvColumns {
                    id: cmd.id_column,
                    name: cmd.name_column,
                    location: cmd.location_column,
                },
            };
            let summary = engine.ingest_csv(&source)?;
            emit(format, &summary, || print_ingest_text(&summary))?;
        }
        Command::Insert(args) => {
            let row = args.into_row()?;
            let id = row.id;
            let location = engine.insert(row)?;
            let placed = Placed { id, location };
            emit(format, &placed, || println!("inserted {id} at {location}"))?;
        }
        Command::Get { id } => {
            let row = engine.get(id)?;
            emit(format, &row, || print_row(&row))?;
        }
        Command::Range { low, high } => {
            let rows = engine.range(low, high)?;
            emit(format, &rows, || {
                rows.iter().for_each(print_row);
                println!("({} rows)", rows.len());
            })?;
        }
        Command::Remove { id } => {
            let row = engine.remove(id)?;
            emit(format, &row, || println!("removed {id}"))?;
        }
        Command::Update(args) => {
            let row = args.into_row()?;
            let id = row.id;
            let location = engine.update(row)?;
            let placed = Placed { id, location };
            emit(format, &placed, || println!("updated {id} at {location}"))?;
        }
        Command::Stats => {
            let stats = engine.stats();
            emit(format, &stats, || print_stats_text(&stats))?;
        }
        Command::Verify => {
            let report = engine.verify()?;
            emit(format, &report, || print_verify_text(&report))?;
            if !report.success {
                exit_code = 2;
            }
        }
        Command::Snapshot => {
            engine.save_snapshot()?;
            let count = IndexCount {
                entries: engine.index().len(),
            };
            emit(format, &count, || {
                println!("snapshot written ({} entries)", count.entries)
            })?;
        }
        Command::Rebuild => {
            let count = IndexCount {
                entries: engine.rebuild_index()?,
            };
            emit(format, &count, || {
                println!("index rebuilt ({} entries)", count.entries)
            })?;
        }
    }
    engine.close()?;
    Ok(exit_code)
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)
                .map_err(|err| DbError::InternalError(format!("failed to encode JSON: {err}")))?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_row(row: &Row) {
    println!("{}\t{}\t{}", row.id, row.name, row.location);
}

fn print_ingest_text(summary: &IngestSummary) {
    println!(
        "read {} rows: {} inserted, {} duplicates skipped",
        summary.rows_read, summary.inserted, summary.duplicates
    );
}

fn print_stats_text(stats: &EngineStats) {
    let index = &stats.index;
    println!(
        "Index: count={} height={} nodes={} max_keys={} source={:?}",
        index.count, index.height, index.node_count, index.max_keys, stats.index_source
    );
    println!(
        "  leaf_splits={} internal_splits={} leaf_merges={} internal_merges={} borrows={}",
        index.leaf_splits,
        index.internal_splits,
        index.leaf_merges,
        index.internal_merges,
        index.borrows
    );
    println!(
        "Rows: bytes={} records={}",
        stats.row_store_bytes, stats.row_records
    );
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify => success={} entries_checked={}",
        report.success, report.entries_checked
    );
    for finding in &report.findings {
        println!("  - {finding}");
    }
}
