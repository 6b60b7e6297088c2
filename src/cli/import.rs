//! CSV row sources for ingestion.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, Trim};

use crate::error::{DbError, Result};
use crate::storage::Row;

/// Column names the row fields are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvColumns {
    /// Column holding the numeric row id.
    pub id: String,
    /// Column holding the name.
    pub name: String,
    /// Column holding the location text.
    pub location: String,
}

impl Default for CsvColumns {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            name: "name".to_string(),
            location: "location".to_string(),
        }
    }
}

/// A CSV file of rows. The first line is a header naming the columns;
/// column matching ignores ASCII case and extra columns are ignored.
#[derive(Debug, Clone)]
pub struct CsvSource {
    /// Path to the CSV file.
    pub path: PathBuf,
    /// Which header names map to which row field.
    pub columns: CsvColumns,
}

impl CsvSource {
    /// Source at `path` with the default `id,name,location` columns.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            columns: CsvColumns::default(),
        }
    }

    /// Opens the file and resolves the header.
    pub fn rows(&self) -> Result<CsvRows<File>> {
        let reader = builder().from_path(&self.path)?;
        CsvRows::new(reader, &self.columns)
    }
}

/// Parses rows from any reader, header first.
pub fn read_rows<R: Read>(input: R, columns: &CsvColumns) -> Result<CsvRows<R>> {
    CsvRows::new(builder().from_reader(input), columns)
}

fn builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.flexible(true).trim(Trim::All);
    builder
}

/// Rows of a CSV source in file order.
pub struct CsvRows<R> {
    records: StringRecordsIntoIter<R>,
    id_index: usize,
    name_index: usize,
    location_index: usize,
}

impl<R: Read> CsvRows<R> {
    fn new(mut reader: csv::Reader<R>, columns: &CsvColumns) -> Result<Self> {
        let headers = reader.headers()?.clone();
        Ok(Self {
            id_index: find_column(&headers, &columns.id)?,
            name_index: find_column(&headers, &columns.name)?,
            location_index: find_column(&headers, &columns.location)?,
            records: reader.into_records(),
        })
    }

    fn parse(&self, record: &StringRecord) -> Result<Row> {
        let line = record.position().map_or(0, |pos| pos.line());
        let id_text = get_required(record, self.id_index, "id", line)?;
        let id = id_text.parse::<i64>().map_err(|err| {
            DbError::invalid(format!("line {line}: id '{id_text}' is not an integer: {err}"))
        })?;
        let name = get_required(record, self.name_index, "name", line)?;
        let location = get_required(record, self.location_index, "location", line)?;
        Row::new(id, name, location).map_err(|err| match err {
            DbError::InvalidArgument(message) => {
                DbError::InvalidArgument(format!("line {line}: {message}"))
            }
            other => other,
        })
    }
}

impl<R: Read> Iterator for CsvRows<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.next()?;
        Some(record.map_err(DbError::from).and_then(|record| self.parse(&record)))
    }
}

fn find_column(headers: &StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| DbError::invalid(format!("column '{name}' not found in CSV header")))
}

fn get_required<'a>(
    record: &'a StringRecord,
    index: usize,
    field: &str,
    line: u64,
) -> Result<&'a str> {
    record
        .get(index)
        .ok_or_else(|| DbError::invalid(format!("line {line}: missing {field} value")))
}
