//! Append-only file of row records.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use super::location::Location;
use super::row::{RowRecord, ROW_RECORD_SIZE};
use crate::error::{DbError, Result};

const RECORD_LEN: u64 = ROW_RECORD_SIZE as u64;

/// Append-only file of fixed-size row records.
///
/// Bytes are never rewritten; removals and updates are new records.
#[derive(Debug)]
pub struct RowStore {
    path: PathBuf,
    file: File,
    len: u64,
}

impl RowStore {
    /// Opens `path`, creating an empty store if it does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if len % RECORD_LEN != 0 {
            return Err(DbError::corruption(format!(
                "row store {} is {len} bytes, not a multiple of {ROW_RECORD_SIZE}",
                path.display()
            )));
        }
        debug!(path = %path.display(), bytes = len, "row_store.opened");
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    /// Path the store was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size in bytes.
    pub fn len_bytes(&self) -> u64 {
        self.len
    }

    /// Records in the file, live and tombstone alike.
    pub fn record_count(&self) -> u64 {
        self.len / RECORD_LEN
    }

    /// Where the next appended record will start.
    pub fn next_location(&self) -> Result<Location> {
        Location::from_position(self.len)
    }

    /// Appends one record and returns where it starts.
    ///
    /// A torn tail left by an earlier failed write is cut off first, and a
    /// write that fails partway is truncated back, so records stay aligned.
    pub fn append(&mut self, record: &RowRecord) -> Result<Location> {
        let bytes = record.encode()?;
        let location = self.next_location()?;
        self.discard_torn_tail()?;
        if let Err(err) = self.file.write_all(&bytes) {
            if let Err(truncate_err) = self.file.set_len(self.len) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "row_store.append.truncate_failed"
                );
            }
            return Err(err.into());
        }
        self.len += RECORD_LEN;
        trace!(id = record.id(), kind = ?record.kind(), %location, "row_store.append");
        Ok(location)
    }

    fn discard_torn_tail(&mut self) -> Result<()> {
        let on_disk = self.file.metadata()?.len();
        if on_disk == self.len {
            return Ok(());
        }
        if on_disk < self.len {
            return Err(DbError::corruption(format!(
                "row store {} shrank to {on_disk} bytes, expected {}",
                self.path.display(),
                self.len
            )));
        }
        warn!(
            path = %self.path.display(),
            torn_bytes = on_disk - self.len,
            "row_store.torn_tail_discarded"
        );
        self.file.set_len(self.len)?;
        Ok(())
    }

    /// Reads the record that starts at `location`.
    pub fn read(&mut self, location: Location) -> Result<RowRecord> {
        let position = location.position();
        if position % RECORD_LEN != 0 {
            return Err(DbError::corruption(format!(
                "location {location} is not aligned to a record"
            )));
        }
        if position + RECORD_LEN > self.len {
            return Err(DbError::corruption(format!(
                "location {location} is past the end of the row store"
            )));
        }
        let mut bytes = [0u8; ROW_RECORD_SIZE];
        self.file.seek(SeekFrom::Start(position))?;
        self.file.read_exact(&mut bytes)?;
        RowRecord::decode(&bytes)
    }

    /// Iterates over every record in file order, up to the current end.
    ///
    /// The scan reads through its own handle, so it is unaffected by reads
    /// and appends made while it is in progress.
    pub fn scan(&self) -> Result<RowScan> {
        let file = File::open(&self.path)?;
        Ok(RowScan {
            reader: BufReader::new(file),
            position: 0,
            end: self.len,
        })
    }

    /// Opens `path` without write access, so every append fails.
    #[cfg(test)]
    pub(crate) fn open_read_only(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            len,
        })
    }

    /// Flushes appended records to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}

/// Records of a [`RowStore`] paired with their locations, oldest first.
pub struct RowScan {
    reader: BufReader<File>,
    position: u64,
    end: u64,
}

impl Iterator for RowScan {
    type Item = Result<(Location, RowRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }
        let mut bytes = [0u8; ROW_RECORD_SIZE];
        let item = self
            .reader
            .read_exact(&mut bytes)
            .map_err(DbError::from)
            .and_then(|()| Location::from_position(self.position))
            .and_then(|location| Ok((location, RowRecord::decode(&bytes)?)));
        match item {
            Ok(entry) => {
                self.position += RECORD_LEN;
                Some(Ok(entry))
            }
            Err(err) => {
                self.position = self.end;
                Some(Err(err))
            }
        }
    }
}
