//! Rows and their fixed 64-byte on-disk records.

use serde::Serialize;

use crate::error::{DbError, Result};

/// Size of every record in the row store.
pub const ROW_RECORD_SIZE: usize = 64;
/// Longest `name`, in UTF-8 bytes.
pub const NAME_CAPACITY: usize = 24;
/// Longest `location`, in UTF-8 bytes.
pub const LOCATION_CAPACITY: usize = 24;

const KIND_OFFSET: usize = 0;
const ID_OFFSET: usize = 8;
const NAME_OFFSET: usize = 16;
const LOCATION_OFFSET: usize = NAME_OFFSET + NAME_CAPACITY;

/// One data row: a logical id plus two short text columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    /// Logical key, unique among live rows.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Free-form place column.
    pub location: String,
}

impl Row {
    /// Builds a row, rejecting text that does not fit its fixed-width field.
    pub fn new(id: i64, name: impl Into<String>, location: impl Into<String>) -> Result<Self> {
        let row = Self {
            id,
            name: name.into(),
            location: location.into(),
        };
        row.check_widths()?;
        Ok(row)
    }

    fn check_widths(&self) -> Result<()> {
        check_text("name", &self.name, NAME_CAPACITY)?;
        check_text("location", &self.location, LOCATION_CAPACITY)
    }
}

/// Tag byte opening every record.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    /// A row version.
    Live = 0x01,
    /// Marks the id as removed.
    Tombstone = 0x02,
}

impl RowKind {
    /// Parses a tag byte; anything else is `Corruption`.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Self::Live),
            0x02 => Ok(Self::Tombstone),
            other => Err(DbError::corruption(format!(
                "unknown row record kind: 0x{other:02X}"
            ))),
        }
    }

    /// Tag byte written to disk.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded 64-byte record as it sits in the row store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowRecord {
    /// A row version.
    Live(Row),
    /// Removal of `id`.
    Tombstone(i64),
}

impl RowRecord {
    /// Tag of this record.
    pub fn kind(&self) -> RowKind {
        match self {
            RowRecord::Live(_) => RowKind::Live,
            RowRecord::Tombstone(_) => RowKind::Tombstone,
        }
    }

    /// Row id the record applies to.
    pub fn id(&self) -> i64 {
        match self {
            RowRecord::Live(row) => row.id,
            RowRecord::Tombstone(id) => *id,
        }
    }

    /// Encodes into the fixed record layout:
    /// kind (1) | reserved (7) | id (8) | name (24) | location (24).
    pub fn encode(&self) -> Result<[u8; ROW_RECORD_SIZE]> {
        let mut bytes = [0u8; ROW_RECORD_SIZE];
        bytes[KIND_OFFSET] = self.kind().to_byte();
        bytes[ID_OFFSET..NAME_OFFSET].copy_from_slice(&self.id().to_le_bytes());
        if let RowRecord::Live(row) = self {
            row.check_widths()?;
            write_text(&mut bytes[NAME_OFFSET..LOCATION_OFFSET], &row.name);
            write_text(&mut bytes[LOCATION_OFFSET..], &row.location);
        }
        Ok(bytes)
    }

    /// Parses a record written by [`RowRecord::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ROW_RECORD_SIZE {
            return Err(DbError::corruption(format!(
                "row record must be {ROW_RECORD_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let kind = RowKind::from_byte(bytes[KIND_OFFSET])?;
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[ID_OFFSET..NAME_OFFSET]);
        let id = i64::from_le_bytes(id);
        match kind {
            RowKind::Tombstone => Ok(RowRecord::Tombstone(id)),
            RowKind::Live => Ok(RowRecord::Live(Row {
                id,
                name: read_text("name", &bytes[NAME_OFFSET..LOCATION_OFFSET])?,
                location: read_text("location", &bytes[LOCATION_OFFSET..])?,
            })),
        }
    }
}

fn check_text(field: &str, value: &str, capacity: usize) -> Result<()> {
    if value.len() > capacity {
        return Err(DbError::invalid(format!(
            "{field} is {} bytes, at most {capacity} fit",
            value.len()
        )));
    }
    if value.contains('\0') {
        return Err(DbError::invalid(format!("{field} contains a NUL byte")));
    }
    Ok(())
}

fn write_text(field: &mut [u8], value: &str) {
    field[..value.len()].copy_from_slice(value.as_bytes());
}

fn read_text(field: &str, bytes: &[u8]) -> Result<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end])
        .map(str::to_owned)
        .map_err(|err| DbError::corruption(format!("{field} is not valid UTF-8: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_record_layout() {
        let row = Row::new(3, "Charlie", "Chicago").unwrap();
        let bytes = RowRecord::Live(row.clone()).encode().unwrap();
        assert_eq!(bytes[0], 0x01);
        assert!(bytes[1..8].iter().all(|b| *b == 0));
        assert_eq!(&bytes[8..16], &3i64.to_le_bytes());
        assert_eq!(&bytes[16..23], b"Charlie");
        assert!(bytes[23..40].iter().all(|b| *b == 0));
        assert_eq!(&bytes[40..47], b"Chicago");
        assert_eq!(RowRecord::decode(&bytes).unwrap(), RowRecord::Live(row));
    }

    #[test]
    fn tombstone_carries_only_the_id() {
        let bytes = RowRecord::Tombstone(-17).encode().unwrap();
        assert_eq!(bytes[0], 0x02);
        assert!(bytes[16..].iter().all(|b| *b == 0));
        assert_eq!(RowRecord::decode(&bytes).unwrap(), RowRecord::Tombstone(-17));
    }

    #[test]
    fn text_filling_the_whole_field_survives() {
        let name = "n".repeat(NAME_CAPACITY);
        let place = "\u{e9}".repeat(LOCATION_CAPACITY / 2);
        let row = Row::new(i64::MAX, name, place).unwrap();
        let bytes = RowRecord::Live(row.clone()).encode().unwrap();
        assert_eq!(RowRecord::decode(&bytes).unwrap(), RowRecord::Live(row));
    }

    #[test]
    fn overlong_text_is_rejected_not_truncated() {
        let err = Row::new(1, "x".repeat(NAME_CAPACITY + 1), "Paris").unwrap_err();
        assert!(matches!(err, DbError::InvalidArgument(_)));
        let sneaky = Row {
            id: 1,
            name: "ok".into(),
            location: "y".repeat(LOCATION_CAPACITY + 1),
        };
        assert!(matches!(
            RowRecord::Live(sneaky).encode(),
            Err(DbError::InvalidArgument(_))
        ));
        assert!(Row::new(1, "a\0b", "Paris").is_err());
    }

    #[test]
    fn unknown_kind_and_bad_utf8_are_corruption() {
        let mut bytes = RowRecord::Live(Row::new(1, "Alice", "Austin").unwrap())
            .encode()
            .unwrap();
        bytes[0] = 0x07;
        assert!(matches!(RowRecord::decode(&bytes), Err(DbError::Corruption(_))));

        bytes[0] = 0x01;
        bytes[16] = 0xFF;
        let err = RowRecord::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("UTF-8"), "{err}");

        assert!(matches!(
            RowRecord::decode(&bytes[..32]),
            Err(DbError::Corruption(_))
        ));
    }
}
