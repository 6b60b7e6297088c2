//! Row addresses as page and offset within the row store.

use std::fmt;

use serde::Serialize;

use crate::error::{DbError, Result};

/// Addressing unit of the row store. Not an I/O page: rows may straddle it.
pub const PAGE_SIZE: u64 = 4096;

/// Byte position of a row, split into a page number and an offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Location {
    /// `position / PAGE_SIZE`.
    pub page_id: u32,
    /// `position % PAGE_SIZE`.
    pub offset: u32,
}

impl Location {
    /// Builds a location from its parts without checking `offset < PAGE_SIZE`.
    pub fn new(page_id: u32, offset: u32) -> Self {
        Self { page_id, offset }
    }

    /// Splits an absolute byte position into `(position / PAGE_SIZE, position % PAGE_SIZE)`.
    pub fn from_position(position: u64) -> Result<Self> {
        let page_id = u32::try_from(position / PAGE_SIZE).map_err(|_| {
            DbError::invalid(format!("byte position {position} beyond addressable pages"))
        })?;
        // Always below PAGE_SIZE, which fits in u32.
        let offset = (position % PAGE_SIZE) as u32;
        Ok(Self { page_id, offset })
    }

    /// Absolute byte position from the start of the row store.
    pub fn position(&self) -> u64 {
        u64::from(self.page_id) * PAGE_SIZE + u64::from(self.offset)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_id, self.offset)
    }
}
