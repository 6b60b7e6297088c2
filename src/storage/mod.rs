//! Row records, their addressing scheme and the append-only file holding them.

pub mod location;
pub mod row;
pub mod row_store;

pub use location::{Location, PAGE_SIZE};
pub use row::{Row, RowKind, RowRecord, LOCATION_CAPACITY, NAME_CAPACITY, ROW_RECORD_SIZE};
pub use row_store::{RowScan, RowStore};
