//! Checksummed snapshot of a [`BPlusTree`]'s entries.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic "PDXS" | version u16 | reserved u16 | max_keys u32 |
//! row_store_len u64 | count u64 | count x (key, value) | crc32 u32
//! ```
//!
//! Entries are written in ascending key order. Loading replays them as
//! ordered puts, so node layout is never part of the format.

use std::convert::TryInto;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::bptree::BPlusTree;
use crate::error::{DbError, Result};
use crate::storage::{Location, PAGE_SIZE};

const SNAPSHOT_MAGIC: &[u8; 4] = b"PDXS";
const SNAPSHOT_VERSION: u16 = 1;
// magic (4) + version (2) + reserved (2) + max_keys (4) + row_store_len (8) + count (8)
const SNAPSHOT_HEADER_SIZE: usize = 28;
const CHECKSUM_SIZE: usize = 4;

/// A value with a fixed-size little-endian encoding.
pub trait FixedWidth: Sized {
    /// Encoded size in bytes.
    const WIDTH: usize;

    /// Appends exactly [`Self::WIDTH`] bytes to `buf`.
    fn write_to(&self, buf: &mut Vec<u8>);

    /// Decodes from a slice of exactly [`Self::WIDTH`] bytes.
    fn read_from(bytes: &[u8]) -> Result<Self>;
}

impl FixedWidth for i64 {
    const WIDTH: usize = 8;

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| DbError::corruption("i64 field must be 8 bytes"))?;
        Ok(i64::from_le_bytes(bytes))
    }
}

impl FixedWidth for Location {
    const WIDTH: usize = 8;

    fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.page_id.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
    }

    fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::WIDTH {
            return Err(DbError::corruption("location field must be 8 bytes"));
        }
        let page_id = read_u32_le(bytes, 0)?;
        let offset = read_u32_le(bytes, 4)?;
        if u64::from(offset) >= PAGE_SIZE {
            return Err(DbError::corruption(format!(
                "location offset {offset} not below page size"
            )));
        }
        Ok(Location::new(page_id, offset))
    }
}

/// A tree restored from disk, with the row store length it was taken at.
#[derive(Debug)]
pub struct Snapshot<K, V> {
    /// Index rebuilt from the stored entries.
    pub tree: BPlusTree<K, V>,
    /// Row store size in bytes when the snapshot was written.
    pub row_store_len: u64,
}

/// Serializes every entry of `tree` in ascending key order.
pub fn encode<K, V>(tree: &BPlusTree<K, V>, row_store_len: u64) -> Result<Vec<u8>>
where
    K: FixedWidth + Clone,
    V: FixedWidth,
{
    let max_keys = u32::try_from(tree.max_keys())
        .map_err(|_| DbError::invalid("max_keys too large to snapshot"))?;
    let count = u64::try_from(tree.len())
        .map_err(|_| DbError::invalid("too many entries to snapshot"))?;
    let body = tree.len().saturating_mul(K::WIDTH + V::WIDTH);
    let mut buf = Vec::new();
    buf.try_reserve_exact(SNAPSHOT_HEADER_SIZE + body + CHECKSUM_SIZE)?;

    buf.extend_from_slice(SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes()); // reserved
    buf.extend_from_slice(&max_keys.to_le_bytes());
    buf.extend_from_slice(&row_store_len.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    for (key, value) in tree.iter()? {
        key.write_to(&mut buf);
        value.write_to(&mut buf);
    }
    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    Ok(buf)
}

/// Validates `data` and rebuilds the tree it describes.
pub fn decode<K, V>(data: &[u8]) -> Result<Snapshot<K, V>>
where
    K: FixedWidth + Ord + Clone,
    V: FixedWidth,
{
    if data.len() < SNAPSHOT_HEADER_SIZE + CHECKSUM_SIZE
        || &data[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC
    {
        return Err(DbError::corruption("snapshot missing magic header"));
    }
    let version = read_u16_le(data, 4)?;
    if version != SNAPSHOT_VERSION {
        return Err(DbError::corruption(format!(
            "unsupported snapshot format version {version}"
        )));
    }

    let (payload, trailer) = data.split_at(data.len() - CHECKSUM_SIZE);
    let stored = read_u32_le(trailer, 0)?;
    let actual = crc32fast::hash(payload);
    if stored != actual {
        return Err(DbError::corruption(format!(
            "snapshot checksum mismatch: stored {stored:#010x}, computed {actual:#010x}"
        )));
    }

    let max_keys = read_u32_le(payload, 8)? as usize;
    let row_store_len = read_u64_le(payload, 12)?;
    let count = usize::try_from(read_u64_le(payload, 20)?)
        .map_err(|_| DbError::corruption("snapshot entry count exceeds platform limits"))?;
    let entry_size = K::WIDTH + V::WIDTH;
    let expected = count
        .checked_mul(entry_size)
        .and_then(|body| body.checked_add(SNAPSHOT_HEADER_SIZE))
        .ok_or_else(|| DbError::corruption("snapshot entry size overflow"))?;
    if payload.len() != expected {
        return Err(DbError::corruption(format!(
            "snapshot holds {} bytes of entries, header promises {count}",
            payload.len() - SNAPSHOT_HEADER_SIZE
        )));
    }

    let mut tree = BPlusTree::with_max_keys(max_keys).map_err(|err| match err {
        DbError::InvalidArgument(message) => DbError::Corruption(message),
        other => other,
    })?;
    let mut previous: Option<K> = None;
    for entry in payload[SNAPSHOT_HEADER_SIZE..].chunks_exact(entry_size) {
        let (key_bytes, value_bytes) = entry.split_at(K::WIDTH);
        let key = K::read_from(key_bytes)?;
        let value = V::read_from(value_bytes)?;
        if previous.as_ref().is_some_and(|prev| *prev >= key) {
            return Err(DbError::corruption("snapshot keys not strictly ascending"));
        }
        previous = Some(key.clone());
        tree.put(key, value)?;
    }
    Ok(Snapshot {
        tree,
        row_store_len,
    })
}

/// Writes a snapshot of `tree` to `path`, going through `<path>.tmp` so a
/// crash mid-write never leaves a truncated snapshot in place.
pub fn save<K, V>(path: &Path, tree: &BPlusTree<K, V>, row_store_len: u64) -> Result<()>
where
    K: FixedWidth + Clone,
    V: FixedWidth,
{
    let bytes = encode(tree, row_store_len)?;
    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    debug!(
        path = %path.display(),
        entries = tree.len(),
        bytes = bytes.len(),
        "snapshot.saved"
    );
    Ok(())
}

/// Reads the snapshot at `path`; `Ok(None)` if there is none.
pub fn load<K, V>(path: &Path) -> Result<Option<Snapshot<K, V>>>
where
    K: FixedWidth + Ord + Clone,
    V: FixedWidth,
{
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let snapshot = decode(&data)?;
    debug!(
        path = %path.display(),
        entries = snapshot.tree.len(),
        row_store_len = snapshot.row_store_len,
        "snapshot.loaded"
    );
    Ok(Some(snapshot))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn read_u16_le(buf: &[u8], offset: usize) -> Result<u16> {
    let slice = buf
        .get(offset..offset + 2)
        .ok_or_else(|| DbError::corruption(format!("invalid u16 at snapshot offset {offset}")))?;
    let bytes: [u8; 2] = slice
        .try_into()
        .map_err(|_| DbError::corruption("failed to copy u16 bytes from snapshot"))?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32> {
    let slice = buf
        .get(offset..offset + 4)
        .ok_or_else(|| DbError::corruption(format!("invalid u32 at snapshot offset {offset}")))?;
    let bytes: [u8; 4] = slice
        .try_into()
        .map_err(|_| DbError::corruption("failed to copy u32 bytes from snapshot"))?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u64_le(buf: &[u8], offset: usize) -> Result<u64> {
    let slice = buf
        .get(offset..offset + 8)
        .ok_or_else(|| DbError::corruption(format!("invalid u64 at snapshot offset {offset}")))?;
    let bytes: [u8; 8] = slice
        .try_into()
        .map_err(|_| DbError::corruption("failed to copy u64 bytes from snapshot"))?;
    Ok(u64::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree(max_keys: usize, keys: impl IntoIterator<Item = i64>) -> BPlusTree<i64, Location> {
        let mut tree = BPlusTree::with_max_keys(max_keys).unwrap();
        for key in keys {
            let location = Location::from_position(key.unsigned_abs() * 64).unwrap();
            tree.put(key, location).unwrap();
        }
        tree
    }

    #[test]
    fn restores_identical_lookups_and_ranges() {
        let tree = sample_tree(4, [9, 1, 5, -3, 7, 2, 8, 4, 6, 3]);
        let bytes = encode(&tree, 640).unwrap();
        let restored: Snapshot<i64, Location> = decode(&bytes).unwrap();

        assert_eq!(restored.row_store_len, 640);
        assert_eq!(restored.tree.max_keys(), 4);
        assert_eq!(restored.tree.len(), tree.len());
        restored.tree.validate().unwrap();
        for key in [-3, 1, 2, 3, 4, 5, 6, 7, 8, 9] {
            assert_eq!(restored.tree.get(&key).unwrap(), tree.get(&key).unwrap());
        }
        assert_eq!(
            restored.tree.get_range(&2, &6).unwrap(),
            tree.get_range(&2, &6).unwrap()
        );
    }

    #[test]
    fn empty_tree_snapshot_is_header_and_checksum() {
        let tree = sample_tree(2, []);
        let bytes = encode(&tree, 0).unwrap();
        assert_eq!(bytes.len(), SNAPSHOT_HEADER_SIZE + CHECKSUM_SIZE);
        let restored: Snapshot<i64, Location> = decode(&bytes).unwrap();
        assert!(restored.tree.is_empty());
        assert_eq!(restored.tree.max_keys(), 2);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = encode(&sample_tree(4, [1, 2]), 0).unwrap();
        bytes[4..6].copy_from_slice(&(SNAPSHOT_VERSION + 1).to_le_bytes());
        let err = decode::<i64, Location>(&bytes).unwrap_err();
        match err {
            DbError::Corruption(message) => {
                assert!(message.contains("version"), "unexpected message: {message}")
            }
            other => panic!("expected corruption error, got {other:?}"),
        }
    }

    #[test]
    fn detects_flipped_bits() {
        let mut bytes = encode(&sample_tree(4, 0..20), 1280).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x40;
        let err = decode::<i64, Location>(&bytes).unwrap_err();
        assert!(err.to_string().contains("checksum"), "{err}");
    }

    #[test]
    fn detects_truncation() {
        let bytes = encode(&sample_tree(4, 0..20), 1280).unwrap();
        assert!(matches!(
            decode::<i64, Location>(&bytes[..bytes.len() - 7]),
            Err(DbError::Corruption(_))
        ));
        assert!(matches!(
            decode::<i64, Location>(&bytes[..10]),
            Err(DbError::Corruption(_))
        ));
    }

    #[test]
    fn rejects_unordered_entries_even_with_valid_checksum() {
        let mut bytes = encode(&sample_tree(4, [1, 2]), 0).unwrap();
        bytes.truncate(bytes.len() - CHECKSUM_SIZE);
        // Swap the two keys so the body is out of order.
        let first = SNAPSHOT_HEADER_SIZE;
        let second = first + 16;
        bytes[first..first + 8].copy_from_slice(&2i64.to_le_bytes());
        bytes[second..second + 8].copy_from_slice(&1i64.to_le_bytes());
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());

        let err = decode::<i64, Location>(&bytes).unwrap_err();
        assert!(err.to_string().contains("ascending"), "{err}");
    }

    #[test]
    fn rejects_max_keys_below_two() {
        let mut bytes = encode(&sample_tree(2, [1]), 0).unwrap();
        bytes.truncate(bytes.len() - CHECKSUM_SIZE);
        bytes[8..12].copy_from_slice(&1u32.to_le_bytes());
        let checksum = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&checksum.to_le_bytes());
        assert!(matches!(
            decode::<i64, Location>(&bytes),
            Err(DbError::Corruption(_))
        ));
    }

    #[test]
    fn save_then_load_through_the_filesystem() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.snap");
        assert!(load::<i64, Location>(&path).unwrap().is_none());

        let tree = sample_tree(3, (0..200).rev());
        save(&path, &tree, 12_800).unwrap();
        assert!(!tmp_path(&path).exists());

        let restored = load::<i64, Location>(&path).unwrap().unwrap();
        assert_eq!(restored.row_store_len, 12_800);
        assert_eq!(restored.tree.len(), 200);
        assert_eq!(restored.tree.get(&199).unwrap(), tree.get(&199).unwrap());
    }
}
