//! Metadata types for the per-directory store

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tabletio_common::{Error, Result, RowsetId, SchemaHash, TabletId, TabletUid};

const TABLET_META_TAG: u8 = b't';
const ROWSET_META_TAG: u8 = b'r';
const DELTA_COLUMN_GROUP_TAG: u8 = b'c';

/// Key for metadata entries
///
/// Keys are designed for efficient prefix scanning:
/// - Tablet metas: `t{tablet_id:be64}{schema_hash:be32}`
/// - Rowset metas: `r{tablet_uid:16}{rowset_id}`
/// - Delta column groups: `c{tablet_id:be64}{segment_id:be32}{version:be64}`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetadataKey(pub Vec<u8>);

impl MetadataKey {
    /// Key of a tablet meta record
    pub fn tablet_meta(tablet_id: TabletId, schema_hash: SchemaHash) -> Self {
        let mut key = Vec::with_capacity(13);
        key.push(TABLET_META_TAG);
        key.extend_from_slice(&tablet_id.to_be_bytes());
        key.extend_from_slice(&schema_hash.to_be_bytes());
        Self(key)
    }

    /// Prefix covering every tablet meta
    pub fn tablet_meta_prefix() -> Self {
        Self(vec![TABLET_META_TAG])
    }

    /// Parse `(tablet_id, schema_hash)` from a tablet meta key
    pub fn parse_tablet_meta(&self) -> Option<(TabletId, SchemaHash)> {
        if self.0.len() != 13 || self.0[0] != TABLET_META_TAG {
            return None;
        }
        let tablet_id = i64::from_be_bytes(self.0[1..9].try_into().ok()?);
        let schema_hash = i32::from_be_bytes(self.0[9..13].try_into().ok()?);
        Some((tablet_id, schema_hash))
    }

    /// Key of a rowset meta record
    pub fn rowset_meta(tablet_uid: &TabletUid, rowset_id: &RowsetId) -> Self {
        let mut key = Vec::with_capacity(17 + rowset_id.as_str().len());
        key.push(ROWSET_META_TAG);
        key.extend_from_slice(tablet_uid.as_bytes());
        key.extend_from_slice(rowset_id.as_str().as_bytes());
        Self(key)
    }

    /// Prefix covering every rowset meta
    pub fn rowset_meta_prefix() -> Self {
        Self(vec![ROWSET_META_TAG])
    }

    /// Parse `(tablet_uid, rowset_id)` from a rowset meta key
    pub fn parse_rowset_meta(&self) -> Option<(TabletUid, RowsetId)> {
        if self.0.len() <= 17 || self.0[0] != ROWSET_META_TAG {
            return None;
        }
        let uid = TabletUid::from_bytes(self.0[1..17].try_into().ok()?);
        let rowset_id = RowsetId::new(std::str::from_utf8(&self.0[17..]).ok()?)?;
        Some((uid, rowset_id))
    }

    /// Key of a delta column group record
    pub fn delta_column_group(tablet_id: TabletId, segment_id: u32, version: i64) -> Self {
        let mut key = Self::delta_column_group_prefix(tablet_id).0;
        key.extend_from_slice(&segment_id.to_be_bytes());
        key.extend_from_slice(&version.to_be_bytes());
        Self(key)
    }

    /// Prefix covering every delta column group of one tablet
    pub fn delta_column_group_prefix(tablet_id: TabletId) -> Self {
        let mut key = Vec::with_capacity(21);
        key.push(DELTA_COLUMN_GROUP_TAG);
        key.extend_from_slice(&tablet_id.to_be_bytes());
        Self(key)
    }

    /// Get the key type prefix
    pub fn key_type(&self) -> Option<char> {
        self.0.first().map(|&b| b as char)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Ord for MetadataKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for MetadataKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl AsRef<[u8]> for MetadataKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Replayed metadata entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: MetadataKey,
    pub value: Vec<u8>,
    /// Log Sequence Number (for ordering)
    pub lsn: u64,
    /// Tombstone flag (true = deleted)
    pub deleted: bool,
}

impl MetadataEntry {
    pub fn new(key: MetadataKey, value: Vec<u8>, lsn: u64) -> Self {
        Self {
            key,
            value,
            lsn,
            deleted: false,
        }
    }

    pub fn tombstone(key: MetadataKey, lsn: u64) -> Self {
        Self {
            key,
            value: vec![],
            lsn,
            deleted: true,
        }
    }
}

/// Metadata operation type for WAL
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum MetadataOp {
    /// Insert or update an entry
    Put { key: MetadataKey, value: Vec<u8> },
    /// Delete an entry
    Delete { key: MetadataKey },
    /// Batch of operations (atomic)
    Batch { ops: Vec<MetadataOp> },
}

impl MetadataOp {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("failed to encode metadata op: {}", e)))
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        bincode::deserialize(data).ok()
    }

    /// Flatten into entries stamped with `lsn`; nested batches are ignored
    pub fn into_entries(self, lsn: u64) -> Vec<MetadataEntry> {
        match self {
            Self::Put { key, value } => vec![MetadataEntry::new(key, value, lsn)],
            Self::Delete { key } => vec![MetadataEntry::tombstone(key, lsn)],
            Self::Batch { ops } => ops
                .into_iter()
                .filter_map(|op| match op {
                    Self::Put { key, value } => Some(MetadataEntry::new(key, value, lsn)),
                    Self::Delete { key } => Some(MetadataEntry::tombstone(key, lsn)),
                    Self::Batch { .. } => None,
                })
                .collect(),
        }
    }
}

/// Snapshot header for B-tree persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// LSN at snapshot time
    pub lsn: u64,
    pub entry_count: u64,
    /// CRC32C of snapshot data (excluding header)
    pub checksum: u32,
}

impl SnapshotHeader {
    pub const MAGIC: u32 = 0x5442_4D54; // "TBMT"
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = 28;

    pub const fn new(lsn: u64, entry_count: u64, checksum: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            lsn,
            entry_count,
            checksum,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.lsn.to_le_bytes());
        buf[16..24].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[24..28].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        let magic = u32::from_le_bytes(data[0..4].try_into().ok()?);
        if magic != Self::MAGIC {
            return None;
        }
        Some(Self {
            magic,
            version: u32::from_le_bytes(data[4..8].try_into().ok()?),
            lsn: u64::from_le_bytes(data[8..16].try_into().ok()?),
            entry_count: u64::from_le_bytes(data[16..24].try_into().ok()?),
            checksum: u32::from_le_bytes(data[24..28].try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tablet_meta_key_parse() {
        let key = MetadataKey::tablet_meta(10001, 368_169_781);
        assert_eq!(key.key_type(), Some('t'));
        assert_eq!(key.parse_tablet_meta(), Some((10001, 368_169_781)));
        assert!(key.as_bytes().starts_with(MetadataKey::tablet_meta_prefix().as_bytes()));
        assert_eq!(MetadataKey::tablet_meta_prefix().parse_tablet_meta(), None);
    }

    #[test]
    fn test_tablet_meta_keys_sort_by_id() {
        let k1 = MetadataKey::tablet_meta(1, 9);
        let k2 = MetadataKey::tablet_meta(2, 1);
        let k3 = MetadataKey::tablet_meta(300, 1);
        assert!(k1 < k2);
        assert!(k2 < k3);
    }

    #[test]
    fn test_rowset_meta_key_parse() {
        let uid = TabletUid::new();
        let rowset_id = RowsetId::new("02000000000000ab").unwrap();
        let key = MetadataKey::rowset_meta(&uid, &rowset_id);
        assert_eq!(key.parse_rowset_meta(), Some((uid, rowset_id)));
        assert_eq!(key.parse_tablet_meta(), None);
    }

    #[test]
    fn test_delta_column_group_prefix_is_per_tablet() {
        let a = MetadataKey::delta_column_group(7, 0, 3);
        let b = MetadataKey::delta_column_group(8, 0, 3);
        let prefix = MetadataKey::delta_column_group_prefix(7);
        assert!(a.as_bytes().starts_with(prefix.as_bytes()));
        assert!(!b.as_bytes().starts_with(prefix.as_bytes()));
    }

    #[test]
    fn test_batch_flattens_to_entries() {
        let op = MetadataOp::Batch {
            ops: vec![
                MetadataOp::Put {
                    key: MetadataKey::tablet_meta(1, 1),
                    value: b"a".to_vec(),
                },
                MetadataOp::Delete {
                    key: MetadataKey::tablet_meta(2, 1),
                },
            ],
        };
        let entries = op.into_entries(9);
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].deleted);
        assert!(entries[1].deleted);
        assert!(entries.iter().all(|e| e.lsn == 9));
    }

    #[test]
    fn test_op_encoding_is_fallible_and_decodes() {
        let op = MetadataOp::Put {
            key: MetadataKey::tablet_meta(3, 4),
            value: b"meta".to_vec(),
        };
        let bytes = op.to_bytes().unwrap();
        assert!(!bytes.is_empty());
        match MetadataOp::from_bytes(&bytes) {
            Some(MetadataOp::Put { key, value }) => {
                assert_eq!(key, MetadataKey::tablet_meta(3, 4));
                assert_eq!(value, b"meta");
            }
            other => panic!("unexpected op {:?}", other),
        }
        assert!(MetadataOp::from_bytes(&[0xff; 3]).is_none());
    }

    #[test]
    fn test_snapshot_header_rejects_bad_magic() {
        let mut bytes = SnapshotHeader::new(1000, 500, 7).to_bytes();
        assert_eq!(SnapshotHeader::from_bytes(&bytes).unwrap().lsn, 1000);
        bytes[0] ^= 0xFF;
        assert!(SnapshotHeader::from_bytes(&bytes).is_none());
    }
}
