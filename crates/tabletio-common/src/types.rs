//! Core type definitions for TabletIO
//!
//! Identifiers shared by the metadata store, the tablet catalog and the
//! storage directories.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Tablet identifier assigned by the frontend
pub type TabletId = i64;

/// Fingerprint of a tablet schema version, also a path component
pub type SchemaHash = i32;

/// Transaction identifier
pub type TxnId = i64;

/// Partition identifier
pub type PartitionId = i64;

/// Unique identifier of one incarnation of a tablet
///
/// A tablet that is dropped and recreated (or migrated) keeps its
/// `TabletId` but gets a fresh uid, so state written by the old
/// incarnation can be told apart from the live one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct TabletUid(Uuid);

impl TabletUid {
    /// Generate a new random uid
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Create from raw bytes (as stored in metadata keys)
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for TabletUid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TabletUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TabletUid({})", self.0.simple())
    }
}

impl fmt::Display for TabletUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Rowset identifier
///
/// Rowset ids are the leading component of every file a rowset writes,
/// e.g. `<rowset_id>_0.dat`, so they are restricted to ASCII alphanumerics.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct RowsetId(String);

impl RowsetId {
    /// Create a rowset id, rejecting anything that cannot appear in a file name
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(id))
    }

    /// Get the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity of a tablet attached to a storage directory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabletInfo {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub tablet_uid: TabletUid,
}

impl TabletInfo {
    #[must_use]
    pub const fn new(tablet_id: TabletId, schema_hash: SchemaHash, tablet_uid: TabletUid) -> Self {
        Self {
            tablet_id,
            schema_hash,
            tablet_uid,
        }
    }
}

/// Kind of device backing a storage directory
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum StorageMedium {
    #[default]
    #[display("HDD")]
    Hdd,
    #[display("SSD")]
    Ssd,
}

/// Update model of a tablet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeysType {
    #[default]
    DupKeys,
    UniqueKeys,
    AggKeys,
    /// Primary-key tablets rebuild visible rowsets through their own apply path
    PrimaryKeys,
}

/// Lifecycle state of a tablet
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TabletState {
    #[default]
    Running,
    NotReady,
    Tombstoned,
    Stopped,
    Shutdown,
}

/// Lifecycle state of a rowset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowsetState {
    #[default]
    Prepared,
    Committed,
    Visible,
}

/// Inclusive version range covered by a rowset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub first: i64,
    pub second: i64,
}

impl Version {
    #[must_use]
    pub const fn new(first: i64, second: i64) -> Self {
        Self { first, second }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rowset_id_validation() {
        assert!(RowsetId::new("0200000000000001a94f").is_some());
        assert!(RowsetId::new("").is_none());
        assert!(RowsetId::new("abc_0").is_none());
        assert!(RowsetId::new("abc.dat").is_none());
    }

    #[test]
    fn test_tablet_uid_bytes() {
        let uid = TabletUid::new();
        assert_eq!(TabletUid::from_bytes(*uid.as_bytes()), uid);
        assert_ne!(TabletUid::new(), uid);
    }

    #[test]
    fn test_tablet_info_set_membership() {
        use std::collections::HashSet;

        let uid = TabletUid::new();
        let mut set = HashSet::new();
        set.insert(TabletInfo::new(1, 2, uid));
        set.insert(TabletInfo::new(1, 2, uid));
        set.insert(TabletInfo::new(1, 2, TabletUid::new()));
        assert_eq!(set.len(), 2);
    }
}
