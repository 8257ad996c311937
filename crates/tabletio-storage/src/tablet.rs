//! Tablets, rowsets and their persisted metadata

use crate::data_dir::DataDir;
use crate::layout;
use crate::meta_manager::RowsetMetaManager;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tabletio_common::{
    Error, KeysType, PartitionId, Result, RowsetId, RowsetState, SchemaHash, TabletId, TabletInfo,
    TabletState, TabletUid, TxnId, Version,
};
use uuid::Uuid;

/// Column layout of a tablet
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletSchema {
    pub keys_type: KeysType,
    pub num_columns: u32,
    pub num_short_key_columns: u32,
    /// Bumped by every schema change
    pub schema_version: i32,
}

/// Persisted description of one rowset
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowsetMeta {
    pub rowset_id: RowsetId,
    pub tablet_id: TabletId,
    pub tablet_uid: TabletUid,
    pub tablet_schema_hash: SchemaHash,
    pub partition_id: PartitionId,
    pub txn_id: TxnId,
    pub load_id: Uuid,
    pub state: RowsetState,
    pub version: Version,
    pub num_segments: u32,
    /// Schema the rowset was written with; absent in metas from older writers
    pub tablet_schema: Option<TabletSchema>,
}

impl RowsetMeta {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("failed to encode rowset meta: {}", e)))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| Error::Deserialization(format!("failed to decode rowset meta: {}", e)))
    }
}

/// Persisted description of one tablet
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletMeta {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub tablet_uid: TabletUid,
    pub partition_id: PartitionId,
    pub shard_id: u64,
    /// Seconds since the epoch; the newer incarnation wins on id conflicts
    pub creation_time: i64,
    pub state: TabletState,
    pub schema: TabletSchema,
    /// Visible rowsets of the tablet
    pub rowset_metas: Vec<RowsetMeta>,
}

impl TabletMeta {
    pub fn new(
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        shard_id: u64,
        schema: TabletSchema,
    ) -> Self {
        Self {
            tablet_id,
            schema_hash,
            tablet_uid: TabletUid::new(),
            partition_id: 0,
            shard_id,
            creation_time: 0,
            state: TabletState::Running,
            schema,
            rowset_metas: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("failed to encode tablet meta: {}", e)))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| Error::Deserialization(format!("failed to decode tablet meta: {}", e)))
    }

    pub fn info(&self) -> TabletInfo {
        TabletInfo::new(self.tablet_id, self.schema_hash, self.tablet_uid)
    }
}

/// Partial-column update files layered over a primary-key tablet's rowsets
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaColumnGroup {
    pub version: i64,
    pub column_ids: Vec<u32>,
    /// File names relative to the tablet's schema-hash directory
    pub column_files: Vec<String>,
}

impl DeltaColumnGroup {
    pub fn relative_column_files(&self) -> &[String] {
        &self.column_files
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("failed to encode delta column group: {}", e)))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(|e| {
            Error::Deserialization(format!("failed to decode delta column group: {}", e))
        })
    }
}

/// A rowset bound to the directory holding its files
#[derive(Debug)]
pub struct Rowset {
    meta: RowsetMeta,
    schema: TabletSchema,
    rowset_path: PathBuf,
}

impl Rowset {
    /// Build a rowset from its meta, validating the meta first
    pub fn create(schema: &TabletSchema, rowset_path: &Path, meta: RowsetMeta) -> Result<Arc<Self>> {
        // Decoded ids skip the constructor's checks
        if RowsetId::new(meta.rowset_id.as_str()).is_none() {
            return Err(Error::corruption(format!(
                "invalid rowset id {:?} in meta of tablet {}",
                meta.rowset_id.as_str(),
                meta.tablet_id
            )));
        }
        if meta.version.first > meta.version.second {
            return Err(Error::corruption(format!(
                "rowset {} has inverted version {}",
                meta.rowset_id, meta.version
            )));
        }
        if meta.tablet_id <= 0 {
            return Err(Error::corruption(format!(
                "rowset {} has invalid tablet id {}",
                meta.rowset_id, meta.tablet_id
            )));
        }
        Ok(Arc::new(Self {
            schema: meta.tablet_schema.clone().unwrap_or_else(|| schema.clone()),
            meta,
            rowset_path: rowset_path.to_path_buf(),
        }))
    }

    pub fn rowset_id(&self) -> &RowsetId {
        &self.meta.rowset_id
    }

    pub fn version(&self) -> Version {
        self.meta.version
    }

    pub fn meta(&self) -> &RowsetMeta {
        &self.meta
    }

    pub fn schema(&self) -> &TabletSchema {
        &self.schema
    }

    pub fn segment_file_path(&self, segment_id: u32) -> PathBuf {
        self.rowset_path
            .join(layout::segment_file_name(&self.meta.rowset_id, segment_id))
    }
}

/// A loaded tablet
///
/// Owned by the catalog. It only keeps a weak link back to the directory that
/// loaded it, so dropping it from the catalog is enough to release it.
pub struct Tablet {
    meta: RwLock<TabletMeta>,
    data_dir: Weak<DataDir>,
    data_dir_hash: u64,
    schema_hash_path: PathBuf,
    /// Rowsets loaded into the read path, keyed by id
    active_rowsets: RwLock<HashMap<RowsetId, Arc<Rowset>>>,
    migrating: AtomicBool,
    need_apply: AtomicBool,
    rowsets_loaded: AtomicBool,
}

impl Tablet {
    pub fn new(meta: TabletMeta, data_dir: &Arc<DataDir>) -> Self {
        let schema_hash_path =
            data_dir.get_absolute_tablet_path(meta.shard_id, meta.tablet_id, meta.schema_hash);
        Self {
            meta: RwLock::new(meta),
            data_dir: Arc::downgrade(data_dir),
            data_dir_hash: data_dir.path_hash(),
            schema_hash_path,
            active_rowsets: RwLock::new(HashMap::new()),
            migrating: AtomicBool::new(false),
            need_apply: AtomicBool::new(false),
            rowsets_loaded: AtomicBool::new(false),
        }
    }

    pub fn tablet_id(&self) -> TabletId {
        self.meta.read().tablet_id
    }

    pub fn schema_hash(&self) -> SchemaHash {
        self.meta.read().schema_hash
    }

    pub fn tablet_uid(&self) -> TabletUid {
        self.meta.read().tablet_uid
    }

    pub fn info(&self) -> TabletInfo {
        self.meta.read().info()
    }

    pub fn keys_type(&self) -> KeysType {
        self.meta.read().schema.keys_type
    }

    pub fn tablet_state(&self) -> TabletState {
        self.meta.read().state
    }

    pub fn set_tablet_state(&self, state: TabletState) {
        self.meta.write().state = state;
    }

    pub fn creation_time(&self) -> i64 {
        self.meta.read().creation_time
    }

    pub fn tablet_schema(&self) -> TabletSchema {
        self.meta.read().schema.clone()
    }

    /// Snapshot of the persisted meta
    pub fn tablet_meta(&self) -> TabletMeta {
        self.meta.read().clone()
    }

    pub fn schema_hash_path(&self) -> &Path {
        &self.schema_hash_path
    }

    /// Directory holding this tablet, if it is still alive
    pub fn data_dir(&self) -> Option<Arc<DataDir>> {
        self.data_dir.upgrade()
    }

    /// Path hash of the directory that loaded this tablet
    pub fn data_dir_hash(&self) -> u64 {
        self.data_dir_hash
    }

    pub fn is_migrating(&self) -> bool {
        self.migrating.load(Ordering::Acquire)
    }

    pub fn set_migrating(&self, migrating: bool) {
        self.migrating.store(migrating, Ordering::Release);
    }

    /// Whether committed updates are still waiting to be applied
    pub fn need_apply(&self) -> bool {
        self.need_apply.load(Ordering::Acquire)
    }

    pub fn set_need_apply(&self, need_apply: bool) {
        self.need_apply.store(need_apply, Ordering::Release);
    }

    /// Add a visible rowset to the read path
    pub fn load_rowset(&self, rowset: Arc<Rowset>) -> Result<()> {
        let mut active = self.active_rowsets.write();
        if active.contains_key(rowset.rowset_id()) {
            return Err(Error::already_exists(format!(
                "rowset {} already loaded into tablet {}",
                rowset.rowset_id(),
                self.tablet_id()
            )));
        }
        if let Some(other) = active.values().find(|r| r.version() == rowset.version()) {
            return Err(Error::internal(format!(
                "tablet {} already has rowset {} for version {}",
                self.tablet_id(),
                other.rowset_id(),
                rowset.version()
            )));
        }
        active.insert(rowset.rowset_id().clone(), rowset);
        Ok(())
    }

    pub fn active_rowset_count(&self) -> usize {
        self.active_rowsets.read().len()
    }

    pub fn get_rowset(&self, rowset_id: &RowsetId) -> Option<Arc<Rowset>> {
        self.active_rowsets.read().get(rowset_id).cloned()
    }

    pub fn has_active_rowset(&self, rowset_id: &RowsetId) -> bool {
        self.active_rowsets.read().contains_key(rowset_id)
    }

    /// Whether `rowset_id` is still referenced by this tablet
    ///
    /// Besides the read path and the tablet meta, a rowset meta record under
    /// this tablet's uid (a committed, unpublished txn) also counts. When the
    /// directory or its metadata store is unreachable the rowset is kept.
    pub fn check_rowset_id(&self, rowset_id: &RowsetId) -> bool {
        if self.has_active_rowset(rowset_id) {
            return true;
        }
        let tablet_uid = {
            let meta = self.meta.read();
            if meta.rowset_metas.iter().any(|rs| &rs.rowset_id == rowset_id) {
                return true;
            }
            meta.tablet_uid
        };
        let Some(data_dir) = self.data_dir() else {
            return true;
        };
        match data_dir.meta_store() {
            Ok(store) => RowsetMetaManager::exists(store, &tablet_uid, rowset_id),
            Err(_) => true,
        }
    }

    /// Fill the tablet schema into rowset metas that lack one
    ///
    /// Returns true if any meta changed and the tablet meta should be saved.
    pub fn set_tablet_schema_into_rowset_meta(&self) -> bool {
        let mut meta = self.meta.write();
        let schema = meta.schema.clone();
        let mut changed = false;
        for rs in meta.rowset_metas.iter_mut().filter(|rs| rs.tablet_schema.is_none()) {
            rs.tablet_schema = Some(schema.clone());
            changed = true;
        }
        changed
    }

    /// Check that every rowset the meta lists made it into the read path
    ///
    /// Primary-key tablets rebuild their rowsets separately and always pass.
    pub fn finish_load_rowsets(&self) -> Result<()> {
        self.rowsets_loaded.store(true, Ordering::Release);
        let meta = self.meta.read();
        if meta.schema.keys_type == KeysType::PrimaryKeys {
            return Ok(());
        }

        let active = self.active_rowsets.read();
        let missing: BTreeSet<Version> = meta
            .rowset_metas
            .iter()
            .filter(|rs| !active.contains_key(&rs.rowset_id))
            .map(|rs| rs.version)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            let versions: Vec<String> = missing.iter().map(ToString::to_string).collect();
            Err(Error::not_found(format!(
                "tablet {} is missing rowsets for versions [{}]",
                meta.tablet_id,
                versions.join(", ")
            )))
        }
    }

    pub fn rowsets_loaded(&self) -> bool {
        self.rowsets_loaded.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Tablet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.meta.read();
        f.debug_struct("Tablet")
            .field("tablet_id", &meta.tablet_id)
            .field("schema_hash", &meta.schema_hash)
            .field("tablet_uid", &meta.tablet_uid)
            .field("state", &meta.state)
            .finish_non_exhaustive()
    }
}
