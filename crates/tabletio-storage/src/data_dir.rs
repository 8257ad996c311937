//! Data directory lifecycle
//!
//! One [`DataDir`] per physical disk or mount. It owns the directory identity
//! (root path, medium, path hash, cluster id), the on-disk layout, the
//! metadata store and the set of tablets attached to it. Recovery lives in
//! `loader.rs` and garbage collection in `gc.rs`.

use crate::capacity::Capacity;
use crate::catalog::TabletCatalog;
use crate::cluster_id::ClusterIdMgr;
use crate::gc::GcCandidates;
use crate::health::{PROBE_RETRIES, read_write_test_file};
use crate::layout::{
    ALIGN_TAG_FILE, DATA_PREFIX, MAX_SHARD_NUM, META_PREFIX, PERSISTENT_INDEX_PREFIX, TEST_FILE,
    TMP_PREFIX, TRASH_PREFIX,
};
use crate::metadata::{MetadataStore, MetadataStoreConfig};
use crate::registry::StoreRegistry;
use crate::txn::TxnManager;
use derive_more::Display;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tabletio_common::{
    Error, Result, SchemaHash, StorageConfig, StorageMedium, TabletId, TabletInfo,
};
use tracing::{info, warn};

/// Operational state of a directory
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display)]
pub enum DiskState {
    #[display("ONLINE")]
    Online,
    /// Not initialized yet, or every health probe failed with an I/O error
    #[default]
    #[display("OFFLINE")]
    Offline,
    #[display("DECOMMISSIONED")]
    Decommissioned,
    #[display("DISABLED")]
    Disabled,
}

/// Collaborators shared by every directory on a node
#[derive(Clone)]
pub struct StoreContext {
    pub config: Arc<StorageConfig>,
    /// Host name mixed into path hashes
    pub host: String,
    pub tablet_catalog: Arc<dyn TabletCatalog>,
    pub txn_manager: Arc<dyn TxnManager>,
    pub registry: Arc<StoreRegistry>,
}

/// Fields guarded by the directory mutex
#[derive(Default)]
struct DirState {
    current_shard: u64,
    tablet_set: HashSet<TabletInfo>,
}

pub struct DataDir {
    path: PathBuf,
    path_hash: u64,
    medium: StorageMedium,
    state: RwLock<DiskState>,
    capacity: Capacity,
    cluster_id_mgr: ClusterIdMgr,
    inner: Mutex<DirState>,
    /// Candidate sets shared by the path scans and the GC sweeps
    pub(crate) gc_candidates: Mutex<GcCandidates>,
    stop_bg_worker: AtomicBool,
    meta_store: OnceLock<MetadataStore>,
    ctx: StoreContext,
}

/// Identity hash of a directory on a host
pub fn hash_of_path(host: &str, path: &Path) -> u64 {
    let mut key = String::with_capacity(host.len() + path.as_os_str().len());
    key.push_str(host);
    key.push_str(&path.to_string_lossy());
    xxhash_rust::xxh64::xxh64(key.as_bytes(), 0)
}

impl DataDir {
    /// Create a directory handle and register it with `ctx.registry`
    ///
    /// Nothing touches the disk until [`init`](Self::init).
    pub fn new(path: impl Into<PathBuf>, medium: StorageMedium, ctx: StoreContext) -> Arc<Self> {
        let path = path.into();
        let dir = Arc::new(Self {
            path_hash: hash_of_path(&ctx.host, &path),
            cluster_id_mgr: ClusterIdMgr::new(&path),
            path,
            medium,
            state: RwLock::new(DiskState::Offline),
            capacity: Capacity::default(),
            inner: Mutex::new(DirState::default()),
            gc_candidates: Mutex::new(GcCandidates::default()),
            stop_bg_worker: AtomicBool::new(false),
            meta_store: OnceLock::new(),
            ctx,
        });
        dir.ctx.registry.register(&dir);
        dir
    }

    /// Prepare the on-disk layout and open the metadata store
    ///
    /// The directory only becomes ONLINE once every step succeeded.
    pub fn init(&self) -> Result<()> {
        if !self.path.is_dir() {
            return Err(Error::not_found(format!(
                "data dir {} does not exist",
                self.path.display()
            )));
        }
        let align_tag = self.path.join(ALIGN_TAG_FILE);
        if align_tag.exists() {
            warn!("align tag {} was found, refusing to use {}", align_tag.display(), self.path.display());
            return Err(Error::not_found(format!("align tag {} was found", align_tag.display())));
        }

        self.update_capacity()
            .inspect_err(|e| warn!("update capacity of {} failed: {}", self.path.display(), e))?;
        self.cluster_id_mgr
            .init()
            .inspect_err(|e| warn!("cluster id init of {} failed: {}", self.path.display(), e))?;
        self.create_dir_if_path_not_exists(&self.path.join(DATA_PREFIX))?;
        self.create_dir_if_path_not_exists(&self.get_tmp_path())?;
        self.create_dir_if_path_not_exists(&self.get_persistent_index_path())?;
        self.init_meta()
            .inspect_err(|e| warn!("failed to init meta store of {}: {}", self.path.display(), e))?;

        *self.state.write() = DiskState::Online;
        info!(
            "data dir {} ({}) is online, path hash {}",
            self.path.display(),
            self.medium,
            self.path_hash
        );
        Ok(())
    }

    fn init_meta(&self) -> Result<()> {
        let store = MetadataStore::open_or_create(MetadataStoreConfig::with_data_dir(
            self.path.join(META_PREFIX),
        ))?;
        self.meta_store
            .set(store)
            .map_err(|_| Error::already_exists(format!("meta store of {} already open", self.path.display())))
    }

    /// The metadata store, available once [`init`](Self::init) succeeded
    pub fn meta_store(&self) -> Result<&MetadataStore> {
        self.meta_store
            .get()
            .ok_or_else(|| Error::internal(format!("data dir {} is not initialized", self.path.display())))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_hash(&self) -> u64 {
        self.path_hash
    }

    pub fn storage_medium(&self) -> StorageMedium {
        self.medium
    }

    pub fn state(&self) -> DiskState {
        *self.state.read()
    }

    /// Mark the directory decommissioned or disabled, or bring it back
    pub fn set_state(&self, state: DiskState) {
        let mut current = self.state.write();
        if *current != state {
            info!("data dir {} state {} -> {}", self.path.display(), *current, state);
            *current = state;
        }
    }

    /// Whether the directory accepts new tablets
    pub fn is_used(&self) -> bool {
        self.state() == DiskState::Online
    }

    pub fn config(&self) -> &StorageConfig {
        &self.ctx.config
    }

    pub fn tablet_catalog(&self) -> &Arc<dyn TabletCatalog> {
        &self.ctx.tablet_catalog
    }

    pub fn txn_manager(&self) -> &Arc<dyn TxnManager> {
        &self.ctx.txn_manager
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.ctx.registry
    }

    pub fn cluster_id(&self) -> Option<i32> {
        self.cluster_id_mgr.cluster_id()
    }

    pub fn set_cluster_id(&self, cluster_id: i32) -> Result<()> {
        self.cluster_id_mgr.set_cluster_id(cluster_id)
    }

    /// Ask every GC sweep of this directory to stop
    pub fn stop_bg_worker(&self) {
        self.stop_bg_worker.store(true, Ordering::Release);
    }

    pub fn bg_worker_stopped(&self) -> bool {
        self.stop_bg_worker.load(Ordering::Acquire)
    }

    /// Probe the directory and move it between ONLINE and OFFLINE
    pub fn health_check(&self) {
        if matches!(self.state(), DiskState::Decommissioned | DiskState::Disabled) {
            return;
        }

        let test_file = self.path.join(TEST_FILE);
        let mut all_failed = true;
        for _ in 0..PROBE_RETRIES {
            match read_write_test_file(&test_file) {
                Err(e) if e.is_io_error() => {
                    warn!("read/write test file of {} failed: {}", self.path.display(), e);
                }
                _ => {
                    all_failed = false;
                    break;
                }
            }
        }

        let mut state = self.state.write();
        // Decommission may have raced with the probe
        if matches!(*state, DiskState::Decommissioned | DiskState::Disabled) {
            return;
        }
        if all_failed {
            warn!(
                "test file of {} failed {} times, marking it OFFLINE",
                self.path.display(),
                PROBE_RETRIES
            );
            *state = DiskState::Offline;
        } else {
            *state = DiskState::Online;
        }
    }

    pub fn update_capacity(&self) -> Result<()> {
        self.capacity.update(&self.path)
    }

    pub fn available_bytes(&self) -> u64 {
        self.capacity.available_bytes()
    }

    pub fn disk_capacity_bytes(&self) -> u64 {
        self.capacity.capacity_bytes()
    }

    /// Used fraction of the disk after writing `incoming` bytes
    pub fn disk_usage(&self, incoming: u64) -> f64 {
        self.capacity.disk_usage(incoming)
    }

    /// Whether writing `incoming` bytes would push the disk past the flood stage
    pub fn capacity_limit_reached(&self, incoming: u64) -> bool {
        let reached = self.capacity.limit_reached(incoming, &self.ctx.config);
        if reached {
            warn!(
                "reach capacity limit. used pct: {:.4}, left bytes: {}, path: {}",
                self.capacity.disk_usage(incoming),
                self.capacity.left_bytes(incoming),
                self.path.display()
            );
        }
        reached
    }

    /// Next shard index, creating its directory when needed
    ///
    /// The counter lives in memory only; a restart starts again at shard 0.
    pub fn get_shard(&self) -> Result<u64> {
        let shard = {
            let mut inner = self.inner.lock();
            let shard = inner.current_shard;
            inner.current_shard = (shard + 1) % MAX_SHARD_NUM;
            shard
        };

        let shard_path = self.get_absolute_shard_path(shard);
        let created = !shard_path.exists();
        std::fs::create_dir_all(&shard_path)?;
        if created && self.ctx.config.sync_tablet_meta {
            let data_path = self.path.join(DATA_PREFIX);
            sync_dir(&data_path)
                .inspect_err(|e| warn!("failed to sync {}: {}", data_path.display(), e))?;
        }
        Ok(shard)
    }

    pub fn register_tablet(&self, info: TabletInfo) {
        self.inner.lock().tablet_set.insert(info);
    }

    pub fn deregister_tablet(&self, info: &TabletInfo) {
        self.inner.lock().tablet_set.remove(info);
    }

    /// Move every registered tablet into `out`, leaving the set empty
    pub fn clear_tablets(&self, out: &mut Vec<TabletInfo>) {
        let mut inner = self.inner.lock();
        out.extend(inner.tablet_set.drain());
    }

    pub fn tablet_count(&self) -> usize {
        self.inner.lock().tablet_set.len()
    }

    pub fn get_absolute_shard_path(&self, shard_id: u64) -> PathBuf {
        self.path.join(DATA_PREFIX).join(shard_id.to_string())
    }

    pub fn get_absolute_tablet_path(
        &self,
        shard_id: u64,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
    ) -> PathBuf {
        self.get_absolute_shard_path(shard_id)
            .join(tablet_id.to_string())
            .join(schema_hash.to_string())
    }

    pub fn get_tmp_path(&self) -> PathBuf {
        self.path.join(TMP_PREFIX)
    }

    pub fn get_persistent_index_path(&self) -> PathBuf {
        self.path.join(PERSISTENT_INDEX_PREFIX)
    }

    pub fn create_dir_if_path_not_exists(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| {
            warn!("failed to create directory {}: {}", path.display(), e);
            Error::from(e)
        })
    }

    /// Copies of `tablet_id` under `trash/<time_label>/`
    pub fn find_tablet_in_trash(&self, tablet_id: TabletId) -> Vec<PathBuf> {
        let Ok(labels) = std::fs::read_dir(self.path.join(TRASH_PREFIX)) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = labels
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .map(|entry| entry.path().join(tablet_id.to_string()))
            .filter(|path| path.exists())
            .collect();
        paths.sort();
        paths
    }

    /// Root of the directory a trashed schema-hash path belongs to
    ///
    /// `<root>/trash/<time_label>/<tablet_id>/<schema_hash>` gives `<root>`.
    pub fn get_root_path_from_schema_hash_path_in_trash(schema_hash_dir_in_trash: &Path) -> PathBuf {
        schema_hash_dir_in_trash
            .ancestors()
            .nth(4)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for DataDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataDir")
            .field("path", &self.path)
            .field("path_hash", &self.path_hash)
            .field("medium", &self.medium)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn sync_dir(path: &Path) -> Result<()> {
    std::fs::File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::TabletManager;
    use crate::txn::MemTxnManager;
    use rand::Rng;
    use std::collections::BTreeSet;
    use tabletio_common::TabletUid;
    use tempfile::{TempDir, tempdir};

    /// A directory wired to in-memory collaborators
    pub(crate) struct TestDir {
        pub root: TempDir,
        pub dir: Arc<DataDir>,
        pub catalog: Arc<TabletManager>,
        pub txn: Arc<MemTxnManager>,
        pub registry: Arc<StoreRegistry>,
    }

    pub(crate) fn test_context(
        config: StorageConfig,
        catalog: Arc<dyn TabletCatalog>,
        txn: Arc<dyn TxnManager>,
        registry: Arc<StoreRegistry>,
    ) -> StoreContext {
        StoreContext {
            config: Arc::new(config),
            host: "127.0.0.1".to_string(),
            tablet_catalog: catalog,
            txn_manager: txn,
            registry,
        }
    }

    pub(crate) fn open_test_dir(config: StorageConfig) -> TestDir {
        let root = tempdir().unwrap();
        let catalog = Arc::new(TabletManager::new());
        let txn = Arc::new(MemTxnManager::new());
        let registry = Arc::new(StoreRegistry::new());
        let ctx = test_context(config, catalog.clone(), txn.clone(), registry.clone());
        let dir = DataDir::new(root.path(), StorageMedium::Hdd, ctx);
        dir.init().unwrap();
        TestDir {
            root,
            dir,
            catalog,
            txn,
            registry,
        }
    }

    #[test]
    fn test_init_creates_layout() {
        let t = open_test_dir(StorageConfig::default());
        assert_eq!(t.dir.state(), DiskState::Online);
        for sub in [DATA_PREFIX, TMP_PREFIX, PERSISTENT_INDEX_PREFIX, META_PREFIX] {
            assert!(t.root.path().join(sub).is_dir(), "missing {sub}");
        }
        assert!(t.dir.disk_capacity_bytes() > 0);
        assert!(t.registry.get_store(t.root.path()).is_some());
    }

    #[test]
    fn test_init_rejects_align_tag() {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join(ALIGN_TAG_FILE), b"").unwrap();
        let ctx = test_context(
            StorageConfig::default(),
            Arc::new(TabletManager::new()),
            Arc::new(MemTxnManager::new()),
            Arc::new(StoreRegistry::new()),
        );
        let dir = DataDir::new(root.path(), StorageMedium::Ssd, ctx);

        assert!(dir.init().unwrap_err().is_not_found());
        assert_eq!(dir.state(), DiskState::Offline);
        assert!(dir.meta_store().is_err());
        assert!(!root.path().join(DATA_PREFIX).exists());
    }

    #[test]
    fn test_init_rejects_missing_root() {
        let root = tempdir().unwrap();
        let ctx = test_context(
            StorageConfig::default(),
            Arc::new(TabletManager::new()),
            Arc::new(MemTxnManager::new()),
            Arc::new(StoreRegistry::new()),
        );
        let dir = DataDir::new(root.path().join("nope"), StorageMedium::Hdd, ctx);
        assert!(dir.init().unwrap_err().is_not_found());
        assert_eq!(dir.state(), DiskState::Offline);
    }

    #[test]
    fn test_path_hash_depends_on_host_and_path() {
        let a = hash_of_path("host1", Path::new("/data1"));
        assert_eq!(a, hash_of_path("host1", Path::new("/data1")));
        assert_ne!(a, hash_of_path("host2", Path::new("/data1")));
        assert_ne!(a, hash_of_path("host1", Path::new("/data2")));
    }

    #[test]
    fn test_clear_tablets_returns_registered_set() {
        let t = open_test_dir(StorageConfig::default());
        let mut rng = rand::thread_rng();
        let pool: Vec<TabletInfo> = (0..16)
            .map(|i| TabletInfo::new(i % 8, 1, TabletUid::new()))
            .collect();

        let mut expected = HashSet::new();
        for _ in 0..500 {
            let info = pool[rng.gen_range(0..pool.len())];
            if rng.gen_bool(0.6) {
                t.dir.register_tablet(info);
                expected.insert(info);
            } else {
                t.dir.deregister_tablet(&info);
                expected.remove(&info);
            }
        }

        let mut out = Vec::new();
        t.dir.clear_tablets(&mut out);
        let unique: HashSet<_> = out.iter().copied().collect();
        assert_eq!(unique.len(), out.len());
        assert_eq!(unique, expected);
        assert_eq!(t.dir.tablet_count(), 0);

        let mut again = Vec::new();
        t.dir.clear_tablets(&mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn test_same_tablet_id_different_uid_are_distinct() {
        let t = open_test_dir(StorageConfig::default());
        let old = TabletInfo::new(100, 200, TabletUid::new());
        let new = TabletInfo::new(100, 200, TabletUid::new());
        t.dir.register_tablet(old);
        t.dir.register_tablet(new);
        t.dir.deregister_tablet(&old);

        let mut out = Vec::new();
        t.dir.clear_tablets(&mut out);
        assert_eq!(out, vec![new]);
    }

    #[test]
    fn test_get_shard_cycles_without_duplicates() {
        let t = open_test_dir(StorageConfig {
            sync_tablet_meta: true,
            ..Default::default()
        });
        let dir = &t.dir;

        let shards: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        (0..MAX_SHARD_NUM / 8)
                            .map(|_| dir.get_shard().unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let unique: BTreeSet<u64> = shards.iter().copied().collect();
        assert_eq!(unique.len() as u64, MAX_SHARD_NUM);
        assert_eq!(unique.iter().next_back(), Some(&(MAX_SHARD_NUM - 1)));
        assert!(dir.get_absolute_shard_path(MAX_SHARD_NUM - 1).is_dir());

        // Full cycle done, the counter wraps
        assert_eq!(dir.get_shard().unwrap(), 0);
        assert_eq!(dir.get_shard().unwrap(), 1);
    }

    #[test]
    fn test_health_check_transitions() {
        let t = open_test_dir(StorageConfig::default());
        t.dir.health_check();
        assert_eq!(t.dir.state(), DiskState::Online);

        // The probe cannot open a directory as a file: every attempt is an I/O error
        let test_file = t.root.path().join(TEST_FILE);
        std::fs::remove_file(&test_file).unwrap();
        std::fs::create_dir(&test_file).unwrap();
        t.dir.health_check();
        assert_eq!(t.dir.state(), DiskState::Offline);

        std::fs::remove_dir(&test_file).unwrap();
        t.dir.health_check();
        assert_eq!(t.dir.state(), DiskState::Online);
    }

    #[test]
    fn test_health_check_skips_decommissioned() {
        let t = open_test_dir(StorageConfig::default());
        std::fs::create_dir(t.root.path().join(TEST_FILE)).unwrap();

        t.dir.set_state(DiskState::Decommissioned);
        t.dir.health_check();
        assert_eq!(t.dir.state(), DiskState::Decommissioned);

        t.dir.set_state(DiskState::Disabled);
        t.dir.health_check();
        assert_eq!(t.dir.state(), DiskState::Disabled);
    }

    #[test]
    fn test_tablet_paths() {
        let t = open_test_dir(StorageConfig::default());
        assert_eq!(
            t.dir.get_absolute_tablet_path(3, 100, 200),
            t.root.path().join("data/3/100/200")
        );
        assert_eq!(t.dir.get_tmp_path(), t.root.path().join("tmp"));
    }

    #[test]
    fn test_find_tablet_in_trash() {
        let t = open_test_dir(StorageConfig::default());
        let trash = t.root.path().join(TRASH_PREFIX);
        std::fs::create_dir_all(trash.join("20240101000000/100/200")).unwrap();
        std::fs::create_dir_all(trash.join("20240102000000/100/201")).unwrap();
        std::fs::create_dir_all(trash.join("20240102000000/101/200")).unwrap();
        std::fs::write(trash.join("stray"), b"").unwrap();

        let found = t.dir.find_tablet_in_trash(100);
        assert_eq!(
            found,
            vec![
                trash.join("20240101000000/100"),
                trash.join("20240102000000/100")
            ]
        );
        assert!(t.dir.find_tablet_in_trash(999).is_empty());

        assert_eq!(
            DataDir::get_root_path_from_schema_hash_path_in_trash(
                &trash.join("20240101000000/100/200")
            ),
            t.root.path()
        );
    }

    #[test]
    fn test_cluster_id_roundtrip_through_dir() {
        let t = open_test_dir(StorageConfig::default());
        assert_eq!(t.dir.cluster_id(), None);
        t.dir.set_cluster_id(7).unwrap();
        assert!(t.dir.set_cluster_id(8).is_err());
        assert_eq!(t.dir.cluster_id(), Some(7));
    }

    #[test]
    fn test_capacity_limit_uses_config() {
        let t = open_test_dir(StorageConfig {
            storage_flood_stage_usage_percent: 0,
            storage_flood_stage_left_capacity_bytes: u64::MAX,
            ..Default::default()
        });
        assert!(t.dir.capacity_limit_reached(0));

        let t = open_test_dir(StorageConfig {
            storage_flood_stage_usage_percent: 100,
            storage_flood_stage_left_capacity_bytes: 0,
            ..Default::default()
        });
        assert!(!t.dir.capacity_limit_reached(0));
    }
}
