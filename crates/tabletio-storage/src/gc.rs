//! Garbage collection of a data directory
//!
//! The path scans only collect candidates. The sweeps decide, delete, and
//! clear their candidate set. Scans and sweeps serialize on the directory's
//! candidate mutex, and a scan refuses to run while earlier candidates are
//! still waiting for their sweep.

use crate::data_dir::DataDir;
use crate::layout::{self, DATA_PREFIX};
use crate::meta_manager::TabletMetaManager;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tabletio_common::{KeysType, TabletId, TabletState};
use tracing::{debug, info, warn};

/// Deleted tablet paths are logged in batches of this size
const DELETED_PATH_LOG_BATCH: usize = 50;

/// Paths collected by the scans, waiting for a sweep
#[derive(Debug, Default)]
pub(crate) struct GcCandidates {
    /// `data/<shard>/<tablet_id>/<schema_hash>` directories
    pub(crate) tablet_paths: BTreeSet<PathBuf>,
    /// Files and index directories inside schema-hash directories
    pub(crate) check_paths: BTreeSet<PathBuf>,
    /// Delta column (`.cols`) files
    pub(crate) dcg_paths: BTreeSet<PathBuf>,
    /// Temp merge (`.crm`) files under `tmp/`
    pub(crate) crm_paths: BTreeSet<PathBuf>,
}

impl GcCandidates {
    pub(crate) fn is_empty(&self) -> bool {
        self.tablet_paths.is_empty()
            && self.check_paths.is_empty()
            && self.dcg_paths.is_empty()
            && self.crm_paths.is_empty()
    }
}

/// Sleeps every `step` paths so a sweep does not hog the disk
struct Throttle {
    step: usize,
    interval: Duration,
    counter: usize,
}

impl Throttle {
    fn new(dir: &DataDir) -> Self {
        Self {
            step: dir.config().path_gc_check_step,
            interval: dir.config().path_gc_step_interval(),
            counter: 0,
        }
    }

    fn tick(&mut self) {
        self.counter += 1;
        if self.step > 0 && self.counter % self.step == 0 {
            std::thread::sleep(self.interval);
        }
    }
}

impl DataDir {
    /// Collect tablet directories and their files as GC candidates
    ///
    /// Returns the number of paths collected.
    pub fn perform_path_scan(&self) -> usize {
        if self.bg_worker_stopped() {
            return 0;
        }
        let mut candidates = self.gc_candidates.lock();
        if !candidates.tablet_paths.is_empty()
            || !candidates.check_paths.is_empty()
            || !candidates.dcg_paths.is_empty()
        {
            info!(
                "{} has {} tablet paths, {} paths and {} delta column files still waiting for gc, skip path scan",
                self.path().display(),
                candidates.tablet_paths.len(),
                candidates.check_paths.len(),
                candidates.dcg_paths.len()
            );
            return 0;
        }

        let data_path = self.path().join(DATA_PREFIX);
        let shards = match std::fs::read_dir(&data_path) {
            Ok(shards) => shards,
            Err(e) => {
                warn!("failed to list {}, abort path scan: {}", data_path.display(), e);
                return 0;
            }
        };

        let mut collected = 0;
        for shard in sub_dirs(shards) {
            let Some(tablets) = read_dir_or_warn(&shard) else {
                continue;
            };
            for tablet_id_path in sub_dirs(tablets) {
                let Some(schema_hashes) = read_dir_or_warn(&tablet_id_path) else {
                    continue;
                };
                for schema_hash_path in sub_dirs(schema_hashes) {
                    let files = read_dir_or_warn(&schema_hash_path);
                    candidates.tablet_paths.insert(schema_hash_path);
                    collected += 1;
                    let Some(files) = files else {
                        continue;
                    };
                    for entry in files.filter_map(|e| e.ok()) {
                        let Ok(file_type) = entry.file_type() else {
                            continue;
                        };
                        let name = entry.file_name();
                        let name = name.to_string_lossy();
                        if file_type.is_dir() {
                            if layout::is_index_dir(&name) {
                                candidates.check_paths.insert(entry.path());
                                collected += 1;
                            }
                        } else if layout::is_delta_column_file(&name) {
                            candidates.dcg_paths.insert(entry.path());
                            collected += 1;
                        } else {
                            candidates.check_paths.insert(entry.path());
                            collected += 1;
                        }
                    }
                }
            }
        }
        info!(
            "path scan of {} collected {} tablet paths, {} paths and {} delta column files",
            self.path().display(),
            candidates.tablet_paths.len(),
            candidates.check_paths.len(),
            candidates.dcg_paths.len()
        );
        collected
    }

    /// Collect temp merge files under `tmp/`
    pub fn perform_tmp_path_scan(&self) -> usize {
        if self.bg_worker_stopped() {
            return 0;
        }
        let mut candidates = self.gc_candidates.lock();
        if !candidates.crm_paths.is_empty() {
            info!(
                "{} has {} crm files still waiting for gc, skip tmp path scan",
                self.path().display(),
                candidates.crm_paths.len()
            );
            return 0;
        }

        let tmp_path = self.get_tmp_path();
        let Some(entries) = read_dir_or_warn(&tmp_path) else {
            return 0;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let is_file = entry.file_type().is_ok_and(|t| t.is_file());
            if is_file && layout::is_crm_file(&entry.file_name().to_string_lossy()) {
                candidates.crm_paths.insert(entry.path());
            }
        }
        debug!(
            "tmp path scan of {} collected {} crm files",
            self.path().display(),
            candidates.crm_paths.len()
        );
        candidates.crm_paths.len()
    }

    /// Delete tablet directories whose tablet the catalog no longer knows
    ///
    /// Returns the number of tablet directories deleted.
    pub fn perform_path_gc_by_tablet(&self) -> usize {
        if self.bg_worker_stopped() {
            return 0;
        }
        let mut candidates = self.gc_candidates.lock();
        if candidates.tablet_paths.is_empty() {
            return 0;
        }
        info!(
            "start to path gc by tablet on {}, {} paths",
            self.path().display(),
            candidates.tablet_paths.len()
        );

        let catalog = self.tablet_catalog();
        let mut throttle = Throttle::new(self);
        let mut deleted = 0;
        let mut batch: Vec<PathBuf> = Vec::new();
        for path in &candidates.tablet_paths {
            throttle.tick();
            let Some((tablet_id, schema_hash)) = catalog.get_tablet_id_and_schema_hash_from_path(path)
            else {
                warn!("unknown path {} found during path gc", path.display());
                continue;
            };
            if catalog.get_tablet(tablet_id, true).is_some() {
                continue;
            }

            let Some(tablet_id_path) = path.parent() else {
                continue;
            };
            // <root>/data/<shard>/<tablet_id>
            let Some(root) = tablet_id_path.ancestors().nth(3) else {
                continue;
            };
            if self.registry().get_store(root).is_none() {
                continue;
            }

            debug!("tablet {}.{} is gone, delete {}", tablet_id, schema_hash, tablet_id_path.display());
            if !process_garbage_path(tablet_id_path) {
                continue;
            }
            deleted += 1;
            batch.push(tablet_id_path.to_path_buf());
            if batch.len() >= DELETED_PATH_LOG_BATCH {
                info!("deleted {} tablet paths: {:?}", batch.len(), batch);
                batch.clear();
            }
        }
        if !batch.is_empty() {
            info!("deleted {} tablet paths: {:?}", batch.len(), batch);
        }
        candidates.tablet_paths.clear();
        info!("finished path gc by tablet on {}, deleted {}", self.path().display(), deleted);
        deleted
    }

    /// Delete rowset files that their tablet no longer references
    pub fn perform_path_gc_by_rowsetid(&self) -> usize {
        if self.bg_worker_stopped() {
            return 0;
        }
        let mut candidates = self.gc_candidates.lock();
        if candidates.check_paths.is_empty() {
            return 0;
        }
        info!(
            "start to path gc by rowset id on {}, {} paths",
            self.path().display(),
            candidates.check_paths.len()
        );

        let catalog = self.tablet_catalog();
        let mut throttle = Throttle::new(self);
        let mut deleted = 0;
        for path in &candidates.check_paths {
            throttle.tick();
            let Some((tablet_id, _)) = catalog.get_tablet_id_and_schema_hash_from_path(path) else {
                warn!("unknown path {} found during rowset gc", path.display());
                continue;
            };
            let Some(rowset_id) = catalog.get_rowset_id_from_path(path) else {
                continue;
            };
            let Some(tablet) = catalog.get_tablet(tablet_id, true) else {
                continue;
            };
            if tablet.check_rowset_id(&rowset_id)
                || self.registry().check_rowset_id_in_unused_rowsets(&rowset_id)
            {
                continue;
            }
            debug!(
                "rowset {} is not referenced by tablet {}, delete {}",
                rowset_id,
                tablet_id,
                path.display()
            );
            if process_garbage_path(path) {
                deleted += 1;
            }
        }
        candidates.check_paths.clear();
        info!("finished path gc by rowset id on {}, deleted {}", self.path().display(), deleted);
        deleted
    }

    /// Delete delta column files that no delta column group refers to
    pub fn perform_delta_column_files_gc(&self) -> usize {
        if self.bg_worker_stopped() {
            return 0;
        }
        let mut candidates = self.gc_candidates.lock();
        if candidates.dcg_paths.is_empty() {
            return 0;
        }
        let store = match self.meta_store() {
            Ok(store) => store,
            Err(e) => {
                warn!("skip delta column gc: {}", e);
                return 0;
            }
        };

        let catalog = self.tablet_catalog();
        let mut throttle = Throttle::new(self);
        let mut referenced: HashMap<TabletId, HashSet<String>> = HashMap::new();
        let mut deleted = 0;
        for path in &candidates.dcg_paths {
            throttle.tick();
            let Some((tablet_id, _)) = catalog.get_tablet_id_and_schema_hash_from_path(path) else {
                continue;
            };
            let Some(tablet) = catalog.get_tablet(tablet_id, false) else {
                continue;
            };
            if tablet.keys_type() != KeysType::PrimaryKeys
                || tablet.tablet_state() != TabletState::Running
                || catalog.check_clone_tablet(tablet_id)
                || tablet.is_migrating()
                || tablet.need_apply()
            {
                continue;
            }

            if !referenced.contains_key(&tablet_id) {
                match TabletMetaManager::scan_tablet_delta_column_group(store, tablet_id) {
                    Ok(dcgs) => {
                        let files = dcgs
                            .iter()
                            .flat_map(|dcg| dcg.relative_column_files().iter().cloned())
                            .collect();
                        referenced.insert(tablet_id, files);
                    }
                    Err(e) => {
                        warn!("failed to read delta column groups of tablet {}: {}", tablet_id, e);
                        continue;
                    }
                }
            }
            let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
                continue;
            };
            if referenced
                .get(&tablet_id)
                .is_some_and(|files| !files.contains(name.as_ref()))
            {
                debug!("delta column file {} is not referenced, delete it", path.display());
                if process_garbage_path(path) {
                    deleted += 1;
                }
            }
        }
        candidates.dcg_paths.clear();
        info!("finished delta column gc on {}, deleted {}", self.path().display(), deleted);
        deleted
    }

    /// Delete temp merge files older than `threshold`
    pub fn perform_crm_gc(&self, threshold: Duration) -> usize {
        if self.bg_worker_stopped() {
            return 0;
        }
        let mut candidates = self.gc_candidates.lock();
        if candidates.crm_paths.is_empty() {
            return 0;
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let mut throttle = Throttle::new(self);
        let mut deleted = 0;
        for path in &candidates.crm_paths {
            throttle.tick();
            let Some(mtime) = modified_secs(path) else {
                continue;
            };
            if now >= mtime.saturating_add(threshold.as_secs()) {
                debug!("crm file {} is stale, delete it", path.display());
                if process_garbage_path(path) {
                    deleted += 1;
                }
            }
        }
        candidates.crm_paths.clear();
        info!("finished crm gc on {}, deleted {}", self.path().display(), deleted);
        deleted
    }

    #[cfg(test)]
    pub(crate) fn gc_candidates_empty(&self) -> bool {
        self.gc_candidates.lock().is_empty()
    }
}

/// Seconds since the epoch of the last modification, `None` if unknown
fn modified_secs(path: &Path) -> Option<u64> {
    let mtime = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let secs = mtime.duration_since(UNIX_EPOCH).ok()?.as_secs();
    (secs > 0).then_some(secs)
}

fn read_dir_or_warn(path: &Path) -> Option<std::fs::ReadDir> {
    std::fs::read_dir(path)
        .inspect_err(|e| warn!("failed to list {}: {}", path.display(), e))
        .ok()
}

/// Subdirectories of a listing; unreadable entries are skipped
fn sub_dirs(entries: std::fs::ReadDir) -> impl Iterator<Item = PathBuf> {
    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .map(|entry| entry.path())
}

/// Remove `path` recursively if it still exists; failures are only logged
///
/// Returns true if something was actually removed.
pub fn process_garbage_path(path: &Path) -> bool {
    let Ok(metadata) = std::fs::symlink_metadata(path) else {
        return false;
    };
    let removed = if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match removed {
        Ok(()) => true,
        Err(e) => {
            warn!("failed to remove garbage path {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DropFlag, TabletCatalog};
    use crate::data_dir::tests::{TestDir, open_test_dir};
    use crate::layout::TMP_PREFIX;
    use crate::meta_manager::RowsetMetaManager;
    use crate::tablet::tests::rowset_meta;
    use crate::tablet::{DeltaColumnGroup, Rowset, Tablet, TabletMeta, TabletSchema};
    use std::sync::Arc;
    use tabletio_common::{RowsetId, RowsetState, StorageConfig};

    fn config() -> StorageConfig {
        StorageConfig {
            path_gc_check_step: 2,
            path_gc_check_step_interval_ms: 1,
            ..Default::default()
        }
    }

    fn create_tablet(t: &TestDir, tablet_id: TabletId, schema_hash: i32, keys_type: KeysType) -> Arc<Tablet> {
        let schema = TabletSchema {
            keys_type,
            ..Default::default()
        };
        let mut meta = TabletMeta::new(tablet_id, schema_hash, 0, schema);
        meta.rowset_metas
            .push(rowset_meta(&meta, "rowset1", RowsetState::Visible, 1));
        let tablet = t.catalog.create_tablet(&t.dir, &meta).unwrap();
        std::fs::create_dir_all(tablet.schema_hash_path()).unwrap();
        tablet
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_live_tablet_files_survive_gc() {
        let t = open_test_dir(config());
        create_tablet(&t, 100, 200, KeysType::DupKeys);
        let file = t.root.path().join("data/0/100/200/rowset1.dat");
        touch(&file);

        assert_eq!(t.dir.perform_path_scan(), 2);
        assert_eq!(t.dir.perform_path_gc_by_tablet(), 0);
        assert_eq!(t.dir.perform_path_gc_by_rowsetid(), 0);
        assert!(file.exists());
        assert!(t.dir.gc_candidates_empty());
    }

    #[test]
    fn test_orphan_tablet_and_rowset_are_deleted() {
        let t = open_test_dir(config());
        create_tablet(&t, 100, 200, KeysType::DupKeys);
        let stale_rowset = t.root.path().join("data/0/100/200/stale_0.dat");
        let stale_index = t.root.path().join("data/0/100/200/stale_0_1.ivt");
        let orphan = t.root.path().join("data/3/555/777/rowsetx_0.dat");
        let unknown = t.root.path().join("data/0/100/200/notes.txt");
        touch(&stale_rowset);
        touch(&orphan);
        touch(&unknown);
        std::fs::create_dir_all(&stale_index).unwrap();

        t.dir.perform_path_scan();
        assert_eq!(t.dir.perform_path_gc_by_tablet(), 1);
        assert!(!t.root.path().join("data/3/555").exists());
        assert!(t.root.path().join("data/3").exists());

        assert_eq!(t.dir.perform_path_gc_by_rowsetid(), 2);
        assert!(!stale_rowset.exists());
        assert!(!stale_index.exists());
        assert!(unknown.exists());
        assert!(t.root.path().join("data/0/100/200").is_dir());
    }

    #[test]
    fn test_soft_deleted_tablet_is_kept() {
        let t = open_test_dir(config());
        create_tablet(&t, 100, 200, KeysType::DupKeys);
        t.catalog.drop_tablet(100, DropFlag::SoftDelete).unwrap();
        touch(&t.root.path().join("data/0/100/200/rowset1.dat"));

        t.dir.perform_path_scan();
        assert_eq!(t.dir.perform_path_gc_by_tablet(), 0);
        assert!(t.root.path().join("data/0/100/200").is_dir());
    }

    #[test]
    fn test_unused_rowset_is_kept() {
        let t = open_test_dir(config());
        let tablet = create_tablet(&t, 100, 200, KeysType::DupKeys);
        let file = t.root.path().join("data/0/100/200/retired_0.dat");
        touch(&file);

        let meta = tablet.tablet_meta();
        let rowset = Rowset::create(
            &meta.schema,
            tablet.schema_hash_path(),
            rowset_meta(&meta, "retired", RowsetState::Visible, 5),
        )
        .unwrap();
        t.registry.add_unused_rowset(rowset);

        t.dir.perform_path_scan();
        assert_eq!(t.dir.perform_path_gc_by_rowsetid(), 0);
        assert_eq!(t.dir.perform_path_gc_by_tablet(), 0);
        assert!(file.exists());

        t.registry.release_unused_rowset(&RowsetId::new("retired").unwrap());
        t.dir.perform_path_scan();
        assert_eq!(t.dir.perform_path_gc_by_rowsetid(), 1);
        assert!(!file.exists());
    }

    #[test]
    fn test_delta_column_files() {
        let t = open_test_dir(config());
        create_tablet(&t, 100, 200, KeysType::PrimaryKeys);
        let store = t.dir.meta_store().unwrap();
        let dcg = DeltaColumnGroup {
            version: 3,
            column_ids: vec![1, 2],
            column_files: vec!["rowset1_0_3.cols".to_string()],
        };
        TabletMetaManager::save_delta_column_group(store, 100, 0, &dcg).unwrap();

        let live = t.root.path().join("data/0/100/200/rowset1_0_3.cols");
        let dead = t.root.path().join("data/0/100/200/rowset1_0_2.cols");
        touch(&live);
        touch(&dead);

        t.dir.perform_path_scan();
        assert_eq!(t.dir.perform_delta_column_files_gc(), 1);
        assert!(live.exists());
        assert!(!dead.exists());
    }

    #[test]
    fn test_delta_column_files_of_busy_tablet_are_kept() {
        let t = open_test_dir(config());
        let tablet = create_tablet(&t, 100, 200, KeysType::PrimaryKeys);
        let dead = t.root.path().join("data/0/100/200/rowset1_0_2.cols");
        touch(&dead);

        let sweep = |t: &TestDir| {
            t.dir.perform_path_scan();
            let deleted = t.dir.perform_delta_column_files_gc();
            t.dir.perform_path_gc_by_tablet();
            t.dir.perform_path_gc_by_rowsetid();
            deleted
        };

        tablet.set_migrating(true);
        assert_eq!(sweep(&t), 0);
        assert!(dead.exists());
        tablet.set_migrating(false);

        tablet.set_need_apply(true);
        assert_eq!(sweep(&t), 0);
        tablet.set_need_apply(false);

        t.catalog.start_clone(100);
        assert_eq!(sweep(&t), 0);
        t.catalog.finish_clone(100);
        assert!(dead.exists());

        assert_eq!(sweep(&t), 1);
        assert!(!dead.exists());
    }

    #[test]
    fn test_delta_column_files_of_non_pk_tablet_are_kept() {
        let t = open_test_dir(config());
        create_tablet(&t, 100, 200, KeysType::UniqueKeys);
        let file = t.root.path().join("data/0/100/200/rowset1_0_2.cols");
        touch(&file);

        t.dir.perform_path_scan();
        assert_eq!(t.dir.perform_delta_column_files_gc(), 0);
        assert!(file.exists());
    }

    #[test]
    fn test_crm_gc_respects_threshold() {
        let t = open_test_dir(config());
        let tmp = t.root.path().join(TMP_PREFIX);
        let old = tmp.join("old.crm");
        let fresh = tmp.join("fresh.crm");
        let other = tmp.join("other.dat");
        touch(&old);
        touch(&fresh);
        touch(&other);
        let two_hours_ago = SystemTime::now() - Duration::from_secs(7200);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(two_hours_ago)
            .unwrap();

        assert_eq!(t.dir.perform_tmp_path_scan(), 2);
        assert_eq!(t.dir.perform_crm_gc(Duration::from_secs(3600)), 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        assert!(other.exists());
        assert!(t.dir.gc_candidates_empty());
    }

    #[test]
    fn test_scans_refuse_while_candidates_pending() {
        let t = open_test_dir(config());
        create_tablet(&t, 100, 200, KeysType::DupKeys);
        touch(&t.root.path().join("data/0/100/200/rowset1.dat"));
        touch(&t.root.path().join(TMP_PREFIX).join("a.crm"));

        assert_eq!(t.dir.perform_path_scan(), 2);
        assert_eq!(t.dir.perform_path_scan(), 0);
        assert_eq!(t.dir.perform_tmp_path_scan(), 1);
        assert_eq!(t.dir.perform_tmp_path_scan(), 0);

        t.dir.perform_path_gc_by_rowsetid();
        assert_eq!(t.dir.perform_path_scan(), 0);
        t.dir.perform_path_gc_by_tablet();
        assert_eq!(t.dir.perform_path_scan(), 2);
    }

    #[test]
    fn test_stopped_dir_does_not_sweep() {
        let t = open_test_dir(config());
        touch(&t.root.path().join("data/0/555/777/rowsetx_0.dat"));
        t.dir.perform_path_scan();

        t.dir.stop_bg_worker();
        assert_eq!(t.dir.perform_path_gc_by_tablet(), 0);
        assert!(t.root.path().join("data/0/555/777").exists());
        assert_eq!(t.dir.perform_path_scan(), 0);
    }

    #[test]
    fn test_missing_data_dir_aborts_scan() {
        let t = open_test_dir(config());
        std::fs::remove_dir_all(t.root.path().join(DATA_PREFIX)).unwrap();
        assert_eq!(t.dir.perform_path_scan(), 0);
        assert!(t.dir.gc_candidates_empty());
    }

    #[test]
    fn test_process_garbage_path() {
        let t = open_test_dir(config());
        let dir = t.root.path().join("junk/a/b");
        touch(&dir.join("f"));
        assert!(process_garbage_path(&t.root.path().join("junk")));
        assert!(!t.root.path().join("junk").exists());

        // Already gone: nothing to do
        assert!(!process_garbage_path(&t.root.path().join("junk")));
    }

    #[test]
    fn test_vanished_paths_are_not_counted() {
        let t = open_test_dir(config());
        let orphan = t.root.path().join("data/3/555/777/rowsetx_0.dat");
        let crm = t.root.path().join(TMP_PREFIX).join("old.crm");
        touch(&orphan);
        touch(&crm);
        std::fs::File::options()
            .write(true)
            .open(&crm)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(7200))
            .unwrap();

        t.dir.perform_path_scan();
        t.dir.perform_tmp_path_scan();
        std::fs::remove_dir_all(t.root.path().join("data/3/555")).unwrap();
        std::fs::remove_file(&crm).unwrap();

        assert_eq!(t.dir.perform_path_gc_by_tablet(), 0);
        assert_eq!(t.dir.perform_path_gc_by_rowsetid(), 0);
        assert_eq!(t.dir.perform_crm_gc(Duration::from_secs(3600)), 0);
        assert!(t.dir.gc_candidates_empty());
    }

    #[test]
    fn test_committed_rowset_files_survive_gc() {
        let t = open_test_dir(config());
        let tablet = create_tablet(&t, 100, 200, KeysType::DupKeys);
        let store = t.dir.meta_store().unwrap();
        let meta = tablet.tablet_meta();
        let pending = rowset_meta(&meta, "pending", RowsetState::Committed, 9);
        RowsetMetaManager::save(store, &pending).unwrap();

        let report = t.dir.load().unwrap();
        assert_eq!(report.rowset_errors, 0);
        assert_eq!(t.txn.txn_count(), 1);

        let segment = t.root.path().join("data/0/100/200/pending_0.dat");
        touch(&segment);
        t.dir.perform_path_scan();
        assert_eq!(t.dir.perform_path_gc_by_rowsetid(), 0);
        assert!(segment.exists());
        assert_eq!(t.dir.perform_path_gc_by_tablet(), 0);

        // Once the txn is gone the segment is garbage
        RowsetMetaManager::remove(store, &meta.tablet_uid, &pending.rowset_id).unwrap();
        t.dir.perform_path_scan();
        assert_eq!(t.dir.perform_path_gc_by_rowsetid(), 1);
        assert!(!segment.exists());
    }
}
