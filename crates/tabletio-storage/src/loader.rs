//! Startup recovery of a data directory
//!
//! Phase 1 walks the tablet metas and materializes every tablet through the
//! catalog. Phase 2 traverses the rowset metas and hands each rowset either to
//! its tablet (visible) or back to the transaction manager (committed).

use crate::catalog::DropFlag;
use crate::data_dir::DataDir;
use crate::meta_manager::{RowsetMetaManager, TabletMetaManager};
use crate::metadata::MetadataStore;
use crate::tablet::{Rowset, RowsetMeta};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tabletio_common::{Error, KeysType, Result, RowsetState, TabletId};
use tracing::{debug, error, info, warn};

const MISSING_TABLET_WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of [`DataDir::load`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Tablets whose meta was walked, including ones already loaded or deleted
    pub tablet_ids: Vec<TabletId>,
    /// Tablets whose meta could not be materialized
    pub failed_tablets: Vec<TabletId>,
    /// Rowset metas traversed in phase 2
    pub rowset_total: usize,
    /// Rowset metas that could not be applied
    pub rowset_errors: usize,
    /// The first tablet-meta walk hit the load timeout and was retried
    pub walk_timed_out: bool,
}

#[derive(Default)]
struct TabletLoadState {
    tablet_ids: BTreeSet<TabletId>,
    failed: BTreeSet<TabletId>,
}

impl DataDir {
    /// Rebuild this directory's in-memory state from its metadata store
    ///
    /// Must run after [`init`](Self::init) and before the directory is used.
    /// Recoverable problems are counted in the report; an `Err` means the
    /// node must not start.
    pub fn load(self: &Arc<Self>) -> Result<LoadReport> {
        info!("start to load tablets from {}", self.path().display());
        let started = Instant::now();
        let store = self.meta_store()?;
        let mut report = LoadReport::default();

        let mut state = TabletLoadState::default();
        let mut walk = self.load_tablet_metas(store, &mut state, self.config().load_tablet_timeout());
        if walk.as_ref().is_err_and(Error::is_timeout) {
            warn!(
                "load tablets from {} timed out after {:?}, compact meta and retry",
                self.path().display(),
                started.elapsed()
            );
            report.walk_timed_out = true;
            if let Err(e) = store.compact() {
                warn!("compact meta of {} failed: {}", self.path().display(), e);
            }
            self.drop_loaded_tablets(&state.tablet_ids);
            state = TabletLoadState::default();
            walk = self.load_tablet_metas(store, &mut state, None);
        }

        if !state.failed.is_empty() {
            error!(
                "{} tablets failed to load from {}: {:?}",
                state.failed.len(),
                self.path().display(),
                state.failed
            );
            if !self.config().ignore_load_tablet_failure {
                return Err(Error::internal(format!(
                    "{} tablets failed to load from {}",
                    state.failed.len(),
                    self.path().display()
                )));
            }
        }
        walk.map_err(|e| {
            Error::internal(format!(
                "walk tablet metas of {} failed: {}",
                self.path().display(),
                e
            ))
        })?;

        self.fill_rowset_schemas(store, &state.tablet_ids);

        let (rowset_total, rowset_errors) = self.load_rowset_metas(store);
        report.rowset_total = rowset_total;
        report.rowset_errors = rowset_errors;

        for &tablet_id in &state.tablet_ids {
            let Some(tablet) = self.tablet_catalog().get_tablet(tablet_id, false) else {
                continue;
            };
            if let Err(e) = tablet.finish_load_rowsets() {
                warn!("finish loading rowsets of tablet {} failed: {}", tablet_id, e);
            }
        }

        report.tablet_ids = state.tablet_ids.into_iter().collect();
        report.failed_tablets = state.failed.into_iter().collect();
        info!(
            "loaded {} tablets ({} failed) and {} rowsets ({} errors) from {} in {:?}",
            report.tablet_ids.len(),
            report.failed_tablets.len(),
            report.rowset_total,
            report.rowset_errors,
            self.path().display(),
            started.elapsed()
        );
        Ok(report)
    }

    fn load_tablet_metas(
        self: &Arc<Self>,
        store: &MetadataStore,
        state: &mut TabletLoadState,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let catalog = Arc::clone(self.tablet_catalog());
        TabletMetaManager::walk_until_timeout(
            store,
            |tablet_id, schema_hash, value| {
                match catalog.load_tablet_from_meta(self, tablet_id, schema_hash, value) {
                    Ok(()) => {
                        state.tablet_ids.insert(tablet_id);
                    }
                    Err(e) if e.is_not_found() || e.is_already_exists() => {
                        debug!("skip tablet {}.{}: {}", tablet_id, schema_hash, e);
                        state.tablet_ids.insert(tablet_id);
                    }
                    Err(e) => {
                        warn!(
                            "load tablet {}.{} from {} failed: {}",
                            tablet_id,
                            schema_hash,
                            self.path().display(),
                            e
                        );
                        state.failed.insert(tablet_id);
                    }
                }
                true
            },
            timeout,
        )
    }

    /// Forget tablets loaded by an interrupted walk, leaving meta and files alone
    fn drop_loaded_tablets(&self, tablet_ids: &BTreeSet<TabletId>) {
        let catalog = self.tablet_catalog();
        for &tablet_id in tablet_ids {
            let owned = catalog
                .get_tablet(tablet_id, false)
                .is_some_and(|t| t.data_dir_hash() == self.path_hash());
            if !owned {
                continue;
            }
            if let Err(e) = catalog.drop_tablet(tablet_id, DropFlag::KeepMetaAndFiles) {
                warn!("drop tablet {} before reload failed: {}", tablet_id, e);
            }
        }
    }

    fn fill_rowset_schemas(&self, store: &MetadataStore, tablet_ids: &BTreeSet<TabletId>) {
        for &tablet_id in tablet_ids {
            let Some(tablet) = self.tablet_catalog().get_tablet(tablet_id, false) else {
                continue;
            };
            if tablet.data_dir_hash() != self.path_hash() || !tablet.set_tablet_schema_into_rowset_meta() {
                continue;
            }
            if let Err(e) = TabletMetaManager::save(store, &tablet.tablet_meta()) {
                warn!("save meta of tablet {} failed: {}", tablet_id, e);
            }
        }
    }

    /// Returns `(traversed, errors)`
    fn load_rowset_metas(&self, store: &MetadataStore) -> (usize, usize) {
        let catalog = self.tablet_catalog();
        let mut total = 0usize;
        let mut errors = 0usize;
        let mut last_missing_warn: Option<Instant> = None;

        let traversed = RowsetMetaManager::traverse(store, |tablet_uid, rowset_id, value| {
            total += 1;
            let mut meta = match RowsetMeta::from_bytes(value) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("parse rowset meta {} of {} failed: {}", rowset_id, tablet_uid, e);
                    errors += 1;
                    return true;
                }
            };

            let Some(tablet) = catalog.get_tablet(meta.tablet_id, false) else {
                if last_missing_warn.is_none_or(|t| t.elapsed() >= MISSING_TABLET_WARN_INTERVAL) {
                    warn!(
                        "tablet {} of rowset {} not found, skip it",
                        meta.tablet_id, meta.rowset_id
                    );
                    last_missing_warn = Some(Instant::now());
                }
                errors += 1;
                return true;
            };

            let needs_schema = match meta.state {
                RowsetState::Committed => true,
                RowsetState::Visible => tablet.keys_type() != KeysType::PrimaryKeys,
                _ => false,
            };
            if needs_schema && meta.tablet_schema.is_none() {
                meta.tablet_schema = Some(tablet.tablet_schema());
            }
            let rowset = match Rowset::create(&tablet.tablet_schema(), tablet.schema_hash_path(), meta) {
                Ok(rowset) => rowset,
                Err(e) => {
                    warn!("create rowset {} failed: {}", rowset_id, e);
                    errors += 1;
                    return true;
                }
            };

            let meta = rowset.meta();
            let uid_matches = meta.tablet_uid == tablet.tablet_uid();
            match meta.state {
                RowsetState::Committed if uid_matches => {
                    let committed = self.txn_manager().commit_txn(
                        store,
                        meta.partition_id,
                        meta.txn_id,
                        meta.tablet_id,
                        meta.tablet_schema_hash,
                        meta.tablet_uid,
                        meta.load_id,
                        Arc::clone(&rowset),
                        true,
                    );
                    match committed {
                        Ok(()) => {}
                        Err(e) if e.is_already_exists() => {}
                        Err(e) => {
                            warn!(
                                "recover txn {} rowset {} of tablet {} failed: {}",
                                meta.txn_id, meta.rowset_id, meta.tablet_id, e
                            );
                            errors += 1;
                        }
                    }
                }
                RowsetState::Visible if uid_matches => {
                    if tablet.keys_type() == KeysType::PrimaryKeys {
                        debug!("skip visible rowset {} of primary key tablet {}", meta.rowset_id, meta.tablet_id);
                        return true;
                    }
                    match tablet.load_rowset(Arc::clone(&rowset)) {
                        Ok(()) => {}
                        Err(e) if e.is_already_exists() => {}
                        Err(e) => {
                            warn!(
                                "load rowset {} into tablet {} failed: {}",
                                meta.rowset_id, meta.tablet_id, e
                            );
                            errors += 1;
                        }
                    }
                }
                state => {
                    warn!(
                        "rowset {} of tablet {} has state {:?} and uid {}, tablet uid is {}",
                        meta.rowset_id,
                        meta.tablet_id,
                        state,
                        meta.tablet_uid,
                        tablet.tablet_uid()
                    );
                    errors += 1;
                }
            }
            true
        });
        if let Err(e) = traversed {
            warn!("traverse rowset metas of {} failed: {}", self.path().display(), e);
        }
        (total, errors)
    }
}
