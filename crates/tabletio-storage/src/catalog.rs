//! Tablet catalog
//!
//! The catalog is the only owner of [`Tablet`] handles. Directories and the
//! garbage collector look tablets up by id and never keep them alive.

use crate::data_dir::DataDir;
use crate::layout;
use crate::meta_manager::TabletMetaManager;
use crate::tablet::{Tablet, TabletMeta};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tabletio_common::{Error, Result, RowsetId, SchemaHash, TabletId, TabletState};
use tracing::{debug, info};

/// What dropping a tablet does besides removing it from the catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropFlag {
    /// Forget the tablet in memory only; its meta and files stay on disk
    KeepMetaAndFiles,
    /// Mark the tablet shut down and persist that; it stays visible to
    /// lookups that include deleted tablets until its files are collected
    SoftDelete,
}

/// Live tablet catalog consumed by directories during load and GC
pub trait TabletCatalog: Send + Sync {
    /// Materialize a tablet from a serialized meta found in `data_dir`
    ///
    /// Returns `NotFound` for a meta of a deleted tablet and `AlreadyExists`
    /// when the same incarnation is already loaded.
    fn load_tablet_from_meta(
        &self,
        data_dir: &Arc<DataDir>,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        meta: &[u8],
    ) -> Result<()>;

    /// Look a tablet up by id; `include_deleted` also searches soft-deleted ones
    fn get_tablet(&self, tablet_id: TabletId, include_deleted: bool) -> Option<Arc<Tablet>>;

    fn drop_tablet(&self, tablet_id: TabletId, flag: DropFlag) -> Result<()>;

    /// Whether a clone into `tablet_id` is in progress
    fn check_clone_tablet(&self, tablet_id: TabletId) -> bool;

    fn get_tablet_id_and_schema_hash_from_path(&self, path: &Path) -> Option<(TabletId, SchemaHash)> {
        layout::tablet_id_and_schema_hash_from_path(path)
    }

    fn get_rowset_id_from_path(&self, path: &Path) -> Option<RowsetId> {
        layout::rowset_id_from_path(path)
    }
}

/// In-memory catalog of the tablets loaded on this node
#[derive(Default)]
pub struct TabletManager {
    tablets: RwLock<HashMap<TabletId, Arc<Tablet>>>,
    /// Soft-deleted tablets waiting for their files to be collected
    shutdown_tablets: RwLock<HashMap<TabletId, Arc<Tablet>>>,
    cloning: Mutex<HashSet<TabletId>>,
}

impl TabletManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a new tablet's meta in `data_dir` and load it
    pub fn create_tablet(&self, data_dir: &Arc<DataDir>, meta: &TabletMeta) -> Result<Arc<Tablet>> {
        let store = data_dir.meta_store()?;
        TabletMetaManager::save(store, meta)?;
        self.load_tablet_from_meta(data_dir, meta.tablet_id, meta.schema_hash, &meta.to_bytes()?)?;
        self.get_tablet(meta.tablet_id, false)
            .ok_or_else(|| Error::internal(format!("tablet {} vanished after creation", meta.tablet_id)))
    }

    pub fn tablet_count(&self) -> usize {
        self.tablets.read().len()
    }

    pub fn tablet_ids(&self) -> Vec<TabletId> {
        let mut ids: Vec<_> = self.tablets.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn start_clone(&self, tablet_id: TabletId) {
        self.cloning.lock().insert(tablet_id);
    }

    pub fn finish_clone(&self, tablet_id: TabletId) {
        self.cloning.lock().remove(&tablet_id);
    }
}

impl TabletCatalog for TabletManager {
    fn load_tablet_from_meta(
        &self,
        data_dir: &Arc<DataDir>,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        meta: &[u8],
    ) -> Result<()> {
        let meta = TabletMeta::from_bytes(meta)?;
        if meta.tablet_id != tablet_id || meta.schema_hash != schema_hash {
            return Err(Error::corruption(format!(
                "meta stored under {}.{} describes tablet {}.{}",
                tablet_id, schema_hash, meta.tablet_id, meta.schema_hash
            )));
        }
        if meta.state == TabletState::Shutdown {
            return Err(Error::not_found(format!(
                "tablet {} is in shutdown state",
                tablet_id
            )));
        }

        let mut tablets = self.tablets.write();
        if let Some(existing) = tablets.get(&tablet_id) {
            if existing.tablet_uid() == meta.tablet_uid {
                return Err(Error::already_exists(format!("tablet {} already loaded", tablet_id)));
            }
            if existing.creation_time() >= meta.creation_time {
                return Err(Error::already_exists(format!(
                    "tablet {} already loaded with a newer incarnation {}",
                    tablet_id,
                    existing.tablet_uid()
                )));
            }
            info!(
                "replacing tablet {} incarnation {} with newer {}",
                tablet_id,
                existing.tablet_uid(),
                meta.tablet_uid
            );
            if let Some(dir) = existing.data_dir() {
                dir.deregister_tablet(&existing.info());
            }
            self.shutdown_tablets.write().insert(tablet_id, Arc::clone(existing));
        }

        let tablet = Arc::new(Tablet::new(meta, data_dir));
        data_dir.register_tablet(tablet.info());
        tablets.insert(tablet_id, tablet);
        debug!("loaded tablet {} from {:?}", tablet_id, data_dir.path());
        Ok(())
    }

    fn get_tablet(&self, tablet_id: TabletId, include_deleted: bool) -> Option<Arc<Tablet>> {
        if let Some(tablet) = self.tablets.read().get(&tablet_id) {
            return Some(Arc::clone(tablet));
        }
        if include_deleted {
            return self.shutdown_tablets.read().get(&tablet_id).cloned();
        }
        None
    }

    fn drop_tablet(&self, tablet_id: TabletId, flag: DropFlag) -> Result<()> {
        let tablet = self
            .tablets
            .write()
            .remove(&tablet_id)
            .ok_or_else(|| Error::not_found(format!("tablet {} not in catalog", tablet_id)))?;

        let data_dir = tablet.data_dir();
        if let Some(dir) = &data_dir {
            dir.deregister_tablet(&tablet.info());
        }

        match flag {
            DropFlag::KeepMetaAndFiles => {}
            DropFlag::SoftDelete => {
                tablet.set_tablet_state(TabletState::Shutdown);
                if let Some(dir) = &data_dir {
                    TabletMetaManager::save(dir.meta_store()?, &tablet.tablet_meta())?;
                }
                self.shutdown_tablets.write().insert(tablet_id, tablet);
            }
        }
        Ok(())
    }

    fn check_clone_tablet(&self, tablet_id: TabletId) -> bool {
        self.cloning.lock().contains(&tablet_id)
    }
}
