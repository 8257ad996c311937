//! Registry of the data directories on this node
//!
//! Passed to every directory at construction so cross-directory lookups made
//! by the garbage collector never go through global state.

use crate::data_dir::DataDir;
use crate::tablet::Rowset;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tabletio_common::RowsetId;

#[derive(Default)]
pub struct StoreRegistry {
    stores: RwLock<HashMap<PathBuf, Weak<DataDir>>>,
    /// Rowsets retired from their tablet whose files are still being released
    unused_rowsets: Mutex<HashMap<RowsetId, Arc<Rowset>>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dir: &Arc<DataDir>) {
        self.stores
            .write()
            .insert(dir.path().to_path_buf(), Arc::downgrade(dir));
    }

    pub fn deregister(&self, path: &Path) {
        self.stores.write().remove(path);
    }

    /// Directory rooted at `path`, if it is registered and alive
    pub fn get_store(&self, path: &Path) -> Option<Arc<DataDir>> {
        self.stores.read().get(path).and_then(Weak::upgrade)
    }

    /// Every live directory, ordered by path
    pub fn stores(&self) -> Vec<Arc<DataDir>> {
        let stores = self.stores.read();
        let mut paths: Vec<&PathBuf> = stores.keys().collect();
        paths.sort();
        paths
            .into_iter()
            .filter_map(|p| stores.get(p).and_then(Weak::upgrade))
            .collect()
    }

    pub fn add_unused_rowset(&self, rowset: Arc<Rowset>) {
        self.unused_rowsets
            .lock()
            .insert(rowset.rowset_id().clone(), rowset);
    }

    /// Forget a retired rowset once its files are gone
    pub fn release_unused_rowset(&self, rowset_id: &RowsetId) -> Option<Arc<Rowset>> {
        self.unused_rowsets.lock().remove(rowset_id)
    }

    pub fn check_rowset_id_in_unused_rowsets(&self, rowset_id: &RowsetId) -> bool {
        self.unused_rowsets.lock().contains_key(rowset_id)
    }
}
