//! Transaction manager seam
//!
//! Recovery hands every committed-but-unpublished rowset back to the
//! transaction manager so the pending publish can finish after restart.

use crate::meta_manager::RowsetMetaManager;
use crate::metadata::MetadataStore;
use crate::tablet::Rowset;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tabletio_common::{
    Error, PartitionId, Result, SchemaHash, TabletId, TabletInfo, TabletUid, TxnId,
};
use tracing::debug;
use uuid::Uuid;

pub trait TxnManager: Send + Sync {
    /// Record `rowset` as the committed output of `txn_id` on one tablet
    ///
    /// With `is_recovery` the rowset meta is already persisted and is not
    /// written again. A repeated commit of the same rowset is `AlreadyExists`.
    #[allow(clippy::too_many_arguments)]
    fn commit_txn(
        &self,
        meta_store: &MetadataStore,
        partition_id: PartitionId,
        txn_id: TxnId,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        tablet_uid: TabletUid,
        load_id: Uuid,
        rowset: Arc<Rowset>,
        is_recovery: bool,
    ) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct TabletTxnInfo {
    pub load_id: Uuid,
    pub rowset: Arc<Rowset>,
}

type TxnKey = (PartitionId, TxnId);

/// In-memory transaction bookkeeping
#[derive(Default)]
pub struct MemTxnManager {
    txns: Mutex<HashMap<TxnKey, HashMap<TabletInfo, TabletTxnInfo>>>,
}

impl MemTxnManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed rowset of `txn_id` on `tablet`, if any
    pub fn get_committed_rowset(
        &self,
        partition_id: PartitionId,
        txn_id: TxnId,
        tablet: &TabletInfo,
    ) -> Option<Arc<Rowset>> {
        self.txns
            .lock()
            .get(&(partition_id, txn_id))
            .and_then(|tablets| tablets.get(tablet))
            .map(|info| Arc::clone(&info.rowset))
    }

    /// Tablets with a committed rowset for `txn_id`
    pub fn get_txn_related_tablets(&self, partition_id: PartitionId, txn_id: TxnId) -> Vec<TabletInfo> {
        self.txns
            .lock()
            .get(&(partition_id, txn_id))
            .map(|tablets| tablets.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn txn_count(&self) -> usize {
        self.txns.lock().len()
    }
}

impl TxnManager for MemTxnManager {
    fn commit_txn(
        &self,
        meta_store: &MetadataStore,
        partition_id: PartitionId,
        txn_id: TxnId,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        tablet_uid: TabletUid,
        load_id: Uuid,
        rowset: Arc<Rowset>,
        is_recovery: bool,
    ) -> Result<()> {
        let tablet = TabletInfo::new(tablet_id, schema_hash, tablet_uid);
        let mut txns = self.txns.lock();
        let tablets = txns.entry((partition_id, txn_id)).or_default();

        if let Some(existing) = tablets.get(&tablet) {
            if existing.load_id == load_id && existing.rowset.rowset_id() == rowset.rowset_id() {
                return Err(Error::already_exists(format!(
                    "txn {} already committed rowset {} on tablet {}",
                    txn_id,
                    rowset.rowset_id(),
                    tablet_id
                )));
            }
            return Err(Error::internal(format!(
                "txn {} on tablet {} already committed rowset {}, refusing {}",
                txn_id,
                tablet_id,
                existing.rowset.rowset_id(),
                rowset.rowset_id()
            )));
        }

        if !is_recovery {
            RowsetMetaManager::save(meta_store, rowset.meta())?;
        }
        debug!(
            "committed txn {} rowset {} on tablet {} (recovery: {})",
            txn_id,
            rowset.rowset_id(),
            tablet_id,
            is_recovery
        );
        tablets.insert(tablet, TabletTxnInfo { load_id, rowset });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStoreConfig;
    use crate::tablet::tests::rowset_meta;
    use crate::tablet::{TabletMeta, TabletSchema};
    use std::path::Path;
    use tabletio_common::RowsetState;
    use tempfile::tempdir;

    fn commit(
        mgr: &MemTxnManager,
        store: &MetadataStore,
        tablet: &TabletMeta,
        rowset: &Arc<Rowset>,
        recovery: bool,
    ) -> Result<()> {
        let meta = rowset.meta();
        mgr.commit_txn(
            store,
            meta.partition_id,
            meta.txn_id,
            tablet.tablet_id,
            tablet.schema_hash,
            tablet.tablet_uid,
            meta.load_id,
            Arc::clone(rowset),
            recovery,
        )
    }

    #[test]
    fn test_commit_and_repeat() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open_or_create(MetadataStoreConfig::with_data_dir(dir.path())).unwrap();
        let mgr = MemTxnManager::new();
        let tablet = TabletMeta::new(10, 20, 0, TabletSchema::default());
        let meta = rowset_meta(&tablet, "r1", RowsetState::Committed, 5);
        let rowset = Rowset::create(&tablet.schema, Path::new("/x"), meta).unwrap();

        commit(&mgr, &store, &tablet, &rowset, false).unwrap();
        assert!(RowsetMetaManager::exists(&store, &tablet.tablet_uid, rowset.rowset_id()));
        assert!(commit(&mgr, &store, &tablet, &rowset, true).unwrap_err().is_already_exists());

        assert_eq!(mgr.get_txn_related_tablets(0, 5), vec![tablet.info()]);
        assert!(mgr.get_committed_rowset(0, 5, &tablet.info()).is_some());
    }

    #[test]
    fn test_recovery_commit_does_not_rewrite_meta() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open_or_create(MetadataStoreConfig::with_data_dir(dir.path())).unwrap();
        let mgr = MemTxnManager::new();
        let tablet = TabletMeta::new(10, 20, 0, TabletSchema::default());
        let meta = rowset_meta(&tablet, "r1", RowsetState::Committed, 5);
        let rowset = Rowset::create(&tablet.schema, Path::new("/x"), meta).unwrap();

        commit(&mgr, &store, &tablet, &rowset, true).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_conflicting_rowset_is_rejected() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::open_or_create(MetadataStoreConfig::with_data_dir(dir.path())).unwrap();
        let mgr = MemTxnManager::new();
        let tablet = TabletMeta::new(10, 20, 0, TabletSchema::default());
        let first = Rowset::create(
            &tablet.schema,
            Path::new("/x"),
            rowset_meta(&tablet, "r1", RowsetState::Committed, 5),
        )
        .unwrap();
        let second = Rowset::create(
            &tablet.schema,
            Path::new("/x"),
            rowset_meta(&tablet, "r2", RowsetState::Committed, 5),
        )
        .unwrap();

        commit(&mgr, &store, &tablet, &first, true).unwrap();
        let err = commit(&mgr, &store, &tablet, &second, true).unwrap_err();
        assert!(!err.is_already_exists());
    }
}
