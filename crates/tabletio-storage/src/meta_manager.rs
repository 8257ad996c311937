//! Typed access to the records kept in a directory's metadata store

use crate::metadata::{MetadataKey, MetadataStore};
use crate::tablet::{DeltaColumnGroup, RowsetMeta, TabletMeta};
use std::time::Duration;
use tabletio_common::{Error, Result, RowsetId, SchemaHash, TabletId, TabletUid};
use tracing::warn;

/// Tablet meta records
pub struct TabletMetaManager;

impl TabletMetaManager {
    pub fn save(store: &MetadataStore, meta: &TabletMeta) -> Result<()> {
        let key = MetadataKey::tablet_meta(meta.tablet_id, meta.schema_hash);
        store.put(key, meta.to_bytes()?)?;
        Ok(())
    }

    pub fn get(store: &MetadataStore, tablet_id: TabletId, schema_hash: SchemaHash) -> Result<TabletMeta> {
        let key = MetadataKey::tablet_meta(tablet_id, schema_hash);
        let value = store
            .get(&key)
            .ok_or_else(|| Error::not_found(format!("tablet meta {}.{}", tablet_id, schema_hash)))?;
        TabletMeta::from_bytes(&value)
    }

    pub fn remove(store: &MetadataStore, tablet_id: TabletId, schema_hash: SchemaHash) -> Result<()> {
        store.delete(&MetadataKey::tablet_meta(tablet_id, schema_hash))?;
        Ok(())
    }

    /// Visit every tablet meta as `(tablet_id, schema_hash, raw meta)`
    ///
    /// The visitor returns `false` to stop early.
    pub fn walk<F>(store: &MetadataStore, visitor: F) -> Result<()>
    where
        F: FnMut(TabletId, SchemaHash, &[u8]) -> bool,
    {
        Self::walk_until_timeout(store, visitor, None)
    }

    /// Like [`walk`](Self::walk), failing with `Error::Timeout` once `timeout` elapses
    pub fn walk_until_timeout<F>(
        store: &MetadataStore,
        mut visitor: F,
        timeout: Option<Duration>,
    ) -> Result<()>
    where
        F: FnMut(TabletId, SchemaHash, &[u8]) -> bool,
    {
        for entry in store.walk(&MetadataKey::tablet_meta_prefix(), timeout) {
            let (key, value) = entry?;
            let Some((tablet_id, schema_hash)) = key.parse_tablet_meta() else {
                warn!("skipping malformed tablet meta key {:?}", key.as_bytes());
                continue;
            };
            if !visitor(tablet_id, schema_hash, &value) {
                break;
            }
        }
        Ok(())
    }

    pub fn save_delta_column_group(
        store: &MetadataStore,
        tablet_id: TabletId,
        segment_id: u32,
        dcg: &DeltaColumnGroup,
    ) -> Result<()> {
        let key = MetadataKey::delta_column_group(tablet_id, segment_id, dcg.version);
        store.put(key, dcg.to_bytes()?)?;
        Ok(())
    }

    /// Every delta column group recorded for `tablet_id`
    pub fn scan_tablet_delta_column_group(
        store: &MetadataStore,
        tablet_id: TabletId,
    ) -> Result<Vec<DeltaColumnGroup>> {
        store
            .scan_prefix(&MetadataKey::delta_column_group_prefix(tablet_id))
            .iter()
            .map(|(_, value)| DeltaColumnGroup::from_bytes(value))
            .collect()
    }
}

/// Rowset meta records, keyed by owning tablet uid
pub struct RowsetMetaManager;

impl RowsetMetaManager {
    pub fn save(store: &MetadataStore, meta: &RowsetMeta) -> Result<()> {
        let key = MetadataKey::rowset_meta(&meta.tablet_uid, &meta.rowset_id);
        store.put(key, meta.to_bytes()?)?;
        Ok(())
    }

    pub fn remove(store: &MetadataStore, tablet_uid: &TabletUid, rowset_id: &RowsetId) -> Result<()> {
        store.delete(&MetadataKey::rowset_meta(tablet_uid, rowset_id))?;
        Ok(())
    }

    pub fn exists(store: &MetadataStore, tablet_uid: &TabletUid, rowset_id: &RowsetId) -> bool {
        store.contains(&MetadataKey::rowset_meta(tablet_uid, rowset_id))
    }

    /// Visit every rowset meta as `(tablet_uid, rowset_id, raw meta)`
    ///
    /// The visitor returns `false` to stop early.
    pub fn traverse<F>(store: &MetadataStore, mut visitor: F) -> Result<()>
    where
        F: FnMut(TabletUid, RowsetId, &[u8]) -> bool,
    {
        for entry in store.walk(&MetadataKey::rowset_meta_prefix(), None) {
            let (key, value) = entry?;
            let Some((tablet_uid, rowset_id)) = key.parse_rowset_meta() else {
                warn!("skipping malformed rowset meta key {:?}", key.as_bytes());
                continue;
            };
            if !visitor(tablet_uid, rowset_id, &value) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStoreConfig;
    use crate::tablet::TabletSchema;
    use crate::tablet::tests::rowset_meta;
    use tabletio_common::RowsetState;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path) -> MetadataStore {
        MetadataStore::open_or_create(MetadataStoreConfig::with_data_dir(dir)).unwrap()
    }

    #[test]
    fn test_tablet_meta_save_walk_remove() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        for id in [3, 1, 2] {
            TabletMetaManager::save(&store, &TabletMeta::new(id, 10, 0, TabletSchema::default())).unwrap();
        }

        let mut seen = vec![];
        TabletMetaManager::walk(&store, |id, hash, value| {
            assert_eq!(TabletMeta::from_bytes(value).unwrap().tablet_id, id);
            seen.push((id, hash));
            true
        })
        .unwrap();
        assert_eq!(seen, vec![(1, 10), (2, 10), (3, 10)]);

        TabletMetaManager::remove(&store, 2, 10).unwrap();
        assert!(TabletMetaManager::get(&store, 2, 10).unwrap_err().is_not_found());
        assert_eq!(TabletMetaManager::get(&store, 3, 10).unwrap().tablet_id, 3);
    }

    #[test]
    fn test_walk_visitor_can_stop() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        for id in 1..=5 {
            TabletMetaManager::save(&store, &TabletMeta::new(id, 1, 0, TabletSchema::default())).unwrap();
        }
        let mut count = 0;
        TabletMetaManager::walk(&store, |_, _, _| {
            count += 1;
            count < 2
        })
        .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_walk_until_timeout_reports_timeout() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        for id in 1..=3 {
            TabletMetaManager::save(&store, &TabletMeta::new(id, 1, 0, TabletSchema::default())).unwrap();
        }
        let err = TabletMetaManager::walk_until_timeout(
            &store,
            |_, _, _| {
                std::thread::sleep(Duration::from_millis(30));
                true
            },
            Some(Duration::from_millis(10)),
        )
        .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_rowset_meta_traverse() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let tablet = TabletMeta::new(7, 1, 0, TabletSchema::default());
        let committed = rowset_meta(&tablet, "r1", RowsetState::Committed, 2);
        let visible = rowset_meta(&tablet, "r2", RowsetState::Visible, 3);
        RowsetMetaManager::save(&store, &committed).unwrap();
        RowsetMetaManager::save(&store, &visible).unwrap();
        // Tablet metas share the store but not the prefix
        TabletMetaManager::save(&store, &tablet).unwrap();

        let mut seen = vec![];
        RowsetMetaManager::traverse(&store, |uid, id, value| {
            assert_eq!(uid, tablet.tablet_uid);
            seen.push((id, RowsetMeta::from_bytes(value).unwrap().state));
            true
        })
        .unwrap();
        assert_eq!(seen.len(), 2);
        assert!(RowsetMetaManager::exists(&store, &tablet.tablet_uid, &committed.rowset_id));

        RowsetMetaManager::remove(&store, &tablet.tablet_uid, &committed.rowset_id).unwrap();
        assert!(!RowsetMetaManager::exists(&store, &tablet.tablet_uid, &committed.rowset_id));
    }

    #[test]
    fn test_delta_column_groups_are_per_tablet() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let dcg = |version, file: &str| DeltaColumnGroup {
            version,
            column_ids: vec![1],
            column_files: vec![file.to_string()],
        };
        TabletMetaManager::save_delta_column_group(&store, 5, 0, &dcg(2, "a_0_2.cols")).unwrap();
        TabletMetaManager::save_delta_column_group(&store, 5, 1, &dcg(3, "a_1_3.cols")).unwrap();
        TabletMetaManager::save_delta_column_group(&store, 6, 0, &dcg(2, "b_0_2.cols")).unwrap();

        let dcgs = TabletMetaManager::scan_tablet_delta_column_group(&store, 5).unwrap();
        let files: Vec<_> = dcgs.iter().flat_map(|d| d.relative_column_files().to_vec()).collect();
        assert_eq!(files, vec!["a_0_2.cols", "a_1_3.cols"]);
    }
}
