//! In-memory B-tree index with snapshot persistence
//!
//! Uses Rust's BTreeMap for the core index, with:
//! - Point lookups and prefix scans
//! - Snapshots to disk on compaction
//! - Recovery from snapshot + WAL replay

use super::types::{MetadataEntry, MetadataKey, SnapshotHeader};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tabletio_common::{Error, Result};

const SNAPSHOT_PREFIX: &str = "meta_";
const SNAPSHOT_SUFFIX: &str = ".snapshot";

/// B-tree index configuration
#[derive(Clone, Debug)]
pub struct BTreeConfig {
    /// Snapshot directory
    pub snapshot_dir: PathBuf,
    /// Mutations after which a snapshot is due
    pub snapshot_threshold: u64,
    /// Keep this many old snapshots
    pub snapshot_retention: usize,
}

impl Default for BTreeConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from("."),
            snapshot_threshold: 10000,
            snapshot_retention: 2,
        }
    }
}

/// In-memory B-tree index
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<MetadataKey, Vec<u8>>>,
    /// Highest LSN applied
    lsn: AtomicU64,
    mutations_since_snapshot: AtomicU64,
    last_snapshot_lsn: AtomicU64,
    config: BTreeConfig,
}

impl BTreeIndex {
    /// Create a new empty index
    pub fn new(config: BTreeConfig) -> Self {
        Self {
            tree: RwLock::new(BTreeMap::new()),
            lsn: AtomicU64::new(0),
            mutations_since_snapshot: AtomicU64::new(0),
            last_snapshot_lsn: AtomicU64::new(0),
            config,
        }
    }

    /// Load index from the latest snapshot, or start empty
    pub fn load_snapshot(config: BTreeConfig) -> Result<Self> {
        let Some((path, _)) = Self::list_snapshots(&config.snapshot_dir)?.into_iter().next() else {
            return Ok(Self::new(config));
        };

        let (tree, header) = Self::read_snapshot(&path)?;
        Ok(Self {
            tree: RwLock::new(tree),
            lsn: AtomicU64::new(header.lsn),
            mutations_since_snapshot: AtomicU64::new(0),
            last_snapshot_lsn: AtomicU64::new(header.lsn),
            config,
        })
    }

    /// Snapshot files in `dir`, newest first
    fn list_snapshots(dir: &Path) -> Result<Vec<(PathBuf, u64)>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots: Vec<(PathBuf, u64)> = std::fs::read_dir(dir)
            .map_err(|e| Error::storage(format!("failed to read snapshot dir: {}", e)))?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let lsn = name
                    .to_str()?
                    .strip_prefix(SNAPSHOT_PREFIX)?
                    .strip_suffix(SNAPSHOT_SUFFIX)?
                    .parse::<u64>()
                    .ok()?;
                Some((entry.path(), lsn))
            })
            .collect();

        snapshots.sort_by_key(|(_, lsn)| std::cmp::Reverse(*lsn));
        Ok(snapshots)
    }

    fn read_snapshot(path: &Path) -> Result<(BTreeMap<MetadataKey, Vec<u8>>, SnapshotHeader)> {
        let mut buf = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut buf))
            .map_err(|e| Error::storage(format!("failed to read snapshot {}: {}", path.display(), e)))?;

        let header = SnapshotHeader::from_bytes(&buf)
            .ok_or_else(|| Error::corruption(format!("invalid snapshot header in {}", path.display())))?;
        let data = &buf[SnapshotHeader::SIZE..];

        if crc32c::crc32c(data) != header.checksum {
            return Err(Error::corruption(format!(
                "snapshot checksum mismatch in {}",
                path.display()
            )));
        }

        let entries: Vec<(MetadataKey, Vec<u8>)> = bincode::deserialize(data)
            .map_err(|e| Error::Deserialization(format!("failed to decode snapshot: {}", e)))?;

        Ok((entries.into_iter().collect(), header))
    }

    /// Insert or update a key-value pair
    pub fn put(&self, key: MetadataKey, value: Vec<u8>, lsn: u64) {
        self.tree.write().insert(key, value);
        self.record_mutation(lsn);
    }

    /// Delete a key
    pub fn delete(&self, key: &MetadataKey, lsn: u64) -> bool {
        let removed = self.tree.write().remove(key).is_some();
        self.record_mutation(lsn);
        removed
    }

    pub fn get(&self, key: &MetadataKey) -> Option<Vec<u8>> {
        self.tree.read().get(key).cloned()
    }

    pub fn contains(&self, key: &MetadataKey) -> bool {
        self.tree.read().contains_key(key)
    }

    /// Copy out every entry whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &MetadataKey) -> Vec<(MetadataKey, Vec<u8>)> {
        let tree = self.tree.read();
        tree.range((Bound::Included(prefix.clone()), Bound::Unbounded))
            .take_while(|(k, _)| k.as_bytes().starts_with(prefix.as_bytes()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Apply an entry from WAL replay
    pub fn apply_entry(&self, entry: MetadataEntry) {
        if entry.deleted {
            self.delete(&entry.key, entry.lsn);
        } else {
            self.put(entry.key, entry.value, entry.lsn);
        }
    }

    /// Write a snapshot of the whole index to disk
    pub fn write_snapshot(&self) -> Result<PathBuf> {
        let (lsn, data, entry_count) = {
            let tree = self.tree.read();
            let lsn = self.lsn.load(Ordering::SeqCst);
            let entries: Vec<(&MetadataKey, &Vec<u8>)> = tree.iter().collect();
            let data = bincode::serialize(&entries)
                .map_err(|e| Error::Serialization(format!("failed to encode snapshot: {}", e)))?;
            (lsn, data, entries.len() as u64)
        };

        let header = SnapshotHeader::new(lsn, entry_count, crc32c::crc32c(&data));

        std::fs::create_dir_all(&self.config.snapshot_dir)?;
        let snapshot_name = format!("{SNAPSHOT_PREFIX}{lsn}{SNAPSHOT_SUFFIX}");
        let snapshot_path = self.config.snapshot_dir.join(&snapshot_name);
        let temp_path = self.config.snapshot_dir.join(format!("{snapshot_name}.tmp"));

        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| Error::storage(format!("failed to create snapshot file: {}", e)))?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&header.to_bytes())?;
            writer.write_all(&data)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        std::fs::rename(&temp_path, &snapshot_path)
            .map_err(|e| Error::storage(format!("failed to rename snapshot: {}", e)))?;

        self.last_snapshot_lsn.store(lsn, Ordering::SeqCst);
        self.mutations_since_snapshot.store(0, Ordering::Relaxed);

        for (path, _) in Self::list_snapshots(&self.config.snapshot_dir)?
            .into_iter()
            .skip(self.config.snapshot_retention.max(1))
        {
            let _ = std::fs::remove_file(path);
        }

        Ok(snapshot_path)
    }

    pub fn needs_snapshot(&self) -> bool {
        self.mutations_since_snapshot.load(Ordering::Relaxed) >= self.config.snapshot_threshold
    }

    pub fn current_lsn(&self) -> u64 {
        self.lsn.load(Ordering::SeqCst)
    }

    pub fn last_snapshot_lsn(&self) -> u64 {
        self.last_snapshot_lsn.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> u64 {
        self.tree.read().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    fn record_mutation(&self, lsn: u64) {
        self.lsn.fetch_max(lsn, Ordering::SeqCst);
        self.mutations_since_snapshot.fetch_add(1, Ordering::Relaxed);
    }
}
