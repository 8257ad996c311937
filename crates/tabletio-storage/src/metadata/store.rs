//! Unified metadata store
//!
//! Combines the WAL and the B-tree index into a single interface with
//! optional background compaction.

use super::btree::{BTreeConfig, BTreeIndex};
use super::types::{MetadataKey, MetadataOp};
use super::wal::{MetadataWal, WalConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tabletio_common::{Error, Result};
use tracing::{debug, error, info, warn};

const WAL_FILE_NAME: &str = "metadata.wal";

/// Metadata store configuration
#[derive(Clone, Debug)]
pub struct MetadataStoreConfig {
    /// Base directory for metadata files
    pub data_dir: PathBuf,
    pub wal: WalConfig,
    pub btree: BTreeConfig,
    /// Run compaction on a background thread
    pub background_compaction: bool,
    /// Compaction check interval
    pub compaction_interval: Duration,
}

impl Default for MetadataStoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./meta"),
            wal: WalConfig::default(),
            btree: BTreeConfig::default(),
            background_compaction: false,
            compaction_interval: Duration::from_secs(60),
        }
    }
}

impl MetadataStoreConfig {
    /// Create config with data directory
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        Self {
            btree: BTreeConfig {
                snapshot_dir: data_dir.join("snapshots"),
                ..Default::default()
            },
            data_dir,
            ..Default::default()
        }
    }
}

/// Ordered key-value store holding one directory's tablet and rowset metas
pub struct MetadataStore {
    wal: Arc<MetadataWal>,
    index: Arc<BTreeIndex>,
    config: MetadataStoreConfig,
    /// Serializes snapshot + WAL truncation
    compaction_lock: Arc<Mutex<()>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    compaction_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl MetadataStore {
    /// Open the store at `config.data_dir`, creating it when absent
    ///
    /// Recovery loads the newest snapshot and replays the WAL records after it.
    pub fn open_or_create(config: MetadataStoreConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .map_err(|e| Error::storage(format!("failed to create meta dir: {}", e)))?;
        std::fs::create_dir_all(&config.btree.snapshot_dir)
            .map_err(|e| Error::storage(format!("failed to create snapshot dir: {}", e)))?;

        let wal_path = config.data_dir.join(WAL_FILE_NAME);
        let wal = Arc::new(if wal_path.exists() {
            MetadataWal::open(&wal_path, config.wal.clone())?
        } else {
            MetadataWal::create(&wal_path, config.wal.clone())?
        });

        let index = Arc::new(BTreeIndex::load_snapshot(config.btree.clone())?);
        let snapshot_lsn = index.last_snapshot_lsn();
        wal.ensure_lsn_after(snapshot_lsn);

        let mut replayed = 0u64;
        wal.iter_entries(snapshot_lsn + 1, |entry| {
            index.apply_entry(entry);
            replayed += 1;
            Ok(())
        })?;

        let store = Self {
            wal,
            index,
            config,
            compaction_lock: Arc::new(Mutex::new(())),
            shutdown_tx: Mutex::new(None),
            compaction_handle: Mutex::new(None),
        };

        if store.config.background_compaction {
            store.start_background_compaction();
        }

        info!(
            "opened metadata store at {:?} ({} entries, {} replayed from WAL)",
            store.config.data_dir,
            store.index.len(),
            replayed
        );
        Ok(store)
    }

    /// Put a key-value pair
    pub fn put(&self, key: MetadataKey, value: Vec<u8>) -> Result<u64> {
        let lsn = self.wal.append(&MetadataOp::Put {
            key: key.clone(),
            value: value.clone(),
        })?;
        self.index.put(key, value, lsn);
        debug!("put: lsn={}", lsn);
        Ok(lsn)
    }

    /// Delete a key
    pub fn delete(&self, key: &MetadataKey) -> Result<u64> {
        let lsn = self.wal.append(&MetadataOp::Delete { key: key.clone() })?;
        self.index.delete(key, lsn);
        debug!("delete: lsn={}", lsn);
        Ok(lsn)
    }

    pub fn get(&self, key: &MetadataKey) -> Option<Vec<u8>> {
        self.index.get(key)
    }

    pub fn contains(&self, key: &MetadataKey) -> bool {
        self.index.contains(key)
    }

    /// Write several entries under one WAL record
    pub fn batch_put(&self, entries: Vec<(MetadataKey, Vec<u8>)>) -> Result<u64> {
        if entries.is_empty() {
            return Ok(self.wal.current_lsn());
        }

        let ops: Vec<MetadataOp> = entries
            .iter()
            .map(|(k, v)| MetadataOp::Put {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();
        let lsn = self.wal.append_batch(&ops)?;

        for (key, value) in entries {
            self.index.put(key, value, lsn);
        }

        debug!("batch_put: {} entries, lsn={}", ops.len(), lsn);
        Ok(lsn)
    }

    /// Scan entries with a key prefix
    pub fn scan_prefix(&self, prefix: &MetadataKey) -> Vec<(MetadataKey, Vec<u8>)> {
        self.index.scan_prefix(prefix)
    }

    /// Iterate entries under `prefix`, giving up once `timeout` has elapsed
    ///
    /// The deadline is checked before each entry is handed out, so time spent
    /// by the caller processing entries counts against it. After yielding
    /// `Err(Timeout)` the walk is finished.
    pub fn walk(&self, prefix: &MetadataKey, timeout: Option<Duration>) -> MetaWalk {
        MetaWalk {
            entries: self.index.scan_prefix(prefix).into_iter(),
            deadline: timeout.map(|t| Instant::now() + t),
            done: false,
        }
    }

    /// Snapshot the index and drop the WAL records it covers
    pub fn compact(&self) -> Result<PathBuf> {
        let _guard = self.compaction_lock.lock();
        compact_locked(&self.index, &self.wal)
    }

    /// Compact if either the index or the WAL crossed its threshold
    pub fn maybe_compact(&self) -> Result<Option<PathBuf>> {
        if self.needs_compaction() {
            Ok(Some(self.compact()?))
        } else {
            Ok(None)
        }
    }

    pub fn needs_compaction(&self) -> bool {
        self.index.needs_snapshot() || self.wal.needs_compaction()
    }

    /// Flush and fsync the WAL
    pub fn sync(&self) -> Result<()> {
        self.wal.sync()
    }

    pub fn len(&self) -> u64 {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn current_lsn(&self) -> u64 {
        self.wal.current_lsn()
    }

    pub fn wal_size(&self) -> u64 {
        self.wal.size()
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn start_background_compaction(&self) {
        let (tx, rx): (Sender<()>, Receiver<()>) = bounded(1);
        let wal = Arc::clone(&self.wal);
        let index = Arc::clone(&self.index);
        let lock = Arc::clone(&self.compaction_lock);
        let interval = self.config.compaction_interval;

        let handle = thread::spawn(move || {
            debug!("metadata compaction thread started");
            loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                if !(index.needs_snapshot() || wal.needs_compaction()) {
                    continue;
                }
                let _guard = lock.lock();
                if let Err(e) = compact_locked(&index, &wal) {
                    error!("background metadata compaction failed: {}", e);
                }
            }
            debug!("metadata compaction thread stopped");
        });

        *self.shutdown_tx.lock() = Some(tx);
        *self.compaction_handle.lock() = Some(handle);
    }

    /// Stop background compaction and sync the WAL
    pub fn shutdown(&self) {
        // Dropping the sender wakes the thread with a disconnect
        self.shutdown_tx.lock().take();
        if let Some(handle) = self.compaction_handle.lock().take() {
            let _ = handle.join();
        }

        if let Err(e) = self.wal.sync() {
            warn!("final metadata WAL sync failed: {}", e);
        }
    }
}

impl Drop for MetadataStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn compact_locked(index: &BTreeIndex, wal: &MetadataWal) -> Result<PathBuf> {
    let path = index.write_snapshot()?;
    let snapshot_lsn = index.last_snapshot_lsn();
    info!("wrote metadata snapshot at LSN {}", snapshot_lsn);

    if snapshot_lsn > 0 {
        // Records at or below the snapshot LSN are now redundant
        wal.truncate_before(snapshot_lsn + 1)?;
    }
    Ok(path)
}

/// Iterator returned by [`MetadataStore::walk`]
pub struct MetaWalk {
    entries: std::vec::IntoIter<(MetadataKey, Vec<u8>)>,
    deadline: Option<Instant>,
    done: bool,
}

impl Iterator for MetaWalk {
    type Item = Result<(MetadataKey, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = self.entries.next();
        if next.is_none() {
            self.done = true;
            return None;
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                self.done = true;
                return Some(Err(Error::timeout("metadata walk exceeded its deadline")));
            }
        }
        next.map(Ok)
    }
}
