//! Storage engine
//!
//! Opens every configured data directory, recovers them in parallel and runs
//! the periodic maintenance workers (health probes, path scans, GC sweeps).

use crate::catalog::TabletManager;
use crate::data_dir::{DataDir, StoreContext};
use crate::loader::LoadReport;
use crate::registry::StoreRegistry;
use crate::tablet::Rowset;
use crate::txn::MemTxnManager;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tabletio_common::{Error, Result, RowsetId, StorageConfig};
use tracing::{error, info, warn};

pub struct StorageEngine {
    config: Arc<StorageConfig>,
    registry: Arc<StoreRegistry>,
    tablet_manager: Arc<TabletManager>,
    txn_manager: Arc<MemTxnManager>,
    dirs: Vec<Arc<DataDir>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl StorageEngine {
    /// Open and initialize every directory in `config.dirs`
    ///
    /// `host` is mixed into the path hashes; the OS host name is used when unset.
    pub fn open(config: StorageConfig, host: Option<String>) -> Result<Self> {
        if config.dirs.is_empty() {
            return Err(Error::Configuration("no data dirs configured".to_string()));
        }
        let host = host.unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned());
        let config = Arc::new(config);
        let registry = Arc::new(StoreRegistry::new());
        let tablet_manager = Arc::new(TabletManager::new());
        let txn_manager = Arc::new(MemTxnManager::new());
        let ctx = StoreContext {
            config: Arc::clone(&config),
            host,
            tablet_catalog: tablet_manager.clone(),
            txn_manager: txn_manager.clone(),
            registry: Arc::clone(&registry),
        };

        let mut dirs = Vec::with_capacity(config.dirs.len());
        for dir_config in &config.dirs {
            let dir = DataDir::new(&dir_config.path, dir_config.medium, ctx.clone());
            dir.init().map_err(|e| {
                error!("failed to init data dir {}: {}", dir_config.path.display(), e);
                e
            })?;
            dirs.push(dir);
        }
        info!("opened {} data dirs on {}", dirs.len(), ctx.host);

        Ok(Self {
            config,
            registry,
            tablet_manager,
            txn_manager,
            dirs,
            shutdown_tx: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Recover every directory, one thread per directory
    ///
    /// Fails if any directory hit an unrecoverable load error.
    pub fn load(&self) -> Result<Vec<LoadReport>> {
        let results: Vec<Result<LoadReport>> = std::thread::scope(|s| {
            let handles: Vec<_> = self
                .dirs
                .iter()
                .map(|dir| s.spawn(move || dir.load()))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(Error::internal("data dir load thread panicked")))
                })
                .collect()
        });
        results.into_iter().collect()
    }

    pub fn stores(&self) -> &[Arc<DataDir>] {
        &self.dirs
    }

    pub fn get_store(&self, path: &Path) -> Option<Arc<DataDir>> {
        self.registry.get_store(path)
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    pub fn tablet_manager(&self) -> &Arc<TabletManager> {
        &self.tablet_manager
    }

    pub fn txn_manager(&self) -> &Arc<MemTxnManager> {
        &self.txn_manager
    }

    pub fn add_unused_rowset(&self, rowset: Arc<Rowset>) {
        self.registry.add_unused_rowset(rowset);
    }

    pub fn check_rowset_id_in_unused_rowsets(&self, rowset_id: &RowsetId) -> bool {
        self.registry.check_rowset_id_in_unused_rowsets(rowset_id)
    }

    /// Start the periodic maintenance threads
    ///
    /// Calling it again while workers are running does nothing.
    pub fn start_bg_workers(&self) -> Result<()> {
        let mut shutdown_tx = self.shutdown_tx.lock();
        if shutdown_tx.is_some() {
            return Ok(());
        }
        let (tx, rx) = bounded::<()>(1);
        let config = &self.config;
        let crm_threshold = Duration::from_secs(config.unused_crm_file_threshold_secs);

        let mut workers = self.workers.lock();
        workers.push(self.spawn_worker(
            "disk-stat",
            Duration::from_secs(config.disk_stat_monitor_interval_secs),
            rx.clone(),
            |dir| {
                dir.health_check();
                if let Err(e) = dir.update_capacity() {
                    warn!("update capacity of {} failed: {}", dir.path().display(), e);
                }
            },
        )?);
        workers.push(self.spawn_worker(
            "path-scan",
            Duration::from_secs(config.path_scan_interval_secs),
            rx.clone(),
            |dir| {
                dir.perform_path_scan();
            },
        )?);
        workers.push(self.spawn_worker(
            "path-gc",
            Duration::from_secs(config.path_gc_check_interval_secs),
            rx.clone(),
            |dir| {
                dir.perform_path_gc_by_tablet();
                dir.perform_path_gc_by_rowsetid();
                dir.perform_delta_column_files_gc();
            },
        )?);
        workers.push(self.spawn_worker(
            "tmp-scan",
            Duration::from_secs(config.tmp_path_scan_interval_secs),
            rx.clone(),
            |dir| {
                dir.perform_tmp_path_scan();
            },
        )?);
        workers.push(self.spawn_worker(
            "crm-gc",
            Duration::from_secs(config.crm_gc_interval_secs),
            rx,
            move |dir| {
                dir.perform_crm_gc(crm_threshold);
            },
        )?);

        *shutdown_tx = Some(tx);
        info!("started {} background workers", workers.len());
        Ok(())
    }

    fn spawn_worker<F>(
        &self,
        name: &str,
        interval: Duration,
        shutdown_rx: Receiver<()>,
        task: F,
    ) -> Result<JoinHandle<()>>
    where
        F: Fn(&DataDir) + Send + 'static,
    {
        let dirs = self.dirs.clone();
        let interval = interval.max(Duration::from_secs(1));
        std::thread::Builder::new()
            .name(format!("tabletio-{name}"))
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            for dir in &dirs {
                                if !dir.bg_worker_stopped() {
                                    task(&**dir);
                                }
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .map_err(Error::from)
    }

    /// Stop every sweep and join the background workers
    pub fn stop(&self) {
        for dir in &self.dirs {
            dir.stop_bg_worker();
        }
        // Dropping the sender wakes every worker with a disconnect
        self.shutdown_tx.lock().take();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        let count = workers.len();
        for handle in workers {
            if handle.join().is_err() {
                warn!("background worker panicked");
            }
        }
        for dir in &self.dirs {
            if let Ok(store) = dir.meta_store()
                && let Err(e) = store.sync()
            {
                warn!("sync meta store of {} failed: {}", dir.path().display(), e);
            }
        }
        if count > 0 {
            info!("stopped {} background workers", count);
        }
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
