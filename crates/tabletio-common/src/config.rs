//! Configuration types for TabletIO
//!
//! This module defines configuration structures used across components.
//! Every field has a default so a partial TOML file is enough.

use crate::types::StorageMedium;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a storage node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Node identity
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Host name mixed into every directory's path hash.
    /// Resolved from the OS when unset.
    pub host: Option<String>,
}

/// Configuration for a single data directory
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataDirConfig {
    /// Root path of the directory (one per disk or mount)
    pub path: PathBuf,
    /// Storage medium of the underlying device
    #[serde(default)]
    pub medium: StorageMedium,
}

impl DataDirConfig {
    pub fn new(path: impl Into<PathBuf>, medium: StorageMedium) -> Self {
        Self {
            path: path.into(),
            medium,
        }
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directories to manage
    pub dirs: Vec<DataDirConfig>,
    /// Timeout for the tablet-meta walk at startup (0 = no timeout)
    pub load_tablet_timeout_secs: u64,
    /// Keep starting even if some tablet metas failed to load
    pub ignore_load_tablet_failure: bool,
    /// Sleep after this many paths during a GC sweep (0 = never)
    pub path_gc_check_step: usize,
    /// How long to sleep every `path_gc_check_step` paths
    pub path_gc_check_step_interval_ms: u64,
    /// Used-space percentage at which a directory is flooded
    pub storage_flood_stage_usage_percent: u32,
    /// Remaining bytes at or below which a directory is flooded
    pub storage_flood_stage_left_capacity_bytes: u64,
    /// Fsync the data directory after creating a new shard
    pub sync_tablet_meta: bool,
    /// Age after which a temp merge (`.crm`) file is garbage
    pub unused_crm_file_threshold_secs: u64,
    /// Period of the data path scan
    pub path_scan_interval_secs: u64,
    /// Period of the GC sweeps
    pub path_gc_check_interval_secs: u64,
    /// Period of health checks and capacity refreshes
    pub disk_stat_monitor_interval_secs: u64,
    /// Period of the tmp path scan
    pub tmp_path_scan_interval_secs: u64,
    /// Period of the `.crm` sweep
    pub crm_gc_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dirs: Vec::new(),
            load_tablet_timeout_secs: 3600,
            ignore_load_tablet_failure: false,
            path_gc_check_step: 1000,
            path_gc_check_step_interval_ms: 10,
            storage_flood_stage_usage_percent: 95,
            storage_flood_stage_left_capacity_bytes: 1024 * 1024 * 1024, // 1 GB
            sync_tablet_meta: false,
            unused_crm_file_threshold_secs: 24 * 60 * 60, // 1 day
            path_scan_interval_secs: 24 * 60 * 60,
            path_gc_check_interval_secs: 24 * 60 * 60,
            disk_stat_monitor_interval_secs: 5,
            tmp_path_scan_interval_secs: 60 * 60,
            crm_gc_interval_secs: 60 * 60,
        }
    }
}

impl StorageConfig {
    /// Tablet-meta walk timeout, `None` when disabled
    #[must_use]
    pub const fn load_tablet_timeout(&self) -> Option<Duration> {
        if self.load_tablet_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.load_tablet_timeout_secs))
        }
    }

    /// Pause taken by GC sweeps every `path_gc_check_step` paths
    #[must_use]
    pub const fn path_gc_step_interval(&self) -> Duration {
        Duration::from_millis(self.path_gc_check_step_interval_ms)
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
