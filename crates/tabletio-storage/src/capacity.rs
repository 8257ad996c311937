//! Free-space tracking for a data directory

use nix::sys::statvfs::statvfs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tabletio_common::{Error, Result, StorageConfig};

/// Last observed capacity of the filesystem holding a directory
#[derive(Debug, Default)]
pub struct Capacity {
    available_bytes: AtomicU64,
    capacity_bytes: AtomicU64,
}

impl Capacity {
    pub fn new(available_bytes: u64, capacity_bytes: u64) -> Self {
        Self {
            available_bytes: AtomicU64::new(available_bytes),
            capacity_bytes: AtomicU64::new(capacity_bytes),
        }
    }

    /// Re-read the filesystem statistics for `path`
    pub fn update(&self, path: &Path) -> Result<()> {
        let (available, capacity) = query_space(path)?;
        self.set(available, capacity);
        Ok(())
    }

    pub fn set(&self, available_bytes: u64, capacity_bytes: u64) {
        self.available_bytes.store(available_bytes, Ordering::Relaxed);
        self.capacity_bytes.store(capacity_bytes, Ordering::Relaxed);
    }

    pub fn available_bytes(&self) -> u64 {
        self.available_bytes.load(Ordering::Relaxed)
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes.load(Ordering::Relaxed)
    }

    /// Used fraction after writing `incoming` more bytes
    ///
    /// An unknown (zero) capacity counts as full.
    pub fn disk_usage(&self, incoming: u64) -> f64 {
        let capacity = self.capacity_bytes();
        if capacity == 0 {
            return 1.0;
        }
        let used = capacity.saturating_sub(self.available_bytes()) as f64 + incoming as f64;
        used / capacity as f64
    }

    /// Bytes left after writing `incoming` more bytes, negative when it would not fit
    pub fn left_bytes(&self, incoming: u64) -> i128 {
        i128::from(self.available_bytes()) - i128::from(incoming)
    }

    /// Whether writing `incoming` bytes would cross the flood stage
    ///
    /// Both the usage percentage and the remaining-bytes floor must be breached.
    pub fn limit_reached(&self, incoming: u64, config: &StorageConfig) -> bool {
        let used_pct = self.disk_usage(incoming);
        let left = self.left_bytes(incoming);
        used_pct >= f64::from(config.storage_flood_stage_usage_percent) / 100.0
            && left <= i128::from(config.storage_flood_stage_left_capacity_bytes)
    }
}

/// `(available, total)` bytes of the filesystem holding `path`
pub fn query_space(path: &Path) -> Result<(u64, u64)> {
    let stat = statvfs(path).map_err(|e| Error::DiskIo(e.into()))?;
    let fragment = stat.fragment_size() as u64;
    let available = stat.blocks_available() as u64 * fragment;
    let capacity = stat.blocks() as u64 * fragment;
    Ok((available, capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: u64 = 1024 * 1024 * 1024;

    fn config(pct: u32, floor: u64) -> StorageConfig {
        StorageConfig {
            storage_flood_stage_usage_percent: pct,
            storage_flood_stage_left_capacity_bytes: floor,
            ..Default::default()
        }
    }

    #[test]
    fn test_limit_requires_both_conditions() {
        let cfg = config(95, GB);

        // 99% used, 1 GB left on a 100 GB disk: both breached
        let cap = Capacity::new(GB, 100 * GB);
        assert!(cap.limit_reached(0, &cfg));

        // Huge disk, 98% used but 200 GB left: percentage only
        let cap = Capacity::new(200 * GB, 10_000 * GB);
        assert!(cap.disk_usage(0) >= 0.95);
        assert!(!cap.limit_reached(0, &cfg));

        // Tiny disk, 512 MB left but only half used: floor only
        let cap = Capacity::new(GB / 2, GB);
        assert!(!cap.limit_reached(0, &cfg));
    }

    #[test]
    fn test_incoming_bytes_tip_over_limit() {
        let cfg = config(95, GB);
        let cap = Capacity::new(6 * GB, 100 * GB);
        assert!(!cap.limit_reached(0, &cfg));
        assert!(!cap.limit_reached(GB, &cfg));
        assert!(cap.limit_reached(5 * GB, &cfg));
        // Does not fit at all
        assert!(cap.limit_reached(10 * GB, &cfg));
    }

    #[test]
    fn test_exact_boundaries_count_as_reached() {
        let cfg = config(90, 10);
        let cap = Capacity::new(10, 100);
        assert!((cap.disk_usage(0) - 0.9).abs() < f64::EPSILON);
        assert!(cap.limit_reached(0, &cfg));
    }

    #[test]
    fn test_zero_capacity_is_full() {
        let cap = Capacity::default();
        assert!((cap.disk_usage(0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_update_from_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let cap = Capacity::default();
        cap.update(dir.path()).unwrap();
        assert!(cap.capacity_bytes() > 0);
        assert!(cap.available_bytes() <= cap.capacity_bytes());
        assert!(cap.update(&dir.path().join("missing")).is_err());
    }
}
