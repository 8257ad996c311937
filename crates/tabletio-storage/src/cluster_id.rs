//! Cluster membership marker of a data directory
//!
//! A directory that has joined a cluster records the cluster id in
//! `<root>/.cluster_id`. A directory must never be reused by another cluster.

use crate::layout::CLUSTER_ID_FILE;
use parking_lot::Mutex;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tabletio_common::{Error, Result};
use tracing::info;

pub struct ClusterIdMgr {
    path: PathBuf,
    cluster_id: Mutex<Option<i32>>,
}

impl ClusterIdMgr {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(CLUSTER_ID_FILE),
            cluster_id: Mutex::new(None),
        }
    }

    /// Read the recorded id, if any
    pub fn init(&self) -> Result<()> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let id = trimmed.parse::<i32>().map_err(|_| {
            Error::corruption(format!(
                "invalid cluster id {:?} in {}",
                trimmed,
                self.path.display()
            ))
        })?;
        *self.cluster_id.lock() = Some(id);
        Ok(())
    }

    pub fn cluster_id(&self) -> Option<i32> {
        *self.cluster_id.lock()
    }

    /// Record `cluster_id`, or confirm it matches the one already recorded
    pub fn set_cluster_id(&self, cluster_id: i32) -> Result<()> {
        let mut current = self.cluster_id.lock();
        match *current {
            Some(existing) if existing == cluster_id => Ok(()),
            Some(existing) => Err(Error::corruption(format!(
                "cluster id mismatch in {}: recorded {}, requested {}",
                self.path.display(),
                existing,
                cluster_id
            ))),
            None => {
                let tmp = self.path.with_extension("tmp");
                {
                    let mut file = std::fs::File::create(&tmp)?;
                    write!(file, "{}", cluster_id)?;
                    file.sync_all()?;
                }
                std::fs::rename(&tmp, &self.path)?;
                info!("recorded cluster id {} in {}", cluster_id, self.path.display());
                *current = Some(cluster_id);
                Ok(())
            }
        }
    }
}
