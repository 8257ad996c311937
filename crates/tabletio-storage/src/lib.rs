//! TabletIO Storage - Local data directory management
//!
//! This crate implements the storage-directory layer of a TabletIO node:
//! - Data directory lifecycle (layout, shards, health, capacity)
//! - Startup recovery of tablets and rowsets from the metadata store
//! - Garbage collection of orphaned tablet, rowset and temp files
//! - Metadata storage (WAL + B-tree + snapshots)
//! - Tablet catalog and transaction manager seams
//! - Storage engine with background maintenance workers

pub mod capacity;
pub mod catalog;
pub mod cluster_id;
pub mod data_dir;
pub mod engine;
pub mod gc;
pub mod health;
pub mod layout;
pub mod loader;
pub mod meta_manager;
pub mod metadata;
pub mod registry;
pub mod tablet;
pub mod txn;

// Re-exports
pub use capacity::Capacity;
pub use catalog::{DropFlag, TabletCatalog, TabletManager};
pub use cluster_id::ClusterIdMgr;
pub use data_dir::{DataDir, DiskState, StoreContext, hash_of_path};
pub use engine::StorageEngine;
pub use gc::process_garbage_path;
pub use loader::LoadReport;
pub use meta_manager::{RowsetMetaManager, TabletMetaManager};
pub use metadata::{
    MetaWalk, MetadataEntry, MetadataKey, MetadataOp, MetadataStore, MetadataStoreConfig,
    MetadataWal,
};
pub use registry::StoreRegistry;
pub use tablet::{DeltaColumnGroup, Rowset, RowsetMeta, Tablet, TabletMeta, TabletSchema};
pub use txn::{MemTxnManager, TxnManager};
