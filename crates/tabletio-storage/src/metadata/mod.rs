//! Per-directory metadata storage
//!
//! Every data directory keeps its tablet metas, rowset metas and delta column
//! groups in a local ordered key-value store:
//! - **WAL**: append-only log for durability and crash recovery
//! - **B-tree index**: in-memory ordered map, snapshotted on compaction
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                MetadataStore                 │
//! │  ┌────────────────────────────────────────┐  │
//! │  │        B-tree index (in-memory)        │  │
//! │  │  • sorted by key for prefix walks      │  │
//! │  │  • snapshot to disk on compact()       │  │
//! │  └────────────────────────────────────────┘  │
//! │                     │                        │
//! │  ┌────────────────────────────────────────┐  │
//! │  │           WAL (append-only)            │  │
//! │  │  • every mutation logged first         │  │
//! │  │  • truncated after a snapshot          │  │
//! │  └────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Recovery
//! 1. Load latest snapshot into the B-tree
//! 2. Replay WAL entries after the snapshot LSN

mod btree;
mod store;
mod types;
mod wal;

pub use btree::BTreeConfig;
pub use store::{MetaWalk, MetadataStore, MetadataStoreConfig};
pub use types::{MetadataEntry, MetadataKey, MetadataOp};
pub use wal::{MetadataWal, WalConfig};
