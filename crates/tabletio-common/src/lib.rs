//! TabletIO Common - Shared types and utilities
//!
//! This crate provides the identifiers, error definitions and configuration
//! structures shared by the storage engine and the node daemon.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DataDirConfig, StorageConfig};
pub use error::{Error, Result};
pub use types::*;
