//! On-disk layout of a data directory
//!
//! ```text
//! <root>/data/<shard>/<tablet_id>/<schema_hash>/{rowset & index files, *.cols, *.ivt/}
//! <root>/tmp/*.crm
//! <root>/trash/<time_label>/<tablet_id>/<schema_hash>
//! <root>/persistent_index/...
//! <root>/meta/                 metadata store (WAL + snapshots)
//! <root>/.cluster_id
//! <root>/.testfile             health probe sentinel
//! ```

use std::path::{Component, Path};
use tabletio_common::{RowsetId, SchemaHash, TabletId};

pub const DATA_PREFIX: &str = "data";
pub const TMP_PREFIX: &str = "tmp";
pub const TRASH_PREFIX: &str = "trash";
pub const PERSISTENT_INDEX_PREFIX: &str = "persistent_index";
pub const META_PREFIX: &str = "meta";

/// Marker left by the legacy aligned layout; such roots are not loadable
pub const ALIGN_TAG_FILE: &str = "align_tag";
pub const TEST_FILE: &str = ".testfile";
pub const CLUSTER_ID_FILE: &str = ".cluster_id";

/// Number of shard directories under `data/`
pub const MAX_SHARD_NUM: u64 = 1024;

/// Temp merge file produced by compaction
pub const CRM_SUFFIX: &str = ".crm";
/// Delta column group file of a primary-key tablet
pub const DCG_SUFFIX: &str = ".cols";
/// Inverted index directory
pub const INDEX_DIR_SUFFIX: &str = ".ivt";

/// Suffixes of the regular files a rowset writes
const ROWSET_FILE_SUFFIXES: [&str; 5] = [".dat", ".idx", ".del", ".upt", DCG_SUFFIX];

/// Parse `(tablet_id, schema_hash)` from a path under `data/`
///
/// Accepts the schema-hash directory itself or anything below it. Both ids
/// must be positive.
pub fn tablet_id_and_schema_hash_from_path(path: &Path) -> Option<(TabletId, SchemaHash)> {
    let parts: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();

    // Rightmost `data/<shard>/<tablet_id>/<schema_hash>` wins
    (0..parts.len()).rev().find_map(|i| {
        if parts[i] != DATA_PREFIX || i + 3 >= parts.len() {
            return None;
        }
        parts[i + 1].parse::<u64>().ok()?;
        let tablet_id = parts[i + 2].parse::<TabletId>().ok()?;
        let schema_hash = parts[i + 3].parse::<SchemaHash>().ok()?;
        (tablet_id > 0 && schema_hash > 0).then_some((tablet_id, schema_hash))
    })
}

/// Extract the rowset id from a rowset file or index directory name
///
/// `<rowset_id>_<segment>.dat`, `<rowset_id>.idx`, `<rowset_id>_<n>_<col>.ivt`
/// and the like. Returns `None` for anything that is not a rowset file.
pub fn rowset_id_from_path(path: &Path) -> Option<RowsetId> {
    let name = path.file_name()?.to_str()?;
    let known = ROWSET_FILE_SUFFIXES
        .iter()
        .chain(std::iter::once(&INDEX_DIR_SUFFIX))
        .any(|suffix| name.len() > suffix.len() && name.ends_with(suffix));
    if !known {
        return None;
    }
    let end = name.find(['_', '.']).unwrap_or(name.len());
    RowsetId::new(&name[..end])
}

pub fn is_delta_column_file(name: &str) -> bool {
    name.ends_with(DCG_SUFFIX)
}

pub fn is_index_dir(name: &str) -> bool {
    name.ends_with(INDEX_DIR_SUFFIX)
}

pub fn is_crm_file(name: &str) -> bool {
    name.ends_with(CRM_SUFFIX)
}

/// File name of segment `segment_id` of a rowset
pub fn segment_file_name(rowset_id: &RowsetId, segment_id: u32) -> String {
    format!("{}_{}.dat", rowset_id.as_str(), segment_id)
}
