//! Catalog entries and version records.

use garner_ecc::EccMap;
use garner_types::{BackupId, GlobalId, VersionTag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entry type: a file carries versions, a directory carries children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    File,
    Dir,
}

/// One sealed version of a file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// The version tag.
    pub tag: VersionTag,
    /// Erasure layout the version was uploaded with.
    pub ecc_map: EccMap,
    /// Number of blocks; fixed when the version is sealed.
    pub block_count: u32,
    /// Block size the producer used, bytes.
    pub block_size: u32,
    /// Original source size, bytes.
    pub size: u64,
}

/// One entry of the catalog tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Stable path ID, e.g. `0/3/1`; empty for the root.
    pub path_id: String,
    /// Entry name within its parent.
    pub name: String,
    /// Parent path ID; the root is its own parent (`""`).
    pub parent: String,
    /// File or directory.
    #[serde(rename = "type")]
    pub item_type: ItemType,
    /// The key namespace blocks of this entry are encrypted under.
    pub key_id: String,
    /// Source size of the latest version, bytes.
    pub size: u64,
    /// Sealed versions, keyed by tag text.
    #[serde(default)]
    pub versions: BTreeMap<String, VersionInfo>,
}

impl CatalogItem {
    /// Whether this entry is the tree root.
    pub fn is_root(&self) -> bool {
        self.path_id.is_empty()
    }

    /// Build the backup ID of one version of this entry.
    pub fn backup_id(&self, customer: &GlobalId, tag: &VersionTag) -> BackupId {
        BackupId::new(customer.clone(), &self.path_id, tag.clone())
    }

    /// The latest version by tag order, if any.
    pub fn latest_version(&self) -> Option<&VersionInfo> {
        self.versions.values().last()
    }
}
