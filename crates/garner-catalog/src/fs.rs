//! The catalog tree and its operations.
//!
//! Invariants:
//! - every path ID is unique and never reused, even after deletion;
//! - a child's path ID extends its parent's (`0/3` is a child of `0`);
//! - every entry except the root has exactly one existing parent;
//! - the root's path ID is empty.
//!
//! Every mutation bumps the revision. Deletions leave a tombstone so that
//! replica merges can tell "deleted here" from "created elsewhere".

use std::collections::BTreeMap;

use garner_types::{BackupId, GlobalId, VersionTag};
use tracing::debug;

use crate::item::{CatalogItem, ItemType, VersionInfo};
use crate::{CatalogError, Result};

/// The catalog file system of one customer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogFs {
    customer: GlobalId,
    items: BTreeMap<String, CatalogItem>,
    tombstones: BTreeMap<String, u64>,
    revision: u64,
}

impl CatalogFs {
    /// Create an empty catalog for a customer.
    pub fn new(customer: GlobalId) -> Self {
        let customer = customer.without_path();
        let root = CatalogItem {
            path_id: String::new(),
            name: String::new(),
            parent: String::new(),
            item_type: ItemType::Dir,
            key_id: customer.key_id(),
            size: 0,
            versions: BTreeMap::new(),
        };
        let mut items = BTreeMap::new();
        items.insert(String::new(), root);
        Self {
            customer,
            items,
            tombstones: BTreeMap::new(),
            revision: 0,
        }
    }

    /// Rebuild a catalog from serialized parts.
    pub(crate) fn from_parts(
        customer: GlobalId,
        items: BTreeMap<String, CatalogItem>,
        tombstones: BTreeMap<String, u64>,
        revision: u64,
    ) -> Self {
        Self {
            customer,
            items,
            tombstones,
            revision,
        }
    }

    /// The customer owning this catalog.
    pub fn customer(&self) -> &GlobalId {
        &self.customer
    }

    /// Current revision; bumps on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// All entries, root included, ordered by path ID.
    pub fn items(&self) -> impl Iterator<Item = &CatalogItem> {
        self.items.values()
    }

    /// Deletion markers: path ID to the revision it was deleted at.
    pub fn tombstones(&self) -> &BTreeMap<String, u64> {
        &self.tombstones
    }

    /// Look up an entry by path ID.
    pub fn item(&self, path_id: &str) -> Option<&CatalogItem> {
        self.items.get(path_id)
    }

    /// Children of a directory, ordered by name.
    pub fn children(&self, parent_id: &str) -> Vec<&CatalogItem> {
        let mut out: Vec<&CatalogItem> = self
            .items
            .values()
            .filter(|item| !item.is_root() && item.parent == parent_id)
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Resolve a human path to its path ID.
    pub fn to_id(&self, path: &str) -> Option<String> {
        let mut current = String::new();
        for segment in split_path(path) {
            let child = self
                .items
                .values()
                .find(|item| !item.is_root() && item.parent == current && item.name == segment)?;
            current = child.path_id.clone();
        }
        Some(current)
    }

    /// Resolve a path ID back to its human path.
    pub fn to_path(&self, path_id: &str) -> Option<String> {
        if path_id.is_empty() {
            return Some(String::new());
        }
        let mut segments = Vec::new();
        let mut current = self.items.get(path_id)?;
        loop {
            segments.push(current.name.clone());
            if current.parent.is_empty() {
                break;
            }
            current = self.items.get(&current.parent)?;
        }
        segments.reverse();
        Some(segments.join("/"))
    }

    /// Create an entry under an existing directory.
    pub fn put_item(&mut self, parent_id: &str, name: &str, item_type: ItemType) -> Result<String> {
        let parent = self
            .items
            .get(parent_id)
            .ok_or_else(|| CatalogError::NotFound(parent_id.to_string()))?;
        if parent.item_type != ItemType::Dir {
            return Err(CatalogError::WrongType(parent_id.to_string()));
        }
        if name.is_empty() || name.contains('/') {
            return Err(CatalogError::InvariantViolation(format!(
                "bad entry name: {name:?}"
            )));
        }
        if self
            .children(parent_id)
            .iter()
            .any(|child| child.name == name)
        {
            return Err(CatalogError::AlreadyExists(name.to_string()));
        }

        let path_id = self.allocate_child_id(parent_id);
        let item = CatalogItem {
            path_id: path_id.clone(),
            name: name.to_string(),
            parent: parent_id.to_string(),
            item_type,
            key_id: self.customer.key_id(),
            size: 0,
            versions: BTreeMap::new(),
        };
        self.items.insert(path_id.clone(), item);
        self.bump();
        debug!(path_id = %path_id, name = %name, "catalog entry created");
        Ok(path_id)
    }

    /// Create a directory path, making intermediate directories as needed.
    ///
    /// Idempotent: an existing directory is returned as-is.
    pub fn add_dir(&mut self, path: &str) -> Result<String> {
        let mut current = String::new();
        for segment in split_path(path) {
            let existing = self
                .items
                .values()
                .find(|item| !item.is_root() && item.parent == current && item.name == segment)
                .map(|item| (item.path_id.clone(), item.item_type));
            current = match existing {
                Some((id, ItemType::Dir)) => id,
                Some((id, ItemType::File)) => return Err(CatalogError::WrongType(id)),
                None => self.put_item(&current.clone(), segment, ItemType::Dir)?,
            };
        }
        Ok(current)
    }

    /// Create a file entry, making parent directories as needed.
    pub fn add_file(&mut self, path: &str) -> Result<String> {
        let segments: Vec<&str> = split_path(path).collect();
        let (name, dirs) = segments
            .split_last()
            .ok_or_else(|| CatalogError::InvariantViolation("empty file path".to_string()))?;
        let parent_id = self.add_dir(&dirs.join("/"))?;
        self.put_item(&parent_id, name, ItemType::File)
    }

    /// Delete an entry and its whole subtree, leaving tombstones.
    pub fn delete_by_id(&mut self, path_id: &str) -> Result<()> {
        if path_id.is_empty() {
            return Err(CatalogError::InvariantViolation(
                "cannot delete the root".to_string(),
            ));
        }
        if !self.items.contains_key(path_id) {
            return Err(CatalogError::NotFound(path_id.to_string()));
        }
        let doomed: Vec<String> = self
            .items
            .keys()
            .filter(|id| is_same_or_descendant(id, path_id))
            .cloned()
            .collect();
        self.bump();
        let revision = self.revision;
        for id in doomed {
            self.items.remove(&id);
            self.tombstones.insert(id, revision);
        }
        debug!(path_id = %path_id, "catalog subtree deleted");
        Ok(())
    }

    /// Visit an entry and its whole subtree, parents before children.
    pub fn walk_by_id<F: FnMut(&CatalogItem)>(&self, path_id: &str, mut visit: F) -> Result<()> {
        if !self.items.contains_key(path_id) {
            return Err(CatalogError::NotFound(path_id.to_string()));
        }
        // BTreeMap order puts a parent's ID right before its descendants.
        for (id, item) in &self.items {
            if is_same_or_descendant(id, path_id) {
                visit(item);
            }
        }
        Ok(())
    }

    /// Version tags of a file, oldest first.
    pub fn list_versions(&self, path_id: &str) -> Result<Vec<VersionTag>> {
        let item = self.expect_file(path_id)?;
        Ok(item.versions.values().map(|v| v.tag.clone()).collect())
    }

    /// Size, latest tag and all version records of a file.
    pub fn extract_versions(
        &self,
        path_id: &str,
    ) -> Result<(u64, Option<VersionTag>, Vec<VersionInfo>)> {
        let item = self.expect_file(path_id)?;
        let latest = item.latest_version().map(|v| v.tag.clone());
        Ok((
            item.size,
            latest,
            item.versions.values().cloned().collect(),
        ))
    }

    /// Record a sealed version on a file entry.
    pub fn add_version(&mut self, path_id: &str, info: VersionInfo) -> Result<BackupId> {
        let customer = self.customer.clone();
        let item = self.expect_file_mut(path_id)?;
        let backup_id = item.backup_id(&customer, &info.tag);
        item.size = info.size;
        item.versions.insert(info.tag.as_str().to_string(), info);
        self.bump();
        Ok(backup_id)
    }

    /// Remove one sealed version from a file entry.
    pub fn delete_version(&mut self, path_id: &str, tag: &VersionTag) -> Result<VersionInfo> {
        let item = self.expect_file_mut(path_id)?;
        let removed = item
            .versions
            .remove(tag.as_str())
            .ok_or_else(|| CatalogError::NotFound(format!("{path_id}/{tag}")))?;
        self.bump();
        Ok(removed)
    }

    /// Whether a segment with this backup ID is known to the catalog.
    pub fn knows_version(&self, backup_id: &BackupId) -> bool {
        if backup_id.customer.key_id() != self.customer.key_id() {
            return false;
        }
        self.items
            .get(&backup_id.path_id)
            .is_some_and(|item| item.versions.contains_key(backup_id.version.as_str()))
    }

    /// Every sealed version in the catalog.
    pub fn all_backup_ids(&self) -> Vec<BackupId> {
        let mut out = Vec::new();
        for item in self.items.values() {
            for info in item.versions.values() {
                out.push(item.backup_id(&self.customer, &info.tag));
            }
        }
        out
    }

    /// Check the tree invariants; used after loading persisted state.
    pub fn validate(&self) -> Result<()> {
        for item in self.items.values() {
            if item.is_root() {
                continue;
            }
            let parent = self.items.get(&item.parent).ok_or_else(|| {
                CatalogError::InvariantViolation(format!(
                    "entry {} has missing parent {}",
                    item.path_id, item.parent
                ))
            })?;
            if parent.item_type != ItemType::Dir {
                return Err(CatalogError::InvariantViolation(format!(
                    "entry {} has file parent",
                    item.path_id
                )));
            }
            if !is_same_or_descendant(&item.path_id, &item.parent) || item.path_id == item.parent {
                return Err(CatalogError::InvariantViolation(format!(
                    "entry {} does not extend parent {}",
                    item.path_id, item.parent
                )));
            }
        }
        Ok(())
    }

    /// Merge a replica: the highest revision wins.
    ///
    /// When the replica wins it replaces the local tree at its revision,
    /// except that local paths absent from it are kept unless the replica
    /// carries a tombstone for them. A kept entry retains its path ID when
    /// the replica left it free; a collided ID is reallocated, which keeps
    /// the path visible even though its old segments are then orphaned.
    pub fn merge_replica(&mut self, replica: CatalogFs) -> Result<bool> {
        if replica.revision <= self.revision {
            return Ok(false);
        }

        // Snapshot local entries with their human paths, parents first
        // (path-ID order guarantees it).
        let survivors: Vec<(String, CatalogItem)> = self
            .items
            .iter()
            .filter(|(id, _)| !id.is_empty())
            .filter_map(|(id, item)| self.to_path(id).map(|path| (path, item.clone())))
            .collect();

        let mut merged = replica;
        for (path, item) in survivors {
            if merged.tombstones.contains_key(&item.path_id) {
                continue;
            }
            if merged.to_id(&path).is_some() {
                continue;
            }
            let parent_path = match path.rsplit_once('/') {
                Some((dirs, _)) => dirs.to_string(),
                None => String::new(),
            };
            // Parents were processed first; a missing parent means it was
            // tombstoned upstream, so the subtree goes with it.
            let Some(parent_id) = merged.to_id(&parent_path) else {
                continue;
            };
            let path_id = if merged.items.contains_key(&item.path_id)
                || merged.tombstones.contains_key(&item.path_id)
                || !is_same_or_descendant(&item.path_id, &parent_id)
                || item.path_id == parent_id
            {
                merged.allocate_child_id(&parent_id)
            } else {
                item.path_id.clone()
            };
            merged.items.insert(
                path_id.clone(),
                CatalogItem {
                    path_id,
                    parent: parent_id,
                    ..item
                },
            );
        }

        merged.validate()?;
        *self = merged;
        Ok(true)
    }

    fn expect_file(&self, path_id: &str) -> Result<&CatalogItem> {
        let item = self
            .items
            .get(path_id)
            .ok_or_else(|| CatalogError::NotFound(path_id.to_string()))?;
        if item.item_type != ItemType::File {
            return Err(CatalogError::WrongType(path_id.to_string()));
        }
        Ok(item)
    }

    fn expect_file_mut(&mut self, path_id: &str) -> Result<&mut CatalogItem> {
        let item = self
            .items
            .get_mut(path_id)
            .ok_or_else(|| CatalogError::NotFound(path_id.to_string()))?;
        if item.item_type != ItemType::File {
            return Err(CatalogError::WrongType(path_id.to_string()));
        }
        Ok(item)
    }

    /// Allocate the next child path ID under a parent, never reusing an ID
    /// that a tombstone still remembers.
    fn allocate_child_id(&self, parent_id: &str) -> String {
        let used = self
            .items
            .keys()
            .chain(self.tombstones.keys())
            .filter_map(|id| child_index(id, parent_id));
        let next = used.max().map_or(0, |max| max + 1);
        if parent_id.is_empty() {
            next.to_string()
        } else {
            format!("{parent_id}/{next}")
        }
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

/// Whether `id` equals `ancestor` or lies in its subtree.
fn is_same_or_descendant(id: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    id == ancestor || id.starts_with(&format!("{ancestor}/"))
}

/// The numeric child index of `id` directly under `parent_id`, if any.
fn child_index(id: &str, parent_id: &str) -> Option<u64> {
    let tail = if parent_id.is_empty() {
        id
    } else {
        id.strip_prefix(parent_id)?.strip_prefix('/')?
    };
    if tail.is_empty() || tail.contains('/') {
        return None;
    }
    tail.parse().ok()
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use garner_ecc::EccMap;

    use super::*;

    fn catalog() -> CatalogFs {
        CatalogFs::new(GlobalId::master("alice", "id.example.net"))
    }

    fn version(tag: &str) -> VersionInfo {
        VersionInfo {
            tag: VersionTag::parse(tag).expect("tag"),
            ecc_map: EccMap::from_name("ecc/4x4").expect("map"),
            block_count: 4,
            block_size: 65536,
            size: 200 * 1024,
        }
    }

    #[test]
    fn test_add_file_creates_parents() {
        let mut fs = catalog();
        let id = fs.add_file("photos/2026/cat.bin").expect("add");
        assert_eq!(id, "0/0/0");
        assert_eq!(fs.to_id("photos"), Some("0".to_string()));
        assert_eq!(fs.to_id("photos/2026"), Some("0/0".to_string()));
        assert_eq!(fs.to_path(&id), Some("photos/2026/cat.bin".to_string()));
    }

    #[test]
    fn test_path_ids_extend_parents() {
        let mut fs = catalog();
        let a = fs.add_dir("a").expect("a");
        let b = fs.add_dir("a/b").expect("b");
        let c = fs.add_file("a/b/c.bin").expect("c");
        assert!(c.starts_with(&format!("{b}/")));
        assert!(b.starts_with(&format!("{a}/")));
        fs.validate().expect("invariants hold");
    }

    #[test]
    fn test_sibling_ids_increment() {
        let mut fs = catalog();
        let first = fs.add_file("one.bin").expect("one");
        let second = fs.add_file("two.bin").expect("two");
        assert_eq!(first, "0");
        assert_eq!(second, "1");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut fs = catalog();
        fs.add_file("cat.bin").expect("add");
        assert!(matches!(
            fs.add_file("cat.bin"),
            Err(CatalogError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_add_dir_idempotent() {
        let mut fs = catalog();
        let a = fs.add_dir("photos/2026").expect("first");
        let b = fs.add_dir("photos/2026").expect("second");
        assert_eq!(a, b);
    }

    #[test]
    fn test_revision_bumps_on_mutation_only() {
        let mut fs = catalog();
        assert_eq!(fs.revision(), 0);
        fs.add_file("cat.bin").expect("add");
        let after_add = fs.revision();
        assert!(after_add > 0);

        fs.to_id("cat.bin");
        fs.to_path("0");
        assert_eq!(fs.revision(), after_add);
    }

    #[test]
    fn test_delete_tombstones_subtree() {
        let mut fs = catalog();
        let dir = fs.add_dir("photos").expect("dir");
        let file = fs.add_file("photos/cat.bin").expect("file");

        fs.delete_by_id(&dir).expect("delete");
        assert!(fs.item(&dir).is_none());
        assert!(fs.item(&file).is_none());
        assert!(fs.tombstones().contains_key(&dir));
        assert!(fs.tombstones().contains_key(&file));
    }

    #[test]
    fn test_deleted_ids_never_reused() {
        let mut fs = catalog();
        let first = fs.add_file("one.bin").expect("one");
        fs.delete_by_id(&first).expect("delete");
        let second = fs.add_file("two.bin").expect("two");
        assert_ne!(first, second);
    }

    #[test]
    fn test_versions_lifecycle() {
        let mut fs = catalog();
        let id = fs.add_file("cat.bin").expect("add");
        let backup_id = fs.add_version(&id, version("F20260801093000AM")).expect("seal");
        assert_eq!(
            backup_id.to_string(),
            format!("master$alice@id.example.net/{id}/F20260801093000AM")
        );
        fs.add_version(&id, version("F20260802093000AM")).expect("seal 2");

        let tags = fs.list_versions(&id).expect("list");
        assert_eq!(tags.len(), 2);

        let (size, latest, infos) = fs.extract_versions(&id).expect("extract");
        assert_eq!(size, 200 * 1024);
        assert_eq!(latest.map(|t| t.as_str().to_string()), Some("F20260802093000AM".to_string()));
        assert_eq!(infos.len(), 2);

        assert!(fs.knows_version(&backup_id));
        fs.delete_version(&id, &VersionTag::parse("F20260801093000AM").expect("tag"))
            .expect("delete version");
        assert_eq!(fs.list_versions(&id).expect("list").len(), 1);
    }

    #[test]
    fn test_versions_require_file() {
        let mut fs = catalog();
        let dir = fs.add_dir("photos").expect("dir");
        assert!(matches!(
            fs.add_version(&dir, version("F20260801093000AM")),
            Err(CatalogError::WrongType(_))
        ));
    }

    #[test]
    fn test_walk_visits_parents_first() {
        let mut fs = catalog();
        fs.add_file("a/b/c.bin").expect("add");
        let mut seen = Vec::new();
        fs.walk_by_id("", |item| seen.push(item.path_id.clone()))
            .expect("walk");
        assert_eq!(seen, vec!["", "0", "0/0", "0/0/0"]);
    }

    #[test]
    fn test_merge_lower_revision_is_noop() {
        let mut fs = catalog();
        fs.add_file("cat.bin").expect("add");
        let replica = catalog();
        assert!(!fs.merge_replica(replica).expect("merge"));
        assert!(fs.to_id("cat.bin").is_some());
    }

    #[test]
    fn test_merge_higher_revision_wins_but_keeps_local_paths() {
        // Replica at a higher revision knows "remote.bin"; local knows
        // "local.bin". After the merge both survive, because the replica
        // has no tombstone for the local path.
        let mut local = catalog();
        local.add_file("local.bin").expect("local add");

        let mut replica = catalog();
        replica.add_file("remote.bin").expect("remote add");
        replica.add_dir("extra").expect("extra");
        replica.add_dir("extra2").expect("extra2");

        assert!(local.revision() < replica.revision());
        let replica_rev = replica.revision();
        assert!(local.merge_replica(replica).expect("merge"));
        assert_eq!(local.revision(), replica_rev);
        assert!(local.to_id("remote.bin").is_some());
        assert!(local.to_id("local.bin").is_some());
    }

    #[test]
    fn test_merge_respects_tombstones() {
        // Both sides once knew "cat.bin"; the replica deleted it at a
        // higher revision, so the merge drops it locally too.
        let mut local = catalog();
        local.add_file("cat.bin").expect("add");

        let mut replica = catalog();
        let id = replica.add_file("cat.bin").expect("add");
        replica.delete_by_id(&id).expect("delete");
        replica.add_file("other.bin").expect("other");

        assert!(local.merge_replica(replica).expect("merge"));
        assert!(local.to_id("cat.bin").is_none());
        assert!(local.to_id("other.bin").is_some());
    }
}
