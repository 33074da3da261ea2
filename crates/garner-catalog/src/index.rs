//! Index-file serialization and persistence.
//!
//! ## File layout
//!
//! The first line is the decimal revision. The remainder is the tree: a
//! JSON document on every write, but a legacy tab-separated line form is
//! still accepted on read (one entry per line,
//! `path_id \t D|F \t name [\t version;version;...]`, each version
//! `tag:ecc_map:block_count:block_size:size`). Legacy files are upgraded
//! to JSON on the next save; the legacy form is never written.

use std::collections::BTreeMap;
use std::path::Path;

use garner_ecc::EccMap;
use garner_types::{GlobalId, VersionTag};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fs::CatalogFs;
use crate::item::{CatalogItem, ItemType, VersionInfo};
use crate::{CatalogError, Result};

#[derive(Serialize, Deserialize)]
struct IndexBody {
    customer: String,
    items: Vec<CatalogItem>,
    #[serde(default)]
    tombstones: BTreeMap<String, u64>,
}

/// Serialize a catalog to its index-file text.
pub fn serialize(fs: &CatalogFs) -> Result<String> {
    let body = IndexBody {
        customer: fs.customer().to_string(),
        items: fs.items().cloned().collect(),
        tombstones: fs.tombstones().clone(),
    };
    let json = serde_json::to_string(&body).map_err(|e| CatalogError::Io(e.to_string()))?;
    Ok(format!("{}\n{json}", fs.revision()))
}

/// Parse an index file, JSON or legacy form.
///
/// `fallback_customer` owns the tree when the file does not say (the
/// legacy form never does).
pub fn deserialize(text: &str, fallback_customer: &GlobalId) -> Result<CatalogFs> {
    let (first, rest) = text
        .split_once('\n')
        .ok_or_else(|| CatalogError::MalformedIndex("missing revision line".to_string()))?;
    let revision: u64 = first
        .trim()
        .parse()
        .map_err(|_| CatalogError::MalformedIndex(format!("bad revision line: {first:?}")))?;

    let body = rest.trim_start();
    let fs = if body.starts_with('{') {
        deserialize_json(body, revision)?
    } else {
        deserialize_legacy(body, revision, fallback_customer)?
    };
    fs.validate()?;
    Ok(fs)
}

fn deserialize_json(body: &str, revision: u64) -> Result<CatalogFs> {
    let parsed: IndexBody =
        serde_json::from_str(body).map_err(|e| CatalogError::MalformedIndex(e.to_string()))?;
    let customer = GlobalId::parse(&parsed.customer)
        .map_err(|e| CatalogError::MalformedIndex(e.to_string()))?;

    let mut items = BTreeMap::new();
    for item in parsed.items {
        if items.insert(item.path_id.clone(), item).is_some() {
            return Err(CatalogError::MalformedIndex(
                "duplicate path id in index".to_string(),
            ));
        }
    }
    if !items.contains_key("") {
        return Err(CatalogError::MalformedIndex("missing root entry".to_string()));
    }
    Ok(CatalogFs::from_parts(
        customer,
        items,
        parsed.tombstones,
        revision,
    ))
}

fn deserialize_legacy(body: &str, revision: u64, customer: &GlobalId) -> Result<CatalogFs> {
    debug!("reading legacy catalog index form");
    let mut items = BTreeMap::new();
    items.insert(
        String::new(),
        CatalogItem {
            path_id: String::new(),
            name: String::new(),
            parent: String::new(),
            item_type: ItemType::Dir,
            key_id: customer.key_id(),
            size: 0,
            versions: BTreeMap::new(),
        },
    );

    for line in body.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let path_id = fields
            .next()
            .ok_or_else(|| CatalogError::MalformedIndex(format!("bad line: {line:?}")))?;
        let type_tag = fields
            .next()
            .ok_or_else(|| CatalogError::MalformedIndex(format!("bad line: {line:?}")))?;
        let name = fields
            .next()
            .ok_or_else(|| CatalogError::MalformedIndex(format!("bad line: {line:?}")))?;
        let item_type = match type_tag {
            "D" => ItemType::Dir,
            "F" => ItemType::File,
            other => {
                return Err(CatalogError::MalformedIndex(format!(
                    "bad entry type: {other:?}"
                )))
            }
        };

        let mut versions = BTreeMap::new();
        if let Some(version_field) = fields.next() {
            for descriptor in version_field.split(';').filter(|s| !s.is_empty()) {
                let info = parse_legacy_version(descriptor)?;
                versions.insert(info.tag.as_str().to_string(), info);
            }
        }

        // The prefix-extension invariant makes the parent derivable.
        let parent = match path_id.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        };
        let size = versions.values().last().map_or(0, |v| v.size);
        items.insert(
            path_id.to_string(),
            CatalogItem {
                path_id: path_id.to_string(),
                name: name.to_string(),
                parent,
                item_type,
                key_id: customer.key_id(),
                size,
                versions,
            },
        );
    }

    Ok(CatalogFs::from_parts(
        customer.clone(),
        items,
        BTreeMap::new(),
        revision,
    ))
}

fn parse_legacy_version(descriptor: &str) -> Result<VersionInfo> {
    let malformed =
        || CatalogError::MalformedIndex(format!("bad version descriptor: {descriptor:?}"));
    let mut parts = descriptor.split(':');
    let tag = VersionTag::parse(parts.next().ok_or_else(malformed)?).map_err(|_| malformed())?;
    let ecc_map =
        EccMap::from_name(parts.next().ok_or_else(malformed)?).map_err(|_| malformed())?;
    let block_count = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(malformed)?;
    let block_size = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(malformed)?;
    let size = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(malformed)?;
    Ok(VersionInfo {
        tag,
        ecc_map,
        block_count,
        block_size,
        size,
    })
}

/// Write the index file atomically.
pub fn save(fs: &CatalogFs, path: &Path) -> Result<()> {
    let text = serialize(fs)?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, text.as_bytes()).map_err(|e| CatalogError::Io(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| CatalogError::Io(e.to_string()))?;
    info!(path = %path.display(), revision = fs.revision(), "catalog index saved");
    Ok(())
}

/// Read the index file.
pub fn load(path: &Path, fallback_customer: &GlobalId) -> Result<CatalogFs> {
    let text = std::fs::read_to_string(path).map_err(|e| CatalogError::Io(e.to_string()))?;
    deserialize(&text, fallback_customer)
}
