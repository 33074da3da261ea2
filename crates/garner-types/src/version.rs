//! Version tags and sealed backup identifiers.
//!
//! A version tag is a timestamped monotonic token of the form
//! `F<YYYYMMDDhhmmss>(AM|PM)`, using a 12-hour clock. A [`BackupId`] is the
//! immutable identifier of one sealed upload:
//! `customer_global_id/path_id/version_tag`. Once sealed, a version's block
//! count and erasure layout never change.

use std::fmt;

use chrono::{Datelike, Local, Timelike};
use serde::{Deserialize, Serialize};

use crate::{GlobalId, Result, TypesError};

/// A `F<YYYYMMDDhhmmss>(AM|PM)` version tag.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionTag(String);

impl VersionTag {
    /// Create a version tag for the current local time.
    pub fn now() -> Self {
        let t = Local::now();
        let (is_pm, hour12) = t.hour12();
        Self(format!(
            "F{:04}{:02}{:02}{:02}{:02}{:02}{}",
            t.year(),
            t.month(),
            t.day(),
            hour12,
            t.minute(),
            t.second(),
            if is_pm { "PM" } else { "AM" },
        ))
    }

    /// Parse and validate a version tag.
    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = || TypesError::MalformedVersionTag(raw.to_string());
        let rest = raw.strip_prefix('F').ok_or_else(malformed)?;
        if rest.len() != 16 {
            return Err(malformed());
        }
        let (digits, meridiem) = rest.split_at(14);
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        if meridiem != "AM" && meridiem != "PM" {
            return Err(malformed());
        }
        Ok(Self(raw.to_string()))
    }

    /// The tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionTag({})", self.0)
    }
}

/// The immutable identifier of one sealed upload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupId {
    /// The customer address owning the data (no path component).
    pub customer: GlobalId,
    /// Stable catalog path ID, e.g. `0/1/2`.
    pub path_id: String,
    /// The version tag sealing this upload.
    pub version: VersionTag,
}

impl BackupId {
    /// Build a backup ID from parts.
    pub fn new(customer: GlobalId, path_id: &str, version: VersionTag) -> Self {
        Self {
            customer: customer.without_path(),
            path_id: path_id.to_string(),
            version,
        }
    }

    /// Parse `customer_global_id/path_id/version_tag`.
    ///
    /// The path ID may itself contain `/` separators, so the customer is
    /// the first segment and the version tag the last.
    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = || TypesError::MalformedBackupId(raw.to_string());
        let (customer_raw, rest) = raw.split_once('/').ok_or_else(malformed)?;
        let (path_id, version_raw) = rest.rsplit_once('/').ok_or_else(malformed)?;
        if path_id.is_empty() {
            return Err(malformed());
        }
        let customer = GlobalId::parse(customer_raw).map_err(|_| malformed())?;
        let version = VersionTag::parse(version_raw).map_err(|_| malformed())?;
        Ok(Self {
            customer,
            path_id: path_id.to_string(),
            version,
        })
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.customer, self.path_id, self.version)
    }
}

impl std::str::FromStr for BackupId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_tag_now_parses() {
        let tag = VersionTag::now();
        let reparsed = VersionTag::parse(tag.as_str()).expect("parse");
        assert_eq!(reparsed, tag);
    }

    #[test]
    fn test_version_tag_parse() {
        let tag = VersionTag::parse("F20260801093000AM").expect("parse");
        assert_eq!(tag.as_str(), "F20260801093000AM");
    }

    #[test]
    fn test_version_tag_rejects_bad_forms() {
        assert!(VersionTag::parse("20260801093000AM").is_err());
        assert!(VersionTag::parse("F2026080109300AM").is_err());
        assert!(VersionTag::parse("F20260801093000XX").is_err());
        assert!(VersionTag::parse("F2026080109300000").is_err());
    }

    #[test]
    fn test_backup_id_round_trip() {
        let raw = "master$alice@id.example.net/0/1/2/F20260801093000AM";
        let bid = BackupId::parse(raw).expect("parse");
        assert_eq!(bid.customer.to_string(), "master$alice@id.example.net");
        assert_eq!(bid.path_id, "0/1/2");
        assert_eq!(bid.version.as_str(), "F20260801093000AM");
        assert_eq!(bid.to_string(), raw);
    }

    #[test]
    fn test_backup_id_single_segment_path() {
        let bid = BackupId::parse("master$bob@id.example.net/7/F20260801010101PM").expect("parse");
        assert_eq!(bid.path_id, "7");
    }

    #[test]
    fn test_backup_id_rejects_missing_version() {
        assert!(BackupId::parse("master$alice@id.example.net/0/1/2").is_err());
        assert!(BackupId::parse("master$alice@id.example.net").is_err());
    }

    #[test]
    fn test_backup_ids_order_by_version() {
        let a = VersionTag::parse("F20260801093000AM").expect("parse");
        let b = VersionTag::parse("F20260801093001AM").expect("parse");
        assert!(a < b);
    }
}
