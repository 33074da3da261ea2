//! Composite global addressing: `key_alias$user@host:path`.
//!
//! A [`GlobalId`] binds a key namespace (`master` or a share alias) to a
//! user identity and, optionally, a path inside that user's catalog. It is
//! the customer component of every backup ID and data-segment packet ID, so
//! parsing and formatting must round-trip exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{IdUrl, Result, TypesError};

/// The key alias used for a user's own master namespace.
pub const MASTER_KEY_ALIAS: &str = "master";

/// A parsed `key_alias$user@host:path` address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalId {
    /// Key namespace: `master` or a share/group alias.
    pub key_alias: String,
    /// User name as registered at the identity host.
    pub user: String,
    /// Identity host, e.g. `id.example.net` or `id.example.net:8084`.
    pub host: String,
    /// Optional catalog path bound to the address.
    pub path: Option<String>,
}

impl GlobalId {
    /// Build a master-key global ID for a user at a host.
    pub fn master(user: &str, host: &str) -> Self {
        Self {
            key_alias: MASTER_KEY_ALIAS.to_string(),
            user: user.to_string(),
            host: host.to_string(),
            path: None,
        }
    }

    /// Build a master-key global ID from an identity URL.
    pub fn from_idurl(idurl: &IdUrl) -> Self {
        Self::master(idurl.user_name(), idurl.host())
    }

    /// Parse a `key_alias$user@host` or `key_alias$user@host:path` string.
    ///
    /// A bare `user@host` form is accepted and resolves to the `master`
    /// alias.
    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = || TypesError::MalformedGlobalId(raw.to_string());
        let (key_alias, rest) = match raw.split_once('$') {
            Some((alias, rest)) => (alias.to_string(), rest),
            None => (MASTER_KEY_ALIAS.to_string(), raw),
        };
        let (user, tail) = rest.split_once('@').ok_or_else(malformed)?;
        if key_alias.is_empty() || user.is_empty() || tail.is_empty() {
            return Err(malformed());
        }
        // The host may carry a port, so split the path on the *second*
        // colon when one exists: `host:8084:0/1/2` -> (`host:8084`, `0/1/2`).
        let (host, path) = split_host_path(tail);
        if host.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            key_alias,
            user: user.to_string(),
            host: host.to_string(),
            path: path.map(str::to_string),
        })
    }

    /// Return this address without its path component.
    pub fn without_path(&self) -> Self {
        Self {
            path: None,
            ..self.clone()
        }
    }

    /// Return this address with the given catalog path bound.
    pub fn with_path(&self, path: &str) -> Self {
        Self {
            path: Some(path.to_string()),
            ..self.clone()
        }
    }

    /// Whether the address uses the master key namespace.
    pub fn is_master(&self) -> bool {
        self.key_alias == MASTER_KEY_ALIAS
    }

    /// The `key_alias$user@host` prefix, always without the path.
    pub fn key_id(&self) -> String {
        format!("{}${}@{}", self.key_alias, self.user, self.host)
    }
}

/// Split `host[:port][:path]` into host (with port) and optional path.
fn split_host_path(tail: &str) -> (&str, Option<&str>) {
    match tail.split_once(':') {
        None => (tail, None),
        Some((host, rest)) => {
            // A leading all-digit segment is a port and stays with the host.
            match rest.split_once(':') {
                Some((port, path)) if port.chars().all(|c| c.is_ascii_digit()) => {
                    let host_len = host.len() + 1 + port.len();
                    (&tail[..host_len], Some(path))
                }
                _ if rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty() => (tail, None),
                _ => (host, Some(rest)),
            }
        }
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}${}@{}", self.key_alias, self.user, self.host)?;
        if let Some(path) = &self.path {
            write!(f, ":{path}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for GlobalId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_form() {
        let gid = GlobalId::parse("master$alice@id.example.net:0/1/2").expect("parse");
        assert_eq!(gid.key_alias, "master");
        assert_eq!(gid.user, "alice");
        assert_eq!(gid.host, "id.example.net");
        assert_eq!(gid.path.as_deref(), Some("0/1/2"));
    }

    #[test]
    fn test_parse_share_alias() {
        let gid = GlobalId::parse("share_ab12$bob@id.example.net").expect("parse");
        assert_eq!(gid.key_alias, "share_ab12");
        assert!(gid.path.is_none());
    }

    #[test]
    fn test_parse_bare_user_host_defaults_to_master() {
        let gid = GlobalId::parse("carol@id.example.net").expect("parse");
        assert_eq!(gid.key_alias, MASTER_KEY_ALIAS);
        assert_eq!(gid.user, "carol");
    }

    #[test]
    fn test_parse_host_with_port_and_path() {
        let gid = GlobalId::parse("master$dan@id.example.net:8084:0/5").expect("parse");
        assert_eq!(gid.host, "id.example.net:8084");
        assert_eq!(gid.path.as_deref(), Some("0/5"));
    }

    #[test]
    fn test_parse_host_with_port_no_path() {
        let gid = GlobalId::parse("master$dan@id.example.net:8084").expect("parse");
        assert_eq!(gid.host, "id.example.net:8084");
        assert!(gid.path.is_none());
    }

    #[test]
    fn test_display_round_trip() {
        for raw in [
            "master$alice@id.example.net",
            "master$alice@id.example.net:0/1/2",
            "share_x$bob@id.example.net:8084:4/0",
        ] {
            let gid = GlobalId::parse(raw).expect("parse");
            assert_eq!(gid.to_string(), raw);
            assert_eq!(GlobalId::parse(&gid.to_string()).expect("reparse"), gid);
        }
    }

    #[test]
    fn test_rejects_missing_at() {
        assert!(GlobalId::parse("master$alice").is_err());
        assert!(GlobalId::parse("").is_err());
    }

    #[test]
    fn test_from_idurl() {
        let idurl = IdUrl::parse("https://id.example.net/alice.xml").expect("parse");
        let gid = GlobalId::from_idurl(&idurl);
        assert_eq!(gid.to_string(), "master$alice@id.example.net");
    }

    #[test]
    fn test_key_id_ignores_path() {
        let gid = GlobalId::parse("share_x$bob@id.example.net:4/0").expect("parse");
        assert_eq!(gid.key_id(), "share_x$bob@id.example.net");
    }
}
