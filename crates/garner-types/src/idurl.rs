//! Identity URLs — the stable logical address of a node.
//!
//! An [`IdUrl`] points at the identity document of a user, e.g.
//! `https://id.example.net/alice.xml`. The URL itself is immutable, but a
//! user may *rotate* to a new IDURL while keeping the same signing key; both
//! the original and the latest form must be accepted as map keys everywhere,
//! so `IdUrl` is a cheap, hashable value type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Result, TypesError};

/// An identity URL.
///
/// Stored in normalized form: scheme and host lowercased, no trailing
/// whitespace. Two `IdUrl`s compare equal iff their normalized text is
/// identical.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdUrl(String);

impl IdUrl {
    /// Parse and normalize an identity URL.
    ///
    /// Accepts `http://` and `https://` URLs with a non-empty host and a
    /// non-empty path component naming the identity file.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let rest = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .ok_or_else(|| TypesError::MalformedIdUrl(raw.to_string()))?;
        let (host, path) = rest
            .split_once('/')
            .ok_or_else(|| TypesError::MalformedIdUrl(raw.to_string()))?;
        if host.is_empty() || path.is_empty() {
            return Err(TypesError::MalformedIdUrl(raw.to_string()));
        }
        let scheme_len = trimmed.len() - rest.len();
        let mut normalized = trimmed[..scheme_len].to_ascii_lowercase();
        normalized.push_str(&host.to_ascii_lowercase());
        normalized.push('/');
        normalized.push_str(path);
        Ok(Self(normalized))
    }

    /// The normalized URL text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host component, e.g. `id.example.net` or `id.example.net:8084`.
    pub fn host(&self) -> &str {
        let rest = self
            .0
            .strip_prefix("https://")
            .or_else(|| self.0.strip_prefix("http://"))
            .unwrap_or(&self.0);
        rest.split('/').next().unwrap_or(rest)
    }

    /// The identity file name, e.g. `alice.xml`.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// The user name derived from the file name, e.g. `alice`.
    pub fn user_name(&self) -> &str {
        let file = self.file_name();
        file.split_once('.').map(|(name, _)| name).unwrap_or(file)
    }
}

impl fmt::Display for IdUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for IdUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdUrl({})", self.0)
    }
}

impl std::str::FromStr for IdUrl {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case() {
        let a = IdUrl::parse("https://ID.Example.NET/alice.xml").expect("parse");
        let b = IdUrl::parse("https://id.example.net/alice.xml").expect("parse");
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_preserves_path_case() {
        let url = IdUrl::parse("https://id.example.net/Alice.xml").expect("parse");
        assert_eq!(url.file_name(), "Alice.xml");
    }

    #[test]
    fn test_components() {
        let url = IdUrl::parse("https://id.example.net:8084/alice.xml").expect("parse");
        assert_eq!(url.host(), "id.example.net:8084");
        assert_eq!(url.file_name(), "alice.xml");
        assert_eq!(url.user_name(), "alice");
    }

    #[test]
    fn test_rejects_missing_scheme() {
        assert!(IdUrl::parse("id.example.net/alice.xml").is_err());
    }

    #[test]
    fn test_rejects_empty_path() {
        assert!(IdUrl::parse("https://id.example.net").is_err());
        assert!(IdUrl::parse("https://id.example.net/").is_err());
    }

    #[test]
    fn test_serde_transparent() {
        let url = IdUrl::parse("https://id.example.net/bob.xml").expect("parse");
        let json = serde_json::to_string(&url).expect("serialize");
        assert_eq!(json, "\"https://id.example.net/bob.xml\"");
        let back: IdUrl = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, url);
    }
}
