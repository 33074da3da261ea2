//! # garner-keyring
//!
//! Key material for one Garner node: the master identity keys and the
//! named share keys.
//!
//! The master pair (Ed25519 signing + X25519 encryption) is what the
//! node's identity document publishes. Share keys are symmetric keys under
//! a `alias$user@host` key ID; blocks written into a share are readable by
//! everyone holding the share key. Session keys are wrapped per block:
//! ECIES to an X25519 key for master reads, AEAD under the share key for
//! share reads. Share keys travel between readers wrapped asymmetrically.
//!
//! ## Modules
//!
//! - [`ring`] — the keyring and its wrap/unwrap operations.
//! - [`store`] — registry persistence (atomic JSON file).

pub mod ring;
pub mod store;

pub use ring::{KeyRing, ShareKey};

/// Error types for keyring operations.
#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    /// No key registered under this key ID.
    #[error("unknown key: {0}")]
    UnknownKey(String),

    /// A key with this ID already exists.
    #[error("key already exists: {0}")]
    DuplicateKey(String),

    /// The key ID does not parse as `alias$user@host`.
    #[error("malformed key id: {0}")]
    MalformedKeyId(String),

    /// Registry file I/O failed.
    #[error("keyring I/O error: {0}")]
    Io(String),

    /// The registry file is corrupt.
    #[error("malformed keyring file: {0}")]
    Malformed(String),

    /// Wrapping or unwrapping a key failed.
    #[error("key wrap error: {0}")]
    Wrap(String),
}

/// Convenience result type for keyring operations.
pub type Result<T> = std::result::Result<T, KeyringError>;
