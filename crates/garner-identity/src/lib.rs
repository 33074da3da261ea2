//! # garner-identity
//!
//! Identity documents and the identity cache for the Garner network.
//!
//! An identity document binds an identity URL to a signing key, an
//! encryption key and an ordered contact list; the document is signed by
//! its own key, so any node can verify it without trusting the server it
//! came from. The cache keeps resolved documents, detects identity
//! rotation (same key, new URL) and supports the relay router's override
//! layer: a router-provided shadow document that is consulted before the
//! real one.
//!
//! ## Modules
//!
//! - [`doc`] — the signed identity document.
//! - [`cache`] — resolved-document cache, overrides, rotation events.
//! - [`source`] — where documents are fetched from (network or tests).

pub mod cache;
pub mod doc;
pub mod source;

pub use cache::{IdentityCache, RotationEvent};
pub use doc::IdentityDoc;
pub use source::{IdentitySource, MemoryIdentitySource};

/// Error types for identity handling.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The identity URL could not be resolved right now (transient).
    #[error("identity not resolved: {0}")]
    Unresolved(String),

    /// The document signature does not match its own public key.
    #[error("identity document signature invalid")]
    BadSignature,

    /// The document is structurally invalid.
    #[error("malformed identity document: {0}")]
    Malformed(String),
}

/// Convenience result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
