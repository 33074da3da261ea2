//! # garner-types
//!
//! Shared addressing and naming types for the Garner P2P backup network.
//!
//! Everything a node names on the wire lives here: identity URLs, composite
//! global IDs, backup/version identifiers, the packet-ID grammar for
//! erasure-coded data segments, and the typed event set emitted by the
//! long-running pipelines.
//!
//! ## Modules
//!
//! - [`idurl`] — identity URLs, the stable logical address of a node.
//! - [`global_id`] — `alias$user@host:path` composite addressing.
//! - [`version`] — version tags and sealed backup identifiers.
//! - [`packet_id`] — packet-ID allocation and the data-segment grammar.
//! - [`events`] — typed events published by pipelines and controllers.

pub mod events;
pub mod global_id;
pub mod idurl;
pub mod packet_id;
pub mod version;

pub use global_id::GlobalId;
pub use idurl::IdUrl;
pub use packet_id::{FragmentKind, SegmentId};
pub use version::{BackupId, VersionTag};

/// Error types for parsing and validating Garner identifiers.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// The identity URL is not a valid absolute URL.
    #[error("malformed identity URL: {0}")]
    MalformedIdUrl(String),

    /// The global ID does not match `alias$user@host:path`.
    #[error("malformed global ID: {0}")]
    MalformedGlobalId(String),

    /// The version tag does not match `F<YYYYMMDDhhmmss>(AM|PM)`.
    #[error("malformed version tag: {0}")]
    MalformedVersionTag(String),

    /// The backup ID does not split into customer / path / version.
    #[error("malformed backup ID: {0}")]
    MalformedBackupId(String),

    /// The segment packet ID does not match `backup_id/block-position-kind`.
    #[error("malformed segment ID: {0}")]
    MalformedSegmentId(String),
}

/// Convenience result type for identifier parsing.
pub type Result<T> = std::result::Result<T, TypesError>;
