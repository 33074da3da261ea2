//! # garner-catalog
//!
//! The versioned catalog file system of a Garner customer.
//!
//! The catalog is an ordered tree mapping human paths (`photos/2026`) to
//! stable path IDs (`0/3`) and, per file, to the set of sealed versions
//! with their erasure layouts. Path IDs never change once assigned, so
//! supplier-side segment names stay valid across renames. The whole tree
//! serializes into a revisioned index file that is persisted locally and
//! replicated (encrypted) to every supplier; the highest revision wins on
//! merge.
//!
//! ## Modules
//!
//! - [`item`] — catalog entries and version records.
//! - [`fs`] — the tree and its operations.
//! - [`index`] — index-file serialization, persistence and merge.

pub mod fs;
pub mod index;
pub mod item;

pub use fs::CatalogFs;
pub use item::{CatalogItem, ItemType, VersionInfo};

/// Error types for catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// No entry under this path or path ID.
    #[error("path not found: {0}")]
    NotFound(String),

    /// An entry with this name already exists under the parent.
    #[error("name already exists: {0}")]
    AlreadyExists(String),

    /// The operation targets the wrong entry type (file vs dir).
    #[error("wrong entry type for {0}")]
    WrongType(String),

    /// The index file is corrupt.
    #[error("malformed catalog index: {0}")]
    MalformedIndex(String),

    /// Tree invariant broken (cycle, orphan, duplicate path ID).
    #[error("catalog invariant violated: {0}")]
    InvariantViolation(String),

    /// Index file I/O failed.
    #[error("catalog I/O error: {0}")]
    Io(String),
}

/// Convenience result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
