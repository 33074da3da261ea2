//! # garner-backup
//!
//! The backup and restore pipeline of a Garner customer.
//!
//! The producer streams a source into fixed-size blocks, compresses and
//! encrypts each block under a fresh session key, erasure-codes the sealed
//! record into one fragment per supplier position and hands the fragments
//! to the segment transport. The consumer walks the same path backwards:
//! fetch a quorum of fragments per block, decode, decrypt, decompress,
//! append. Between them sits the backup matrix — the per-version presence
//! map that upload outcomes and supplier listings feed — and the rebuilder
//! that heals missing fragments from the surviving quorum.
//!
//! ## Modules
//!
//! - [`matrix`] — per-version (block × position) presence map.
//! - [`transport`] — how fragments reach suppliers; in-memory test double.
//! - [`compress`] — bzip2 block compression.
//! - [`producer`] — the streaming upload job.
//! - [`restore`] — the streaming download worker.
//! - [`rebuilder`] — supplier listing sync and fragment healing.
//! - [`control`] — the FIFO task queue and the single-job limit.

pub mod compress;
pub mod control;
pub mod matrix;
pub mod producer;
pub mod rebuilder;
pub mod restore;
pub mod transport;

pub use control::{BackupControl, Task};
pub use matrix::BackupMatrix;
pub use producer::{BackupJob, JobOutcome};
pub use restore::RestoreWorker;
pub use transport::SegmentTransport;

/// Error types for the backup pipeline.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Reading the source stream failed.
    #[error("source read failed: {0}")]
    SourceRead(String),

    /// Writing the restore destination failed.
    #[error("destination write failed: {0}")]
    DestinationWrite(String),

    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Sealing or opening an encrypted block failed.
    #[error("block cipher error: {0}")]
    BlockCipher(String),

    /// Erasure coding failed.
    #[error("erasure coding error: {0}")]
    Ecc(String),

    /// The catalog rejected an operation.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// The keyring has no key for the requested namespace.
    #[error("keyring error: {0}")]
    Keyring(String),

    /// A version could not be restored; one entry per failed block.
    #[error("restore failed for {backup_id}: {failures:?}")]
    RestoreFailed {
        backup_id: String,
        failures: Vec<(u32, String)>,
    },

    /// A block could not reach the decodable quorum of suppliers.
    #[error("block {block} delivered to {delivered} positions, need {required}")]
    UploadIncomplete {
        block: u32,
        delivered: usize,
        required: usize,
    },

    /// The job was aborted by request.
    #[error("job aborted")]
    Aborted,

    /// A task with the same path is already queued.
    #[error("task already queued for path {0}")]
    DuplicateTask(String),

    /// Another job is already running.
    #[error("job limit reached")]
    JobLimit,
}

impl From<garner_ecc::EccError> for BackupError {
    fn from(err: garner_ecc::EccError) -> Self {
        Self::Ecc(err.to_string())
    }
}

impl From<garner_packet::PacketError> for BackupError {
    fn from(err: garner_packet::PacketError) -> Self {
        Self::BlockCipher(err.to_string())
    }
}

impl From<garner_catalog::CatalogError> for BackupError {
    fn from(err: garner_catalog::CatalogError) -> Self {
        Self::Catalog(err.to_string())
    }
}

impl From<garner_keyring::KeyringError> for BackupError {
    fn from(err: garner_keyring::KeyringError) -> Self {
        Self::Keyring(err.to_string())
    }
}

/// Convenience result type for backup operations.
pub type Result<T> = std::result::Result<T, BackupError>;
