//! # garner-ecc
//!
//! Erasure coding for the Garner P2P backup network.
//!
//! A customer splits every encrypted block into D data fragments and
//! expands them with P parity fragments, one fragment per supplier
//! position. Any D of the M = D + P fragments reconstruct the block, so a
//! version survives the loss of up to P suppliers.
//!
//! ## Modules
//!
//! - [`map`] — named erasure layouts (`ecc/2x2`, `ecc/4x4`, ...).
//! - [`gf256`] — arithmetic over GF(2^8).
//! - [`reed_solomon`] — systematic Reed-Solomon codec over GF(2^8).

pub mod gf256;
pub mod map;
pub mod reed_solomon;

pub use map::EccMap;
pub use reed_solomon::ReedSolomon;

/// Error types for erasure coding.
#[derive(Debug, thiserror::Error)]
pub enum EccError {
    /// The layout name does not match `ecc/{data}x{parity}`.
    #[error("unknown ecc layout: {0}")]
    UnknownLayout(String),

    /// The layout parameters are outside the supported range.
    #[error("invalid ecc layout: {0}")]
    InvalidLayout(String),

    /// Encoding input is malformed (wrong shard count or uneven lengths).
    #[error("reed-solomon encoding error: {0}")]
    Encode(String),

    /// Too few fragments survive to reconstruct the data.
    #[error("reed-solomon decoding error: {0}")]
    Decode(String),
}

/// Convenience result type for erasure coding.
pub type Result<T> = std::result::Result<T, EccError>;
