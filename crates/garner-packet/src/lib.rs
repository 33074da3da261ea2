//! # garner-packet
//!
//! The signed packet envelope and the encrypted block record — the two
//! byte-exact wire formats of the Garner protocol. Every message between
//! nodes is a [`SignedPacket`]; every stored fragment originates from an
//! [`EncryptedBlock`]. Both serializations are deterministic so that
//! independent implementations interoperate byte for byte.
//!
//! ## Modules
//!
//! - [`command`] — the packet command set.
//! - [`packet`] — envelope construction, signing, verification, wire codec.
//! - [`encrypted_block`] — per-block encryption record with wrapped session key.
//! - [`service`] — JSON payloads for service negotiation and file listings.

pub mod command;
pub mod encrypted_block;
pub mod packet;
pub mod service;

pub use command::Command;
pub use encrypted_block::{EncryptedBlock, SessionKeyWrap};
pub use packet::{Packet, SignedPacket};

/// Error types for packet encoding, decoding and verification.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The buffer ended before a declared field length.
    #[error("truncated packet: {0}")]
    Truncated(String),

    /// A field failed to parse (unknown command, bad URL, bad number).
    #[error("malformed packet field: {0}")]
    Malformed(String),

    /// Signature verification failed.
    #[error("packet signature invalid")]
    BadSignature,

    /// The encrypted block record is malformed.
    #[error("malformed encrypted block: {0}")]
    MalformedBlock(String),

    /// Session key unwrap or payload decryption failed.
    #[error("block decryption failed: {0}")]
    Decryption(String),

    /// A JSON service payload failed to decode.
    #[error("malformed service payload: {0}")]
    MalformedPayload(String),
}

impl From<garner_crypto::CryptoError> for PacketError {
    fn from(err: garner_crypto::CryptoError) -> Self {
        match err {
            garner_crypto::CryptoError::SignatureVerification => Self::BadSignature,
            other => Self::Decryption(other.to_string()),
        }
    }
}

/// Convenience result type for packet operations.
pub type Result<T> = std::result::Result<T, PacketError>;
