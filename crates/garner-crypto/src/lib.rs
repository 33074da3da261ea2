//! # garner-crypto
//!
//! Cryptographic primitives for the Garner P2P backup network.
//!
//! Every node owns one Ed25519 identity keypair (signing packets and
//! identity documents) and one X25519 keypair (receiving wrapped session
//! keys). Block payloads are encrypted with per-block ChaCha20-Poly1305
//! session keys; those session keys travel wrapped either asymmetrically
//! (ECIES to the reader's X25519 key) or under a named share key. No
//! algorithm negotiation exists — the suite is fixed.
//!
//! ## Modules
//!
//! - [`blake3`] — domain-separated BLAKE3 hashing and key derivation
//! - [`ed25519`] — Ed25519 signing and verification (RFC 8032)
//! - [`x25519`] — X25519 key agreement (RFC 7748)
//! - [`chacha20`] — ChaCha20-Poly1305 AEAD encryption (RFC 8439)
//! - [`ecies`] — ECIES-X25519-ChaCha20-BLAKE3 session-key wrapping

pub mod blake3;
pub mod chacha20;
pub mod ecies;
pub mod ed25519;
pub mod x25519;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// AEAD decryption failed (authentication tag mismatch).
    #[error("AEAD decryption failed")]
    AeadDecryption,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// ECIES encryption/decryption failed.
    #[error("ECIES error: {0}")]
    Ecies(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
