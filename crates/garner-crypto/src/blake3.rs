//! Domain-separated BLAKE3 hashing for the Garner protocol.
//!
//! BLAKE3 backs content digests, packet-replay detection and the ECIES key
//! schedule. Cross-domain collisions are prevented by mandatory domain
//! separation through BLAKE3's built-in modes.
//!
//! ## Modes
//!
//! - [`hash`] — pure hashing: segment digests, identity fingerprints
//! - [`derive_key`] — key derivation: ECIES encryption keys and nonces
//! - [`keyed_hash`] — keyed MAC/PRF

/// Registered BLAKE3 context strings. Using an unregistered context string
/// is a protocol violation.
pub mod contexts {
    pub const ECIES_ENCRYPTION_KEY: &str = "Garner v1 ecies-encryption-key";
    pub const ECIES_NONCE: &str = "Garner v1 ecies-nonce";
    pub const SHARE_WRAP_NONCE: &str = "Garner v1 share-wrap-nonce";

    /// All registered context strings. Used for validation.
    pub const ALL_CONTEXTS: &[&str] = &[ECIES_ENCRYPTION_KEY, ECIES_NONCE, SHARE_WRAP_NONCE];
}

/// Compute the BLAKE3 hash of the input data.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *::blake3::hash(data).as_bytes()
}

/// Derive a key using BLAKE3's built-in key derivation mode.
///
/// The context string must be one of the registered [`contexts`].
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    out.copy_from_slice(hasher.finalize().as_bytes());
    out
}

/// Compute a keyed BLAKE3 hash (MAC/PRF).
pub fn keyed_hash(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *::blake3::keyed_hash(key, message).as_bytes()
}

/// Whether a context string is registered for this protocol.
pub fn is_registered_context(context: &str) -> bool {
    contexts::ALL_CONTEXTS.contains(&context)
}
