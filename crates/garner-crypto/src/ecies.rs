//! ECIES-X25519-ChaCha20-BLAKE3 session-key wrapping.
//!
//! Each encrypted block carries a fresh session key, wrapped for the
//! intended reader's X25519 public key. The relay router uses the same
//! construction to re-encrypt routed packets for its clients.
//!
//! ## Algorithm
//!
//! ```text
//! Encrypt(recipient_pk, plaintext):
//!   1. (eph_pk, shared_secret) = ephemeral X25519 exchange with recipient_pk
//!   2. enc_key = BLAKE3::derive_key("Garner v1 ecies-encryption-key",
//!                shared_secret || eph_pk || recipient_pk)
//!   3. nonce   = BLAKE3::derive_key("Garner v1 ecies-nonce",
//!                shared_secret || eph_pk)[..12]
//!   4. ct      = ChaCha20-Poly1305.Encrypt(enc_key, nonce, plaintext, aad=eph_pk)
//!   5. return eph_pk || ct || tag
//! ```

use crate::blake3::{self, contexts};
use crate::chacha20;
use crate::x25519::{self, X25519PublicKey, X25519StaticSecret};
use crate::{CryptoError, Result};

/// ECIES ciphertext: ephemeral public key + ciphertext + tag.
pub struct EciesCiphertext {
    /// The ephemeral public key (32 bytes).
    pub eph_pk: [u8; 32],
    /// The ciphertext with appended Poly1305 tag.
    pub ciphertext_and_tag: Vec<u8>,
}

impl EciesCiphertext {
    /// Serialize to bytes: eph_pk || ciphertext || tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + self.ciphertext_and_tag.len());
        out.extend_from_slice(&self.eph_pk);
        out.extend_from_slice(&self.ciphertext_and_tag);
        out
    }

    /// Deserialize from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 32 + chacha20::TAG_SIZE {
            return Err(CryptoError::Ecies("ciphertext too short".into()));
        }
        let mut eph_pk = [0u8; 32];
        eph_pk.copy_from_slice(&data[..32]);
        Ok(Self {
            eph_pk,
            ciphertext_and_tag: data[32..].to_vec(),
        })
    }
}

/// Encrypt a payload to a recipient's X25519 public key.
pub fn encrypt(recipient_pk: &X25519PublicKey, plaintext: &[u8]) -> Result<EciesCiphertext> {
    let (eph_pk, shared_secret) = x25519::ephemeral_key_exchange(recipient_pk);
    let eph_pk_bytes = eph_pk.to_bytes();

    let mut key_material = Vec::with_capacity(32 + 32 + 32);
    key_material.extend_from_slice(shared_secret.as_bytes());
    key_material.extend_from_slice(&eph_pk_bytes);
    key_material.extend_from_slice(recipient_pk.as_bytes());
    let enc_key = blake3::derive_key(contexts::ECIES_ENCRYPTION_KEY, &key_material);

    let nonce = derive_nonce(shared_secret.as_bytes(), &eph_pk_bytes);

    let ciphertext_and_tag = chacha20::encrypt(&enc_key, &nonce, plaintext, &eph_pk_bytes)?;

    Ok(EciesCiphertext {
        eph_pk: eph_pk_bytes,
        ciphertext_and_tag,
    })
}

/// Decrypt an ECIES ciphertext with the recipient's X25519 secret key.
pub fn decrypt(recipient_sk: &X25519StaticSecret, ciphertext: &EciesCiphertext) -> Result<Vec<u8>> {
    let eph_pk = X25519PublicKey::from_bytes(ciphertext.eph_pk);
    let shared_secret = recipient_sk.diffie_hellman(&eph_pk);
    let recipient_pk = recipient_sk.public_key();

    let mut key_material = Vec::with_capacity(32 + 32 + 32);
    key_material.extend_from_slice(shared_secret.as_bytes());
    key_material.extend_from_slice(&ciphertext.eph_pk);
    key_material.extend_from_slice(recipient_pk.as_bytes());
    let enc_key = blake3::derive_key(contexts::ECIES_ENCRYPTION_KEY, &key_material);

    let nonce = derive_nonce(shared_secret.as_bytes(), &ciphertext.eph_pk);

    chacha20::decrypt(
        &enc_key,
        &nonce,
        &ciphertext.ciphertext_and_tag,
        &ciphertext.eph_pk,
    )
    .map_err(|_| CryptoError::Ecies("decryption failed".into()))
}

/// Derive the AEAD nonce from the shared secret and ephemeral public key.
fn derive_nonce(shared_secret: &[u8; 32], eph_pk: &[u8; 32]) -> [u8; chacha20::NONCE_SIZE] {
    let mut nonce_material = Vec::with_capacity(32 + 32);
    nonce_material.extend_from_slice(shared_secret);
    nonce_material.extend_from_slice(eph_pk);
    let nonce_full = blake3::derive_key(contexts::ECIES_NONCE, &nonce_material);
    let mut nonce = [0u8; chacha20::NONCE_SIZE];
    nonce.copy_from_slice(&nonce_full[..chacha20::NONCE_SIZE]);
    nonce
}
