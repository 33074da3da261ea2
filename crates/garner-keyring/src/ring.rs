//! The keyring: master keys plus named share keys.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use garner_crypto::chacha20;
use garner_crypto::ecies::{self, EciesCiphertext};
use garner_crypto::ed25519::KeyPair;
use garner_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use garner_packet::encrypted_block::{SessionKeyUnwrap, SessionKeyWrap};
use garner_types::global_id::MASTER_KEY_ALIAS;
use garner_types::GlobalId;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tracing::debug;

use crate::{KeyringError, Result};

/// A named symmetric share key.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareKey {
    /// Key ID in the `alias$user@host` form.
    pub key_id: String,
    /// The 32-byte symmetric key.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub key: [u8; 32],
    /// Free-form user label.
    pub label: String,
    /// Unix timestamp of creation.
    pub created_at: u64,
}

/// All key material of one node.
pub struct KeyRing {
    master_signing: KeyPair,
    master_encrypt: X25519StaticSecret,
    shares: BTreeMap<String, ShareKey>,
}

impl KeyRing {
    /// Generate a fresh keyring with random master keys.
    pub fn generate() -> Self {
        Self {
            master_signing: KeyPair::generate(),
            master_encrypt: X25519StaticSecret::random(),
            shares: BTreeMap::new(),
        }
    }

    /// Rebuild a keyring from raw master secrets and share entries.
    pub fn from_parts(
        signing_secret: &[u8; 32],
        encrypt_secret: [u8; 32],
        shares: Vec<ShareKey>,
    ) -> Self {
        Self {
            master_signing: KeyPair::from_bytes(signing_secret),
            master_encrypt: X25519StaticSecret::from_bytes(encrypt_secret),
            shares: shares.into_iter().map(|s| (s.key_id.clone(), s)).collect(),
        }
    }

    /// The master Ed25519 keypair (packet and document signing).
    pub fn master_keypair(&self) -> &KeyPair {
        &self.master_signing
    }

    /// The master X25519 secret (session-key unwrapping).
    pub fn master_encrypt_secret(&self) -> &X25519StaticSecret {
        &self.master_encrypt
    }

    /// The master X25519 public key (published in the identity document).
    pub fn master_encrypt_public(&self) -> X25519PublicKey {
        self.master_encrypt.public_key()
    }

    /// Raw secrets, for persistence.
    pub(crate) fn secrets(&self) -> ([u8; 32], [u8; 32]) {
        (
            self.master_signing.signing_key.to_bytes(),
            self.master_encrypt.to_bytes(),
        )
    }

    /// All registered share keys, ordered by key ID.
    pub fn shares(&self) -> impl Iterator<Item = &ShareKey> {
        self.shares.values()
    }

    /// Create and register a fresh share key for `owner` under `alias`.
    pub fn create_share(&mut self, alias: &str, owner: &GlobalId, label: &str) -> Result<ShareKey> {
        if alias == MASTER_KEY_ALIAS {
            return Err(KeyringError::MalformedKeyId(
                "the master alias is reserved".to_string(),
            ));
        }
        let key_id = format!("{alias}${}@{}", owner.user, owner.host);
        if self.shares.contains_key(&key_id) {
            return Err(KeyringError::DuplicateKey(key_id));
        }
        let share = ShareKey {
            key_id: key_id.clone(),
            key: chacha20::generate_key(),
            label: label.to_string(),
            created_at: unix_now(),
        };
        debug!(key_id = %key_id, "created share key");
        self.shares.insert(key_id, share.clone());
        Ok(share)
    }

    /// Register a share key received from another reader.
    pub fn add_share(&mut self, share: ShareKey) -> Result<()> {
        GlobalId::parse(&share.key_id)
            .map_err(|_| KeyringError::MalformedKeyId(share.key_id.clone()))?;
        if self.shares.contains_key(&share.key_id) {
            return Err(KeyringError::DuplicateKey(share.key_id));
        }
        self.shares.insert(share.key_id.clone(), share);
        Ok(())
    }

    /// Forget a share key.
    pub fn remove_share(&mut self, key_id: &str) -> Result<ShareKey> {
        self.shares
            .remove(key_id)
            .ok_or_else(|| KeyringError::UnknownKey(key_id.to_string()))
    }

    /// Look up a share key.
    pub fn share(&self, key_id: &str) -> Option<&ShareKey> {
        self.shares.get(key_id)
    }

    /// How blocks written under `key_id` wrap their session keys.
    ///
    /// The master alias wraps asymmetrically to the node's own encryption
    /// key; share aliases wrap under the symmetric share key.
    pub fn wrap_for(&self, key_id: &GlobalId) -> Result<SessionKeyWrap> {
        if key_id.is_master() {
            return Ok(SessionKeyWrap::Ecies(self.master_encrypt_public()));
        }
        let id = key_id.key_id();
        let share = self
            .shares
            .get(&id)
            .ok_or_else(|| KeyringError::UnknownKey(id.clone()))?;
        Ok(SessionKeyWrap::Share {
            key_id: id,
            key: share.key,
        })
    }

    /// The matching unwrap secret for blocks written under `key_id`.
    pub fn unwrap_for(&self, key_id: &GlobalId) -> Result<SessionKeyUnwrap> {
        if key_id.is_master() {
            return Ok(SessionKeyUnwrap::Ecies(self.master_encrypt.clone()));
        }
        let id = key_id.key_id();
        let share = self
            .shares
            .get(&id)
            .ok_or_else(|| KeyringError::UnknownKey(id.clone()))?;
        Ok(SessionKeyUnwrap::Share {
            key_id: id,
            key: share.key,
        })
    }

    /// Wrap a share key for another reader's X25519 public key.
    pub fn wrap_share_for_peer(&self, key_id: &str, peer: &X25519PublicKey) -> Result<Vec<u8>> {
        let share = self
            .shares
            .get(key_id)
            .ok_or_else(|| KeyringError::UnknownKey(key_id.to_string()))?;
        let wrapped = ecies::encrypt(peer, &share.key)
            .map_err(|e| KeyringError::Wrap(e.to_string()))?;
        Ok(wrapped.to_bytes())
    }

    /// Accept a share key wrapped to this node's master encryption key.
    pub fn accept_wrapped_share(
        &mut self,
        key_id: &str,
        label: &str,
        wrapped: &[u8],
    ) -> Result<ShareKey> {
        let ciphertext = EciesCiphertext::from_bytes(wrapped)
            .map_err(|e| KeyringError::Wrap(e.to_string()))?;
        let key_bytes = ecies::decrypt(&self.master_encrypt, &ciphertext)
            .map_err(|e| KeyringError::Wrap(e.to_string()))?;
        let key: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| KeyringError::Wrap("bad share key length".to_string()))?;
        let share = ShareKey {
            key_id: key_id.to_string(),
            key,
            label: label.to_string(),
            created_at: unix_now(),
        };
        self.add_share(share.clone())?;
        Ok(share)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
