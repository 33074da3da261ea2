//! The signed identity document.
//!
//! Self-certifying: the document carries its own Ed25519 public key and is
//! signed by the matching secret key. Verification therefore needs nothing
//! but the document itself; trust in the *binding* between user name and
//! key comes from fetching the document at its identity URL.

use garner_crypto::ed25519::{KeyPair, Signature, SigningKey, VerifyingKey};
use garner_crypto::x25519::X25519PublicKey;
use garner_types::IdUrl;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{IdentityError, Result};

/// A resolved identity document.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDoc {
    /// The identity URL this document was published under.
    pub idurl: IdUrl,
    /// Ed25519 signing key.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub public_key: [u8; 32],
    /// X25519 encryption key, receives wrapped session keys.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub encrypt_key: [u8; 32],
    /// Ordered transport contacts, `proto://host:port`.
    pub contacts: Vec<String>,
    /// Monotonically increasing document revision.
    pub revision: u64,
    /// Ed25519 signature over all other fields.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub signature: [u8; 64],
}

impl IdentityDoc {
    /// Build and sign a document.
    pub fn build(
        idurl: IdUrl,
        keypair: &KeyPair,
        encrypt_key: X25519PublicKey,
        contacts: Vec<String>,
        revision: u64,
    ) -> Self {
        let mut doc = Self {
            idurl,
            public_key: keypair.verifying_key.to_bytes(),
            encrypt_key: encrypt_key.to_bytes(),
            contacts,
            revision,
            signature: [0u8; 64],
        };
        doc.signature = doc.sign_with(&keypair.signing_key);
        doc
    }

    /// Re-sign this document after a field change, bumping the revision.
    pub fn resign(&mut self, signing_key: &SigningKey) {
        self.revision += 1;
        self.signature = self.sign_with(signing_key);
    }

    fn sign_with(&self, signing_key: &SigningKey) -> [u8; 64] {
        signing_key.sign(&self.signed_bytes()).to_bytes()
    }

    /// Verify the document against its own embedded public key.
    pub fn verify(&self) -> Result<()> {
        let key = self.verifying_key()?;
        let signature = Signature::from_bytes(&self.signature);
        key.verify(&self.signed_bytes(), &signature)
            .map_err(|_| IdentityError::BadSignature)
    }

    /// The Ed25519 verifying key as a typed value.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.public_key)
            .map_err(|e| IdentityError::Malformed(e.to_string()))
    }

    /// The X25519 encryption key as a typed value.
    pub fn encryption_key(&self) -> X25519PublicKey {
        X25519PublicKey::from_bytes(self.encrypt_key)
    }

    /// Fingerprint of the signing key; stable across URL rotation.
    pub fn fingerprint(&self) -> [u8; 32] {
        garner_crypto::blake3::hash(&self.public_key)
    }

    /// Serialize to the JSON form published at the identity URL.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| IdentityError::Malformed(e.to_string()))
    }

    /// Parse and verify a document from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        let doc: Self =
            serde_json::from_str(json).map_err(|e| IdentityError::Malformed(e.to_string()))?;
        doc.verify()?;
        Ok(doc)
    }

    /// The exact byte string the signature covers.
    fn signed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.idurl.as_str().as_bytes());
        out.push(b'\n');
        out.extend_from_slice(&self.public_key);
        out.extend_from_slice(&self.encrypt_key);
        for contact in &self.contacts {
            out.extend_from_slice(contact.as_bytes());
            out.push(b'\n');
        }
        out.extend_from_slice(&self.revision.to_be_bytes());
        out
    }
}
