//! The encrypted block record.
//!
//! One record per produced block. The payload is compressed then encrypted
//! under a fresh per-block session key; the session key travels wrapped for
//! the intended reader. The record is what gets erasure-coded into
//! fragments, so its serialization tolerates zero-padding at the tail
//! (erasure shards are equal-length).
//!
//! ## Wire format
//!
//! Seven UTF-8 header lines, then the raw encrypted payload, then the
//! 64-byte header+payload signature:
//!
//! ```text
//! CreatorID \n BackupID \n BlockNumber \n LastBlockFlag \n
//! SessionKeyType \n base64(EncryptedSessionKey) \n Length \n
//! <EncryptedPayload bytes> <Signature bytes>
//! ```
//!
//! `Length` is the encrypted payload byte count; everything after the
//! signature is padding and ignored.

use base64::Engine;
use garner_crypto::chacha20;
use garner_crypto::ecies::{self, EciesCiphertext};
use garner_crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use garner_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use garner_types::{BackupId, IdUrl};

use crate::{PacketError, Result};

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// How the per-block session key is wrapped for the reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionKeyWrap {
    /// ECIES against the reader's X25519 public key (master reads).
    Ecies(X25519PublicKey),
    /// AEAD under a named share key (share reads).
    Share { key_id: String, key: [u8; 32] },
}

/// The matching unwrap secret on the reader side.
#[derive(Clone)]
pub enum SessionKeyUnwrap {
    /// The reader's X25519 secret key.
    Ecies(X25519StaticSecret),
    /// The named share key.
    Share { key_id: String, key: [u8; 32] },
}

/// Session key type tags on the wire.
const KEY_TYPE_ECIES: &str = "ecies.x25519";
const KEY_TYPE_SHARE: &str = "share.chacha20";

/// One sealed block of a version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedBlock {
    /// Who produced and signed the block.
    pub creator_id: IdUrl,
    /// The version the block belongs to.
    pub backup_id: BackupId,
    /// Zero-based block number.
    pub block_number: u32,
    /// Whether this is the final block of the version.
    pub last_block: bool,
    /// Session key type tag.
    pub session_key_type: String,
    /// The wrapped session key.
    pub encrypted_session_key: Vec<u8>,
    /// The encrypted (previously compressed) payload.
    pub encrypted_payload: Vec<u8>,
    /// Signature over header and payload.
    pub signature: Signature,
}

impl EncryptedBlock {
    /// Encrypt `plaintext` into a sealed, signed block record.
    ///
    /// Generates a fresh session key, wraps it per `wrap`, encrypts the
    /// payload and signs header plus payload with the creator's key.
    pub fn seal(
        creator_id: IdUrl,
        backup_id: BackupId,
        block_number: u32,
        last_block: bool,
        plaintext: &[u8],
        wrap: &SessionKeyWrap,
        signer: &SigningKey,
    ) -> Result<Self> {
        let session_key = chacha20::generate_key();

        let (session_key_type, encrypted_session_key) = match wrap {
            SessionKeyWrap::Ecies(reader_pk) => {
                let wrapped = ecies::encrypt(reader_pk, &session_key)?;
                (KEY_TYPE_ECIES.to_string(), wrapped.to_bytes())
            }
            SessionKeyWrap::Share { key_id, key } => {
                let nonce = chacha20::generate_nonce();
                let mut out = nonce.to_vec();
                out.extend_from_slice(&chacha20::encrypt(
                    key,
                    &nonce,
                    &session_key,
                    key_id.as_bytes(),
                )?);
                (KEY_TYPE_SHARE.to_string(), out)
            }
        };

        // The payload nonce is zero: the session key is unique per block.
        let nonce = [0u8; chacha20::NONCE_SIZE];
        let aad = block_aad(&backup_id, block_number);
        let encrypted_payload = chacha20::encrypt(&session_key, &nonce, plaintext, &aad)?;

        let mut block = Self {
            creator_id,
            backup_id,
            block_number,
            last_block,
            session_key_type,
            encrypted_session_key,
            encrypted_payload,
            signature: Signature::from_bytes(&[0u8; 64]),
        };
        block.signature = signer.sign(&block.signed_bytes());
        Ok(block)
    }

    /// Verify the record signature against the creator's public key.
    pub fn verify(&self, creator_key: &VerifyingKey) -> Result<()> {
        creator_key
            .verify(&self.signed_bytes(), &self.signature)
            .map_err(|_| PacketError::BadSignature)
    }

    /// Unwrap the session key and decrypt the payload.
    pub fn open(&self, unwrap: &SessionKeyUnwrap) -> Result<Vec<u8>> {
        let session_key: [u8; 32] = match (unwrap, self.session_key_type.as_str()) {
            (SessionKeyUnwrap::Ecies(secret), KEY_TYPE_ECIES) => {
                let wrapped = EciesCiphertext::from_bytes(&self.encrypted_session_key)?;
                let key = ecies::decrypt(secret, &wrapped)?;
                key.try_into()
                    .map_err(|_| PacketError::Decryption("bad session key length".to_string()))?
            }
            (SessionKeyUnwrap::Share { key_id, key }, KEY_TYPE_SHARE) => {
                if self.encrypted_session_key.len() <= chacha20::NONCE_SIZE {
                    return Err(PacketError::Decryption(
                        "wrapped share key too short".to_string(),
                    ));
                }
                let (nonce_bytes, ct) = self.encrypted_session_key.split_at(chacha20::NONCE_SIZE);
                let mut nonce = [0u8; chacha20::NONCE_SIZE];
                nonce.copy_from_slice(nonce_bytes);
                let plain = chacha20::decrypt(key, &nonce, ct, key_id.as_bytes())?;
                plain
                    .try_into()
                    .map_err(|_| PacketError::Decryption("bad session key length".to_string()))?
            }
            (_, other) => {
                return Err(PacketError::Decryption(format!(
                    "session key type mismatch: block has {other}"
                )))
            }
        };

        let nonce = [0u8; chacha20::NONCE_SIZE];
        let aad = block_aad(&self.backup_id, self.block_number);
        chacha20::decrypt(&session_key, &nonce, &self.encrypted_payload, &aad)
            .map_err(|_| PacketError::Decryption("payload decryption failed".to_string()))
    }

    /// The byte string the signature covers: header lines plus payload.
    fn signed_bytes(&self) -> Vec<u8> {
        let mut out = self.header_bytes();
        out.extend_from_slice(&self.encrypted_payload);
        out
    }

    fn header_bytes(&self) -> Vec<u8> {
        let header = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}\n",
            self.creator_id,
            self.backup_id,
            self.block_number,
            u8::from(self.last_block),
            self.session_key_type,
            BASE64.encode(&self.encrypted_session_key),
            self.encrypted_payload.len(),
        );
        header.into_bytes()
    }

    /// Serialize to the deterministic wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.signed_bytes();
        out.extend_from_slice(&self.signature.to_bytes());
        out
    }

    /// Parse a record, ignoring any zero-padding after the signature.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut lines = HeaderLines { data, pos: 0 };
        let creator_raw = lines.next_line("creator")?;
        let backup_raw = lines.next_line("backup_id")?;
        let block_raw = lines.next_line("block_number")?;
        let last_raw = lines.next_line("last_block")?;
        let key_type = lines.next_line("session_key_type")?;
        let key_b64 = lines.next_line("encrypted_session_key")?;
        let length_raw = lines.next_line("length")?;

        let creator_id = IdUrl::parse(creator_raw)
            .map_err(|e| PacketError::MalformedBlock(e.to_string()))?;
        let backup_id = BackupId::parse(backup_raw)
            .map_err(|e| PacketError::MalformedBlock(e.to_string()))?;
        let block_number: u32 = block_raw
            .parse()
            .map_err(|_| PacketError::MalformedBlock("bad block number".to_string()))?;
        let last_block = match last_raw {
            "0" => false,
            "1" => true,
            other => {
                return Err(PacketError::MalformedBlock(format!(
                    "bad last-block flag: {other}"
                )))
            }
        };
        let encrypted_session_key = BASE64
            .decode(key_b64)
            .map_err(|_| PacketError::MalformedBlock("bad session key base64".to_string()))?;
        let length: usize = length_raw
            .parse()
            .map_err(|_| PacketError::MalformedBlock("bad payload length".to_string()))?;

        let payload_start = lines.pos;
        let payload_end = payload_start + length;
        let sig_end = payload_end + 64;
        if data.len() < sig_end {
            return Err(PacketError::MalformedBlock(format!(
                "record of {} bytes shorter than declared {sig_end}",
                data.len()
            )));
        }
        let encrypted_payload = data[payload_start..payload_end].to_vec();
        let signature = Signature::from_slice(&data[payload_end..sig_end])
            .map_err(|_| PacketError::MalformedBlock("bad signature".to_string()))?;

        Ok(Self {
            creator_id,
            backup_id,
            block_number,
            last_block,
            session_key_type: key_type.to_string(),
            encrypted_session_key,
            encrypted_payload,
            signature,
        })
    }
}

/// AAD binding a payload to its version and block number.
fn block_aad(backup_id: &BackupId, block_number: u32) -> Vec<u8> {
    format!("{backup_id}/{block_number}").into_bytes()
}

struct HeaderLines<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> HeaderLines<'a> {
    fn next_line(&mut self, what: &str) -> Result<&'a str> {
        let rest = &self.data[self.pos..];
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| PacketError::MalformedBlock(format!("missing {what} line")))?;
        let line = std::str::from_utf8(&rest[..nl])
            .map_err(|_| PacketError::MalformedBlock(format!("{what} line is not UTF-8")))?;
        self.pos += nl + 1;
        Ok(line)
    }
}
