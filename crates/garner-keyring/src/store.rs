//! Keyring persistence.
//!
//! The registry is one JSON file holding the master secrets and every
//! share key. Writes go through a temporary file and an atomic rename, so
//! a crash mid-write never leaves a torn registry behind.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tracing::info;
use zeroize::Zeroize;

use crate::ring::{KeyRing, ShareKey};
use crate::{KeyringError, Result};

/// Registry file format version.
const REGISTRY_VERSION: u32 = 1;

#[serde_as]
#[derive(Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    #[serde_as(as = "serde_with::hex::Hex")]
    signing_secret: [u8; 32],
    #[serde_as(as = "serde_with::hex::Hex")]
    encrypt_secret: [u8; 32],
    shares: Vec<ShareKey>,
}

impl Drop for RegistryFile {
    fn drop(&mut self) {
        self.signing_secret.zeroize();
        self.encrypt_secret.zeroize();
    }
}

/// Write the keyring registry to `path` atomically.
pub fn save(ring: &KeyRing, path: &Path) -> Result<()> {
    let (signing_secret, encrypt_secret) = ring.secrets();
    let file = RegistryFile {
        version: REGISTRY_VERSION,
        signing_secret,
        encrypt_secret,
        shares: ring.shares().cloned().collect(),
    };
    let json =
        serde_json::to_string_pretty(&file).map_err(|e| KeyringError::Io(e.to_string()))?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json.as_bytes()).map_err(|e| KeyringError::Io(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| KeyringError::Io(e.to_string()))?;
    info!(path = %path.display(), "keyring saved");
    Ok(())
}

/// Load the keyring registry from `path`.
pub fn load(path: &Path) -> Result<KeyRing> {
    let json = std::fs::read_to_string(path).map_err(|e| KeyringError::Io(e.to_string()))?;
    let file: RegistryFile =
        serde_json::from_str(&json).map_err(|e| KeyringError::Malformed(e.to_string()))?;
    if file.version != REGISTRY_VERSION {
        return Err(KeyringError::Malformed(format!(
            "unsupported registry version {}",
            file.version
        )));
    }
    Ok(KeyRing::from_parts(
        &file.signing_secret,
        file.encrypt_secret,
        file.shares.clone(),
    ))
}
