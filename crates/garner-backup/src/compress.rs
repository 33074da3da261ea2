//! bzip2 block compression.
//!
//! Every block payload is compressed before encryption. The compressed
//! form is what the block length and erasure fragments are computed over,
//! so both directions must be byte-stable.

use std::io::Read;

use bzip2::read::{BzDecoder, BzEncoder};
use bzip2::Compression;

use crate::{BackupError, Result};

/// Compress a block payload.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    BzEncoder::new(data, Compression::best())
        .read_to_end(&mut out)
        .map_err(|e| BackupError::Compression(e.to_string()))?;
    Ok(out)
}

/// Decompress a block payload.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    BzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| BackupError::Compression(e.to_string()))?;
    Ok(out)
}
