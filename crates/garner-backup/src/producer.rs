//! The streaming backup producer: one running job.
//!
//! The job reads the source one block ahead so the final block is known
//! when it is sealed (its flag is part of the signed record). Per block:
//! compress, encrypt under a fresh session key, erasure-code the sealed
//! record, upload one fragment per supplier position, fold every outcome
//! into the backup matrix. A version counts as uploaded once every block
//! has at least D delivered positions; missing parity is the rebuilder's
//! job, not a reason to fail the upload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use garner_crypto::ed25519::SigningKey;
use garner_ecc::reed_solomon::split_into_shards;
use garner_ecc::EccMap;
use garner_packet::encrypted_block::{EncryptedBlock, SessionKeyWrap};
use garner_types::{BackupId, IdUrl, SegmentId};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use crate::matrix::BackupMatrix;
use crate::transport::SegmentTransport;
use crate::{compress, BackupError, Result};

/// Result of a completed job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOutcome {
    /// Blocks produced (and therefore sealed into the version).
    pub block_count: u32,
    /// Source bytes consumed.
    pub source_bytes: u64,
    /// Blocks that ended below the full fragment count; healed later.
    pub incomplete_blocks: Vec<u32>,
}

/// One streaming upload of one version.
pub struct BackupJob<T> {
    backup_id: BackupId,
    ecc_map: EccMap,
    block_size: usize,
    creator: IdUrl,
    wrap: SessionKeyWrap,
    signer: SigningKey,
    transport: T,
    abort: Arc<AtomicBool>,
}

impl<T: SegmentTransport> BackupJob<T> {
    /// Prepare a job; nothing runs until [`BackupJob::run`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backup_id: BackupId,
        ecc_map: EccMap,
        block_size: usize,
        creator: IdUrl,
        wrap: SessionKeyWrap,
        signer: SigningKey,
        transport: T,
    ) -> Self {
        Self {
            backup_id,
            ecc_map,
            block_size,
            creator,
            wrap,
            signer,
            transport,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that aborts the job between blocks.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// The version this job uploads.
    pub fn backup_id(&self) -> &BackupId {
        &self.backup_id
    }

    /// Run the job to completion.
    pub async fn run<R: AsyncRead + Unpin>(
        self,
        mut source: R,
        matrix: &Mutex<BackupMatrix>,
    ) -> Result<JobOutcome> {
        let data_count = self.ecc_map.data_count();
        let codec = self.ecc_map.codec()?;
        lock(matrix).register_version(self.backup_id.clone(), self.ecc_map.clone(), 0);

        let mut block_number: u32 = 0;
        let mut source_bytes: u64 = 0;
        let mut incomplete_blocks = Vec::new();

        let mut current = read_block(&mut source, self.block_size).await?;
        loop {
            if self.abort.load(Ordering::Acquire) {
                info!(backup_id = %self.backup_id, "backup job aborted");
                return Err(BackupError::Aborted);
            }

            let next = read_block(&mut source, self.block_size).await?;
            let last_block = next.is_empty();
            source_bytes += current.len() as u64;

            let fragments = self.seal_block(block_number, last_block, current, &codec).await?;

            lock(matrix).ensure_block(&self.backup_id, block_number);
            let mut delivered = 0usize;
            for (position, payload) in fragments.into_iter().enumerate() {
                let position = position as u32;
                let segment = SegmentId::new(
                    self.backup_id.clone(),
                    block_number,
                    position,
                    self.ecc_map.fragment_kind(position),
                );
                let ok = self.transport.upload(&segment, payload).await;
                if ok {
                    delivered += 1;
                } else {
                    warn!(segment = %segment, "fragment upload failed");
                }
                lock(matrix).record_upload(&segment, ok);
            }

            if delivered < data_count {
                return Err(BackupError::UploadIncomplete {
                    block: block_number,
                    delivered,
                    required: data_count,
                });
            }
            if delivered < self.ecc_map.total_count() {
                incomplete_blocks.push(block_number);
            }
            debug!(
                backup_id = %self.backup_id,
                block = block_number,
                delivered,
                last = last_block,
                "block uploaded"
            );

            if last_block {
                break;
            }
            current = next;
            block_number += 1;
        }

        let outcome = JobOutcome {
            block_count: block_number + 1,
            source_bytes,
            incomplete_blocks,
        };
        info!(
            backup_id = %self.backup_id,
            blocks = outcome.block_count,
            bytes = outcome.source_bytes,
            "backup job done"
        );
        Ok(outcome)
    }

    /// Compress, encrypt, sign and erasure-code one block off the reactor.
    async fn seal_block(
        &self,
        block_number: u32,
        last_block: bool,
        data: Vec<u8>,
        codec: &garner_ecc::ReedSolomon,
    ) -> Result<Vec<Vec<u8>>> {
        let creator = self.creator.clone();
        let backup_id = self.backup_id.clone();
        let wrap = self.wrap.clone();
        let signer = self.signer.clone();
        let codec = codec.clone();
        let data_count = self.ecc_map.data_count();

        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<u8>>> {
            let compressed = compress::compress(&data)?;
            let block = EncryptedBlock::seal(
                creator,
                backup_id,
                block_number,
                last_block,
                &compressed,
                &wrap,
                &signer,
            )?;
            let record = block.to_bytes();
            let (mut shards, _original_len) = split_into_shards(&record, data_count)?;
            let parity = codec.encode(&shards)?;
            shards.extend(parity);
            Ok(shards)
        })
        .await
        .map_err(|e| BackupError::Ecc(format!("worker join failed: {e}")))?
    }
}

/// Read up to `block_size` bytes; an empty result means end of stream.
async fn read_block<R: AsyncRead + Unpin>(source: &mut R, block_size: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; block_size];
    let mut filled = 0usize;
    while filled < block_size {
        let n = source
            .read(&mut buffer[filled..])
            .await
            .map_err(|e| BackupError::SourceRead(e.to_string()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

fn lock(matrix: &Mutex<BackupMatrix>) -> std::sync::MutexGuard<'_, BackupMatrix> {
    match matrix.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
