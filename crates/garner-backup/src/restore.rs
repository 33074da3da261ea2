//! The streaming restore consumer.
//!
//! Per block: fetch fragments until a decodable quorum is reached (data
//! positions first, so a full data row skips the solve entirely), decode
//! the sealed record, verify its signature, unwrap the session key,
//! decrypt, decompress, append to the destination. Each block is
//! re-entrant: a restart re-fetches and re-verifies without caring what a
//! previous run did.
//!
//! Fragment corruption shows up as an AEAD failure after a successful
//! decode. The worker then retries leave-one-out combinations of the
//! fetched fragments before re-querying the remaining positions, and
//! gives up on a block only when `max_retries` rounds exhaust every
//! position.

use garner_crypto::ed25519::VerifyingKey;
use garner_ecc::reed_solomon::join_shards;
use garner_ecc::EccMap;
use garner_packet::encrypted_block::{EncryptedBlock, SessionKeyUnwrap};
use garner_types::{BackupId, SegmentId};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::transport::SegmentTransport;
use crate::{compress, BackupError, Result};

/// Default number of fetch rounds per block.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One streaming download of one version.
pub struct RestoreWorker<T> {
    backup_id: BackupId,
    ecc_map: EccMap,
    block_count: u32,
    unwrap: SessionKeyUnwrap,
    creator_key: Option<VerifyingKey>,
    transport: T,
    max_retries: u32,
}

impl<T: SegmentTransport> RestoreWorker<T> {
    /// Prepare a restore for a sealed version.
    pub fn new(
        backup_id: BackupId,
        ecc_map: EccMap,
        block_count: u32,
        unwrap: SessionKeyUnwrap,
        transport: T,
    ) -> Self {
        Self {
            backup_id,
            ecc_map,
            block_count,
            unwrap,
            creator_key: None,
            transport,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Also verify every block record against the creator's signing key.
    pub fn with_creator_key(mut self, key: VerifyingKey) -> Self {
        self.creator_key = Some(key);
        self
    }

    /// Override the per-block fetch-round budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Run the restore, appending plaintext to `dest` in block order.
    ///
    /// Returns the number of bytes written. Fails only after the retry
    /// budget is exhausted, carrying one entry per unrecoverable block.
    pub async fn run<W: AsyncWrite + Unpin>(self, mut dest: W) -> Result<u64> {
        let mut written: u64 = 0;
        let mut failures: Vec<(u32, String)> = Vec::new();

        for block in 0..self.block_count {
            match self.restore_block(block).await {
                Ok(plaintext) => {
                    if failures.is_empty() {
                        dest.write_all(&plaintext)
                            .await
                            .map_err(|e| BackupError::DestinationWrite(e.to_string()))?;
                        written += plaintext.len() as u64;
                    }
                }
                Err(reason) => {
                    warn!(
                        backup_id = %self.backup_id,
                        block,
                        reason = %reason,
                        "block unrecoverable"
                    );
                    failures.push((block, reason));
                }
            }
        }

        if !failures.is_empty() {
            return Err(BackupError::RestoreFailed {
                backup_id: self.backup_id.to_string(),
                failures,
            });
        }
        dest.flush()
            .await
            .map_err(|e| BackupError::DestinationWrite(e.to_string()))?;
        info!(backup_id = %self.backup_id, bytes = written, "restore done");
        Ok(written)
    }

    /// Fetch, decode and open one block.
    async fn restore_block(&self, block: u32) -> std::result::Result<Vec<u8>, String> {
        let total = self.ecc_map.total_count();
        let data_count = self.ecc_map.data_count();
        let mut fetched: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut last_error = "no fragments fetched".to_string();

        for round in 0..self.max_retries {
            // Data positions first: a full data row decodes by copy.
            for position in 0..total as u32 {
                let have = fetched.iter().filter(|f| f.is_some()).count();
                if have >= data_count && round == 0 {
                    break;
                }
                if fetched[position as usize].is_some() {
                    continue;
                }
                let segment = SegmentId::new(
                    self.backup_id.clone(),
                    block,
                    position,
                    self.ecc_map.fragment_kind(position),
                );
                if let Some(payload) = self.transport.retrieve(&segment).await {
                    fetched[position as usize] = Some(payload);
                }
            }

            let have = fetched.iter().filter(|f| f.is_some()).count();
            if have < data_count {
                last_error = format!("only {have} of {data_count} fragments reachable");
                continue;
            }

            match self.try_open(block, &fetched).await {
                Ok(plaintext) => return Ok(plaintext),
                Err(err) => {
                    debug!(block, round, error = %err, "decode attempt failed");
                    last_error = err;
                }
            }

            // A bad fragment poisons the straight decode; try every
            // leave-one-out combination that still holds a quorum.
            if have > data_count {
                for skip in 0..total {
                    if fetched[skip].is_none() {
                        continue;
                    }
                    let mut subset = fetched.clone();
                    subset[skip] = None;
                    if let Ok(plaintext) = self.try_open(block, &subset).await {
                        return Ok(plaintext);
                    }
                }
            }
        }
        Err(last_error)
    }

    /// Decode a fragment set into the sealed record and open it.
    async fn try_open(
        &self,
        block: u32,
        fragments: &[Option<Vec<u8>>],
    ) -> std::result::Result<Vec<u8>, String> {
        let codec = self.ecc_map.codec().map_err(|e| e.to_string())?;
        let fragments = fragments.to_vec();
        let unwrap = self.unwrap.clone();
        let creator_key = self.creator_key.clone();
        let expect_last = block + 1 == self.block_count;

        tokio::task::spawn_blocking(move || -> std::result::Result<Vec<u8>, String> {
            let shards = codec.reconstruct(&fragments).map_err(|e| e.to_string())?;
            let record_len: usize = shards.iter().map(Vec::len).sum();
            let record_bytes = join_shards(&shards, record_len);
            let record = EncryptedBlock::from_bytes(&record_bytes).map_err(|e| e.to_string())?;

            if record.block_number != block {
                return Err(format!(
                    "record carries block {}, expected {block}",
                    record.block_number
                ));
            }
            if record.last_block != expect_last {
                return Err("last-block flag does not match the sealed count".to_string());
            }
            if let Some(key) = &creator_key {
                record.verify(key).map_err(|e| e.to_string())?;
            }
            let compressed = record.open(&unwrap).map_err(|e| e.to_string())?;
            compress::decompress(&compressed).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| format!("worker join failed: {e}"))?
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use garner_crypto::ed25519::KeyPair;
    use garner_crypto::x25519::X25519StaticSecret;
    use garner_packet::encrypted_block::SessionKeyWrap;
    use garner_types::{FragmentKind, IdUrl};

    use crate::matrix::BackupMatrix;
    use crate::producer::BackupJob;
    use crate::transport::{MemorySuppliers, SegmentTransport};

    use super::*;

    struct Fixture {
        fleet: MemorySuppliers,
        reader: X25519StaticSecret,
        creator_key: VerifyingKey,
        source: Vec<u8>,
    }

    async fn upload_fixture(source_len: usize) -> Fixture {
        let fleet = MemorySuppliers::new();
        let matrix = Mutex::new(BackupMatrix::new());
        let kp = KeyPair::generate();
        let creator_key = kp.verifying_key.clone();
        let reader = X25519StaticSecret::random();
        let source: Vec<u8> = (0..source_len).map(|i| (i % 251) as u8).collect();

        let job = BackupJob::new(
            backup_id(),
            EccMap::from_name("ecc/4x4").expect("map"),
            64 * 1024,
            IdUrl::parse("https://id.example.net/alice.xml").expect("idurl"),
            SessionKeyWrap::Ecies(reader.public_key()),
            kp.signing_key,
            fleet.clone(),
        );
        job.run(source.as_slice(), &matrix).await.expect("upload");

        Fixture {
            fleet,
            reader,
            creator_key,
            source,
        }
    }

    fn backup_id() -> BackupId {
        BackupId::parse("master$alice@id.example.net/0/1/F20260801093000AM").expect("id")
    }

    fn worker(fx: &Fixture, block_count: u32) -> RestoreWorker<MemorySuppliers> {
        RestoreWorker::new(
            backup_id(),
            EccMap::from_name("ecc/4x4").expect("map"),
            block_count,
            SessionKeyUnwrap::Ecies(fx.reader.clone()),
            fx.fleet.clone(),
        )
        .with_creator_key(fx.creator_key.clone())
    }

    #[tokio::test]
    async fn test_round_trip() {
        let fx = upload_fixture(200 * 1024).await;
        let mut out = Vec::new();
        let written = worker(&fx, 4).run(&mut out).await.expect("restore");
        assert_eq!(written, 200 * 1024);
        assert_eq!(out, fx.source);
    }

    #[tokio::test]
    async fn test_round_trip_with_positions_down() {
        let fx = upload_fixture(200 * 1024).await;
        // Four of eight positions down leaves exactly the quorum.
        for position in [0, 2, 5, 7] {
            fx.fleet.kill(position);
        }
        let mut out = Vec::new();
        worker(&fx, 4).run(&mut out).await.expect("restore");
        assert_eq!(out, fx.source);
    }

    #[tokio::test]
    async fn test_below_quorum_fails_with_block_list() {
        let fx = upload_fixture(100 * 1024).await;
        for position in 0..5 {
            fx.fleet.kill(position);
        }
        let result = worker(&fx, 2).run(&mut Vec::new()).await;
        match result {
            Err(BackupError::RestoreFailed { failures, .. }) => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].0, 0);
                assert_eq!(failures[1].0, 1);
            }
            other => unreachable!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_corrupted_fragment_survived_by_leave_one_out() {
        let fx = upload_fixture(64 * 1024).await;

        // Corrupt the fragment at position 1 in place.
        let segment = SegmentId::new(backup_id(), 0, 1, FragmentKind::Data);
        let mut payload = fx.fleet.retrieve(&segment).await.expect("fragment");
        payload[0] ^= 0xff;
        fx.fleet.upload(&segment, payload).await;

        let mut out = Vec::new();
        worker(&fx, 1).run(&mut out).await.expect("restore");
        assert_eq!(out, fx.source);
    }

    #[tokio::test]
    async fn test_wrong_reader_key_fails() {
        let fx = upload_fixture(64 * 1024).await;
        let wrong = X25519StaticSecret::random();
        let worker = RestoreWorker::new(
            backup_id(),
            EccMap::from_name("ecc/4x4").expect("map"),
            1,
            SessionKeyUnwrap::Ecies(wrong),
            fx.fleet.clone(),
        );
        assert!(worker.run(&mut Vec::new()).await.is_err());
    }
}
