//! Supplier listing sync and fragment healing.
//!
//! Two periodic duties keep the matrix honest and the fleet full:
//!
//! 1. **Sync**: ask each supplier what it holds (`ListFiles`/`Files`),
//!    fold the answer into the matrix, and delete segments the catalog
//!    does not know about.
//! 2. **Rebuild**: for every block with missing fragments — most degraded
//!    first — fetch a decodable quorum, re-encode, and upload only the
//!    missing positions. Fragments are byte-deterministic, so a rebuilt
//!    fragment is identical to the lost one.

use std::sync::Mutex;

use garner_ecc::EccMap;
use garner_types::{BackupId, SegmentId};
use tracing::{debug, info, warn};

use crate::matrix::{BackupMatrix, WeakBlock};
use crate::transport::SegmentTransport;
use crate::{BackupError, Result};

/// Outcome of one rebuild pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Blocks brought back to the full fragment count.
    pub blocks_rebuilt: usize,
    /// Fragments uploaded in the process.
    pub fragments_uploaded: usize,
    /// Blocks that could not be rebuilt (no quorum reachable).
    pub blocks_failed: usize,
}

/// Outcome of one supplier sync.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Whether the supplier answered the listing request.
    pub listed: bool,
    /// Unknown segments deleted from the supplier.
    pub orphans_removed: usize,
}

/// Heals missing fragments and keeps supplier state in sync.
pub struct Rebuilder<T> {
    transport: T,
}

impl<T: SegmentTransport> Rebuilder<T> {
    /// Create a rebuilder over the fleet transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Sync one supplier position against the matrix and the catalog.
    ///
    /// `known` decides whether a version belongs to the catalog; listed
    /// segments of unknown versions are deleted from the supplier.
    pub async fn sync_supplier<F>(
        &self,
        matrix: &Mutex<BackupMatrix>,
        position: u32,
        known: F,
    ) -> SyncReport
    where
        F: FnMut(&BackupId) -> bool,
    {
        let Some(listing) = self.transport.list(position).await else {
            debug!(position, "supplier listing unavailable");
            return SyncReport::default();
        };

        let orphans = lock(matrix).apply_listing(position, &listing.segments, known);
        let mut removed = 0usize;
        for orphan in &orphans {
            if self.transport.delete(orphan).await {
                removed += 1;
            } else {
                warn!(segment = %orphan, "orphan delete failed");
            }
        }
        if removed > 0 {
            info!(position, removed, "removed orphaned segments");
        }
        SyncReport {
            listed: true,
            orphans_removed: removed,
        }
    }

    /// One healing pass over every weak block, most degraded first.
    pub async fn run_once(&self, matrix: &Mutex<BackupMatrix>) -> RebuildReport {
        let weak = lock(matrix).weak_blocks();
        let mut report = RebuildReport::default();

        for block in weak {
            let Some(ecc_map) = lock(matrix)
                .version(&block.backup_id)
                .map(|state| state.ecc_map.clone())
            else {
                continue;
            };
            match self.rebuild_block(matrix, &block, &ecc_map).await {
                Ok(uploaded) => {
                    report.blocks_rebuilt += 1;
                    report.fragments_uploaded += uploaded;
                }
                Err(err) => {
                    warn!(
                        backup_id = %block.backup_id,
                        block = block.block_number,
                        error = %err,
                        "block rebuild failed"
                    );
                    report.blocks_failed += 1;
                }
            }
        }
        if report.blocks_rebuilt > 0 {
            info!(
                blocks = report.blocks_rebuilt,
                fragments = report.fragments_uploaded,
                "rebuild pass done"
            );
        }
        report
    }

    /// Rebuild one block: quorum in, missing fragments out.
    async fn rebuild_block(
        &self,
        matrix: &Mutex<BackupMatrix>,
        weak: &WeakBlock,
        ecc_map: &EccMap,
    ) -> Result<usize> {
        let total = ecc_map.total_count();
        let data_count = ecc_map.data_count();
        let codec = ecc_map.codec()?;

        // Fetch from believed-present positions until a quorum is in hand.
        let mut fragments: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut have = 0usize;
        for position in 0..total as u32 {
            if have >= data_count {
                break;
            }
            if weak.missing.contains(&position) {
                continue;
            }
            let segment = SegmentId::new(
                weak.backup_id.clone(),
                weak.block_number,
                position,
                ecc_map.fragment_kind(position),
            );
            match self.transport.retrieve(&segment).await {
                Some(payload) => {
                    fragments[position as usize] = Some(payload);
                    have += 1;
                }
                None => {
                    // The matrix was stale for this position.
                    lock(matrix).record_remote(&segment, false);
                }
            }
        }
        if have < data_count {
            return Err(BackupError::Ecc(format!(
                "quorum unreachable: {have} of {data_count}"
            )));
        }

        let shards = codec.reconstruct(&fragments)?;
        let parity = codec.encode(&shards)?;

        let mut uploaded = 0usize;
        for &position in &weak.missing {
            let payload = if (position as usize) < data_count {
                shards[position as usize].clone()
            } else {
                parity[position as usize - data_count].clone()
            };
            let segment = SegmentId::new(
                weak.backup_id.clone(),
                weak.block_number,
                position,
                ecc_map.fragment_kind(position),
            );
            let ok = self.transport.upload(&segment, payload).await;
            lock(matrix).record_upload(&segment, ok);
            if ok {
                uploaded += 1;
            }
        }
        Ok(uploaded)
    }
}

fn lock(matrix: &Mutex<BackupMatrix>) -> std::sync::MutexGuard<'_, BackupMatrix> {
    match matrix.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use garner_crypto::ed25519::KeyPair;
    use garner_crypto::x25519::X25519StaticSecret;
    use garner_packet::encrypted_block::{SessionKeyUnwrap, SessionKeyWrap};
    use garner_types::IdUrl;

    use crate::producer::BackupJob;
    use crate::restore::RestoreWorker;
    use crate::transport::MemorySuppliers;

    use super::*;

    fn backup_id() -> BackupId {
        BackupId::parse("master$alice@id.example.net/0/1/F20260801093000AM").expect("id")
    }

    fn map_4x4() -> EccMap {
        EccMap::from_name("ecc/4x4").expect("map")
    }

    struct Fixture {
        fleet: MemorySuppliers,
        matrix: Mutex<BackupMatrix>,
        reader: X25519StaticSecret,
        source: Vec<u8>,
    }

    async fn upload_fixture() -> Fixture {
        let fleet = MemorySuppliers::new();
        let matrix = Mutex::new(BackupMatrix::new());
        let kp = KeyPair::generate();
        let reader = X25519StaticSecret::random();
        let source: Vec<u8> = (0u32..150 * 1024).map(|i| (i % 239) as u8).collect();

        let job = BackupJob::new(
            backup_id(),
            map_4x4(),
            64 * 1024,
            IdUrl::parse("https://id.example.net/alice.xml").expect("idurl"),
            SessionKeyWrap::Ecies(reader.public_key()),
            kp.signing_key,
            fleet.clone(),
        );
        job.run(source.as_slice(), &matrix).await.expect("upload");

        Fixture {
            fleet,
            matrix,
            reader,
            source,
        }
    }

    #[tokio::test]
    async fn test_rebuild_refills_lost_position() {
        let fx = upload_fixture().await;

        // Position 3 loses everything (supplier replaced).
        fx.fleet.wipe(3);
        lock(&fx.matrix).clear_position(3);
        assert!(!lock(&fx.matrix).is_complete(&backup_id()));

        let rebuilder = Rebuilder::new(fx.fleet.clone());
        let report = rebuilder.run_once(&fx.matrix).await;
        assert_eq!(report.blocks_rebuilt, 3);
        assert_eq!(report.fragments_uploaded, 3);
        assert_eq!(report.blocks_failed, 0);

        assert!(lock(&fx.matrix).is_complete(&backup_id()));
        assert_eq!(fx.fleet.stored_count(3), 3);

        // The healed version still restores byte-exactly.
        let mut out = Vec::new();
        RestoreWorker::new(
            backup_id(),
            map_4x4(),
            3,
            SessionKeyUnwrap::Ecies(fx.reader.clone()),
            fx.fleet.clone(),
        )
        .run(&mut out)
        .await
        .expect("restore");
        assert_eq!(out, fx.source);
    }

    #[tokio::test]
    async fn test_rebuild_fails_below_quorum() {
        let fx = upload_fixture().await;
        for position in 0..5 {
            fx.fleet.wipe(position);
            lock(&fx.matrix).clear_position(position);
        }
        let rebuilder = Rebuilder::new(fx.fleet.clone());
        let report = rebuilder.run_once(&fx.matrix).await;
        assert_eq!(report.blocks_rebuilt, 0);
        assert_eq!(report.blocks_failed, 3);
    }

    #[tokio::test]
    async fn test_sync_supplier_removes_orphans() {
        let fx = upload_fixture().await;

        // Plant a segment of a version the catalog does not know.
        let orphan = SegmentId::parse(
            "master$alice@id.example.net/0/9/F20250101010101AM/0-2-Data",
        )
        .expect("segment");
        fx.fleet.upload(&orphan, b"stale".to_vec()).await;

        let rebuilder = Rebuilder::new(fx.fleet.clone());
        let report = rebuilder
            .sync_supplier(&fx.matrix, 2, |id| id.path_id == "0/1")
            .await;
        assert!(report.listed);
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(fx.fleet.retrieve(&orphan).await, None);

        // Known segments at the position survive and stay marked present.
        assert!(lock(&fx.matrix).is_complete(&backup_id()));
    }

    #[tokio::test]
    async fn test_sync_supplier_detects_silent_loss() {
        let fx = upload_fixture().await;
        fx.fleet.wipe(5);

        let rebuilder = Rebuilder::new(fx.fleet.clone());
        rebuilder.sync_supplier(&fx.matrix, 5, |_| true).await;
        let matrix = lock(&fx.matrix);
        let state = matrix.version(&backup_id()).expect("state");
        for block in 0..3 {
            assert!(state.missing_positions(block).contains(&5));
        }
    }

    #[tokio::test]
    async fn test_offline_supplier_sync_is_noop() {
        let fx = upload_fixture().await;
        fx.fleet.kill(1);
        let rebuilder = Rebuilder::new(fx.fleet.clone());
        let report = rebuilder.sync_supplier(&fx.matrix, 1, |_| true).await;
        assert!(!report.listed);
        // No listing means no evidence; the matrix keeps its beliefs.
        assert!(lock(&fx.matrix).is_complete(&backup_id()));
    }
}
