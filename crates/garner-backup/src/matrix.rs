//! The backup matrix: per-version (block × position) presence maps.
//!
//! Two parallel bitmaps per version: `remote` is what the suppliers are
//! believed to hold (fed by upload acks and `Files` listings), `local` is
//! what this node produced in the current job. A block is reconstructible
//! iff at least D of its M positions are present remotely.

use std::collections::HashMap;

use garner_ecc::EccMap;
use garner_types::{BackupId, SegmentId};
use tracing::debug;

/// Presence state of one version.
#[derive(Clone, Debug)]
pub struct VersionState {
    /// The version's erasure layout.
    pub ecc_map: EccMap,
    /// Sealed block count.
    pub block_count: u32,
    remote: Vec<Vec<bool>>,
    local: Vec<Vec<bool>>,
}

impl VersionState {
    fn new(ecc_map: EccMap, block_count: u32) -> Self {
        let total = ecc_map.total_count();
        Self {
            ecc_map,
            block_count,
            remote: vec![vec![false; total]; block_count as usize],
            local: vec![vec![false; total]; block_count as usize],
        }
    }

    /// Remote presence count of one block.
    pub fn present(&self, block: u32) -> usize {
        self.remote
            .get(block as usize)
            .map(|row| row.iter().filter(|p| **p).count())
            .unwrap_or(0)
    }

    /// Whether a block has a decodable quorum on the suppliers.
    pub fn is_reconstructible(&self, block: u32) -> bool {
        self.present(block) >= self.ecc_map.data_count()
    }

    /// Positions of one block with no remote fragment.
    pub fn missing_positions(&self, block: u32) -> Vec<u32> {
        self.remote
            .get(block as usize)
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, present)| !**present)
                    .map(|(pos, _)| pos as u32)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One block in need of healing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeakBlock {
    pub backup_id: BackupId,
    pub block_number: u32,
    /// Remote presence count.
    pub present: usize,
    /// Positions with no fragment.
    pub missing: Vec<u32>,
}

/// Presence maps for every known version.
#[derive(Default)]
pub struct BackupMatrix {
    versions: HashMap<BackupId, VersionState>,
}

impl BackupMatrix {
    /// Create an empty matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a version; idempotent for the same geometry.
    pub fn register_version(&mut self, backup_id: BackupId, ecc_map: EccMap, block_count: u32) {
        self.versions
            .entry(backup_id)
            .or_insert_with(|| VersionState::new(ecc_map, block_count));
    }

    /// Stop tracking a version (deleted backup).
    pub fn forget_version(&mut self, backup_id: &BackupId) {
        self.versions.remove(backup_id);
    }

    /// Grow a version's rows so `block_number` is addressable.
    ///
    /// The producer learns the final block count only at the end of its
    /// stream, so rows appear as blocks are produced.
    pub fn ensure_block(&mut self, backup_id: &BackupId, block_number: u32) {
        if let Some(state) = self.versions.get_mut(backup_id) {
            let total = state.ecc_map.total_count();
            while state.block_count <= block_number {
                state.remote.push(vec![false; total]);
                state.local.push(vec![false; total]);
                state.block_count += 1;
            }
        }
    }

    /// State of one version.
    pub fn version(&self, backup_id: &BackupId) -> Option<&VersionState> {
        self.versions.get(backup_id)
    }

    /// All tracked versions.
    pub fn backup_ids(&self) -> Vec<BackupId> {
        self.versions.keys().cloned().collect()
    }

    /// Record a local upload outcome for one fragment.
    pub fn record_upload(&mut self, segment: &SegmentId, delivered: bool) {
        if let Some(state) = self.versions.get_mut(&segment.backup_id) {
            let (block, pos) = (segment.block_number as usize, segment.position as usize);
            if let Some(row) = state.local.get_mut(block) {
                if let Some(cell) = row.get_mut(pos) {
                    *cell = true;
                }
            }
            if let Some(row) = state.remote.get_mut(block) {
                if let Some(cell) = row.get_mut(pos) {
                    *cell = delivered;
                }
            }
        }
    }

    /// Record supplier-reported presence of one fragment.
    pub fn record_remote(&mut self, segment: &SegmentId, present: bool) {
        if let Some(state) = self.versions.get_mut(&segment.backup_id) {
            if let Some(row) = state.remote.get_mut(segment.block_number as usize) {
                if let Some(cell) = row.get_mut(segment.position as usize) {
                    *cell = present;
                }
            }
        }
    }

    /// Mark every fragment at `position` absent (supplier replaced).
    pub fn clear_position(&mut self, position: u32) {
        for state in self.versions.values_mut() {
            for row in &mut state.remote {
                if let Some(cell) = row.get_mut(position as usize) {
                    *cell = false;
                }
            }
        }
        debug!(position, "matrix position cleared");
    }

    /// Fold one supplier's `Files` listing into the matrix.
    ///
    /// Every tracked fragment at that supplier's position is re-derived
    /// from the listing: listed means present, unlisted means absent.
    /// Returns the listed segments the caller does not recognize, so they
    /// can be removed from the supplier.
    pub fn apply_listing<F>(
        &mut self,
        position: u32,
        listed: &[String],
        mut known: F,
    ) -> Vec<SegmentId>
    where
        F: FnMut(&BackupId) -> bool,
    {
        // Reset this position for all tracked versions, then re-mark.
        for state in self.versions.values_mut() {
            for row in &mut state.remote {
                if let Some(cell) = row.get_mut(position as usize) {
                    *cell = false;
                }
            }
        }

        let mut orphans = Vec::new();
        for raw in listed {
            let Ok(segment) = SegmentId::parse(raw) else {
                continue;
            };
            if segment.position != position {
                continue;
            }
            if !known(&segment.backup_id) {
                orphans.push(segment);
                continue;
            }
            self.record_remote(&segment, true);
        }
        orphans
    }

    /// Whether every block of a version has a decodable remote quorum.
    pub fn is_recoverable(&self, backup_id: &BackupId) -> bool {
        self.versions.get(backup_id).is_some_and(|state| {
            (0..state.block_count).all(|block| state.is_reconstructible(block))
        })
    }

    /// Whether every block of a version reached the delivered threshold,
    /// i.e. the version counts as uploaded.
    pub fn is_uploaded(&self, backup_id: &BackupId) -> bool {
        self.is_recoverable(backup_id)
    }

    /// Whether every (block, position) cell is present remotely.
    pub fn is_complete(&self, backup_id: &BackupId) -> bool {
        self.versions.get(backup_id).is_some_and(|state| {
            (0..state.block_count)
                .all(|block| state.present(block) == state.ecc_map.total_count())
        })
    }

    /// Blocks with missing fragments, most urgent first.
    ///
    /// Ordering: lowest presence count, then oldest version, then lowest
    /// block number. Blocks below `data_count + epsilon` presence are the
    /// urgent tail of the same ordering.
    pub fn weak_blocks(&self) -> Vec<WeakBlock> {
        let mut out = Vec::new();
        for (backup_id, state) in &self.versions {
            for block in 0..state.block_count {
                let missing = state.missing_positions(block);
                if missing.is_empty() {
                    continue;
                }
                out.push(WeakBlock {
                    backup_id: backup_id.clone(),
                    block_number: block,
                    present: state.present(block),
                    missing,
                });
            }
        }
        out.sort_by(|a, b| {
            a.present
                .cmp(&b.present)
                .then_with(|| a.backup_id.version.cmp(&b.backup_id.version))
                .then_with(|| a.backup_id.path_id.cmp(&b.backup_id.path_id))
                .then_with(|| a.block_number.cmp(&b.block_number))
        });
        out
    }

    /// Versions with no decodable quorum on some block: gone unless some
    /// other source still holds enough fragments.
    pub fn missed_versions(&self) -> Vec<BackupId> {
        self.versions
            .keys()
            .filter(|id| !self.is_recoverable(id))
            .cloned()
            .collect()
    }

}

#[cfg(test)]
mod tests {
    use garner_types::FragmentKind;

    use super::*;

    fn backup_id() -> BackupId {
        BackupId::parse("master$alice@id.example.net/0/1/F20260801093000AM").expect("id")
    }

    fn map_4x4() -> EccMap {
        EccMap::from_name("ecc/4x4").expect("map")
    }

    fn segment(block: u32, position: u32) -> SegmentId {
        let kind = if position < 4 {
            FragmentKind::Data
        } else {
            FragmentKind::Parity
        };
        SegmentId::new(backup_id(), block, position, kind)
    }

    fn full_matrix() -> BackupMatrix {
        let mut matrix = BackupMatrix::new();
        matrix.register_version(backup_id(), map_4x4(), 4);
        for block in 0..4 {
            for pos in 0..8 {
                matrix.record_upload(&segment(block, pos), true);
            }
        }
        matrix
    }

    #[test]
    fn test_upload_outcomes_fill_rows() {
        let matrix = full_matrix();
        let state = matrix.version(&backup_id()).expect("state");
        for block in 0..4 {
            assert_eq!(state.present(block), 8);
            assert!(state.is_reconstructible(block));
        }
        assert!(matrix.is_uploaded(&backup_id()));
        assert!(matrix.is_complete(&backup_id()));
        assert!(matrix.weak_blocks().is_empty());
    }

    #[test]
    fn test_failed_position_leaves_gap() {
        let mut matrix = BackupMatrix::new();
        matrix.register_version(backup_id(), map_4x4(), 1);
        for pos in 0..8 {
            matrix.record_upload(&segment(0, pos), pos != 3);
        }
        let state = matrix.version(&backup_id()).expect("state");
        assert_eq!(state.present(0), 7);
        assert!(state.is_reconstructible(0));
        assert_eq!(state.missing_positions(0), vec![3]);
        assert!(matrix.is_uploaded(&backup_id()));
        assert!(!matrix.is_complete(&backup_id()));
    }

    #[test]
    fn test_below_quorum_not_recoverable() {
        let mut matrix = BackupMatrix::new();
        matrix.register_version(backup_id(), map_4x4(), 1);
        for pos in 0..3 {
            matrix.record_upload(&segment(0, pos), true);
        }
        assert!(!matrix.is_recoverable(&backup_id()));
        assert_eq!(matrix.missed_versions(), vec![backup_id()]);
    }

    #[test]
    fn test_clear_position() {
        let mut matrix = full_matrix();
        matrix.clear_position(2);
        let state = matrix.version(&backup_id()).expect("state");
        for block in 0..4 {
            assert_eq!(state.present(block), 7);
            assert_eq!(state.missing_positions(block), vec![2]);
        }
        let weak = matrix.weak_blocks();
        assert_eq!(weak.len(), 4);
    }

    #[test]
    fn test_weak_blocks_order_most_urgent_first() {
        let mut matrix = full_matrix();
        // Block 2 loses four fragments, block 0 loses one.
        for pos in 4..8 {
            matrix.record_remote(&segment(2, pos), false);
        }
        matrix.record_remote(&segment(0, 7), false);

        let weak = matrix.weak_blocks();
        assert_eq!(weak.len(), 2);
        assert_eq!(weak[0].block_number, 2);
        assert_eq!(weak[0].present, 4);
        assert_eq!(weak[1].block_number, 0);
    }

    #[test]
    fn test_apply_listing_resets_and_reports_orphans() {
        let mut matrix = full_matrix();

        // The supplier at position 1 reports only block 0, plus a segment
        // of a version the catalog never heard of.
        let orphan =
            "master$alice@id.example.net/0/9/F20250101010101AM/0-1-Data".to_string();
        let listed = vec![segment(0, 1).to_string(), orphan.clone()];

        let orphans = matrix.apply_listing(1, &listed, |id| id.path_id != "0/9");
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].to_string(), orphan);

        let state = matrix.version(&backup_id()).expect("state");
        assert!(state.remote[0][1]);
        for block in 1..4 {
            assert_eq!(state.missing_positions(block), vec![1]);
        }
    }

    #[test]
    fn test_listing_ignores_other_positions() {
        let mut matrix = full_matrix();
        let listed = vec![segment(0, 5).to_string()];
        // Applying a listing for position 1 must not credit position 5.
        matrix.apply_listing(1, &listed, |_| true);
        let state = matrix.version(&backup_id()).expect("state");
        assert!(!state.remote[0][1]);
    }

    #[test]
    fn test_forget_version() {
        let mut matrix = full_matrix();
        matrix.forget_version(&backup_id());
        assert!(matrix.version(&backup_id()).is_none());
        assert!(!matrix.is_recoverable(&backup_id()));
    }
}
