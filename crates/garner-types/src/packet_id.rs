//! Packet-ID allocation and the data-segment grammar.
//!
//! Control packets carry a node-unique packet ID so that `Ack`/`Fail`
//! responses can be correlated with the originating request. Data packets
//! carrying erasure-coded fragments use the segment grammar
//! `backup_id/block_number-supplier_position-(Data|Parity)`, which every
//! node must parse and regenerate exactly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{BackupId, Result, TypesError};

static PACKET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocate a node-unique packet ID for a control packet.
///
/// The ID combines the current time with a process-wide counter, so two
/// packets created in the same instant still get distinct IDs.
pub fn unique_packet_id() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let seq = PACKET_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{micros}-{seq}")
}

/// The kind of erasure-coded fragment a segment carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentKind {
    /// One of the D data fragments of a block.
    Data,
    /// One of the P parity fragments of a block.
    Parity,
}

impl FragmentKind {
    /// The wire spelling used inside segment packet IDs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "Data",
            Self::Parity => "Parity",
        }
    }

    /// Parse the wire spelling.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Data" => Some(Self::Data),
            "Parity" => Some(Self::Parity),
            _ => None,
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one erasure-coded fragment of one block on one supplier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId {
    /// The sealed version the fragment belongs to.
    pub backup_id: BackupId,
    /// Zero-based block number within the version.
    pub block_number: u32,
    /// Supplier position within the erasure layout.
    pub position: u32,
    /// Data or parity.
    pub kind: FragmentKind,
}

impl SegmentId {
    /// Build a segment ID from parts.
    pub fn new(backup_id: BackupId, block_number: u32, position: u32, kind: FragmentKind) -> Self {
        Self {
            backup_id,
            block_number,
            position,
            kind,
        }
    }

    /// Parse `customer/path_id/version/block-position-kind`.
    pub fn parse(raw: &str) -> Result<Self> {
        let malformed = || TypesError::MalformedSegmentId(raw.to_string());
        let (backup_raw, segment_raw) = raw.rsplit_once('/').ok_or_else(malformed)?;
        let backup_id = BackupId::parse(backup_raw).map_err(|_| malformed())?;
        let mut parts = segment_raw.split('-');
        let block_number: u32 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(malformed)?;
        let position: u32 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(malformed)?;
        let kind = parts
            .next()
            .and_then(FragmentKind::parse)
            .ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            backup_id,
            block_number,
            position,
            kind,
        })
    }

    /// The file name a supplier stores this segment under:
    /// `block-position-kind`.
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}", self.block_number, self.position, self.kind)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}-{}-{}",
            self.backup_id, self.block_number, self.position, self.kind
        )
    }
}

impl std::str::FromStr for SegmentId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
