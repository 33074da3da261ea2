//! How fragments reach suppliers.
//!
//! The pipeline does not talk to the session layer directly; it goes
//! through [`SegmentTransport`], addressed by supplier *position* in the
//! version's erasure layout. The node wires positions to the current
//! fleet; tests wire them to an in-memory store whose positions can be
//! killed and revived.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use garner_packet::service::FilesListing;
use garner_types::SegmentId;

/// Moves fragments between this customer and its suppliers.
pub trait SegmentTransport: Send + Sync {
    /// Store one fragment on the supplier at `position`.
    ///
    /// Resolves once the send outcome is known (ack, fail or timeout).
    fn upload(
        &self,
        segment: &SegmentId,
        payload: Vec<u8>,
    ) -> impl std::future::Future<Output = bool> + Send;

    /// Fetch one fragment back from the supplier at `position`.
    fn retrieve(
        &self,
        segment: &SegmentId,
    ) -> impl std::future::Future<Output = Option<Vec<u8>>> + Send;

    /// Delete one fragment from the supplier at `position`.
    fn delete(&self, segment: &SegmentId) -> impl std::future::Future<Output = bool> + Send;

    /// Ask the supplier at `position` for everything it holds.
    fn list(
        &self,
        position: u32,
    ) -> impl std::future::Future<Output = Option<FilesListing>> + Send;
}

/// An in-memory supplier fleet for tests.
///
/// Each position is a little segment store that can be taken offline
/// (uploads and retrieves fail) or wiped (data loss).
#[derive(Clone, Default)]
pub struct MemorySuppliers {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    segments: HashMap<u32, HashMap<String, Vec<u8>>>,
    offline: HashMap<u32, bool>,
}

impl MemorySuppliers {
    /// Create an empty fleet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a position offline; uploads and retrieves to it fail.
    pub fn kill(&self, position: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.offline.insert(position, true);
        }
    }

    /// Bring a position back online, keeping whatever it stored.
    pub fn revive(&self, position: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.offline.remove(&position);
        }
    }

    /// Drop everything a position stored (supplier replacement).
    pub fn wipe(&self, position: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.segments.remove(&position);
        }
    }

    /// Number of fragments a position holds.
    pub fn stored_count(&self, position: u32) -> usize {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.segments.get(&position).map(HashMap::len))
            .unwrap_or(0)
    }

    fn is_offline(&self, position: u32) -> bool {
        self.inner
            .lock()
            .ok()
            .map(|inner| inner.offline.get(&position).copied().unwrap_or(false))
            .unwrap_or(true)
    }
}

impl SegmentTransport for MemorySuppliers {
    async fn upload(&self, segment: &SegmentId, payload: Vec<u8>) -> bool {
        if self.is_offline(segment.position) {
            return false;
        }
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .segments
                .entry(segment.position)
                .or_default()
                .insert(segment.to_string(), payload);
            true
        } else {
            false
        }
    }

    async fn retrieve(&self, segment: &SegmentId) -> Option<Vec<u8>> {
        if self.is_offline(segment.position) {
            return None;
        }
        self.inner
            .lock()
            .ok()?
            .segments
            .get(&segment.position)?
            .get(&segment.to_string())
            .cloned()
    }

    async fn delete(&self, segment: &SegmentId) -> bool {
        if self.is_offline(segment.position) {
            return false;
        }
        self.inner
            .lock()
            .ok()
            .and_then(|mut inner| {
                inner
                    .segments
                    .get_mut(&segment.position)
                    .map(|store| store.remove(&segment.to_string()).is_some())
            })
            .unwrap_or(false)
    }

    async fn list(&self, position: u32) -> Option<FilesListing> {
        if self.is_offline(position) {
            return None;
        }
        let inner = self.inner.lock().ok()?;
        let mut segments: Vec<String> = inner
            .segments
            .get(&position)
            .map(|store| store.keys().cloned().collect())
            .unwrap_or_default();
        segments.sort();
        Some(FilesListing {
            segments,
            index_revision: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use garner_types::{BackupId, FragmentKind};

    use super::*;

    fn segment(block: u32, position: u32) -> SegmentId {
        let backup_id =
            BackupId::parse("master$alice@id.example.net/0/1/F20260801093000AM").expect("id");
        SegmentId::new(backup_id, block, position, FragmentKind::Data)
    }

    #[tokio::test]
    async fn test_upload_retrieve_round_trip() {
        let fleet = MemorySuppliers::new();
        let seg = segment(0, 3);
        assert!(fleet.upload(&seg, b"fragment".to_vec()).await);
        assert_eq!(fleet.retrieve(&seg).await, Some(b"fragment".to_vec()));
    }

    #[tokio::test]
    async fn test_killed_position_fails() {
        let fleet = MemorySuppliers::new();
        let seg = segment(0, 3);
        fleet.kill(3);
        assert!(!fleet.upload(&seg, b"fragment".to_vec()).await);
        assert_eq!(fleet.retrieve(&seg).await, None);
        assert_eq!(fleet.list(3).await, None);

        fleet.revive(3);
        assert!(fleet.upload(&seg, b"fragment".to_vec()).await);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let fleet = MemorySuppliers::new();
        let seg = segment(0, 1);
        fleet.upload(&seg, b"x".to_vec()).await;

        let listing = fleet.list(1).await.expect("listing");
        assert_eq!(listing.segments, vec![seg.to_string()]);

        assert!(fleet.delete(&seg).await);
        assert!(!fleet.delete(&seg).await);
        assert_eq!(fleet.list(1).await.expect("listing").segments.len(), 0);
    }
}
