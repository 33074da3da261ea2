//! The identity cache: resolved documents, overrides, rotation events.
//!
//! Lookups consult the override layer first. Overrides are installed by the
//! relay router to shadow a client's real document with one whose sole
//! contact is the router; they are explicit and reversible and never
//! participate in rotation detection.
//!
//! Rotation: a stored document whose signing key is already known under a
//! different URL moves the key's *latest* pointer and broadcasts an
//! `identity-url-changed` event. Both the old and the new URL keep
//! resolving, so long-lived maps keyed by either form stay valid.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use garner_types::IdUrl;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::source::IdentitySource;
use crate::{IdentityDoc, IdentityError, Result};

/// Broadcast capacity for rotation events.
const ROTATION_CHANNEL_CAPACITY: usize = 64;

/// An identity rotated: same signing key, new URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RotationEvent {
    /// The URL the key was previously known under.
    pub old: IdUrl,
    /// The URL the key is now published under.
    pub new: IdUrl,
}

struct Inner {
    known: HashMap<IdUrl, IdentityDoc>,
    overrides: HashMap<IdUrl, IdentityDoc>,
    latest_by_fingerprint: HashMap<[u8; 32], IdUrl>,
}

/// Shared cache of resolved identity documents.
#[derive(Clone)]
pub struct IdentityCache {
    inner: Arc<Mutex<Inner>>,
    rotation_tx: broadcast::Sender<RotationEvent>,
}

impl IdentityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        let (rotation_tx, _) = broadcast::channel(ROTATION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                known: HashMap::new(),
                overrides: HashMap::new(),
                latest_by_fingerprint: HashMap::new(),
            })),
            rotation_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Store a verified document; returns the rotation it revealed, if any.
    ///
    /// Stale documents (lower revision than the one already cached for the
    /// same URL) are ignored.
    pub fn store(&self, doc: IdentityDoc) -> Result<Option<RotationEvent>> {
        doc.verify()?;

        let mut inner = self.lock();
        if let Some(existing) = inner.known.get(&doc.idurl) {
            if existing.revision > doc.revision {
                debug!(idurl = %doc.idurl, "ignoring stale identity revision");
                return Ok(None);
            }
        }

        let fingerprint = doc.fingerprint();
        let rotation = match inner.latest_by_fingerprint.get(&fingerprint) {
            Some(old) if *old != doc.idurl => Some(RotationEvent {
                old: old.clone(),
                new: doc.idurl.clone(),
            }),
            _ => None,
        };

        inner
            .latest_by_fingerprint
            .insert(fingerprint, doc.idurl.clone());
        inner.known.insert(doc.idurl.clone(), doc);
        drop(inner);

        if let Some(event) = &rotation {
            info!(old = %event.old, new = %event.new, "identity rotated");
            // No subscribers is fine.
            let _ = self.rotation_tx.send(event.clone());
        }
        Ok(rotation)
    }

    /// Look up a cached document, overrides first.
    pub fn lookup(&self, idurl: &IdUrl) -> Option<IdentityDoc> {
        let inner = self.lock();
        inner
            .overrides
            .get(idurl)
            .or_else(|| inner.known.get(idurl))
            .cloned()
    }

    /// Install a router-provided document shadowing the real one.
    pub fn install_override(&self, idurl: IdUrl, doc: IdentityDoc) {
        debug!(idurl = %idurl, "installing identity override");
        self.lock().overrides.insert(idurl, doc);
    }

    /// Remove a previously installed override.
    pub fn stop_override(&self, idurl: &IdUrl) -> bool {
        let removed = self.lock().overrides.remove(idurl).is_some();
        if removed {
            debug!(idurl = %idurl, "removed identity override");
        }
        removed
    }

    /// Whether an override is installed for this URL.
    pub fn has_override(&self, idurl: &IdUrl) -> bool {
        self.lock().overrides.contains_key(idurl)
    }

    /// The latest known URL for the key currently published at `idurl`.
    pub fn latest(&self, idurl: &IdUrl) -> Option<IdUrl> {
        let inner = self.lock();
        let doc = inner.known.get(idurl)?;
        inner.latest_by_fingerprint.get(&doc.fingerprint()).cloned()
    }

    /// Subscribe to rotation events.
    pub fn subscribe_rotations(&self) -> broadcast::Receiver<RotationEvent> {
        self.rotation_tx.subscribe()
    }

    /// Resolve a URL: cached document, or fetch, verify and store.
    pub async fn resolve<S: IdentitySource>(
        &self,
        source: &S,
        idurl: &IdUrl,
    ) -> Result<IdentityDoc> {
        if let Some(doc) = self.lookup(idurl) {
            return Ok(doc);
        }
        let doc = source.fetch(idurl).await.map_err(|e| {
            warn!(idurl = %idurl, error = %e, "identity fetch failed");
            IdentityError::Unresolved(idurl.to_string())
        })?;
        self.store(doc.clone())?;
        Ok(doc)
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use garner_crypto::ed25519::KeyPair;
    use garner_crypto::x25519::X25519StaticSecret;

    use crate::MemoryIdentitySource;

    use super::*;

    fn make_doc_with(keypair: &KeyPair, name: &str, revision: u64) -> IdentityDoc {
        let enc = X25519StaticSecret::random();
        IdentityDoc::build(
            IdUrl::parse(&format!("https://id.example.net/{name}.xml")).expect("idurl"),
            keypair,
            enc.public_key(),
            vec![format!("tcp://{name}.example.net:7771")],
            revision,
        )
    }

    fn make_doc(name: &str) -> IdentityDoc {
        make_doc_with(&KeyPair::generate(), name, 1)
    }

    #[test]
    fn test_store_and_lookup() {
        let cache = IdentityCache::new();
        let doc = make_doc("alice");
        cache.store(doc.clone()).expect("store");
        assert_eq!(cache.lookup(&doc.idurl), Some(doc));
    }

    #[test]
    fn test_store_rejects_tampered() {
        let cache = IdentityCache::new();
        let mut doc = make_doc("alice");
        doc.revision += 1;
        assert!(cache.store(doc).is_err());
    }

    #[test]
    fn test_stale_revision_ignored() {
        let cache = IdentityCache::new();
        let keypair = KeyPair::generate();
        let v2 = make_doc_with(&keypair, "alice", 2);
        let v1 = make_doc_with(&keypair, "alice", 1);
        cache.store(v2.clone()).expect("store v2");
        cache.store(v1).expect("store v1");
        assert_eq!(cache.lookup(&v2.idurl).map(|d| d.revision), Some(2));
    }

    #[test]
    fn test_rotation_detected_and_broadcast() {
        let cache = IdentityCache::new();
        let mut rotations = cache.subscribe_rotations();

        let keypair = KeyPair::generate();
        let old = make_doc_with(&keypair, "a-old", 1);
        let new = make_doc_with(&keypair, "a-new", 2);

        assert!(cache.store(old.clone()).expect("store old").is_none());
        let event = cache
            .store(new.clone())
            .expect("store new")
            .expect("rotation");
        assert_eq!(event.old, old.idurl);
        assert_eq!(event.new, new.idurl);

        let received = rotations.try_recv().expect("event");
        assert_eq!(received, event);

        // Both URLs keep resolving; latest points at the new one.
        assert!(cache.lookup(&old.idurl).is_some());
        assert!(cache.lookup(&new.idurl).is_some());
        assert_eq!(cache.latest(&old.idurl), Some(new.idurl));
    }

    #[test]
    fn test_override_shadows_and_reverts() {
        let cache = IdentityCache::new();
        let real = make_doc("alice");
        cache.store(real.clone()).expect("store");

        let shadow = make_doc("alice");
        cache.install_override(real.idurl.clone(), shadow.clone());
        assert_eq!(cache.lookup(&real.idurl), Some(shadow));
        assert!(cache.has_override(&real.idurl));

        assert!(cache.stop_override(&real.idurl));
        assert_eq!(cache.lookup(&real.idurl), Some(real));
    }

    #[tokio::test]
    async fn test_resolve_fetches_once() {
        let cache = IdentityCache::new();
        let source = MemoryIdentitySource::new();
        let doc = make_doc("carol");
        source.publish(doc.clone());

        let first = cache.resolve(&source, &doc.idurl).await.expect("resolve");
        assert_eq!(first, doc);

        // Withdraw from the source; the cache still answers.
        source.withdraw(&doc.idurl);
        let second = cache.resolve(&source, &doc.idurl).await.expect("resolve");
        assert_eq!(second, doc);
    }

    #[tokio::test]
    async fn test_resolve_unknown_is_transient_error() {
        let cache = IdentityCache::new();
        let source = MemoryIdentitySource::new();
        let idurl = IdUrl::parse("https://id.example.net/ghost.xml").expect("idurl");
        assert!(matches!(
            cache.resolve(&source, &idurl).await,
            Err(IdentityError::Unresolved(_))
        ));
    }
}
