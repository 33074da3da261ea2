//! Where identity documents come from.
//!
//! The network implementation fetches the JSON document published at the
//! identity URL; tests publish documents into a [`MemoryIdentitySource`].
//! Either way the caller verifies the document before trusting it, so a
//! source is never part of the trust boundary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use garner_types::IdUrl;

use crate::{IdentityDoc, IdentityError, Result};

/// A place identity documents can be fetched from.
pub trait IdentitySource: Send + Sync {
    /// Fetch the document currently published at `idurl`.
    ///
    /// Failure is transient: the caller retries later.
    fn fetch(
        &self,
        idurl: &IdUrl,
    ) -> impl std::future::Future<Output = Result<IdentityDoc>> + Send;
}

/// An in-process identity server for tests and local wiring.
#[derive(Clone, Default)]
pub struct MemoryIdentitySource {
    docs: Arc<Mutex<HashMap<IdUrl, IdentityDoc>>>,
}

impl MemoryIdentitySource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a document under its own identity URL.
    pub fn publish(&self, doc: IdentityDoc) {
        if let Ok(mut docs) = self.docs.lock() {
            docs.insert(doc.idurl.clone(), doc);
        }
    }

    /// Remove a published document.
    pub fn withdraw(&self, idurl: &IdUrl) {
        if let Ok(mut docs) = self.docs.lock() {
            docs.remove(idurl);
        }
    }
}

impl IdentitySource for MemoryIdentitySource {
    async fn fetch(&self, idurl: &IdUrl) -> Result<IdentityDoc> {
        let doc = self
            .docs
            .lock()
            .ok()
            .and_then(|docs| docs.get(idurl).cloned());
        doc.ok_or_else(|| IdentityError::Unresolved(idurl.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use garner_crypto::ed25519::KeyPair;
    use garner_crypto::x25519::X25519StaticSecret;

    use super::*;

    fn make_doc(name: &str) -> IdentityDoc {
        let keypair = KeyPair::generate();
        let enc = X25519StaticSecret::random();
        IdentityDoc::build(
            IdUrl::parse(&format!("https://id.example.net/{name}.xml")).expect("idurl"),
            &keypair,
            enc.public_key(),
            vec![],
            1,
        )
    }

    #[tokio::test]
    async fn test_publish_and_fetch() {
        let source = MemoryIdentitySource::new();
        let doc = make_doc("alice");
        source.publish(doc.clone());

        let fetched = source.fetch(&doc.idurl).await.expect("fetch");
        assert_eq!(fetched, doc);
    }

    #[tokio::test]
    async fn test_missing_is_unresolved() {
        let source = MemoryIdentitySource::new();
        let idurl = IdUrl::parse("https://id.example.net/ghost.xml").expect("idurl");
        assert!(matches!(
            source.fetch(&idurl).await,
            Err(IdentityError::Unresolved(_))
        ));
    }

    #[tokio::test]
    async fn test_withdraw() {
        let source = MemoryIdentitySource::new();
        let doc = make_doc("bob");
        source.publish(doc.clone());
        source.withdraw(&doc.idurl);
        assert!(source.fetch(&doc.idurl).await.is_err());
    }
}
