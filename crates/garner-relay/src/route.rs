//! Per-client route state.

use std::time::{SystemTime, UNIX_EPOCH};

use garner_crypto::x25519::X25519PublicKey;
use garner_identity::IdentityDoc;
use garner_types::IdUrl;

/// Everything the router remembers about one registered client.
#[derive(Clone, Debug)]
pub struct RouteInfo {
    /// The client's identity URL (re-keyed on rotation).
    pub client: IdUrl,
    /// Snapshot of the client-signed identity document that registered
    /// the route; its sole contact is this router.
    pub identity: IdentityDoc,
    /// Last transport address the client was seen at.
    pub last_address: Option<String>,
    /// Unix timestamp of registration.
    pub created_at: u64,
}

impl RouteInfo {
    /// Create a route from a verified registration document.
    pub fn new(identity: IdentityDoc, last_address: Option<String>) -> Self {
        Self {
            client: identity.idurl.clone(),
            identity,
            last_address,
            created_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    /// The client's encryption key; `Relay` envelopes to the client are
    /// wrapped with it.
    pub fn encryption_key(&self) -> X25519PublicKey {
        self.identity.encryption_key()
    }

    /// Re-key the route after an identity rotation.
    pub fn migrate(&mut self, new_identity: IdentityDoc) {
        self.client = new_identity.idurl.clone();
        self.identity = new_identity;
    }
}
