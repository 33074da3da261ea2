//! # garner-dht
//!
//! The distributed hash table as the storage core consumes it: a
//! best-effort key-value service with random node lookup. The real
//! Kademlia machinery lives behind the [`DhtService`] trait; this crate
//! ships the trait, the named validation rules and an in-process
//! implementation for tests and single-machine wiring.
//!
//! Keys are 256-bit; node identifiers are `BLAKE3::hash(idurl)`, so the
//! same URL always lands on the same point of the key space.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use garner_types::IdUrl;
use tracing::debug;

/// A 256-bit DHT key.
pub type DhtKey = [u8; 32];

/// Accept any value (the caller validates).
pub const RULE_SKIP_VALIDATION: &str = "skip_validation";

/// Value must be a customer→suppliers relation document.
pub const RULE_SUPPLIER_RELATIONS: &str = "supplier_relations";

/// Error types for DHT operations.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// The service is unreachable right now (transient; DHT is best-effort).
    #[error("dht unavailable: {0}")]
    Unavailable(String),

    /// The value failed the named validation rule.
    #[error("dht validation failed ({rule}): {reason}")]
    Validation { rule: String, reason: String },

    /// The rule name is not registered.
    #[error("unknown dht rule: {0}")]
    UnknownRule(String),
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;

/// The key-value and node-lookup surface the storage core consumes.
pub trait DhtService: Send + Sync {
    /// A uniformly random key, for random node walks.
    fn random_key(&self) -> DhtKey;

    /// The node whose ID is closest (XOR metric) to `key`, if any.
    fn find_node(
        &self,
        key: &DhtKey,
    ) -> impl std::future::Future<Output = Result<Option<IdUrl>>> + Send;

    /// Read a record, validating it under the named rule.
    fn get(
        &self,
        key: &DhtKey,
        rules: &str,
    ) -> impl std::future::Future<Output = Result<Option<serde_json::Value>>> + Send;

    /// Write a record with an expiry, validating it under the named rule.
    fn set(
        &self,
        key: DhtKey,
        value: serde_json::Value,
        expire: Duration,
        rules: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Derive a node's DHT identifier from its identity URL.
pub fn node_key(idurl: &IdUrl) -> DhtKey {
    garner_crypto::blake3::hash(idurl.as_str().as_bytes())
}

/// Validate a value under a named rule.
fn validate(rules: &str, value: &serde_json::Value) -> Result<()> {
    match rules {
        RULE_SKIP_VALIDATION => Ok(()),
        RULE_SUPPLIER_RELATIONS => {
            let ok = value.get("customer").is_some_and(|c| c.is_string())
                && value.get("suppliers").is_some_and(|s| s.is_array());
            if ok {
                Ok(())
            } else {
                Err(DhtError::Validation {
                    rule: rules.to_string(),
                    reason: "expected {customer, suppliers[]}".to_string(),
                })
            }
        }
        other => Err(DhtError::UnknownRule(other.to_string())),
    }
}

struct Record {
    value: serde_json::Value,
    expires_at: Instant,
}

/// An in-process DHT for tests and single-machine wiring.
#[derive(Default)]
pub struct MemoryDht {
    nodes: Mutex<Vec<(DhtKey, IdUrl)>>,
    records: Mutex<HashMap<DhtKey, Record>>,
}

impl MemoryDht {
    /// Create an empty DHT.
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce a node into the key space; returns its node key.
    pub fn register_node(&self, idurl: IdUrl) -> DhtKey {
        let key = node_key(&idurl);
        if let Ok(mut nodes) = self.nodes.lock() {
            if !nodes.iter().any(|(_, url)| *url == idurl) {
                nodes.push((key, idurl));
            }
        }
        key
    }

    /// Remove a node from the key space.
    pub fn unregister_node(&self, idurl: &IdUrl) {
        if let Ok(mut nodes) = self.nodes.lock() {
            nodes.retain(|(_, url)| url != idurl);
        }
    }
}

impl DhtService for MemoryDht {
    fn random_key(&self) -> DhtKey {
        let mut key = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut key);
        key
    }

    async fn find_node(&self, key: &DhtKey) -> Result<Option<IdUrl>> {
        let nodes = self
            .nodes
            .lock()
            .map_err(|_| DhtError::Unavailable("poisoned".to_string()))?;
        let closest = nodes
            .iter()
            .min_by_key(|(node_key, _)| xor_distance(node_key, key))
            .map(|(_, idurl)| idurl.clone());
        Ok(closest)
    }

    async fn get(&self, key: &DhtKey, rules: &str) -> Result<Option<serde_json::Value>> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| DhtError::Unavailable("poisoned".to_string()))?;
        match records.get(key) {
            Some(record) if record.expires_at > Instant::now() => {
                let value = record.value.clone();
                drop(records);
                validate(rules, &value)?;
                Ok(Some(value))
            }
            Some(_) => {
                records.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: DhtKey,
        value: serde_json::Value,
        expire: Duration,
        rules: &str,
    ) -> Result<()> {
        validate(rules, &value)?;
        debug!(key = %hex_prefix(&key), "dht record stored");
        self.records
            .lock()
            .map_err(|_| DhtError::Unavailable("poisoned".to_string()))?
            .insert(
                key,
                Record {
                    value,
                    expires_at: Instant::now() + expire,
                },
            );
        Ok(())
    }
}

/// XOR distance between two keys, big-endian.
fn xor_distance(a: &DhtKey, b: &DhtKey) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

fn hex_prefix(key: &DhtKey) -> String {
    key[..4].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idurl(name: &str) -> IdUrl {
        IdUrl::parse(&format!("https://id.example.net/{name}.xml")).expect("idurl")
    }

    #[test]
    fn test_node_key_is_stable() {
        assert_eq!(node_key(&idurl("alice")), node_key(&idurl("alice")));
        assert_ne!(node_key(&idurl("alice")), node_key(&idurl("bob")));
    }

    #[tokio::test]
    async fn test_find_node_returns_closest() {
        let dht = MemoryDht::new();
        let alice_key = dht.register_node(idurl("alice"));
        dht.register_node(idurl("bob"));

        // Looking up alice's exact key must return alice.
        let found = dht.find_node(&alice_key).await.expect("find");
        assert_eq!(found, Some(idurl("alice")));
    }

    #[tokio::test]
    async fn test_find_node_empty_space() {
        let dht = MemoryDht::new();
        let key = dht.random_key();
        assert_eq!(dht.find_node(&key).await.expect("find"), None);
    }

    #[tokio::test]
    async fn test_unregister_node() {
        let dht = MemoryDht::new();
        let key = dht.register_node(idurl("alice"));
        dht.unregister_node(&idurl("alice"));
        assert_eq!(dht.find_node(&key).await.expect("find"), None);
    }

    #[tokio::test]
    async fn test_set_get_round_trip() {
        let dht = MemoryDht::new();
        let key = dht.random_key();
        let value = serde_json::json!({"hello": "world"});
        dht.set(key, value.clone(), Duration::from_secs(60), RULE_SKIP_VALIDATION)
            .await
            .expect("set");
        let got = dht.get(&key, RULE_SKIP_VALIDATION).await.expect("get");
        assert_eq!(got, Some(value));
    }

    #[tokio::test]
    async fn test_expired_record_gone() {
        let dht = MemoryDht::new();
        let key = dht.random_key();
        dht.set(
            key,
            serde_json::json!(1),
            Duration::from_millis(0),
            RULE_SKIP_VALIDATION,
        )
        .await
        .expect("set");
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(dht.get(&key, RULE_SKIP_VALIDATION).await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_supplier_relations_rule() {
        let dht = MemoryDht::new();
        let key = dht.random_key();

        let bad = serde_json::json!({"customer": 1});
        assert!(dht
            .set(key, bad, Duration::from_secs(1), RULE_SUPPLIER_RELATIONS)
            .await
            .is_err());

        let good = serde_json::json!({
            "customer": "master$alice@id.example.net",
            "suppliers": ["https://id.example.net/s1.xml"],
        });
        dht.set(key, good, Duration::from_secs(1), RULE_SUPPLIER_RELATIONS)
            .await
            .expect("set");
    }

    #[tokio::test]
    async fn test_unknown_rule_rejected() {
        let dht = MemoryDht::new();
        let key = dht.random_key();
        assert!(matches!(
            dht.set(key, serde_json::json!(1), Duration::from_secs(1), "made_up")
                .await,
            Err(DhtError::UnknownRule(_))
        ));
    }

    #[test]
    fn test_random_keys_differ() {
        let dht = MemoryDht::new();
        assert_ne!(dht.random_key(), dht.random_key());
    }
}
