//! Shared harness for the end-to-end scenarios.
//!
//! A [`TestNode`] is a fully assembled node (gateway, identity cache,
//! supplier storage, relay router, backup machinery) with its own data
//! directory. Nodes are wired together with the in-process memory
//! transport, so whole multi-node networks run inside one test.

use std::time::Duration;

use garner_crypto::ed25519::{SigningKey, VerifyingKey};
use garner_identity::IdentityDoc;
use garner_keyring::KeyRing;
use garner_node::{NodeConfig, NodeServices};
use garner_packet::service::{from_payload, to_payload, ServiceAck, ServiceRequest};
use garner_packet::{Command, Packet, SignedPacket};
use garner_session::gateway::SendOutcome;
use garner_session::memory::{self, MemoryLink};
use garner_types::packet_id::unique_packet_id;
use garner_types::{GlobalId, IdUrl};

/// Response timeout used across the scenarios.
pub const TIMEOUT: Duration = Duration::from_secs(2);

/// One fully assembled node under test.
pub struct TestNode {
    pub node: NodeServices,
    pub doc: IdentityDoc,
    _dir: tempfile::TempDir,
}

/// An identity URL in the shared test namespace.
pub fn idurl(name: &str) -> IdUrl {
    IdUrl::parse(&format!("https://id.example.net/{name}.xml")).expect("idurl")
}

/// Build a node named `name` with default configuration.
pub fn test_node(name: &str) -> TestNode {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = NodeConfig::default();
    config.storage.data_dir = dir.path().to_string_lossy().to_string();
    config.network.response_timeout_secs = TIMEOUT.as_secs();
    config.identity.idurl = idurl(name).to_string();

    let keyring = KeyRing::generate();
    let doc = IdentityDoc::build(
        idurl(name),
        keyring.master_keypair(),
        keyring.master_encrypt_public(),
        vec![format!("memory://{name}")],
        1,
    );

    let node = NodeServices::build(config, keyring, idurl(name)).expect("build node");
    node.cache.store(doc.clone()).expect("store own identity");
    TestNode {
        node,
        doc,
        _dir: dir,
    }
}

impl TestNode {
    /// This node's identity URL.
    pub fn idurl(&self) -> IdUrl {
        self.node.me.clone()
    }

    /// This node's customer address.
    pub fn customer(&self) -> GlobalId {
        self.node.customer.clone()
    }

    /// The master signing key.
    pub fn signer(&self) -> SigningKey {
        lock_keyring(self).master_keypair().signing_key.clone()
    }

    /// The master verifying key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.doc.verifying_key().expect("verifying key")
    }
}

/// Lock a node's keyring.
pub fn lock_keyring(node: &TestNode) -> std::sync::MutexGuard<'_, KeyRing> {
    match node.node.keyring.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Make two nodes know each other's identity documents.
pub fn introduce(a: &TestNode, b: &TestNode) {
    a.node.cache.store(b.doc.clone()).expect("store peer doc");
    b.node.cache.store(a.doc.clone()).expect("store peer doc");
}

/// Connect two nodes with the in-process transport.
pub fn connect(a: &TestNode, b: &TestNode) -> MemoryLink {
    memory::link(&a.node.gateway, a.idurl(), &b.node.gateway, b.idurl())
}

/// Ask a supplier for storage and, on acceptance, hire it into a slot.
pub async fn grant_and_hire(customer: &TestNode, supplier: &TestNode, slot: usize) {
    let request = ServiceRequest::supplier(
        customer.node.config.storage.needed_bytes,
        customer.node.ecc_map.name(),
    )
    .expect("request");
    let packet = Packet::outgoing(
        Command::RequestService,
        unique_packet_id(),
        customer.idurl(),
        supplier.idurl(),
        to_payload(&request).expect("payload"),
    )
    .sign(&customer.signer());

    match customer
        .node
        .gateway
        .send(&supplier.idurl(), &packet, TIMEOUT)
        .await
    {
        SendOutcome::Acked(response) => {
            let ack: ServiceAck = from_payload(&response.packet().payload).expect("ack body");
            assert!(ack.accepted, "supplier refused: {:?}", ack.reason);
        }
        other => panic_outcome("service request", &other),
    }

    let mut fleet = match customer.node.fleet.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    fleet.hire(slot, supplier.idurl()).expect("hire");
}

/// A deterministic, mildly incompressible source payload.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + i / 251) % 251) as u8)
        .collect()
}

/// Expect an `Acked` outcome and return the response.
pub fn expect_acked(what: &str, outcome: SendOutcome) -> SignedPacket {
    match outcome {
        SendOutcome::Acked(response) => response,
        other => panic_outcome(what, &other),
    }
}

fn panic_outcome(what: &str, outcome: &SendOutcome) -> ! {
    // Tests want the failing outcome in the assertion message.
    #[allow(clippy::panic)]
    {
        panic!("{what} did not complete: {outcome:?}")
    }
}
