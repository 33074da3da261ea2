//! The service registry built at startup.
//!
//! Construction order matters: the identity cache feeds the gateway's
//! verification, the gateway carries every other service's traffic, and
//! the inbox chain is assembled once — identity exchange first, then the
//! relay router, then supplier storage. Everything is passed by
//! reference from here; no service reaches for a global.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use garner_backup::{BackupControl, BackupMatrix, SegmentTransport};
use garner_catalog::{index, CatalogFs};
use garner_crypto::ecies::{self, EciesCiphertext};
use garner_ecc::EccMap;
use garner_fleet::{FleetConfig, FleetController};
use garner_identity::{IdentityCache, IdentityDoc};
use garner_keyring::KeyRing;
use garner_packet::{Command, Packet, SignedPacket};
use garner_session::gateway::Gateway;
use garner_session::HandlerResult;
use garner_relay::{RelayRouter, RouterConfig};
use garner_types::{GlobalId, IdUrl};
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::events::EventBus;
use crate::segments::FleetSegmentTransport;
use crate::supplier::SupplierService;

/// Every long-lived service of one node.
pub struct NodeServices {
    pub config: NodeConfig,
    pub me: IdUrl,
    pub customer: GlobalId,
    pub ecc_map: EccMap,
    pub keyring: Arc<Mutex<KeyRing>>,
    pub cache: IdentityCache,
    pub gateway: Arc<Gateway>,
    pub catalog: Arc<Mutex<CatalogFs>>,
    pub matrix: Arc<Mutex<BackupMatrix>>,
    pub control: Arc<BackupControl>,
    pub fleet: Arc<Mutex<FleetController>>,
    pub segments: FleetSegmentTransport,
    pub supplier: Arc<SupplierService>,
    pub router: Option<Arc<RelayRouter>>,
    pub events: EventBus,
}

impl NodeServices {
    /// Assemble the node.
    pub fn build(config: NodeConfig, keyring: KeyRing, me: IdUrl) -> anyhow::Result<Self> {
        let ecc_map = EccMap::from_name(&config.backup.ecc_map)
            .map_err(|e| anyhow::anyhow!("bad ecc layout in config: {e}"))?;
        let customer = GlobalId::from_idurl(&me);

        let cache = IdentityCache::new();
        let gateway = Gateway::new(me.clone(), verify_with_cache(cache.clone()));

        // Identity exchange: any node may introduce itself; the document
        // is self-certifying and lands in the cache.
        install_identity_handler(&gateway, &cache, &me, &keyring);

        let desired = if config.fleet.desired_suppliers > 0 {
            config.fleet.desired_suppliers
        } else {
            ecc_map.total_count()
        };
        let fleet = Arc::new(Mutex::new(FleetController::new(
            me.clone(),
            FleetConfig {
                desired_suppliers: desired,
                fire_timeout: Duration::from_secs(config.fleet.fire_timeout_secs),
            },
        )));

        let catalog = Arc::new(Mutex::new(load_catalog(&config, &customer)));
        let matrix = Arc::new(Mutex::new(BackupMatrix::new()));
        let control = Arc::new(BackupControl::new());
        let events = EventBus::new();

        let signer = keyring.master_keypair().signing_key.clone();
        let segments = FleetSegmentTransport::new(
            gateway.clone(),
            me.clone(),
            signer.clone(),
            fleet.clone(),
            Duration::from_secs(config.network.response_timeout_secs),
        );

        let router = if config.relay.enabled {
            let router = RelayRouter::new(
                me.clone(),
                signer.clone(),
                keyring.master_encrypt_secret().clone(),
                gateway.clone(),
                cache.clone(),
                RouterConfig {
                    max_routes: config.relay.max_routes,
                },
            );
            router.install();
            let _watch = router.spawn_watch();
            Some(router)
        } else {
            None
        };

        let supplier = SupplierService::new(
            me.clone(),
            signer,
            gateway.clone(),
            supplied_dir(&config),
            config.storage.donated_bytes,
        );
        supplier.install();

        info!(me = %me, ecc = %ecc_map, suppliers = desired, "node services assembled");
        Ok(Self {
            config,
            me,
            customer,
            ecc_map,
            keyring: Arc::new(Mutex::new(keyring)),
            cache,
            gateway,
            catalog,
            matrix,
            control,
            fleet,
            segments,
            supplier,
            router,
            events,
        })
    }

    /// Serialize and encrypt the catalog index for supplier replication.
    pub fn seal_index(&self) -> anyhow::Result<(u64, Vec<u8>)> {
        let (revision, text) = {
            let catalog = lock(&self.catalog);
            (catalog.revision(), index::serialize(&catalog)?)
        };
        let reader = lock(&self.keyring).master_encrypt_public();
        let sealed = ecies::encrypt(&reader, text.as_bytes())
            .map_err(|e| anyhow::anyhow!("index seal failed: {e}"))?;
        Ok((revision, sealed.to_bytes()))
    }

    /// Decrypt a replica fetched from a supplier and merge it in.
    ///
    /// Returns whether the replica won (its revision was higher).
    pub fn merge_sealed_index(&self, sealed: &[u8]) -> anyhow::Result<bool> {
        let ciphertext = EciesCiphertext::from_bytes(sealed)
            .map_err(|e| anyhow::anyhow!("bad index replica: {e}"))?;
        let plain = {
            let keyring = lock(&self.keyring);
            ecies::decrypt(keyring.master_encrypt_secret(), &ciphertext)
                .map_err(|e| anyhow::anyhow!("index replica decrypt failed: {e}"))?
        };
        let text = String::from_utf8(plain)
            .map_err(|_| anyhow::anyhow!("index replica is not UTF-8"))?;
        let replica = index::deserialize(&text, &self.customer)?;
        let merged = lock(&self.catalog).merge_replica(replica)?;
        Ok(merged)
    }

    /// Persist the catalog index to its file in the data directory.
    pub fn save_catalog(&self) -> anyhow::Result<()> {
        let path = self.config.data_dir().join("index");
        index::save(&lock(&self.catalog), &path)?;
        Ok(())
    }

    /// Back up one catalog path end to end: run the producer, seal the
    /// version, persist the index, publish the events.
    pub async fn backup_path<R: tokio::io::AsyncRead + Unpin>(
        &self,
        path_id: &str,
        source: R,
    ) -> anyhow::Result<garner_types::BackupId> {
        use garner_types::events::Event;

        let task = garner_backup::Task {
            path_id: path_id.to_string(),
            key_id: self.customer.clone(),
        };
        self.events.emit(Event::TaskStarted {
            path_id: path_id.to_string(),
        });

        let result = garner_backup::control::run_task(
            &self.control,
            &task,
            source,
            self.me.clone(),
            &self.keyring,
            &self.catalog,
            &self.matrix,
            self.ecc_map.clone(),
            self.config.backup.block_size as usize,
            self.segments.clone(),
        )
        .await;

        match result {
            Ok(backup_id) => {
                self.save_catalog()?;
                self.events.emit(Event::VersionSealed {
                    backup_id: backup_id.to_string(),
                });
                self.events.emit(Event::JobDone {
                    backup_id: backup_id.to_string(),
                    result: "done".to_string(),
                });
                self.events.emit(Event::TaskFinished {
                    path_id: path_id.to_string(),
                    result: "done".to_string(),
                });
                Ok(backup_id)
            }
            Err(err) => {
                self.events.emit(Event::TaskFinished {
                    path_id: path_id.to_string(),
                    result: err.to_string(),
                });
                Err(err.into())
            }
        }
    }

    /// Restore one sealed version into `dest`; returns bytes written.
    pub async fn restore_version<W: tokio::io::AsyncWrite + Unpin>(
        &self,
        backup_id: &garner_types::BackupId,
        dest: W,
    ) -> anyhow::Result<u64> {
        let info = {
            let catalog = lock(&self.catalog);
            let item = catalog
                .item(&backup_id.path_id)
                .ok_or_else(|| anyhow::anyhow!("unknown path {}", backup_id.path_id))?;
            item.versions
                .get(backup_id.version.as_str())
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown version {}", backup_id.version))?
        };
        let key_id = {
            let catalog = lock(&self.catalog);
            let item = catalog
                .item(&backup_id.path_id)
                .ok_or_else(|| anyhow::anyhow!("unknown path {}", backup_id.path_id))?;
            GlobalId::parse(&item.key_id)
                .map_err(|e| anyhow::anyhow!("bad key id on entry: {e}"))?
        };
        let unwrap = lock(&self.keyring)
            .unwrap_for(&key_id)
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        let mut worker = garner_backup::RestoreWorker::new(
            backup_id.clone(),
            info.ecc_map.clone(),
            info.block_count,
            unwrap,
            self.segments.clone(),
        )
        .with_max_retries(self.config.backup.max_retries);
        if let Some(doc) = self.cache.lookup(&self.me) {
            if let Ok(key) = doc.verifying_key() {
                worker = worker.with_creator_key(key);
            }
        }
        let written = worker.run(dest).await?;
        Ok(written)
    }

    /// One liveness round over the fleet: ping every occupied slot, fold
    /// the outcomes into the controller, return its decisions.
    pub async fn ping_suppliers(&self) -> Vec<garner_fleet::FleetAction> {
        use garner_fleet::ConnectorState;
        use garner_types::events::Event;

        let occupied = {
            let fleet = lock(&self.fleet);
            fleet.occupied()
        };
        let now = std::time::Instant::now();
        let mut actions = Vec::new();
        for (slot, supplier) in occupied {
            let alive = self.segments.list(slot as u32).await.is_some();
            let state = if alive {
                ConnectorState::Connected
            } else {
                self.events.emit(Event::SupplierDisconnected {
                    supplier: supplier.clone(),
                    position: slot as u32,
                });
                ConnectorState::Disconnected
            };
            let mut fleet = lock(&self.fleet);
            actions.extend(fleet.on_state_change(&supplier, state, now));
        }
        actions.extend(lock(&self.fleet).tick(now));
        actions
    }
}

/// Verify inbound packets against cached identities; `Identity` packets
/// are self-certifying and pass through to their handler.
fn verify_with_cache(cache: IdentityCache) -> garner_session::gateway::VerifyFn {
    Arc::new(move |packet: &SignedPacket| {
        let inner = packet.packet();
        if inner.command == Command::Identity {
            return true;
        }
        match cache.lookup(&inner.creator_id) {
            Some(doc) => match doc.verifying_key() {
                Ok(key) => packet.verify(&key).is_ok(),
                Err(_) => false,
            },
            None => {
                warn!(creator = %inner.creator_id, "packet from unknown identity dropped");
                false
            }
        }
    })
}

/// Store introduced identities and acknowledge them.
fn install_identity_handler(
    gateway: &Arc<Gateway>,
    cache: &IdentityCache,
    me: &IdUrl,
    keyring: &KeyRing,
) {
    let cache = cache.clone();
    let me = me.clone();
    let signer = keyring.master_keypair().signing_key.clone();
    let gateway_out = gateway.clone();
    gateway.add_handler("identity-exchange", move |packet, ctx| {
        let inner = packet.packet();
        if inner.command != Command::Identity {
            return HandlerResult::NotHandled;
        }
        let Ok(text) = std::str::from_utf8(&inner.payload) else {
            return HandlerResult::Error("identity payload is not UTF-8".to_string());
        };
        match IdentityDoc::from_json(text) {
            Ok(doc) => {
                if let Err(err) = cache.store(doc) {
                    return HandlerResult::Error(err.to_string());
                }
                let ack = Packet::ack(inner, me.clone(), vec![]).sign(&signer);
                let _ = gateway_out.enqueue(&ctx.peer, &ack);
                HandlerResult::Consumed
            }
            Err(err) => HandlerResult::Error(err.to_string()),
        }
    });
}

fn load_catalog(config: &NodeConfig, customer: &GlobalId) -> CatalogFs {
    let path = config.data_dir().join("index");
    if path.exists() {
        match index::load(&path, customer) {
            Ok(catalog) => {
                info!(revision = catalog.revision(), "catalog index loaded");
                return catalog;
            }
            Err(err) => {
                warn!(error = %err, "catalog index unreadable, starting empty");
            }
        }
    }
    CatalogFs::new(customer.clone())
}

fn supplied_dir(config: &NodeConfig) -> PathBuf {
    config.data_dir().join("supplied")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use garner_crypto::ed25519::KeyPair;
    use garner_crypto::x25519::X25519StaticSecret;
    use garner_types::packet_id::unique_packet_id;

    use super::*;

    fn idurl(name: &str) -> IdUrl {
        IdUrl::parse(&format!("https://id.example.net/{name}.xml")).expect("idurl")
    }

    fn services(name: &str) -> NodeServices {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = NodeConfig::default();
        config.storage.data_dir = dir.path().to_string_lossy().to_string();
        // Leak the tempdir so the services outlive it for the test.
        std::mem::forget(dir);
        NodeServices::build(config, KeyRing::generate(), idurl(name)).expect("build")
    }

    #[tokio::test]
    async fn test_build_wires_defaults() {
        let node = services("alice");
        assert_eq!(node.ecc_map.name(), "ecc/4x4");
        assert!(node.router.is_some());
        let fleet = node.fleet.lock().expect("fleet");
        assert_eq!(fleet.suppliers().len(), 8);
    }

    #[tokio::test]
    async fn test_identity_exchange_populates_cache() {
        let node = services("alice");
        let queue = node.gateway.attach("memory", idurl("bob"), "mem://bob");

        let kp = KeyPair::generate();
        let enc = X25519StaticSecret::random();
        let doc = IdentityDoc::build(idurl("bob"), &kp, enc.public_key(), vec![], 1);
        let packet = Packet::outgoing(
            Command::Identity,
            unique_packet_id(),
            idurl("bob"),
            idurl("alice"),
            doc.to_json().expect("json").into_bytes(),
        )
        .sign(&kp.signing_key);

        node.gateway.handle_inbound("memory", &idurl("bob"), &packet.to_bytes());
        assert_eq!(node.cache.lookup(&idurl("bob")), Some(doc));

        let frame = queue.pop().await.expect("ack frame");
        let ack = SignedPacket::from_bytes(&frame.bytes).expect("parse");
        assert_eq!(ack.packet().command, Command::Ack);
    }

    #[tokio::test]
    async fn test_unknown_creator_dropped() {
        let node = services("alice");
        let kp = KeyPair::generate();
        // A Message from an identity the cache never saw is dropped, so
        // no handler errors and nothing reaches the supplier service.
        let packet = Packet::outgoing(
            Command::Message,
            unique_packet_id(),
            idurl("stranger"),
            idurl("alice"),
            b"hi".to_vec(),
        )
        .sign(&kp.signing_key);
        node.gateway
            .handle_inbound("memory", &idurl("stranger"), &packet.to_bytes());
    }

    #[tokio::test]
    async fn test_sealed_index_round_trip() {
        let node = services("alice");
        {
            let mut catalog = node.catalog.lock().expect("catalog");
            catalog.add_file("cat.bin").expect("add");
        }
        let (revision, sealed) = node.seal_index().expect("seal");
        assert!(revision > 0);

        // Merging our own replica back is a no-op (same revision).
        assert!(!node.merge_sealed_index(&sealed).expect("merge"));
    }
}
