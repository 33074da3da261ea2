//! The relay router.
//!
//! Packet handling is synchronous — one packet, one transition, sends go
//! out through the gateway queues — so the router plugs straight into the
//! inbox handler chain. Session loss and identity rotation arrive as
//! events on a watch task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use garner_crypto::ecies::{self, EciesCiphertext};
use garner_crypto::ed25519::SigningKey;
use garner_crypto::x25519::X25519StaticSecret;
use garner_identity::{IdentityCache, IdentityDoc};
use garner_packet::service::{
    from_payload, to_payload, RelayedEnvelope, ServiceAck, ServiceRequest, SERVICE_RELAY_ROUTER,
};
use garner_packet::{Command, Packet, SignedPacket};
use garner_session::gateway::Gateway;
use garner_session::{HandlerResult, PacketContext, SessionEvent};
use garner_types::events::Event;
use garner_types::packet_id::unique_packet_id;
use garner_types::IdUrl;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::route::RouteInfo;
use crate::{RelayError, Result};

/// Broadcast capacity for router events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Router tuning.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// Most routes the router will hold at once.
    pub max_routes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self { max_routes: 20 }
    }
}

/// One node's relay router service.
pub struct RelayRouter {
    me: IdUrl,
    signer: SigningKey,
    decrypt_key: X25519StaticSecret,
    gateway: Arc<Gateway>,
    cache: IdentityCache,
    config: RouterConfig,
    routes: Mutex<HashMap<IdUrl, RouteInfo>>,
    events_tx: broadcast::Sender<Event>,
}

impl RelayRouter {
    /// Create a router over the node's gateway and identity cache.
    pub fn new(
        me: IdUrl,
        signer: SigningKey,
        decrypt_key: X25519StaticSecret,
        gateway: Arc<Gateway>,
        cache: IdentityCache,
        config: RouterConfig,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            me,
            signer,
            decrypt_key,
            gateway,
            cache,
            config,
            routes: Mutex::new(HashMap::new()),
            events_tx,
        })
    }

    /// Register the router on the gateway's inbox chain.
    pub fn install(self: &Arc<Self>) {
        let router = self.clone();
        self.gateway
            .add_handler("relay-router", move |packet, ctx| {
                router.handle_packet(packet, ctx)
            });
    }

    /// Subscribe to route lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// Number of registered routes.
    pub fn route_count(&self) -> usize {
        self.lock_routes().len()
    }

    /// The route for a client, if registered.
    pub fn route(&self, client: &IdUrl) -> Option<RouteInfo> {
        self.lock_routes().get(client).cloned()
    }

    /// Inbox entry point; first-match consumes.
    pub fn handle_packet(&self, packet: &SignedPacket, ctx: &PacketContext) -> HandlerResult {
        let inner = packet.packet();
        match inner.command {
            Command::RequestService => self.try_registration(packet, ctx),
            Command::CancelService => self.try_cancellation(packet, ctx),
            Command::Relay => self.try_routed_outbound(packet, ctx),
            _ => self.try_routed_inbound(packet, ctx),
        }
    }

    /// Handle `RequestService(service_relay_router)`.
    fn try_registration(&self, packet: &SignedPacket, ctx: &PacketContext) -> HandlerResult {
        let inner = packet.packet();
        let Ok(request) = from_payload::<ServiceRequest>(&inner.payload) else {
            return HandlerResult::NotHandled;
        };
        if request.service != SERVICE_RELAY_ROUTER {
            return HandlerResult::NotHandled;
        }

        match self.process_registration(packet, &request, ctx) {
            Ok(()) => {
                self.answer(inner, ctx, &ServiceAck::accepted());
                HandlerResult::Consumed
            }
            Err(RelayError::CapacityReached) => {
                self.answer(inner, ctx, &ServiceAck::rejected("capacity"));
                HandlerResult::Consumed
            }
            Err(err) => {
                self.answer(inner, ctx, &ServiceAck::rejected(&err.to_string()));
                HandlerResult::Error(err.to_string())
            }
        }
    }

    fn process_registration(
        &self,
        packet: &SignedPacket,
        request: &ServiceRequest,
        ctx: &PacketContext,
    ) -> Result<()> {
        let inner = packet.packet();
        if inner.creator_id != inner.owner_id {
            return Err(RelayError::BadRequest(
                "creator and owner must match".to_string(),
            ));
        }
        let params = request
            .relay_params()
            .map_err(|e| RelayError::BadRequest(e.to_string()))?;
        let doc = IdentityDoc::from_json(&params.identity)
            .map_err(|e| RelayError::BadRequest(e.to_string()))?;
        if doc.idurl != inner.creator_id {
            return Err(RelayError::BadRequest(
                "identity document does not match the requester".to_string(),
            ));
        }

        let mut routes = self.lock_routes();
        let already = routes.contains_key(&doc.idurl);
        if !already && routes.len() >= self.config.max_routes {
            return Err(RelayError::CapacityReached);
        }

        let last_address = self.gateway.peer_address(&ctx.peer);
        let client = doc.idurl.clone();
        routes.insert(client.clone(), RouteInfo::new(doc.clone(), last_address));
        drop(routes);

        // Shadow the client's identity so the world reaches it through us.
        self.cache.install_override(client.clone(), doc);
        info!(client = %client, refreshed = already, "route registered");
        self.emit(Event::RouteRegistered { client });
        Ok(())
    }

    /// Handle `CancelService` from a registered client.
    fn try_cancellation(&self, packet: &SignedPacket, ctx: &PacketContext) -> HandlerResult {
        let inner = packet.packet();
        if !self.lock_routes().contains_key(&inner.creator_id) {
            return HandlerResult::NotHandled;
        }
        self.unregister(&inner.creator_id.clone());
        self.answer(inner, ctx, &ServiceAck::accepted());
        HandlerResult::Consumed
    }

    /// Handle a `Relay` envelope from a registered client (outbound leg).
    fn try_routed_outbound(&self, packet: &SignedPacket, _ctx: &PacketContext) -> HandlerResult {
        let inner = packet.packet();
        if !self.lock_routes().contains_key(&inner.creator_id) {
            return HandlerResult::NotHandled;
        }
        match self.forward_outbound(inner) {
            Ok(()) => HandlerResult::Consumed,
            Err(err) => HandlerResult::Error(err.to_string()),
        }
    }

    fn forward_outbound(&self, inner: &Packet) -> Result<()> {
        let ciphertext = EciesCiphertext::from_bytes(&inner.payload)
            .map_err(|e| RelayError::BadEnvelope(e.to_string()))?;
        let plain = ecies::decrypt(&self.decrypt_key, &ciphertext)
            .map_err(|e| RelayError::BadEnvelope(e.to_string()))?;
        let envelope: RelayedEnvelope = serde_json::from_slice(&plain)
            .map_err(|e| RelayError::BadEnvelope(e.to_string()))?;
        let relayed_bytes = envelope
            .packet_bytes()
            .map_err(|e| RelayError::BadEnvelope(e.to_string()))?;
        let relayed = SignedPacket::from_bytes(&relayed_bytes)
            .map_err(|e| RelayError::BadEnvelope(e.to_string()))?;

        self.verify_known(&relayed)?;

        if envelope.to == self.me {
            // Addressed to the router itself: back into our own inbox.
            self.gateway
                .handle_inbound("relay", &envelope.from, &relayed_bytes);
            return Ok(());
        }
        if self.lock_routes().contains_key(&envelope.to) {
            // Client-to-client through the same router.
            return self.wrap_and_forward(&envelope.to, &relayed_bytes, envelope.from);
        }
        // Outward to the world; no ack is expected on the router side.
        debug!(to = %envelope.to, wide = envelope.wide, "relaying outbound");
        self.gateway
            .enqueue(&envelope.to, &relayed)
            .map_err(|e| RelayError::Forward(e.to_string()))
    }

    /// Correlate a plain packet with a registered client (inbound leg).
    fn try_routed_inbound(&self, packet: &SignedPacket, ctx: &PacketContext) -> HandlerResult {
        let inner = packet.packet();
        let routes = self.lock_routes();
        // The next hop wins; creator beats owner for response correlation.
        let client = [&inner.remote_id, &inner.creator_id, &inner.owner_id]
            .into_iter()
            .find(|candidate| **candidate != ctx.peer && routes.contains_key(*candidate))
            .cloned();
        drop(routes);

        let Some(client) = client else {
            return HandlerResult::NotHandled;
        };
        match self.wrap_and_forward(&client, &packet.to_bytes(), inner.creator_id.clone()) {
            Ok(()) => HandlerResult::Consumed,
            Err(err) => HandlerResult::Error(err.to_string()),
        }
    }

    /// Encrypt a packet to a client and send it down the client's session.
    fn wrap_and_forward(&self, client: &IdUrl, packet_bytes: &[u8], from: IdUrl) -> Result<()> {
        let route = self
            .route(client)
            .ok_or_else(|| RelayError::NoRoute(client.to_string()))?;

        let envelope = RelayedEnvelope::new(from, client.clone(), false, packet_bytes);
        let plain =
            to_payload(&envelope).map_err(|e| RelayError::BadEnvelope(e.to_string()))?;
        let sealed = ecies::encrypt(&route.encryption_key(), &plain)
            .map_err(|e| RelayError::BadEnvelope(e.to_string()))?
            .to_bytes();

        let relay = Packet::outgoing(
            Command::Relay,
            unique_packet_id(),
            self.me.clone(),
            client.clone(),
            sealed,
        )
        .sign(&self.signer);

        debug!(client = %client, "relaying inbound");
        self.gateway.enqueue(client, &relay).map_err(|e| {
            // The active session is gone; the route's last known address
            // and the client's contacts are what reconnection would use.
            warn!(client = %client, error = %e, "relay forward failed");
            RelayError::Forward(e.to_string())
        })
    }

    /// Verify an unwrapped packet against its creator, when known.
    ///
    /// An `Identity` packet is self-certifying (its payload carries the
    /// document); anything else from an unknown creator is dropped.
    fn verify_known(&self, packet: &SignedPacket) -> Result<()> {
        let creator = &packet.packet().creator_id;
        match self.cache.lookup(creator) {
            Some(doc) => {
                let key = doc
                    .verifying_key()
                    .map_err(|e| RelayError::BadEnvelope(e.to_string()))?;
                packet
                    .verify(&key)
                    .map_err(|_| RelayError::BadEnvelope("inner signature invalid".to_string()))
            }
            None if packet.packet().command == Command::Identity => Ok(()),
            None => Err(RelayError::BadEnvelope(format!(
                "unknown inner creator {creator}"
            ))),
        }
    }

    /// Drop a client's route and its identity override.
    pub fn unregister(&self, client: &IdUrl) {
        let removed = self.lock_routes().remove(client).is_some();
        if removed {
            self.cache.stop_override(client);
            info!(client = %client, "route removed");
            self.emit(Event::RouteRemoved {
                client: client.clone(),
            });
        }
    }

    /// A client's session dropped: the route goes with it.
    pub fn on_session_disconnected(&self, peer: &IdUrl) {
        if self.lock_routes().contains_key(peer) {
            debug!(client = %peer, "routed session disconnected");
            self.unregister(peer);
        }
    }

    /// The cache saw a client rotate: re-key the route, reinstall the
    /// override under the new URL.
    pub fn on_rotation(&self, old: &IdUrl, new: &IdUrl) {
        let mut routes = self.lock_routes();
        let Some(mut route) = routes.remove(old) else {
            return;
        };
        // Keep the router-contact snapshot until the client re-registers
        // under its new URL with a freshly signed document.
        let snapshot = self.cache.lookup(new).filter(|doc| {
            doc.fingerprint() == route.identity.fingerprint()
                && doc.contacts == route.identity.contacts
        });
        if let Some(doc) = snapshot {
            route.migrate(doc);
        } else {
            route.client = new.clone();
        }
        routes.insert(new.clone(), route.clone());
        drop(routes);

        self.cache.stop_override(old);
        self.cache.install_override(new.clone(), route.identity);
        info!(old = %old, new = %new, "route migrated");
        self.emit(Event::RouteMigrated {
            old: old.clone(),
            new: new.clone(),
        });
    }

    /// Watch session and rotation events until the router is dropped.
    pub fn spawn_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let router = self.clone();
        let mut sessions = router.gateway.subscribe_events();
        let mut rotations = router.cache.subscribe_rotations();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = sessions.recv() => match event {
                        Ok(SessionEvent::Disconnected { peer, .. }) => {
                            router.on_session_disconnected(&peer);
                        }
                        Ok(SessionEvent::Connected { .. }) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    event = rotations.recv() => match event {
                        Ok(rotation) => router.on_rotation(&rotation.old, &rotation.new),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn answer(&self, request: &Packet, ctx: &PacketContext, ack: &ServiceAck) {
        let Ok(payload) = to_payload(ack) else {
            return;
        };
        let response = Packet::ack(request, self.me.clone(), payload).sign(&self.signer);
        if let Err(err) = self.gateway.enqueue(&ctx.peer, &response) {
            warn!(peer = %ctx.peer, error = %err, "service answer undeliverable");
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.events_tx.send(event);
    }

    fn lock_routes(&self) -> MutexGuard<'_, HashMap<IdUrl, RouteInfo>> {
        match self.routes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use garner_crypto::ed25519::KeyPair;

    use super::*;

    fn idurl(name: &str) -> IdUrl {
        IdUrl::parse(&format!("https://id.example.net/{name}.xml")).expect("idurl")
    }

    struct Client {
        idurl: IdUrl,
        keypair: KeyPair,
        encrypt: X25519StaticSecret,
        doc: IdentityDoc,
    }

    fn client(name: &str, router_contact: &str) -> Client {
        let keypair = KeyPair::generate();
        let encrypt = X25519StaticSecret::random();
        let doc = IdentityDoc::build(
            idurl(name),
            &keypair,
            encrypt.public_key(),
            vec![router_contact.to_string()],
            1,
        );
        Client {
            idurl: idurl(name),
            keypair,
            encrypt,
            doc,
        }
    }

    struct Fixture {
        router: Arc<RelayRouter>,
        gateway: Arc<Gateway>,
        cache: IdentityCache,
    }

    fn fixture(max_routes: usize) -> Fixture {
        let cache = IdentityCache::new();
        let gateway = Gateway::new(idurl("router"), Arc::new(|_| true));
        let router = RelayRouter::new(
            idurl("router"),
            KeyPair::generate().signing_key,
            X25519StaticSecret::random(),
            gateway.clone(),
            cache.clone(),
            RouterConfig { max_routes },
        );
        Fixture {
            router,
            gateway,
            cache,
        }
    }

    fn registration_packet(client: &Client) -> SignedPacket {
        let request = ServiceRequest::relay_router(client.doc.to_json().expect("json"))
            .expect("request");
        Packet::outgoing(
            Command::RequestService,
            unique_packet_id(),
            client.idurl.clone(),
            idurl("router"),
            to_payload(&request).expect("payload"),
        )
        .sign(&client.keypair.signing_key)
    }

    fn ctx(peer: &IdUrl) -> PacketContext {
        PacketContext {
            proto: "memory".to_string(),
            peer: peer.clone(),
        }
    }

    fn register(fx: &Fixture, client: &Client) {
        // Attach a session so the ack has somewhere to go.
        fx.gateway
            .attach("memory", client.idurl.clone(), "mem://client");
        let result = fx
            .router
            .handle_packet(&registration_packet(client), &ctx(&client.idurl));
        assert_eq!(result, HandlerResult::Consumed);
    }

    #[tokio::test]
    async fn test_registration_installs_route_and_override() {
        let fx = fixture(4);
        let a = client("a-old", "relay://router");
        let queue = fx.gateway.attach("memory", a.idurl.clone(), "mem://a");

        let result = fx
            .router
            .handle_packet(&registration_packet(&a), &ctx(&a.idurl));
        assert_eq!(result, HandlerResult::Consumed);
        assert_eq!(fx.router.route_count(), 1);
        assert!(fx.cache.has_override(&a.idurl));

        let frame = queue.pop().await.expect("ack frame");
        let ack = SignedPacket::from_bytes(&frame.bytes).expect("parse");
        assert_eq!(ack.packet().command, Command::Ack);
        let body: ServiceAck = from_payload(&ack.packet().payload).expect("ack body");
        assert!(body.accepted);
    }

    #[tokio::test]
    async fn test_capacity_rejected_without_state_change() {
        let fx = fixture(1);
        let a = client("a", "relay://router");
        let b = client("b", "relay://router");
        register(&fx, &a);

        let queue = fx.gateway.attach("memory", b.idurl.clone(), "mem://b");
        let result = fx
            .router
            .handle_packet(&registration_packet(&b), &ctx(&b.idurl));
        assert_eq!(result, HandlerResult::Consumed);
        assert_eq!(fx.router.route_count(), 1);
        assert!(!fx.cache.has_override(&b.idurl));

        let frame = queue.pop().await.expect("ack frame");
        let ack = SignedPacket::from_bytes(&frame.bytes).expect("parse");
        let body: ServiceAck = from_payload(&ack.packet().payload).expect("ack body");
        assert!(!body.accepted);
        assert_eq!(body.reason.as_deref(), Some("capacity"));
    }

    #[tokio::test]
    async fn test_mismatched_identity_rejected() {
        let fx = fixture(4);
        let a = client("a", "relay://router");
        let mallory = client("mallory", "relay://router");
        fx.gateway.attach("memory", mallory.idurl.clone(), "mem://m");

        // Mallory sends a request carrying a's identity document.
        let request =
            ServiceRequest::relay_router(a.doc.to_json().expect("json")).expect("request");
        let packet = Packet::outgoing(
            Command::RequestService,
            unique_packet_id(),
            mallory.idurl.clone(),
            idurl("router"),
            to_payload(&request).expect("payload"),
        )
        .sign(&mallory.keypair.signing_key);

        let result = fx.router.handle_packet(&packet, &ctx(&mallory.idurl));
        assert!(matches!(result, HandlerResult::Error(_)));
        assert_eq!(fx.router.route_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_service_removes_route() {
        let fx = fixture(4);
        let a = client("a", "relay://router");
        register(&fx, &a);
        let mut events = fx.router.subscribe_events();

        let cancel = Packet::outgoing(
            Command::CancelService,
            unique_packet_id(),
            a.idurl.clone(),
            idurl("router"),
            vec![],
        )
        .sign(&a.keypair.signing_key);
        let result = fx.router.handle_packet(&cancel, &ctx(&a.idurl));
        assert_eq!(result, HandlerResult::Consumed);
        assert_eq!(fx.router.route_count(), 0);
        assert!(!fx.cache.has_override(&a.idurl));
        assert_eq!(
            events.try_recv().expect("event"),
            Event::RouteRemoved {
                client: a.idurl.clone()
            }
        );
    }

    #[tokio::test]
    async fn test_routed_inbound_wraps_for_client() {
        let fx = fixture(4);
        let a = client("a", "relay://router");
        register(&fx, &a);
        let queue = fx.gateway.attach("memory", a.idurl.clone(), "mem://a");

        // An outside node sends a Message whose next hop is the client.
        let b = client("b", "unused");
        fx.cache.store(b.doc.clone()).expect("store b");
        let message = Packet::outgoing(
            Command::Message,
            "m1",
            b.idurl.clone(),
            a.idurl.clone(),
            b"hello through the router".to_vec(),
        )
        .sign(&b.keypair.signing_key);

        let result = fx.router.handle_packet(&message, &ctx(&b.idurl));
        assert_eq!(result, HandlerResult::Consumed);

        let frame = queue.pop().await.expect("relay frame");
        let relay = SignedPacket::from_bytes(&frame.bytes).expect("parse");
        assert_eq!(relay.packet().command, Command::Relay);

        // The client unwraps with its own key and finds the message.
        let ciphertext =
            EciesCiphertext::from_bytes(&relay.packet().payload).expect("ciphertext");
        let plain = ecies::decrypt(&a.encrypt, &ciphertext).expect("decrypt");
        let envelope: RelayedEnvelope = serde_json::from_slice(&plain).expect("envelope");
        assert_eq!(envelope.to, a.idurl);
        assert_eq!(envelope.from, b.idurl);
        let inner =
            SignedPacket::from_bytes(&envelope.packet_bytes().expect("bytes")).expect("inner");
        assert_eq!(inner.packet().packet_id, "m1");
        assert_eq!(inner.packet().payload, b"hello through the router");
    }

    #[tokio::test]
    async fn test_packet_from_client_itself_not_reflected() {
        let fx = fixture(4);
        let a = client("a", "relay://router");
        register(&fx, &a);

        // A plain packet arriving on the client's own session must not be
        // wrapped back at the client.
        let ping = Packet::outgoing(
            Command::ListFiles,
            unique_packet_id(),
            a.idurl.clone(),
            idurl("router"),
            vec![],
        )
        .sign(&a.keypair.signing_key);
        let result = fx.router.handle_packet(&ping, &ctx(&a.idurl));
        assert_eq!(result, HandlerResult::NotHandled);
    }

    #[tokio::test]
    async fn test_routed_outbound_forwards_inner_packet() {
        let fx = fixture(4);
        let a = client("a", "relay://router");
        register(&fx, &a);
        fx.cache.store(a.doc.clone()).expect("store a");

        // The outside world is connected to the router.
        let c = idurl("c");
        let c_queue = fx.gateway.attach("memory", c.clone(), "mem://c");

        // The client wraps a signed Message for c in a Relay envelope.
        let message = Packet::outgoing(
            Command::Message,
            "m2",
            a.idurl.clone(),
            c.clone(),
            b"outbound".to_vec(),
        )
        .sign(&a.keypair.signing_key);
        let envelope =
            RelayedEnvelope::new(a.idurl.clone(), c.clone(), false, &message.to_bytes());
        let plain = to_payload(&envelope).expect("payload");
        let router_pk = fx.router.decrypt_key.public_key();
        let sealed = ecies::encrypt(&router_pk, &plain).expect("seal").to_bytes();

        let relay = Packet::outgoing(
            Command::Relay,
            unique_packet_id(),
            a.idurl.clone(),
            idurl("router"),
            sealed,
        )
        .sign(&a.keypair.signing_key);

        let result = fx.router.handle_packet(&relay, &ctx(&a.idurl));
        assert_eq!(result, HandlerResult::Consumed);

        let frame = c_queue.pop().await.expect("forwarded frame");
        let forwarded = SignedPacket::from_bytes(&frame.bytes).expect("parse");
        assert_eq!(forwarded.packet().packet_id, "m2");
        assert_eq!(forwarded.packet().creator_id, a.idurl);
        assert_eq!(forwarded.packet().payload, b"outbound");
    }

    #[tokio::test]
    async fn test_session_disconnect_drops_route() {
        let fx = fixture(4);
        let a = client("a", "relay://router");
        register(&fx, &a);

        fx.router.on_session_disconnected(&a.idurl);
        assert_eq!(fx.router.route_count(), 0);
        assert!(!fx.cache.has_override(&a.idurl));
    }

    #[tokio::test]
    async fn test_rotation_migrates_route_exactly() {
        let fx = fixture(4);
        let a = client("a-old", "relay://router");
        register(&fx, &a);
        let mut events = fx.router.subscribe_events();

        let new_url = idurl("a-new");
        fx.router.on_rotation(&a.idurl, &new_url);

        assert_eq!(fx.router.route_count(), 1);
        assert!(fx.router.route(&a.idurl).is_none());
        let migrated = fx.router.route(&new_url).expect("migrated route");
        assert_eq!(migrated.client, new_url);
        // The router-contact snapshot survives the migration.
        assert_eq!(migrated.identity.contacts, vec!["relay://router".to_string()]);

        assert!(!fx.cache.has_override(&a.idurl));
        assert!(fx.cache.has_override(&new_url));
        assert_eq!(
            events.try_recv().expect("event"),
            Event::RouteMigrated {
                old: a.idurl.clone(),
                new: new_url.clone(),
            }
        );

        // A packet for the new URL is wrapped and forwarded.
        let queue = fx.gateway.attach("memory", new_url.clone(), "mem://a-new");
        let b = client("b", "unused");
        fx.cache.store(b.doc.clone()).expect("store b");
        let message = Packet::outgoing(
            Command::Message,
            "m3",
            b.idurl.clone(),
            new_url.clone(),
            b"after rotation".to_vec(),
        )
        .sign(&b.keypair.signing_key);
        assert_eq!(
            fx.router.handle_packet(&message, &ctx(&b.idurl)),
            HandlerResult::Consumed
        );
        let frame = queue.pop().await.expect("relay frame");
        let relay = SignedPacket::from_bytes(&frame.bytes).expect("parse");
        assert_eq!(relay.packet().command, Command::Relay);
        assert_eq!(relay.packet().remote_id, new_url);
    }
}
