//! The gateway: session pool, send/ack correlation, inbound dispatch.
//!
//! One gateway per node. Transports attach sessions keyed by
//! `(proto, peer)`; each session is a bounded [`SendQueue`] the transport
//! drains. Outbound packets are matched to their responses by packet ID:
//! `Ack`/`Fail` always correlate, and `Data`/`Files` correlate when a
//! request with that packet ID is waiting (a `Retrieve` is answered by
//! `Data`, a `ListFiles` by `Files`).
//!
//! Delivery is at most once per packet; there is no ordering across
//! packets. Signature verification is injected as a closure so this crate
//! stays independent of the identity cache.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use garner_packet::{Command, SignedPacket};
use garner_types::IdUrl;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::inbox::{InboxChain, PacketContext};
use crate::queue::{Pushed, QueuedFrame, SendQueue};
use crate::{HandlerResult, Result, SessionError};

/// Default per-session send queue capacity, frames.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How many recently seen packet IDs the replay filter remembers.
const SEEN_WINDOW: usize = 4096;

/// Broadcast capacity for session events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of a tracked send.
#[derive(Debug)]
pub enum SendOutcome {
    /// A response arrived: the `Ack`, or the answering `Data`/`Files`.
    Acked(SignedPacket),
    /// The peer failed the request, or it never left the queue.
    Failed(String),
    /// No response within the timeout.
    Timeout,
}

/// Session lifecycle notifications.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// A transport attached a session.
    Connected { proto: String, peer: IdUrl },
    /// A session was detached (connection loss or replacement).
    Disconnected { proto: String, peer: IdUrl },
}

/// Verifies an inbound packet's signature against its creator's identity.
pub type VerifyFn = Arc<dyn Fn(&SignedPacket) -> bool + Send + Sync>;

struct SessionEntry {
    queue: Arc<SendQueue>,
    remote_addr: String,
}

struct SeenIds {
    set: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenIds {
    fn insert(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        self.set.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > SEEN_WINDOW {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }
}

/// The session multiplexer of one node.
pub struct Gateway {
    local: IdUrl,
    verify: VerifyFn,
    queue_capacity: usize,
    sessions: Mutex<HashMap<(String, IdUrl), SessionEntry>>,
    pending: Mutex<HashMap<String, oneshot::Sender<SendOutcome>>>,
    chain: Mutex<InboxChain>,
    seen: Mutex<SeenIds>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Gateway {
    /// Create a gateway for the local node.
    pub fn new(local: IdUrl, verify: VerifyFn) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            local,
            verify,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sessions: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            chain: Mutex::new(InboxChain::new()),
            seen: Mutex::new(SeenIds {
                set: HashSet::new(),
                order: VecDeque::new(),
            }),
            events_tx,
        })
    }

    /// The local node's identity URL.
    pub fn local(&self) -> &IdUrl {
        &self.local
    }

    /// Append a named handler to the inbox chain.
    pub fn add_handler<F>(&self, name: &str, handler: F)
    where
        F: Fn(&SignedPacket, &PacketContext) -> HandlerResult + Send + Sync + 'static,
    {
        lock(&self.chain).add(name, handler);
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Attach a session for a transport; returns the queue to drain.
    ///
    /// A session already attached under the same key is replaced and its
    /// queue closed.
    pub fn attach(&self, proto: &str, peer: IdUrl, remote_addr: &str) -> Arc<SendQueue> {
        let queue = Arc::new(SendQueue::new(self.queue_capacity));
        let key = (proto.to_string(), peer.clone());
        let replaced = lock(&self.sessions).insert(
            key,
            SessionEntry {
                queue: queue.clone(),
                remote_addr: remote_addr.to_string(),
            },
        );
        if let Some(old) = replaced {
            old.queue.close();
        }
        debug!(proto = %proto, peer = %peer, addr = %remote_addr, "session attached");
        let _ = self.events_tx.send(SessionEvent::Connected {
            proto: proto.to_string(),
            peer,
        });
        queue
    }

    /// Detach a session; its queue closes and an event is broadcast.
    pub fn detach(&self, proto: &str, peer: &IdUrl) {
        let removed = lock(&self.sessions).remove(&(proto.to_string(), peer.clone()));
        if let Some(entry) = removed {
            entry.queue.close();
            debug!(proto = %proto, peer = %peer, "session detached");
            let _ = self.events_tx.send(SessionEvent::Disconnected {
                proto: proto.to_string(),
                peer: peer.clone(),
            });
        }
    }

    /// Whether any session to the peer is live.
    pub fn is_connected(&self, peer: &IdUrl) -> bool {
        lock(&self.sessions)
            .keys()
            .any(|(_, session_peer)| session_peer == peer)
    }

    /// The remote address of the peer's session, if connected.
    pub fn peer_address(&self, peer: &IdUrl) -> Option<String> {
        let sessions = lock(&self.sessions);
        let mut keys: Vec<&(String, IdUrl)> = sessions
            .keys()
            .filter(|(_, session_peer)| session_peer == peer)
            .collect();
        keys.sort();
        keys.first()
            .and_then(|key| sessions.get(*key))
            .map(|entry| entry.remote_addr.clone())
    }

    /// Queue a packet to a peer without waiting for any response.
    pub fn enqueue(&self, peer: &IdUrl, packet: &SignedPacket) -> Result<()> {
        let queue = self
            .find_queue(peer)
            .ok_or_else(|| SessionError::NoSession(peer.to_string()))?;
        let inner = packet.packet();
        let pushed = queue.push(QueuedFrame {
            bytes: packet.to_bytes(),
            packet_id: inner.packet_id.clone(),
            is_response: inner.command.is_response(),
        })?;
        if let Pushed::DroppedOldest(dropped) = pushed {
            self.resolve_pending(&dropped, SendOutcome::Failed("queue_overflow".to_string()));
        }
        Ok(())
    }

    /// Send a packet and wait for its response up to `response_timeout`.
    pub async fn send(
        &self,
        peer: &IdUrl,
        packet: &SignedPacket,
        response_timeout: Duration,
    ) -> SendOutcome {
        let packet_id = packet.packet().packet_id.clone();
        let (tx, rx) = oneshot::channel();
        if let Some(old) = lock(&self.pending).insert(packet_id.clone(), tx) {
            let _ = old.send(SendOutcome::Failed("superseded".to_string()));
        }

        if let Err(err) = self.enqueue(peer, packet) {
            lock(&self.pending).remove(&packet_id);
            return SendOutcome::Failed(err.to_string());
        }

        match tokio::time::timeout(response_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => SendOutcome::Failed("gateway dropped".to_string()),
            Err(_) => {
                lock(&self.pending).remove(&packet_id);
                SendOutcome::Timeout
            }
        }
    }

    /// Hand a received frame to the gateway (transport side).
    pub fn handle_inbound(&self, proto: &str, peer: &IdUrl, bytes: &[u8]) {
        let packet = match SignedPacket::from_bytes(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(proto = %proto, peer = %peer, error = %err, "dropping malformed packet");
                return;
            }
        };
        if !(self.verify)(&packet) {
            warn!(
                proto = %proto,
                peer = %peer,
                packet_id = %packet.packet().packet_id,
                "dropping packet with bad signature"
            );
            return;
        }

        let inner = packet.packet();
        // Replays matter only for the non-idempotent commands; a
        // re-uploaded segment legitimately reuses its packet ID.
        if matches!(inner.command, Command::Message | Command::Relay)
            && !lock(&self.seen).insert(&inner.packet_id)
        {
            debug!(packet_id = %inner.packet_id, "dropping replayed packet");
            return;
        }

        if matches!(
            inner.command,
            Command::Ack | Command::Fail | Command::Data | Command::Files
        ) {
            let waiter = lock(&self.pending).remove(&inner.packet_id);
            if let Some(tx) = waiter {
                let outcome = match inner.command {
                    Command::Fail => SendOutcome::Failed(
                        String::from_utf8_lossy(&inner.payload).to_string(),
                    ),
                    _ => SendOutcome::Acked(packet),
                };
                let _ = tx.send(outcome);
                return;
            }
            if inner.command.is_response() {
                debug!(packet_id = %inner.packet_id, "response with no waiter");
                return;
            }
        }

        let ctx = PacketContext {
            proto: proto.to_string(),
            peer: peer.clone(),
        };
        // Dispatch on a snapshot so a handler that unwraps and re-injects
        // a packet can walk the chain again without deadlocking.
        let chain = lock(&self.chain).clone();
        if !chain.dispatch(&packet, &ctx) {
            debug!(
                command = %packet.packet().command,
                packet_id = %packet.packet().packet_id,
                "inbound packet not handled"
            );
        }
    }

    fn find_queue(&self, peer: &IdUrl) -> Option<Arc<SendQueue>> {
        let sessions = lock(&self.sessions);
        let mut keys: Vec<&(String, IdUrl)> = sessions
            .keys()
            .filter(|(_, session_peer)| session_peer == peer)
            .collect();
        keys.sort();
        keys.first()
            .and_then(|key| sessions.get(*key))
            .map(|entry| entry.queue.clone())
    }

    fn resolve_pending(&self, packet_id: &str, outcome: SendOutcome) {
        if let Some(tx) = lock(&self.pending).remove(packet_id) {
            let _ = tx.send(outcome);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use garner_crypto::ed25519::KeyPair;
    use garner_packet::Packet;

    use super::*;

    fn idurl(name: &str) -> IdUrl {
        IdUrl::parse(&format!("https://id.example.net/{name}.xml")).expect("idurl")
    }

    fn accept_all() -> VerifyFn {
        Arc::new(|_| true)
    }

    fn gateway(name: &str) -> Arc<Gateway> {
        Gateway::new(idurl(name), accept_all())
    }

    /// Drain a queue and answer every request with an `Ack`.
    fn spawn_echo(gateway: Arc<Gateway>, peer: IdUrl, queue: Arc<SendQueue>, kp: KeyPair) {
        tokio::spawn(async move {
            while let Some(frame) = queue.pop().await {
                let request = SignedPacket::from_bytes(&frame.bytes).expect("parse");
                let ack = Packet::ack(request.packet(), peer.clone(), b"ok".to_vec())
                    .sign(&kp.signing_key);
                gateway.handle_inbound("memory", &peer, &ack.to_bytes());
            }
        });
    }

    #[tokio::test]
    async fn test_send_resolves_on_ack() {
        let gw = gateway("alice");
        let bob = idurl("bob");
        let queue = gw.attach("memory", bob.clone(), "mem://bob");
        let kp = KeyPair::generate();
        spawn_echo(gw.clone(), bob.clone(), queue, kp);

        let me = KeyPair::generate();
        let packet = Packet::outgoing(
            Command::ListFiles,
            "req-1",
            gw.local().clone(),
            bob.clone(),
            vec![],
        )
        .sign(&me.signing_key);
        match gw.send(&bob, &packet, Duration::from_secs(1)).await {
            SendOutcome::Acked(ack) => {
                assert_eq!(ack.packet().packet_id, "req-1");
                assert_eq!(ack.packet().command, Command::Ack);
            }
            other => unreachable!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_times_out_without_response() {
        let gw = gateway("alice");
        let bob = idurl("bob");
        let _queue = gw.attach("memory", bob.clone(), "mem://bob");

        let me = KeyPair::generate();
        let packet = Packet::outgoing(
            Command::ListFiles,
            "req-1",
            gw.local().clone(),
            bob.clone(),
            vec![],
        )
        .sign(&me.signing_key);
        let outcome = gw.send(&bob, &packet, Duration::from_millis(20)).await;
        assert!(matches!(outcome, SendOutcome::Timeout));
    }

    #[tokio::test]
    async fn test_send_without_session_fails() {
        let gw = gateway("alice");
        let bob = idurl("bob");
        let me = KeyPair::generate();
        let packet = Packet::outgoing(
            Command::ListFiles,
            "req-1",
            gw.local().clone(),
            bob.clone(),
            vec![],
        )
        .sign(&me.signing_key);
        let outcome = gw.send(&bob, &packet, Duration::from_millis(20)).await;
        assert!(matches!(outcome, SendOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_fail_response_carries_reason() {
        let gw = gateway("alice");
        let bob = idurl("bob");
        let queue = gw.attach("memory", bob.clone(), "mem://bob");
        let kp = KeyPair::generate();
        let gw2 = gw.clone();
        let peer = bob.clone();
        tokio::spawn(async move {
            while let Some(frame) = queue.pop().await {
                let request = SignedPacket::from_bytes(&frame.bytes).expect("parse");
                let fail = Packet::fail(request.packet(), peer.clone(), "rejected")
                    .sign(&kp.signing_key);
                gw2.handle_inbound("memory", &peer, &fail.to_bytes());
            }
        });

        let me = KeyPair::generate();
        let packet = Packet::outgoing(
            Command::RequestService,
            "req-1",
            gw.local().clone(),
            bob.clone(),
            vec![],
        )
        .sign(&me.signing_key);
        match gw.send(&bob, &packet, Duration::from_secs(1)).await {
            SendOutcome::Failed(reason) => assert_eq!(reason, "rejected"),
            other => unreachable!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bad_signature_dropped() {
        let gw = Gateway::new(idurl("alice"), Arc::new(|_| false));
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let h = hits.clone();
        gw.add_handler("count", move |_, _| {
            h.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            HandlerResult::Consumed
        });

        let kp = KeyPair::generate();
        let packet = Packet::outgoing(
            Command::Message,
            "m1",
            idurl("bob"),
            idurl("alice"),
            vec![],
        )
        .sign(&kp.signing_key);
        gw.handle_inbound("memory", &idurl("bob"), &packet.to_bytes());
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_replayed_message_dropped_once() {
        let gw = gateway("alice");
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let h = hits.clone();
        gw.add_handler("count", move |_, _| {
            h.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            HandlerResult::Consumed
        });

        let kp = KeyPair::generate();
        let packet = Packet::outgoing(
            Command::Message,
            "m1",
            idurl("bob"),
            idurl("alice"),
            b"hello".to_vec(),
        )
        .sign(&kp.signing_key);
        let bytes = packet.to_bytes();
        gw.handle_inbound("memory", &idurl("bob"), &bytes);
        gw.handle_inbound("memory", &idurl("bob"), &bytes);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_detach_emits_event() {
        let gw = gateway("alice");
        let mut events = gw.subscribe_events();
        let bob = idurl("bob");
        gw.attach("memory", bob.clone(), "mem://bob");
        gw.detach("memory", &bob);

        assert_eq!(
            events.try_recv().expect("connected"),
            SessionEvent::Connected {
                proto: "memory".to_string(),
                peer: bob.clone()
            }
        );
        assert_eq!(
            events.try_recv().expect("disconnected"),
            SessionEvent::Disconnected {
                proto: "memory".to_string(),
                peer: bob.clone()
            }
        );
        assert!(!gw.is_connected(&bob));
    }
}
