//! The client side of relay routing.
//!
//! A NAT-bound node keeps one session to its router. Inbound traffic
//! arrives as `Relay` envelopes encrypted to the client's key; the client
//! unwraps them and feeds the inner packet into its own inbox as if it
//! had arrived directly. Outbound traffic is the mirror image: wrap the
//! signed packet in an envelope encrypted to the *router's* key and send
//! it down the router session.

use std::sync::Arc;

use garner_crypto::ecies::{self, EciesCiphertext};
use garner_crypto::ed25519::SigningKey;
use garner_crypto::x25519::{X25519PublicKey, X25519StaticSecret};
use garner_packet::service::{from_payload, to_payload, RelayedEnvelope, ServiceRequest};
use garner_packet::{Command, Packet, SignedPacket};
use garner_session::gateway::{Gateway, SendOutcome};
use garner_session::HandlerResult;
use garner_types::packet_id::unique_packet_id;
use garner_types::IdUrl;
use std::time::Duration;
use tracing::{debug, warn};

use crate::{RelayError, Result};

/// Protocol tag under which unwrapped packets re-enter the inbox.
pub const PROTO_RELAYED: &str = "relayed";

/// One node's client-side relay machinery.
pub struct RelayClient {
    me: IdUrl,
    router: IdUrl,
    router_key: X25519PublicKey,
    decrypt_key: X25519StaticSecret,
    signer: SigningKey,
    gateway: Arc<Gateway>,
}

impl RelayClient {
    /// Create a client bound to one router.
    ///
    /// `router_key` is the router's encryption key from its identity
    /// document; outbound envelopes are wrapped with it.
    pub fn new(
        me: IdUrl,
        router: IdUrl,
        router_key: X25519PublicKey,
        decrypt_key: X25519StaticSecret,
        signer: SigningKey,
        gateway: Arc<Gateway>,
    ) -> Arc<Self> {
        Arc::new(Self {
            me,
            router,
            router_key,
            decrypt_key,
            signer,
            gateway,
        })
    }

    /// Register the unwrap handler on the gateway's inbox chain.
    pub fn install(self: &Arc<Self>) {
        let client = self.clone();
        self.gateway.add_handler("relay-client", move |packet, _ctx| {
            client.handle_packet(packet)
        });
    }

    /// Ask the router for the relay service, carrying `identity_json` —
    /// this node's signed document whose sole contact is the router.
    pub async fn register(&self, identity_json: String, timeout: Duration) -> Result<()> {
        let request = ServiceRequest::relay_router(identity_json)
            .map_err(|e| RelayError::BadRequest(e.to_string()))?;
        let packet = Packet::outgoing(
            Command::RequestService,
            unique_packet_id(),
            self.me.clone(),
            self.router.clone(),
            to_payload(&request).map_err(|e| RelayError::BadRequest(e.to_string()))?,
        )
        .sign(&self.signer);

        match self.gateway.send(&self.router, &packet, timeout).await {
            SendOutcome::Acked(response) => {
                let ack: garner_packet::service::ServiceAck =
                    from_payload(&response.packet().payload)
                        .map_err(|e| RelayError::BadRequest(e.to_string()))?;
                if ack.accepted {
                    Ok(())
                } else {
                    Err(RelayError::BadRequest(
                        ack.reason.unwrap_or_else(|| "rejected".to_string()),
                    ))
                }
            }
            SendOutcome::Failed(reason) => Err(RelayError::Forward(reason)),
            SendOutcome::Timeout => Err(RelayError::Forward("timeout".to_string())),
        }
    }

    /// Drop the registration.
    pub async fn cancel(&self, timeout: Duration) -> Result<()> {
        let packet = Packet::outgoing(
            Command::CancelService,
            unique_packet_id(),
            self.me.clone(),
            self.router.clone(),
            vec![],
        )
        .sign(&self.signer);
        match self.gateway.send(&self.router, &packet, timeout).await {
            SendOutcome::Acked(_) => Ok(()),
            SendOutcome::Failed(reason) => Err(RelayError::Forward(reason)),
            SendOutcome::Timeout => Err(RelayError::Forward("timeout".to_string())),
        }
    }

    /// Send a signed packet to `to` through the router.
    pub fn send_via_router(&self, to: &IdUrl, packet: &SignedPacket) -> Result<()> {
        let envelope =
            RelayedEnvelope::new(self.me.clone(), to.clone(), false, &packet.to_bytes());
        let plain = to_payload(&envelope).map_err(|e| RelayError::BadEnvelope(e.to_string()))?;
        let sealed = ecies::encrypt(&self.router_key, &plain)
            .map_err(|e| RelayError::BadEnvelope(e.to_string()))?
            .to_bytes();

        let relay = Packet::outgoing(
            Command::Relay,
            unique_packet_id(),
            self.me.clone(),
            self.router.clone(),
            sealed,
        )
        .sign(&self.signer);
        debug!(to = %to, "sending via router");
        self.gateway
            .enqueue(&self.router, &relay)
            .map_err(|e| RelayError::Forward(e.to_string()))
    }

    /// Unwrap an inbound `Relay` envelope from the router.
    fn handle_packet(&self, packet: &SignedPacket) -> HandlerResult {
        let inner = packet.packet();
        if inner.command != Command::Relay || inner.creator_id != self.router {
            return HandlerResult::NotHandled;
        }

        let unwrapped = EciesCiphertext::from_bytes(&inner.payload)
            .and_then(|ciphertext| ecies::decrypt(&self.decrypt_key, &ciphertext));
        let plain = match unwrapped {
            Ok(plain) => plain,
            Err(err) => {
                warn!(error = %err, "relay envelope unwrap failed");
                return HandlerResult::Error(err.to_string());
            }
        };
        let envelope: RelayedEnvelope = match serde_json::from_slice(&plain) {
            Ok(envelope) => envelope,
            Err(err) => return HandlerResult::Error(err.to_string()),
        };
        let Ok(bytes) = envelope.packet_bytes() else {
            return HandlerResult::Error("bad envelope payload".to_string());
        };

        debug!(from = %envelope.from, "unwrapped relayed packet");
        // Back through the inbox, now as the inner packet.
        self.gateway
            .handle_inbound(PROTO_RELAYED, &envelope.from, &bytes);
        HandlerResult::Consumed
    }
}
