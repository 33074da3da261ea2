//! The ordered inbox handler chain.
//!
//! Components register handlers at startup; every inbound packet walks the
//! chain in registration order and the first handler that consumes it ends
//! the walk. Handlers are synchronous deciders — a component that needs to
//! do real work forwards the packet into its own task through a channel
//! and returns `Consumed`.

use garner_packet::SignedPacket;
use garner_types::IdUrl;
use tracing::warn;

/// What a handler did with a packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    /// The packet is handled; stop the walk.
    Consumed,
    /// Not for this handler; keep walking.
    NotHandled,
    /// The handler recognized the packet but failed on it; stop the walk.
    Error(String),
}

/// Where an inbound packet came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketContext {
    /// Transport protocol of the receiving session.
    pub proto: String,
    /// The session peer that delivered the packet (not necessarily the
    /// packet's creator — relays deliver other nodes' packets).
    pub peer: IdUrl,
}

type Handler = std::sync::Arc<dyn Fn(&SignedPacket, &PacketContext) -> HandlerResult + Send + Sync>;

/// The ordered chain of inbox handlers.
///
/// Cloning is cheap (handlers are shared), which lets the gateway
/// dispatch on a snapshot: a handler that re-injects an unwrapped packet
/// re-enters the chain without deadlocking on it.
#[derive(Clone, Default)]
pub struct InboxChain {
    handlers: Vec<(String, Handler)>,
}

impl InboxChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named handler to the chain.
    pub fn add<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&SignedPacket, &PacketContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.handlers
            .push((name.to_string(), std::sync::Arc::new(handler)));
    }

    /// Walk the chain; returns whether any handler consumed the packet.
    pub fn dispatch(&self, packet: &SignedPacket, ctx: &PacketContext) -> bool {
        for (name, handler) in &self.handlers {
            match handler(packet, ctx) {
                HandlerResult::Consumed => return true,
                HandlerResult::NotHandled => continue,
                HandlerResult::Error(reason) => {
                    warn!(
                        handler = %name,
                        command = %packet.packet().command,
                        packet_id = %packet.packet().packet_id,
                        reason = %reason,
                        "inbox handler failed"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
