//! In-process transport: two gateways linked by channel-draining tasks.
//!
//! Tests and single-process wiring use this to stand up whole networks
//! without sockets. Dropping or disconnecting the link behaves like a
//! connection loss: both sides see a `Disconnected` session event.

use std::sync::Arc;

use garner_types::IdUrl;
use tokio::task::JoinHandle;

use crate::gateway::Gateway;

/// Protocol tag of memory sessions.
pub const PROTO_MEMORY: &str = "memory";

/// A live in-process connection between two gateways.
pub struct MemoryLink {
    a: Arc<Gateway>,
    b: Arc<Gateway>,
    a_peer: IdUrl,
    b_peer: IdUrl,
    tasks: Vec<JoinHandle<()>>,
}

/// Connect two gateways; each sees the other under the given identity URL.
pub fn link(a: &Arc<Gateway>, a_idurl: IdUrl, b: &Arc<Gateway>, b_idurl: IdUrl) -> MemoryLink {
    let a_addr = format!("mem://{}", a_idurl.user_name());
    let b_addr = format!("mem://{}", b_idurl.user_name());

    // `a` talks to `b`: frames popped from a's queue arrive at b's inbox.
    let a_queue = a.attach(PROTO_MEMORY, b_idurl.clone(), &b_addr);
    let b_queue = b.attach(PROTO_MEMORY, a_idurl.clone(), &a_addr);

    let mut tasks = Vec::with_capacity(2);
    {
        let b_gateway = b.clone();
        let from = a_idurl.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(frame) = a_queue.pop().await {
                b_gateway.handle_inbound(PROTO_MEMORY, &from, &frame.bytes);
            }
        }));
    }
    {
        let a_gateway = a.clone();
        let from = b_idurl.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(frame) = b_queue.pop().await {
                a_gateway.handle_inbound(PROTO_MEMORY, &from, &frame.bytes);
            }
        }));
    }

    MemoryLink {
        a: a.clone(),
        b: b.clone(),
        a_peer: b_idurl,
        b_peer: a_idurl,
        tasks,
    }
}

impl MemoryLink {
    /// Tear the link down; both gateways see a session disconnect.
    pub fn disconnect(self) {
        self.a.detach(PROTO_MEMORY, &self.a_peer);
        self.b.detach(PROTO_MEMORY, &self.b_peer);
        for task in &self.tasks {
            task.abort();
        }
    }
}
