//! # garner-session
//!
//! The session layer of a Garner node: one [`gateway::Gateway`] multiplexes
//! logical peer sessions over concrete transports, writes packets with an
//! optional response timeout, and feeds inbound packets through an ordered
//! chain of inbox handlers (first match consumes).
//!
//! Transports are tasks, not trait objects: each live session is a bounded
//! send queue the transport drains plus a reader that hands received
//! frames back to the gateway. A TCP transport (length-prefixed frames)
//! and an in-process memory transport ship here; anything that can move
//! frames can attach a session.
//!
//! ## Modules
//!
//! - [`gateway`] — session pool, send/ack correlation, inbound dispatch.
//! - [`inbox`] — the ordered inbox handler chain.
//! - [`queue`] — the bounded per-session send queue.
//! - [`tcp`] — TCP transport with length-prefixed frames.
//! - [`memory`] — in-process transport for tests and local wiring.

pub mod gateway;
pub mod inbox;
pub mod queue;
pub mod memory;
pub mod tcp;

pub use gateway::{Gateway, SendOutcome, SessionEvent};
pub use inbox::{HandlerResult, PacketContext};

/// Error types for the session layer.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live session to the peer.
    #[error("no session to peer: {0}")]
    NoSession(String),

    /// The session send queue is full of undroppable frames.
    #[error("session send queue overflow")]
    QueueOverflow,

    /// The underlying connection closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Transport I/O failed.
    #[error("transport I/O error: {0}")]
    Io(String),

    /// The transport handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Convenience result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
