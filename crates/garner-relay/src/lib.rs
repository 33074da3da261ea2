//! # garner-relay
//!
//! The relay router: a store-and-forward overlay that lets a NAT-bound
//! node appear at a stable identity.
//!
//! A client registers a route by sending `RequestService` with an
//! identity document whose sole contact is this router; the router
//! shadows the client's identity in its cache and re-publishes itself as
//! the way to reach the client. From then on, packets addressed to the
//! client are wrapped (encrypted to the client's key) in `Relay`
//! envelopes and forwarded over the client's live session, while `Relay`
//! envelopes *from* the client are unwrapped, verified and sent onward.
//!
//! ## Modules
//!
//! - [`route`] — per-client route state.
//! - [`router`] — the router itself: registration, both forwarding
//!   directions, rotation migration, session-loss cleanup.
//! - [`client`] — the NAT-bound side: unwrap inbound envelopes, wrap
//!   outbound ones, manage the registration.

pub mod client;
pub mod route;
pub mod router;

pub use client::RelayClient;
pub use route::RouteInfo;
pub use router::{RelayRouter, RouterConfig};

/// Error types for relay routing.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The route table is full.
    #[error("route capacity reached")]
    CapacityReached,

    /// No route registered for this client.
    #[error("no route for client: {0}")]
    NoRoute(String),

    /// The service request is not acceptable (bad identity, bad signer).
    #[error("service request rejected: {0}")]
    BadRequest(String),

    /// A relay envelope failed to unwrap or verify.
    #[error("relay envelope invalid: {0}")]
    BadEnvelope(String),

    /// Forwarding failed (no session, queue overflow).
    #[error("forward failed: {0}")]
    Forward(String),
}

/// Convenience result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
