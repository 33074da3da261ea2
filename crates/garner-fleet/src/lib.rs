//! # garner-fleet
//!
//! The supplier fleet of one customer: an ordered vector of N slots, each
//! ideally holding one connected supplier.
//!
//! Three cooperating parts, wired together by messages rather than calls:
//! the per-supplier [`connector`] state machine decides *what to send and
//! when to give up*; the [`controller`] owns the slot vector, its
//! invariants, and the fire/hire policy; the [`finder`] walks the DHT for
//! replacement candidates. The async glue that turns their actions into
//! packets lives with the node wiring, which keeps every part here
//! deterministic and testable.
//!
//! ## Modules
//!
//! - [`connector`] — `(state, event) → (state, actions)` per supplier.
//! - [`controller`] — slots, invariants, fire/hire decisions.
//! - [`finder`] — DHT random walk with a retry budget.

pub mod connector;
pub mod controller;
pub mod finder;

pub use connector::{
    ConnectorAction, ConnectorConfig, ConnectorEvent, ConnectorState, SupplierConnector,
};
pub use controller::{FleetAction, FleetConfig, FleetController};
pub use finder::{CandidateProbe, FinderOutcome, ProbeResult, SupplierFinder};

/// Error types for fleet management.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// The slot index is outside the fleet.
    #[error("no such slot: {0}")]
    NoSuchSlot(usize),

    /// The supplier already occupies another slot.
    #[error("supplier already in fleet: {0}")]
    DuplicateSupplier(String),

    /// A customer can never be its own supplier.
    #[error("cannot hire self as supplier")]
    SelfSupplier,

    /// The slot holds no supplier.
    #[error("slot {0} is empty")]
    EmptySlot(usize),
}

/// Convenience result type for fleet operations.
pub type Result<T> = std::result::Result<T, FleetError>;
