//! # garner-node
//!
//! The Garner daemon: configuration, the node-wide event bus, the
//! supplier-side storage service, the bridge between the backup pipeline
//! and the supplier fleet, and the startup wiring that assembles every
//! service into one process.
//!
//! ## Modules
//!
//! - [`config`] — `garner.toml` with defaults for every knob.
//! - [`events`] — the node event bus.
//! - [`supplier`] — serving storage to customers (the supplier role).
//! - [`segments`] — `SegmentTransport` over the gateway and the fleet.
//! - [`services`] — the service registry built at startup.

pub mod config;
pub mod events;
pub mod segments;
pub mod services;
pub mod supplier;

pub use config::NodeConfig;
pub use events::EventBus;
pub use segments::FleetSegmentTransport;
pub use services::NodeServices;
pub use supplier::SupplierService;
