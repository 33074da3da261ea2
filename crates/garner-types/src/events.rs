//! Typed events published by the long-running pipelines.
//!
//! Backup jobs, the fleet controller, the identity cache and the relay
//! router all report progress through these events rather than calling each
//! other directly. Subscribers receive them over the node event bus.

use serde::{Deserialize, Serialize};

use crate::IdUrl;

/// An event emitted somewhere inside the storage or relay pipelines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum Event {
    // Task / job lifecycle
    /// A queued backup task started running as a job.
    TaskStarted { path_id: String },
    /// A queued backup task finished (successfully or not).
    TaskFinished { path_id: String, result: String },
    /// A running job completed all block uploads.
    JobDone { backup_id: String, result: String },
    /// A running job was aborted before completion.
    JobAborted { backup_id: String },

    // Backup matrix
    /// One block of a version reached the delivered threshold.
    BlockUploaded { backup_id: String, block_number: u32 },
    /// A version was sealed into the catalog.
    VersionSealed { backup_id: String },
    /// Under-replicated blocks were queued for rebuilding.
    RebuildScheduled { backup_id: String, blocks: Vec<u32> },

    // Supplier fleet
    /// A supplier connector reached its connected state.
    SupplierConnected { supplier: IdUrl, position: u32 },
    /// A supplier connector dropped to its disconnected state.
    SupplierDisconnected { supplier: IdUrl, position: u32 },
    /// A fleet slot was atomically swapped to a new supplier.
    SupplierReplaced {
        old: Option<IdUrl>,
        new: IdUrl,
        position: u32,
    },
    /// The supplier finder exhausted its retry budget.
    SearchFailed { position: u32 },

    // Identity
    /// An identity rotated: same key, new URL.
    IdentityUrlChanged { old: IdUrl, new: IdUrl },

    // Relay routes
    /// The relay router accepted a new client route.
    RouteRegistered { client: IdUrl },
    /// A client route was removed (cancel or session loss).
    RouteRemoved { client: IdUrl },
    /// A client route migrated to a rotated identity URL.
    RouteMigrated { old: IdUrl, new: IdUrl },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = Event::VersionSealed {
            backup_id: "master$alice@id.example.net/0/1/F20260801093000AM".to_string(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert!(json.contains("\"event\":\"version_sealed\""));
        let back: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn test_route_migrated_round_trip() {
        let old = IdUrl::parse("https://id.example.net/a-old.xml").expect("idurl");
        let new = IdUrl::parse("https://id.example.net/a-new.xml").expect("idurl");
        let event = Event::RouteMigrated {
            old: old.clone(),
            new: new.clone(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        let back: Event = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, Event::RouteMigrated { old, new });
    }
}
