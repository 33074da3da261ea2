//! `SegmentTransport` over the gateway and the supplier fleet.
//!
//! The backup pipeline addresses fragments by supplier *position*; this
//! bridge resolves the position through the fleet controller's slot
//! vector and speaks the packet protocol to the supplier that holds it:
//! `Data` to store, `Retrieve` to fetch, `DeleteFile` to drop,
//! `ListFiles` for the inventory. Every exchange is one tracked send with
//! the configured response timeout.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use garner_backup::SegmentTransport;
use garner_crypto::ed25519::SigningKey;
use garner_fleet::FleetController;
use garner_packet::service::{from_payload, FilesListing, ServiceAck};
use garner_packet::{Command, Packet, SignedPacket};
use garner_session::gateway::{Gateway, SendOutcome};
use garner_types::packet_id::unique_packet_id;
use garner_types::{IdUrl, SegmentId};
use tracing::debug;

/// The customer side of segment traffic.
#[derive(Clone)]
pub struct FleetSegmentTransport {
    gateway: Arc<Gateway>,
    me: IdUrl,
    signer: SigningKey,
    fleet: Arc<Mutex<FleetController>>,
    response_timeout: Duration,
}

impl FleetSegmentTransport {
    /// Create the bridge over a fleet.
    pub fn new(
        gateway: Arc<Gateway>,
        me: IdUrl,
        signer: SigningKey,
        fleet: Arc<Mutex<FleetController>>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            me,
            signer,
            fleet,
            response_timeout,
        }
    }

    /// The supplier occupying a position, if any.
    fn supplier_at(&self, position: u32) -> Option<IdUrl> {
        let fleet = match self.fleet.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        fleet
            .slot(position as usize)
            .ok()
            .flatten()
            .cloned()
    }

    async fn exchange(
        &self,
        supplier: &IdUrl,
        command: Command,
        packet_id: String,
        payload: Vec<u8>,
    ) -> SendOutcome {
        let packet = Packet::outgoing(
            command,
            packet_id,
            self.me.clone(),
            supplier.clone(),
            payload,
        )
        .sign(&self.signer);
        self.gateway
            .send(supplier, &packet, self.response_timeout)
            .await
    }

    /// Whether an `Ack` response actually granted the request.
    fn ack_accepted(response: &SignedPacket) -> bool {
        if response.packet().command != Command::Ack {
            return false;
        }
        from_payload::<ServiceAck>(&response.packet().payload)
            .map(|ack| ack.accepted)
            .unwrap_or(false)
    }

    /// Push the sealed catalog index to the supplier at a position.
    pub async fn push_index(&self, position: u32, revision: u64, sealed: Vec<u8>) -> bool {
        let Some(supplier) = self.supplier_at(position) else {
            return false;
        };
        let outcome = self
            .exchange(
                &supplier,
                Command::Data,
                format!("index-{revision}"),
                sealed,
            )
            .await;
        matches!(outcome, SendOutcome::Acked(response) if Self::ack_accepted(&response))
    }

    /// Fetch the sealed catalog index replica from a position.
    pub async fn fetch_index(&self, position: u32) -> Option<Vec<u8>> {
        let supplier = self.supplier_at(position)?;
        match self
            .exchange(&supplier, Command::Retrieve, "index".to_string(), vec![])
            .await
        {
            SendOutcome::Acked(response) if response.packet().command == Command::Data => {
                Some(response.into_packet().payload)
            }
            _ => None,
        }
    }
}

impl SegmentTransport for FleetSegmentTransport {
    async fn upload(&self, segment: &SegmentId, payload: Vec<u8>) -> bool {
        let Some(supplier) = self.supplier_at(segment.position) else {
            debug!(position = segment.position, "upload skipped: empty slot");
            return false;
        };
        let outcome = self
            .exchange(&supplier, Command::Data, segment.to_string(), payload)
            .await;
        matches!(outcome, SendOutcome::Acked(response) if Self::ack_accepted(&response))
    }

    async fn retrieve(&self, segment: &SegmentId) -> Option<Vec<u8>> {
        let supplier = self.supplier_at(segment.position)?;
        match self
            .exchange(&supplier, Command::Retrieve, segment.to_string(), vec![])
            .await
        {
            SendOutcome::Acked(response) if response.packet().command == Command::Data => {
                Some(response.into_packet().payload)
            }
            _ => None,
        }
    }

    async fn delete(&self, segment: &SegmentId) -> bool {
        let Some(supplier) = self.supplier_at(segment.position) else {
            return false;
        };
        let outcome = self
            .exchange(&supplier, Command::DeleteFile, segment.to_string(), vec![])
            .await;
        matches!(outcome, SendOutcome::Acked(response) if Self::ack_accepted(&response))
    }

    async fn list(&self, position: u32) -> Option<FilesListing> {
        let supplier = self.supplier_at(position)?;
        match self
            .exchange(&supplier, Command::ListFiles, unique_packet_id(), vec![])
            .await
        {
            SendOutcome::Acked(response) if response.packet().command == Command::Files => {
                from_payload(&response.packet().payload).ok()
            }
            _ => None,
        }
    }
}
