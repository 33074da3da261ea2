//! JSON payloads carried inside packet envelopes.
//!
//! Service negotiation (`RequestService` / `CancelService` / `Ack`), the
//! supplier segment listing (`Files`) and the relay inner envelope
//! (`Relay`) all carry small JSON documents as their packet payload.

use base64::Engine;
use serde::{Deserialize, Serialize};

use garner_types::IdUrl;

use crate::{PacketError, Result};

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Service name a supplier offers to customers.
pub const SERVICE_SUPPLIER: &str = "service_supplier";

/// Service name a relay router offers to NAT-bound clients.
pub const SERVICE_RELAY_ROUTER: &str = "service_relay_router";

/// Payload of a `RequestService` packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// The requested service name.
    pub service: String,
    /// Service-specific parameters.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

/// Parameters of a `service_supplier` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierParams {
    /// Bytes of storage the customer asks the supplier to reserve.
    pub needed_bytes: u64,
    /// The erasure layout the customer uploads with.
    pub ecc_map: String,
}

/// Parameters of a `service_relay_router` request: the client's identity
/// document, verbatim, so the router can verify and re-publish it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayParams {
    /// The client's identity document as serialized JSON.
    pub identity: String,
}

/// Payload of the `Ack` answering a service request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAck {
    /// Whether the service was granted.
    pub accepted: bool,
    /// Refusal reason when not accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ServiceAck {
    /// A positive grant.
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    /// A refusal with a reason.
    pub fn rejected(reason: &str) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Payload of a `Files` packet: every segment a supplier holds for the
/// requesting customer, as segment-ID strings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesListing {
    /// Segment IDs, `customer/path_id/version/block-position-kind`.
    pub segments: Vec<String>,
    /// Revision of the catalog index replica the supplier holds, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_revision: Option<u64>,
}

/// The decrypted inner document of a `Relay` packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedEnvelope {
    /// Who handed the packet to the router.
    pub from: IdUrl,
    /// Final destination of the inner packet.
    pub to: IdUrl,
    /// Whether the router should send to every known contact of `to`.
    pub wide: bool,
    /// The inner signed packet, wire form, base64.
    pub payload: String,
}

impl RelayedEnvelope {
    /// Wrap a signed packet's wire bytes.
    pub fn new(from: IdUrl, to: IdUrl, wide: bool, packet_bytes: &[u8]) -> Self {
        Self {
            from,
            to,
            wide,
            payload: BASE64.encode(packet_bytes),
        }
    }

    /// Decode the inner packet's wire bytes.
    pub fn packet_bytes(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(&self.payload)
            .map_err(|_| PacketError::MalformedPayload("bad relay payload base64".to_string()))
    }
}

/// Encode any of the payload documents to packet payload bytes.
pub fn to_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| PacketError::MalformedPayload(e.to_string()))
}

/// Decode a payload document from packet payload bytes.
pub fn from_payload<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| PacketError::MalformedPayload(e.to_string()))
}

impl ServiceRequest {
    /// A `service_supplier` request.
    pub fn supplier(needed_bytes: u64, ecc_map: &str) -> Result<Self> {
        Ok(Self {
            service: SERVICE_SUPPLIER.to_string(),
            params: serde_json::to_value(SupplierParams {
                needed_bytes,
                ecc_map: ecc_map.to_string(),
            })
            .map_err(|e| PacketError::MalformedPayload(e.to_string()))?,
        })
    }

    /// A `service_relay_router` request carrying the client identity.
    pub fn relay_router(identity_json: String) -> Result<Self> {
        Ok(Self {
            service: SERVICE_RELAY_ROUTER.to_string(),
            params: serde_json::to_value(RelayParams {
                identity: identity_json,
            })
            .map_err(|e| PacketError::MalformedPayload(e.to_string()))?,
        })
    }

    /// Decode the supplier parameters.
    pub fn supplier_params(&self) -> Result<SupplierParams> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| PacketError::MalformedPayload(e.to_string()))
    }

    /// Decode the relay parameters.
    pub fn relay_params(&self) -> Result<RelayParams> {
        serde_json::from_value(self.params.clone())
            .map_err(|e| PacketError::MalformedPayload(e.to_string()))
    }
}
