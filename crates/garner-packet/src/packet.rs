//! The signed packet envelope.
//!
//! ## Wire format
//!
//! ```text
//! Command    u8
//! PacketID   u32 BE length || UTF-8 bytes
//! OwnerID    u32 BE length || URL bytes
//! CreatorID  u32 BE length || URL bytes
//! RemoteID   u32 BE length || URL bytes
//! Payload    u32 BE length || bytes
//! Signature  u32 BE length || Ed25519 signature (64 bytes)
//! ```
//!
//! The signature input is the concatenation of all preceding fields in
//! declared order. `OwnerID` is the logical author of the carried data,
//! `CreatorID` the last signer (they differ once a relay re-signs), and
//! `RemoteID` the intended next hop.

use garner_crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use garner_types::IdUrl;

use crate::{Command, PacketError, Result};

/// Largest accepted single field (guards against allocation attacks).
const MAX_FIELD_LEN: usize = 64 * 1024 * 1024;

/// An unsigned packet envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// What the packet asks for or carries.
    pub command: Command,
    /// Node-unique request ID, echoed by `Ack`/`Fail`.
    pub packet_id: String,
    /// Logical author of the carried data.
    pub owner_id: IdUrl,
    /// Last signer of the envelope.
    pub creator_id: IdUrl,
    /// Intended next hop.
    pub remote_id: IdUrl,
    /// Command-specific payload bytes.
    pub payload: Vec<u8>,
}

/// A packet with its envelope signature attached.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedPacket {
    packet: Packet,
    signature: Signature,
}

impl Packet {
    /// Build a packet envelope.
    pub fn new(
        command: Command,
        packet_id: impl Into<String>,
        owner_id: IdUrl,
        creator_id: IdUrl,
        remote_id: IdUrl,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            command,
            packet_id: packet_id.into(),
            owner_id,
            creator_id,
            remote_id,
            payload,
        }
    }

    /// Build a packet where the sender is both owner and creator.
    pub fn outgoing(
        command: Command,
        packet_id: impl Into<String>,
        me: IdUrl,
        remote_id: IdUrl,
        payload: Vec<u8>,
    ) -> Self {
        Self::new(command, packet_id, me.clone(), me, remote_id, payload)
    }

    /// Build the `Ack` for a received request, echoing its packet ID.
    pub fn ack(request: &Packet, me: IdUrl, payload: Vec<u8>) -> Self {
        Self::outgoing(
            Command::Ack,
            request.packet_id.clone(),
            me,
            request.creator_id.clone(),
            payload,
        )
    }

    /// Build the `Fail` for a received request, echoing its packet ID.
    pub fn fail(request: &Packet, me: IdUrl, reason: &str) -> Self {
        Self::outgoing(
            Command::Fail,
            request.packet_id.clone(),
            me,
            request.creator_id.clone(),
            reason.as_bytes().to_vec(),
        )
    }

    /// Sign the envelope, producing the wire-ready packet.
    pub fn sign(self, key: &SigningKey) -> SignedPacket {
        let signature = key.sign(&self.signing_bytes());
        SignedPacket {
            packet: self,
            signature,
        }
    }

    /// The exact byte string the signature covers.
    fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.wire_size());
        out.push(self.command.code());
        push_field(&mut out, self.packet_id.as_bytes());
        push_field(&mut out, self.owner_id.as_str().as_bytes());
        push_field(&mut out, self.creator_id.as_str().as_bytes());
        push_field(&mut out, self.remote_id.as_str().as_bytes());
        push_field(&mut out, &self.payload);
        out
    }

    fn wire_size(&self) -> usize {
        1 + 5 * 4
            + self.packet_id.len()
            + self.owner_id.as_str().len()
            + self.creator_id.as_str().len()
            + self.remote_id.as_str().len()
            + self.payload.len()
    }
}

impl SignedPacket {
    /// The signed envelope fields.
    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    /// The envelope signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Consume into the inner envelope.
    pub fn into_packet(self) -> Packet {
        self.packet
    }

    /// Verify the envelope signature against the creator's public key.
    ///
    /// The caller resolves `creator_id` to its identity document and passes
    /// the signing key found there.
    pub fn verify(&self, creator_key: &VerifyingKey) -> Result<()> {
        creator_key
            .verify(&self.packet.signing_bytes(), &self.signature)
            .map_err(|_| PacketError::BadSignature)
    }

    /// Serialize to the deterministic wire form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.packet.signing_bytes();
        push_field(&mut out, &self.signature.to_bytes());
        out
    }

    /// Parse a packet from its wire form.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor { data, pos: 0 };

        let code = cursor.take_byte("command")?;
        let command = Command::from_code(code)
            .ok_or_else(|| PacketError::Malformed(format!("unknown command code {code:#04x}")))?;

        let packet_id = String::from_utf8(cursor.take_field("packet_id")?.to_vec())
            .map_err(|_| PacketError::Malformed("packet_id is not UTF-8".to_string()))?;
        let owner_id = parse_idurl(cursor.take_field("owner_id")?)?;
        let creator_id = parse_idurl(cursor.take_field("creator_id")?)?;
        let remote_id = parse_idurl(cursor.take_field("remote_id")?)?;
        let payload = cursor.take_field("payload")?.to_vec();
        let signature = Signature::from_slice(cursor.take_field("signature")?)
            .map_err(|_| PacketError::Malformed("signature must be 64 bytes".to_string()))?;

        if cursor.pos != data.len() {
            return Err(PacketError::Malformed(format!(
                "{} trailing bytes after signature",
                data.len() - cursor.pos
            )));
        }

        Ok(Self {
            packet: Packet {
                command,
                packet_id,
                owner_id,
                creator_id,
                remote_id,
                payload,
            },
            signature,
        })
    }
}

fn parse_idurl(bytes: &[u8]) -> Result<IdUrl> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| PacketError::Malformed("identity URL is not UTF-8".to_string()))?;
    IdUrl::parse(text).map_err(|e| PacketError::Malformed(e.to_string()))
}

fn push_field(out: &mut Vec<u8>, field: &[u8]) {
    out.extend_from_slice(&(field.len() as u32).to_be_bytes());
    out.extend_from_slice(field);
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take_byte(&mut self, what: &str) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| PacketError::Truncated(what.to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn take_field(&mut self, what: &str) -> Result<&'a [u8]> {
        let len_end = self.pos + 4;
        let len_bytes = self
            .data
            .get(self.pos..len_end)
            .ok_or_else(|| PacketError::Truncated(format!("{what} length")))?;
        let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        if len > MAX_FIELD_LEN {
            return Err(PacketError::Malformed(format!(
                "{what} field of {len} bytes exceeds limit"
            )));
        }
        let end = len_end + len;
        let field = self
            .data
            .get(len_end..end)
            .ok_or_else(|| PacketError::Truncated(what.to_string()))?;
        self.pos = end;
        Ok(field)
    }
}
