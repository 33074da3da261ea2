//! The packet command set.
//!
//! One byte on the wire. Codes are frozen; new commands append, existing
//! codes never change meaning.

use serde::{Deserialize, Serialize};

/// Command carried by a packet envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Carry the sender's identity document.
    Identity,
    /// Positive response; echoes the request's packet ID.
    Ack,
    /// Negative response; echoes the request's packet ID.
    Fail,
    /// Ask a node to start providing a named service.
    RequestService,
    /// Ask a node to stop providing a named service.
    CancelService,
    /// Deliver one stored fragment (or any bulk payload).
    Data,
    /// Request one stored fragment back.
    Retrieve,
    /// Ask a supplier for the list of segments it holds.
    ListFiles,
    /// A supplier's segment listing.
    Files,
    /// Delete one stored segment.
    DeleteFile,
    /// Delete every segment of one version.
    DeleteBackup,
    /// An onion envelope carrying an encrypted inner packet.
    Relay,
    /// An application-level message between users.
    Message,
}

impl Command {
    /// The wire code of this command.
    pub fn code(&self) -> u8 {
        match self {
            Self::Identity => 0x01,
            Self::Ack => 0x02,
            Self::Fail => 0x03,
            Self::RequestService => 0x04,
            Self::CancelService => 0x05,
            Self::Data => 0x06,
            Self::Retrieve => 0x07,
            Self::ListFiles => 0x08,
            Self::Files => 0x09,
            Self::DeleteFile => 0x0a,
            Self::DeleteBackup => 0x0b,
            Self::Relay => 0x0c,
            Self::Message => 0x0d,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::Identity),
            0x02 => Some(Self::Ack),
            0x03 => Some(Self::Fail),
            0x04 => Some(Self::RequestService),
            0x05 => Some(Self::CancelService),
            0x06 => Some(Self::Data),
            0x07 => Some(Self::Retrieve),
            0x08 => Some(Self::ListFiles),
            0x09 => Some(Self::Files),
            0x0a => Some(Self::DeleteFile),
            0x0b => Some(Self::DeleteBackup),
            0x0c => Some(Self::Relay),
            0x0d => Some(Self::Message),
            _ => None,
        }
    }

    /// Whether this command is a response to an earlier request.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Ack | Self::Fail)
    }

    /// All commands, in wire-code order.
    pub fn all() -> &'static [Command] {
        &[
            Self::Identity,
            Self::Ack,
            Self::Fail,
            Self::RequestService,
            Self::CancelService,
            Self::Data,
            Self::Retrieve,
            Self::ListFiles,
            Self::Files,
            Self::DeleteFile,
            Self::DeleteBackup,
            Self::Relay,
            Self::Message,
        ]
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
