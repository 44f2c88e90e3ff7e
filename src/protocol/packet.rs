//! Packet model for the relay wire protocol

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Packet type tag, first byte of every header.
///
/// Tags outside the known set are kept as [`PacketType::Unknown`] so a newer
/// server can add message kinds without breaking older clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Client joins a room
    Join,
    /// One fixed-size PCM frame
    Audio,
    /// Client leaves (empty payload)
    Leave,
    /// Server notice for display
    System,
    /// Tag not defined by this protocol version
    Unknown(u8),
}

impl PacketType {
    pub fn tag(self) -> u8 {
        match self {
            Self::Join => 1,
            Self::Audio => 2,
            Self::Leave => 3,
            Self::System => 4,
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<u8> for PacketType {
    fn from(tag: u8) -> Self {
        match tag {
            1 => Self::Join,
            2 => Self::Audio,
            3 => Self::Leave,
            4 => Self::System,
            other => Self::Unknown(other),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(kind: PacketType) -> Self {
        kind.tag()
    }
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(kind: PacketType, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}

/// Payload of a Join packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub room: String,
    pub name: String,
}

impl JoinRequest {
    pub fn new(room: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            name: name.into(),
        }
    }

    /// Serialize as the UTF-8 JSON object the server expects
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Payload of a System packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNotice {
    pub text: String,
}

impl SystemNotice {
    /// Decode a notice, tolerating payloads that are not a JSON object.
    ///
    /// Invalid UTF-8 is replaced lossily. Anything that does not parse as an
    /// object with a string `text` field is shown verbatim.
    pub fn from_payload(payload: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(payload);
        match serde_json::from_str::<SystemNotice>(&raw) {
            Ok(notice) => notice,
            Err(_) => Self {
                text: raw.into_owned(),
            },
        }
    }
}
