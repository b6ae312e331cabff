//! Inbound stream packets delivered by the transport

use bytes::Bytes;
use std::fmt;

/// Binary reply body carrying one frame of tool data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryPacket {
    payload: Bytes,
    valid: bool,
}

impl BinaryPacket {
    /// Packet whose structural checks (header, CRC) passed
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            valid: true,
        }
    }

    /// Packet that arrived with a bad header or checksum
    pub fn corrupted(payload: Bytes) -> Self {
        Self {
            payload,
            valid: false,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Closed set of packet kinds the transport can hand over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Binary frame (BX2 family)
    Binary(BinaryPacket),
    /// Bytes that could not be framed into any known reply
    Invalid { reason: String },
    /// Any ASCII command-response reply routed onto the stream
    Other { kind: String, body: String },
}

impl Packet {
    /// Human readable kind, used in diagnostics
    pub fn kind(&self) -> &str {
        match self {
            Self::Binary(_) => "BinaryPacket",
            Self::Invalid { .. } => "InvalidPacket",
            Self::Other { kind, .. } => kind,
        }
    }
}

/// A packet tagged with the stream identifier it was sent under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPacket {
    pub tag: String,
    pub packet: Packet,
}

impl StreamPacket {
    pub fn new(tag: impl Into<String>, packet: Packet) -> Self {
        Self {
            tag: tag.into(),
            packet,
        }
    }

    /// Valid binary frame under `tag`
    pub fn binary(tag: impl Into<String>, payload: Bytes) -> Self {
        Self::new(tag, Packet::Binary(BinaryPacket::new(payload)))
    }
}

impl fmt::Display for StreamPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on stream {:?}", self.packet.kind(), self.tag)
    }
}
