//! The [`Parse`] trait every Socket.IO wire format implements.
use std::sync::Mutex;

use bytes::Bytes;

use crate::{Str, packet::Packet};

/// A packet encoded by a parser, ready to be written to an engine.io socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    /// A text message followed by its binary attachments, each sent as its own binary message.
    Str(Str, Vec<Bytes>),
    /// A single binary message.
    Bytes(Bytes),
}

impl Encoded {
    /// Size of the main message in bytes.
    pub fn len(&self) -> usize {
        match self {
            Encoded::Str(data, _) => data.len(),
            Encoded::Bytes(data) => data.len(),
        }
    }

    /// Returns true if the main message is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The text message, if any.
    pub fn as_str(&self) -> Option<&Str> {
        match self {
            Encoded::Str(data, _) => Some(data),
            Encoded::Bytes(_) => None,
        }
    }
}

/// A packet that is waiting for binary attachments.
#[derive(Debug, Clone)]
pub struct PartialPacket {
    /// The decoded packet, its binary leaves still placeholders
    pub packet: Packet,
    /// Number of attachments announced by the packet header
    pub expected: usize,
    /// Attachments received so far
    pub attachments: Vec<Bytes>,
}

/// Per connection decoding state. Only the text parser uses it to rebuild
/// packets split across several engine.io messages.
#[derive(Debug, Default)]
pub struct ParserState {
    /// A partially received binary packet
    pub partial: Mutex<Option<PartialPacket>>,
}

/// A Socket.IO wire format.
pub trait Parse: Default + Copy + Send + Sync + 'static {
    /// Convert a packet into the messages to be sent.
    fn encode(self, packet: Packet) -> Encoded;

    /// Decode a text message. If the packet announces binary attachments, it is kept
    /// in the state and [`ParseError::NeedsMoreBinaryData`] is returned.
    fn decode_str(self, state: &ParserState, data: Str) -> Result<Packet, ParseError>;

    /// Decode a binary message.
    fn decode_bin(self, state: &ParserState, bin: Bytes) -> Result<Packet, ParseError>;
}

/// Errors when decoding socket.io packets
#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    /// Invalid packet type
    #[error("invalid packet type")]
    InvalidPacketType,

    /// Invalid event name
    #[error("invalid event name")]
    InvalidEventName,

    /// Invalid packet data
    #[error("invalid data")]
    InvalidData,

    /// Invalid namespace
    #[error("invalid namespace")]
    InvalidNamespace,

    /// The attachment count or a placeholder index does not match the received attachments
    #[error("invalid attachments")]
    InvalidAttachments,

    /// Received a binary message while no packet was waiting for attachments
    #[error(
        "received unexpected binary data. Make sure you are using the same parser on both ends."
    )]
    UnexpectedBinaryPacket,

    /// Received a text message while a packet was waiting for attachments
    #[error(
        "received unexpected string data. Make sure you are using the same parser on both ends."
    )]
    UnexpectedStringPacket,

    /// Not an error: the packet is complete once more binary messages are received.
    #[error("needs more binary data before deserialization")]
    NeedsMoreBinaryData,

    /// Error from the underlying serialization format
    #[error("parser error: {0}")]
    ParserError(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl ParseError {
    /// Wrap a format specific error.
    pub fn parser(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        ParseError::ParserError(Box::new(err))
    }
}
