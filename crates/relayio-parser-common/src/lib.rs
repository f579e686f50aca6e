//! The default relayio parser.
//!
//! It reads and writes the common packet format of the socket.io protocol:
//! ```text
//! <packet type>[<# of binary attachments>-][<namespace>,][<acknowledgment id>][JSON-stringified payload without binary]
//! + binary attachments extracted
//! ```
//! Binary leaves are replaced by `{"_placeholder":true,"num":<index>}` objects and sent
//! as separate binary messages right after the text message.
use std::sync::PoisonError;

use bytes::Bytes;
use relayio_core::{
    Str,
    packet::Packet,
    parser::{Encoded, Parse, ParseError, ParserState, PartialPacket},
};

mod de;
mod ser;

/// Parse and serialize from and into the socket.io common packet format.
/// See details in the [socket.io protocol doc](https://socket.io/docs/v4/socket-io-protocol/#packet-encoding).
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonParser;

impl Parse for CommonParser {
    fn encode(self, packet: Packet) -> Encoded {
        ser::serialize_packet(packet)
    }

    fn decode_str(self, state: &ParserState, data: Str) -> Result<Packet, ParseError> {
        let mut partial = state.partial.lock().unwrap_or_else(PoisonError::into_inner);
        if partial.take().is_some() {
            return Err(ParseError::UnexpectedStringPacket);
        }

        let (packet, attachments) = de::deserialize_packet(data)?;
        match attachments {
            Some(expected) if expected > 0 => {
                *partial = Some(PartialPacket {
                    packet,
                    expected,
                    attachments: Vec::new(),
                });
                Err(ParseError::NeedsMoreBinaryData)
            }
            // a binary header without attachments must not hold any placeholder
            Some(_) => complete(packet, Vec::new()),
            None => Ok(packet),
        }
    }

    fn decode_bin(self, state: &ParserState, data: Bytes) -> Result<Packet, ParseError> {
        let mut guard = state.partial.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(partial) = guard.as_mut() else {
            return Err(ParseError::UnexpectedBinaryPacket);
        };
        // copied so that the engine.io websocket buffer is not held
        partial.attachments.push(Bytes::copy_from_slice(&data));
        if partial.attachments.len() < partial.expected {
            return Err(ParseError::NeedsMoreBinaryData);
        }
        match guard.take() {
            Some(PartialPacket {
                packet,
                attachments,
                ..
            }) => complete(packet, attachments),
            None => Err(ParseError::UnexpectedBinaryPacket),
        }
    }
}

fn complete(mut packet: Packet, attachments: Vec<Bytes>) -> Result<Packet, ParseError> {
    de::reinject_attachments(&mut packet.inner, attachments)?;
    packet.inner = packet.inner.normalize_binary();
    Ok(packet)
}
