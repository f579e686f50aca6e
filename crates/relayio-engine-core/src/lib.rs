//! Core types shared by the relayio engine and its consumers:
//! the Engine.IO [`Packet`] codec, payload framing, [`Sid`] and [`Str`].

mod packet;
mod payload;
mod protocol;
mod sid;
mod str;

pub use packet::{EncodedPacket, OpenPacket, Packet, PacketBuf, PacketParseError};
pub use payload::{PACKET_SEPARATOR, PayloadDecoder, decode_payload, encode_payload};
pub use protocol::{ProtocolVersion, TransportType, UnknownProtocolVersionError, UnknownTransportError};
pub use sid::{Sid, SidDecodeError};
pub use str::Str;
