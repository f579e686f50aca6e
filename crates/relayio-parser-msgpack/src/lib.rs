//! MessagePack support for relayio.
//!
//! * [`Value`] with [`Value::encode`] and [`Value::decode`]: a complete MessagePack codec,
//!   including extensions and the timestamp extension.
//! * [`MsgPackParser`]: the socket.io msgpack wire format, compatible with the
//!   [socket.io-msgpack-parser](https://github.com/socketio/socket.io-msgpack-parser).
//!   Every packet is a single binary message holding a map:
//! ```text
//! { "type": <packet type>, "nsp": <namespace>, "data"?: <payload>, "id"?: <ack id> }
//! ```
//!   Binary leaves are native msgpack bin values, there are no attachments.

use bytes::Bytes;
use relayio_core::{
    Str,
    packet::Packet,
    parser::{Encoded, Parse, ParseError, ParserState},
};

mod de;
mod ser;
pub mod value;

pub use de::DecodeError;
pub use value::{Integer, Value, ValueError, to_value};

/// Parse and serialize from and into the socket.io msgpack format.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackParser;

impl Parse for MsgPackParser {
    fn encode(self, packet: Packet) -> Encoded {
        Encoded::Bytes(ser::serialize_packet(packet))
    }

    fn decode_str(self, _: &ParserState, _data: Str) -> Result<Packet, ParseError> {
        Err(ParseError::UnexpectedStringPacket)
    }

    fn decode_bin(self, _: &ParserState, bin: Bytes) -> Result<Packet, ParseError> {
        de::deserialize_packet(&bin)
    }
}
