//! The wire formats of Socket.IO packets.
//!
//! Every server picks one with [`ParserConfig`](crate::ParserConfig), the [`CommonParser`]
//! unless told otherwise.
use bytes::Bytes;
use relayio_core::{
    Str,
    packet::Packet,
    parser::{Encoded, Parse, ParseError, ParserState},
};

pub use relayio_parser_common::CommonParser;
#[cfg(feature = "msgpack")]
pub use relayio_parser_msgpack::MsgPackParser;

/// The parser selected for a server. It calls the [`Parse`] implementation of its variant.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum Parser {
    /// Text packets with binary attachments
    Common(CommonParser),
    /// One MessagePack frame per packet
    #[cfg(feature = "msgpack")]
    MsgPack(MsgPackParser),
}

/// Runs `$call` with the parser of the variant bound to `$p`.
macro_rules! with_parser {
    ($self:ident, $p:ident => $call:expr) => {
        match $self {
            Self::Common($p) => $call,
            #[cfg(feature = "msgpack")]
            Self::MsgPack($p) => $call,
        }
    };
}

impl Default for Parser {
    fn default() -> Self {
        Self::Common(CommonParser)
    }
}

impl Parse for Parser {
    fn encode(self, packet: Packet) -> Encoded {
        with_parser!(self, p => p.encode(packet))
    }

    fn decode_str(self, state: &ParserState, data: Str) -> Result<Packet, ParseError> {
        let decoded = with_parser!(self, p => p.decode_str(state, data));
        #[cfg(feature = "tracing")]
        tracing::trace!(?decoded, "text message decoded");
        decoded
    }

    fn decode_bin(self, state: &ParserState, bin: Bytes) -> Result<Packet, ParseError> {
        let decoded = with_parser!(self, p => p.decode_bin(state, bin));
        #[cfg(feature = "tracing")]
        tracing::trace!(?decoded, "binary message decoded");
        decoded
    }
}
