use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{Sid, Str};

/// An Engine.IO packet.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    /// Sent by the server when a session is created
    Open(OpenPacket),
    /// Ends the session
    Close,
    /// Heartbeat probe sent by the server
    Ping,
    /// Heartbeat answer sent by the client
    Pong,
    /// `2probe`, sent by the client on a new websocket during an upgrade
    PingUpgrade,
    /// `3probe`, the server answer to [`Packet::PingUpgrade`]
    PongUpgrade,
    /// A text message
    Message(Str),
    /// Completes an upgrade
    Upgrade,
    /// Sent to a pending polling request so it resolves while an upgrade is in flight
    Noop,
    /// A binary message.
    ///
    /// Base64 encoded with a `b` prefix on transports that cannot carry raw binary.
    Binary(Bytes),
}

/// A packet could not be decoded.
///
/// This is the terminal error of a payload: decoding stops once it is produced.
#[derive(thiserror::Error, Debug)]
pub enum PacketParseError {
    /// The open packet json is invalid
    #[error("parser error: invalid open packet: {0}")]
    InvalidOpenPacket(#[from] serde_json::Error),
    /// The first char is not a packet type, the generic terminal error of a payload
    #[error("parser error")]
    InvalidPacketType(Option<char>),
    /// The base64 body of a binary packet is invalid
    #[error("parser error: base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
    /// The payload is not valid utf8
    #[error("parser error: invalid utf8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    /// The payload is bigger than the configured max payload
    #[error("payload too large: max {max}")]
    PayloadTooLarge {
        /// The configured limit in bytes
        max: u64,
    },
}

/// A packet encoded for a given transport.
#[derive(Clone, Debug, PartialEq)]
pub enum EncodedPacket {
    /// A text frame
    Text(String),
    /// A raw binary frame
    Binary(Bytes),
}

/// Suffix of the upgrade ping and pong.
const PROBE: &str = "probe";

impl Packet {
    /// The first char of the text form.
    fn tag(&self) -> char {
        match self {
            Packet::Open(_) => '0',
            Packet::Close => '1',
            Packet::Ping | Packet::PingUpgrade => '2',
            Packet::Pong | Packet::PongUpgrade => '3',
            Packet::Message(_) => '4',
            Packet::Upgrade => '5',
            Packet::Noop => '6',
            Packet::Binary(_) => 'b',
        }
    }

    /// An upper bound of the encoded length.
    /// Binary packets are measured in their base64 form when `b64` is set.
    pub fn max_encoded_len(&self, b64: bool) -> usize {
        let body = match self {
            // an open packet with u64::MAX everywhere
            Packet::Open(_) => 156,
            Packet::PingUpgrade | Packet::PongUpgrade => PROBE.len(),
            Packet::Message(msg) => msg.len(),
            Packet::Binary(data) if b64 => {
                base64::encoded_len(data.len(), true).unwrap_or(usize::MAX - 1)
            }
            Packet::Binary(data) => return data.len(),
            _ => 0,
        };
        body + 1
    }

    /// Encode the packet for a transport.
    /// Binary data is passed through as is when `supports_binary` is set.
    pub fn encode(self, supports_binary: bool) -> EncodedPacket {
        match self {
            Packet::Binary(data) if supports_binary => EncodedPacket::Binary(data),
            packet => EncodedPacket::Text(packet.into()),
        }
    }
}

/// The text form of a [`Packet`], binary data is base64 encoded.
impl From<Packet> for String {
    fn from(packet: Packet) -> String {
        let mut text = String::with_capacity(packet.max_encoded_len(true));
        text.push(packet.tag());
        match packet {
            // only strings and integers, it can't fail
            Packet::Open(open) => text.push_str(&serde_json::to_string(&open).unwrap_or_default()),
            Packet::PingUpgrade | Packet::PongUpgrade => text.push_str(PROBE),
            Packet::Message(msg) => text.push_str(&msg),
            Packet::Binary(data) => BASE64.encode_string(data, &mut text),
            _ => (),
        }
        text
    }
}

impl From<Packet> for Bytes {
    fn from(packet: Packet) -> Self {
        Bytes::from(String::from(packet))
    }
}

/// Decodes the text form of a packet. A leading `b` marks base64 binary data.
impl TryFrom<Str> for Packet {
    type Error = PacketParseError;

    fn try_from(text: Str) -> Result<Self, PacketParseError> {
        let Some(&tag) = text.as_bytes().first() else {
            return Err(PacketParseError::InvalidPacketType(None));
        };
        let probe = text.len() == PROBE.len() + 1 && text.ends_with(PROBE);
        Ok(match (tag, probe) {
            (b'0', _) => Packet::Open(serde_json::from_str(&text[1..])?),
            (b'1', _) => Packet::Close,
            (b'2', false) => Packet::Ping,
            (b'2', true) => Packet::PingUpgrade,
            (b'3', false) => Packet::Pong,
            (b'3', true) => Packet::PongUpgrade,
            (b'4', _) => Packet::Message(text.slice(1..)),
            (b'5', _) => Packet::Upgrade,
            (b'6', _) => Packet::Noop,
            (b'b', _) => Packet::Binary(BASE64.decode(&text.as_bytes()[1..])?.into()),
            (other, _) => return Err(PacketParseError::InvalidPacketType(Some(other as char))),
        })
    }
}

impl TryFrom<String> for Packet {
    type Error = PacketParseError;

    fn try_from(text: String) -> Result<Self, PacketParseError> {
        Str::from(text).try_into()
    }
}

impl TryFrom<&'static str> for Packet {
    type Error = PacketParseError;

    fn try_from(text: &'static str) -> Result<Self, PacketParseError> {
        Str::from(text).try_into()
    }
}

/// Sent right after a session is created
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPacket {
    /// The session ID
    pub sid: Sid,
    /// The transports the client may upgrade to
    pub upgrades: Vec<String>,
    /// Heartbeat interval in milliseconds
    pub ping_interval: u64,
    /// Heartbeat timeout in milliseconds
    pub ping_timeout: u64,
    /// Maximum size in bytes of a payload the client may send
    pub max_payload: u64,
}

/// Packets queued together so that a text packet and its binary attachments
/// are always flushed adjacently.
pub type PacketBuf = SmallVec<[Packet; 2]>;

#[cfg(test)]
mod tests {
    use super::*;

    fn open(sid: Sid, limits: u64) -> OpenPacket {
        OpenPacket {
            sid,
            upgrades: vec![String::from("websocket")],
            ping_interval: limits,
            ping_timeout: limits,
            max_payload: limits,
        }
    }

    #[test]
    fn open_packet_is_camel_case_json() {
        let sid = Sid::new();
        let text = String::from(Packet::Open(open(sid, 1000)));
        let expected = format!(
            r#"0{{"sid":"{sid}","upgrades":["websocket"],"pingInterval":1000,"pingTimeout":1000,"maxPayload":1000}}"#
        );
        assert_eq!(text, expected);
        assert_eq!(Packet::try_from(text).unwrap(), Packet::Open(open(sid, 1000)));
    }

    #[test]
    fn packets_survive_both_transports() {
        let packets = [
            Packet::Close,
            Packet::Ping,
            Packet::Pong,
            Packet::PingUpgrade,
            Packet::PongUpgrade,
            Packet::Message("hello é".into()),
            Packet::Upgrade,
            Packet::Noop,
            Packet::Binary(Bytes::from_static(&[1, 2, 3])),
        ];
        for raw_binary in [true, false] {
            for packet in packets.clone() {
                let decoded = match packet.clone().encode(raw_binary) {
                    EncodedPacket::Text(text) => Packet::try_from(text).unwrap(),
                    EncodedPacket::Binary(bin) => Packet::Binary(bin),
                };
                assert_eq!(decoded, packet);
            }
        }
    }

    #[test]
    fn text_forms() {
        let cases: [(Packet, &str); 4] = [
            (Packet::Message("hello".into()), "4hello"),
            (Packet::PingUpgrade, "2probe"),
            (Packet::Noop, "6"),
            (Packet::Binary(Bytes::from_static(&[1, 2, 3])), "bAQID"),
        ];
        for (packet, text) in cases {
            assert_eq!(Packet::try_from(text).unwrap(), packet);
            assert_eq!(String::from(packet), text);
        }
        let raw = Packet::Binary(Bytes::from_static(&[1, 2, 3])).encode(true);
        assert_eq!(raw, EncodedPacket::Binary(Bytes::from_static(&[1, 2, 3])));
    }

    #[test]
    fn undecodable_packets() {
        let err = Packet::try_from("").unwrap_err();
        assert!(matches!(err, PacketParseError::InvalidPacketType(None)));
        let err = Packet::try_from("9").unwrap_err();
        assert!(matches!(err, PacketParseError::InvalidPacketType(Some('9'))));
        assert_eq!(err.to_string(), "parser error");
        let err = Packet::try_from("b%%%").unwrap_err();
        assert!(matches!(err, PacketParseError::Base64Decode(_)));
        let err = Packet::try_from("0{").unwrap_err();
        assert!(matches!(err, PacketParseError::InvalidOpenPacket(_)));
        // a probe needs the exact suffix
        assert_eq!(Packet::try_from("2probes").unwrap(), Packet::Ping);
    }

    #[test]
    fn encoded_len_is_an_upper_bound() {
        let biggest = Packet::Open(open(Sid::new(), u64::MAX));
        assert!(biggest.max_encoded_len(false) >= String::from(biggest.clone()).len());
        assert_eq!(Packet::PingUpgrade.max_encoded_len(false), 6);
        assert_eq!(Packet::Message("hello".into()).max_encoded_len(false), 6);
        let bin = Packet::Binary(Bytes::from_static(&[1, 2, 3]));
        assert_eq!(bin.max_encoded_len(false), 3);
        assert_eq!(bin.max_encoded_len(true), 5);
    }
}
