//! Socket.IO packet model.
//! A [`Packet`] is the unit of data sent over one engine.io message (plus its binary attachments).

use serde::{Deserialize, Serialize};

use crate::{PayloadValue, Sid, Str};

/// A Socket.IO packet, bound to a namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// The packet data
    pub inner: PacketData,
    /// The namespace the packet belongs to
    pub ns: Str,
}

impl Packet {
    /// Create a connect packet, optionally carrying the socket id or the auth payload.
    pub fn connect(ns: impl Into<Str>, value: Option<PayloadValue>) -> Self {
        Self {
            inner: PacketData::Connect(value),
            ns: ns.into(),
        }
    }

    /// Create the connect packet answered by the server when a socket is accepted.
    pub fn connect_ok(ns: impl Into<Str>, sid: Sid) -> Self {
        let mut data = std::collections::BTreeMap::new();
        data.insert("sid".to_string(), PayloadValue::String(sid.to_string()));
        Self::connect(ns, Some(PayloadValue::Object(data)))
    }

    /// Create a disconnect packet for the given namespace
    pub fn disconnect(ns: impl Into<Str>) -> Self {
        Self {
            inner: PacketData::Disconnect,
            ns: ns.into(),
        }
    }

    /// Create a connect error packet for the given namespace with a message
    pub fn connect_error(ns: impl Into<Str>, message: impl Into<String>) -> Self {
        Self {
            inner: PacketData::ConnectError(message.into()),
            ns: ns.into(),
        }
    }

    /// Create an event packet for the given namespace.
    /// It is a binary event if any argument holds binary data.
    pub fn event(ns: impl Into<Str>, event: impl Into<Str>, args: Vec<PayloadValue>) -> Self {
        let event = event.into();
        Self {
            inner: if args.iter().any(PayloadValue::has_binary) {
                PacketData::BinaryEvent(event, args, None)
            } else {
                PacketData::Event(event, args, None)
            },
            ns: ns.into(),
        }
    }

    /// Create an ack packet for the given namespace.
    /// It is a binary ack if any argument holds binary data.
    pub fn ack(ns: impl Into<Str>, args: Vec<PayloadValue>, ack: i64) -> Self {
        Self {
            inner: if args.iter().any(PayloadValue::has_binary) {
                PacketData::BinaryAck(args, ack)
            } else {
                PacketData::EventAck(args, ack)
            },
            ns: ns.into(),
        }
    }
}

/// | Type          | ID  | Usage                                                 |
/// |---------------|-----|-------------------------------------------------------|
/// | CONNECT       | 0   | Used during the connection to a namespace.            |
/// | DISCONNECT    | 1   | Used when disconnecting from a namespace.             |
/// | EVENT         | 2   | Used to send data to the other side.                  |
/// | ACK           | 3   | Used to acknowledge an event.                         |
/// | CONNECT_ERROR | 4   | Used during the connection to a namespace.            |
/// | BINARY_EVENT  | 5   | Used to send binary data to the other side.           |
/// | BINARY_ACK    | 6   | Used to acknowledge an event with binary data.        |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PacketData {
    /// Connect packet with an optional payload
    Connect(Option<PayloadValue>),
    /// Disconnect packet, used to disconnect from a namespace
    Disconnect,
    /// Event packet: event name, arguments and an optional ack id
    Event(Str, Vec<PayloadValue>, Option<i64>),
    /// Event ack packet, to acknowledge an event
    EventAck(Vec<PayloadValue>, i64),
    /// Connect error packet, sent when the namespace is invalid or a middleware failed
    ConnectError(String),
    /// Binary event packet: event name, arguments and an optional ack id
    BinaryEvent(Str, Vec<PayloadValue>, Option<i64>),
    /// Binary ack packet, to acknowledge an event with binary data
    BinaryAck(Vec<PayloadValue>, i64),
}

impl PacketData {
    /// Returns the index of the packet type
    pub fn index(&self) -> usize {
        match self {
            PacketData::Connect(_) => 0,
            PacketData::Disconnect => 1,
            PacketData::Event(..) => 2,
            PacketData::EventAck(..) => 3,
            PacketData::ConnectError(_) => 4,
            PacketData::BinaryEvent(..) => 5,
            PacketData::BinaryAck(..) => 6,
        }
    }

    /// Set the ack id for the packet.
    /// Only event packets carry an ack id.
    pub fn set_ack_id(&mut self, ack_id: i64) {
        if let PacketData::Event(_, _, ack) | PacketData::BinaryEvent(_, _, ack) = self {
            *ack = Some(ack_id);
        }
    }

    /// Check if the packet is a binary packet (either binary event or binary ack)
    pub fn is_binary(&self) -> bool {
        matches!(self, PacketData::BinaryEvent(..) | PacketData::BinaryAck(..))
    }

    /// The arguments of an event or ack packet.
    pub fn args(&self) -> Option<&[PayloadValue]> {
        match self {
            PacketData::Event(_, args, _)
            | PacketData::BinaryEvent(_, args, _)
            | PacketData::EventAck(args, _)
            | PacketData::BinaryAck(args, _) => Some(args),
            _ => None,
        }
    }

    /// Count the binary attachments this packet carries.
    pub fn attachment_count(&self) -> usize {
        match self {
            PacketData::Connect(Some(value)) => value.binary_count(),
            _ => self
                .args()
                .map(|args| args.iter().map(PayloadValue::binary_count).sum())
                .unwrap_or(0),
        }
    }

    /// Switch an event or ack to its binary variant if its arguments hold binary data,
    /// or back to the plain variant if they don't.
    pub fn normalize_binary(self) -> Self {
        let has_binary = self
            .args()
            .is_some_and(|args| args.iter().any(PayloadValue::has_binary));
        match self {
            PacketData::Event(e, args, ack) if has_binary => PacketData::BinaryEvent(e, args, ack),
            PacketData::BinaryEvent(e, args, ack) if !has_binary => PacketData::Event(e, args, ack),
            PacketData::EventAck(args, ack) if has_binary => PacketData::BinaryAck(args, ack),
            PacketData::BinaryAck(args, ack) if !has_binary => PacketData::EventAck(args, ack),
            data => data,
        }
    }
}
