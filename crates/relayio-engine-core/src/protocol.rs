use std::{fmt, str::FromStr};

/// The transport a client uses to talk to the server.
///
/// The discriminants are distinct bits so a set of transports fits in a `u8`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportType {
    /// HTTP long-polling
    Polling = 0b01,
    /// Websocket
    Websocket = 0b10,
}

impl TransportType {
    /// The name used by the `transport` query parameter and the `upgrades` list.
    pub const fn as_str(self) -> &'static str {
        match self {
            TransportType::Polling => "polling",
            TransportType::Websocket => "websocket",
        }
    }
}

impl From<u8> for TransportType {
    /// Any bit pattern other than polling's is read as websocket.
    fn from(bits: u8) -> Self {
        if bits == TransportType::Polling as u8 {
            TransportType::Polling
        } else {
            TransportType::Websocket
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `transport` query parameter names no known transport.
#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("unknown transport type")]
pub struct UnknownTransportError;

impl FromStr for TransportType {
    type Err = UnknownTransportError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        [TransportType::Polling, TransportType::Websocket]
            .into_iter()
            .find(|t| t.as_str() == name)
            .ok_or(UnknownTransportError)
    }
}

/// The `EIO` query parameter is not a supported protocol revision.
#[derive(Debug, Copy, Clone, thiserror::Error)]
#[error("unknown protocol version")]
pub struct UnknownProtocolVersionError;

/// The Engine.IO protocol revision spoken by a client.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Engine.IO v4, the only supported revision
    V4 = 4,
}

impl FromStr for ProtocolVersion {
    type Err = UnknownProtocolVersionError;

    fn from_str(eio: &str) -> Result<Self, Self::Err> {
        (eio == "4")
            .then_some(ProtocolVersion::V4)
            .ok_or(UnknownProtocolVersionError)
    }
}
