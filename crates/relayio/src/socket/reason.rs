use std::fmt;

use relayio_engine::socket::DisconnectReason as EngineReason;

/// Why a [`Socket`](super::Socket) left its namespace.
///
/// Handlers registered with [`Socket::on_disconnect`](super::Socket::on_disconnect)
/// can take it as an argument.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DisconnectReason {
    /// The client closed its transport.
    TransportClose,
    /// Two polling requests of the same session overlapped.
    MultipleHttpPollingError,
    /// A packet of the client could not be decoded.
    PacketParsingError,
    /// The transport failed, for a lost network for example.
    TransportError,
    /// No heartbeat answer came before the ping timeout.
    HeartbeatTimeout,
    /// The client sent a disconnect packet for the namespace.
    ClientNSDisconnect,
    /// [`Socket::disconnect`](super::Socket::disconnect) was called or the namespace was deleted.
    ServerNSDisconnect,
    /// [`SocketIo::close`](crate::SocketIo::close) was called.
    ClosingServer,
}

impl DisconnectReason {
    fn describe(self) -> &'static str {
        match self {
            Self::TransportClose => "transport closed by the client",
            Self::MultipleHttpPollingError => "overlapping polling requests",
            Self::PacketParsingError => "undecodable packet",
            Self::TransportError => "transport failure",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::ClientNSDisconnect => "namespace left by the client",
            Self::ServerNSDisconnect => "namespace left on the server side",
            Self::ClosingServer => "server shutdown",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Reasons shared with the engine keep their name.
macro_rules! engine_reasons {
    ($($name:ident),*) => {
        impl From<EngineReason> for DisconnectReason {
            fn from(reason: EngineReason) -> Self {
                match reason {
                    $(EngineReason::$name => Self::$name,)*
                }
            }
        }
    };
}

engine_reasons!(
    TransportClose,
    TransportError,
    HeartbeatTimeout,
    MultipleHttpPollingError,
    PacketParsingError,
    ClosingServer
);
