use relayio_core::{Sid, value::ValueError};
use relayio_engine::DisconnectReason as EngineReason;

pub use matchit::InsertError as NsInsertError;

pub use relayio_core::errors::{
    AckError, AdapterError, BroadcastError, DisconnectError, SocketError,
};
pub use relayio_core::parser::ParseError;

/// A packet of a client that could not be handled.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A connect packet for a namespace the socket already joined, or a packet only
    /// servers may send.
    #[error("unexpected packet type")]
    InvalidPacketType,

    /// The packet targets a socket that left the namespace.
    #[error("socket {0} left the namespace")]
    SocketGone(Sid),

    /// The adapter failed while handling the packet.
    #[error("adapter: {0}")]
    Adapter(#[from] AdapterError),
}

impl Error {
    /// The reason closing the engine session after this error, `None` when it can go on.
    pub(crate) fn closing_reason(&self) -> Option<EngineReason> {
        match self {
            Error::SocketGone(_) => Some(EngineReason::TransportClose),
            Error::InvalidPacketType => Some(EngineReason::PacketParsingError),
            Error::Adapter(_) => None,
        }
    }
}

/// Returned when a connect middleware or the namespace lookup rejected a socket.
pub(crate) struct ConnectFail;

/// Why an emit to one socket failed.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    /// The data could not be converted to packet arguments.
    #[error("cannot serialize the arguments: {0}")]
    Serialize(#[from] ValueError),

    /// The event name is reserved by the protocol.
    #[error("reserved event name {0:?}")]
    ReservedEvent(String),

    /// The socket did not take the packet.
    #[error("socket refused the packet: {0}")]
    Socket(#[from] SocketError),
}

/// Why an [`emit_with_ack`](crate::operators::BroadcastOperators::emit_with_ack)
/// could not start. Errors happening later are items of the ack stream.
#[derive(thiserror::Error, Debug)]
pub enum EmitWithAckError {
    /// The data could not be converted to packet arguments.
    #[error("cannot serialize the arguments: {0}")]
    Encode(#[from] ValueError),
    /// The event name is reserved by the protocol.
    #[error("reserved event name {0:?}")]
    ReservedEvent(String),
    /// The other servers could not be reached.
    #[error("adapter: {0}")]
    Adapter(#[from] AdapterError),
    /// The socket did not take the packet.
    #[error("socket refused the packet: {0}")]
    Socket(#[from] SocketError),
}

impl From<SendError> for EmitWithAckError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Serialize(err) => Self::Encode(err),
            SendError::ReservedEvent(event) => Self::ReservedEvent(event),
            SendError::Socket(err) => Self::Socket(err),
        }
    }
}

/// Why an action on a [`RemoteSocket`](crate::socket::RemoteSocket) failed.
#[derive(thiserror::Error, Debug)]
pub enum RemoteActionError {
    /// The data could not be converted to packet arguments.
    #[error("cannot serialize the arguments: {0}")]
    Serialize(#[from] ValueError),
    /// The event name is reserved by the protocol.
    #[error("reserved event name {0:?}")]
    ReservedEvent(String),
    /// The action could not be forwarded or applied.
    #[error("adapter: {0}")]
    Adapter(#[from] AdapterError),
    /// The socket did not take the packet.
    #[error("socket refused the packet: {0}")]
    Socket(#[from] SocketError),
}

impl From<BroadcastError> for RemoteActionError {
    fn from(err: BroadcastError) -> Self {
        match err {
            BroadcastError::Socket(errs) => errs
                .into_iter()
                .next()
                .map_or(Self::Socket(SocketError::Closed), Self::Socket),
            BroadcastError::Disconnect(_) => Self::Socket(SocketError::InternalChannelFull),
            BroadcastError::Adapter(err) => Self::Adapter(err),
            BroadcastError::Serialize(err) => Self::Serialize(err),
            BroadcastError::ReservedEvent(event) => Self::ReservedEvent(event),
        }
    }
}

impl From<SendError> for RemoteActionError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Serialize(err) => Self::Serialize(err),
            SendError::ReservedEvent(event) => Self::ReservedEvent(event),
            SendError::Socket(err) => Self::Socket(err),
        }
    }
}

impl From<SendError> for BroadcastError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::Serialize(err) => BroadcastError::Serialize(err),
            SendError::ReservedEvent(event) => BroadcastError::ReservedEvent(event),
            SendError::Socket(err) => BroadcastError::Socket(vec![err]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_packet_errors() {
        assert_eq!(
            Error::InvalidPacketType.closing_reason(),
            Some(EngineReason::PacketParsingError)
        );
        assert_eq!(
            Error::SocketGone(Sid::new()).closing_reason(),
            Some(EngineReason::TransportClose)
        );
    }

    #[test]
    fn remote_errors_keep_the_first_socket_error() {
        let err = BroadcastError::Socket(vec![SocketError::InternalChannelFull, SocketError::Closed]);
        assert!(matches!(
            RemoteActionError::from(err),
            RemoteActionError::Socket(SocketError::InternalChannelFull)
        ));
        assert_eq!(
            SendError::ReservedEvent("connect".into()).to_string(),
            "reserved event name \"connect\""
        );
    }
}
