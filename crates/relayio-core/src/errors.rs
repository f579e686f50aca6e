//! Errors shared by the socket layer, the parsers and the adapters.
use std::{convert::Infallible, fmt};

use serde::{Deserialize, Serialize};

use crate::value::ValueError;

/// Error when writing to the underlying engine socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum SocketError {
    /// The socket channel is full.
    /// The buffer size can be raised with the `max_buffer_size` option.
    #[error("internal channel full error")]
    InternalChannelFull,

    /// The socket is already closed
    #[error("socket closed")]
    Closed,
}

/// Error returned by an adapter, type erased so that every adapter error fits.
#[derive(Debug, thiserror::Error)]
pub struct AdapterError(#[from] pub Box<dyn std::error::Error + Send + Sync>);

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Infallible> for AdapterError {
    fn from(value: Infallible) -> Self {
        match value {}
    }
}

/// Error when disconnecting sockets.
#[derive(Debug, thiserror::Error)]
pub enum DisconnectError {
    /// The socket channel is full.
    #[error("internal channel full error")]
    InternalChannelFull,

    /// An error occurred while forwarding the request to other servers.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
}

/// Error when broadcasting to several sockets.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    /// Some sockets could not be written to.
    #[error("error sending data through the engine.io socket: {0:?}")]
    Socket(Vec<SocketError>),

    /// Some sockets could not be disconnected.
    #[error("error disconnecting sockets: {0:?}")]
    Disconnect(Vec<DisconnectError>),

    /// An error occurred while forwarding the broadcast to other servers.
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// The data could not be converted to packet arguments.
    #[error("cannot serialize payload: {0}")]
    Serialize(#[from] ValueError),

    /// The event name is reserved by the protocol.
    #[error("\"{0}\" is a reserved event name")]
    ReservedEvent(String),
}

impl From<Vec<SocketError>> for BroadcastError {
    fn from(value: Vec<SocketError>) -> Self {
        BroadcastError::Socket(value)
    }
}
impl From<Vec<DisconnectError>> for BroadcastError {
    fn from(value: Vec<DisconnectError>) -> Self {
        BroadcastError::Disconnect(value)
    }
}

/// Error received instead of an acknowledgement.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum AckError {
    /// The ack was not received in time.
    #[error("ack timeout error")]
    Timeout,

    /// The ack payload could not be decoded into the requested type.
    #[error("cannot deserialize ack payload: {0}")]
    Decode(String),

    /// The packet could not be sent to the socket.
    #[error("error sending data through the engine.io socket: {0}")]
    Socket(#[from] SocketError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_error_display() {
        let err = AdapterError::from(Box::new(std::io::Error::other("boom"))
            as Box<dyn std::error::Error + Send + Sync>);
        assert_eq!(err.to_string(), "boom");
        let err = BroadcastError::from(err);
        assert_eq!(err.to_string(), "adapter error: boom");
    }
}
