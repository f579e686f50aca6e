use std::{convert::Infallible, ops::Deref, sync::Arc};

use relayio_core::{packet::Packet, value::to_args};
use serde::Serialize;

use super::Extract;
use crate::{
    SocketIo, TransportType,
    adapter::{Adapter, LocalAdapter},
    errors::{SendError, SocketError},
    handler::{Event, OnDisconnect, OnMessage},
    socket::{DisconnectReason, Socket},
};

/// A shared reference to the [`Socket`] the event belongs to.
#[derive(Debug)]
pub struct SocketRef<A: Adapter = LocalAdapter>(Arc<Socket<A>>);

impl<A: Adapter> SocketRef<A> {
    /// # Disconnect the socket from its namespace.
    ///
    /// The disconnect handler runs with [`DisconnectReason::ServerNSDisconnect`].
    pub fn disconnect(self) -> Result<(), SocketError> {
        self.0.disconnect()
    }
}

impl<A: Adapter> Deref for SocketRef<A> {
    type Target = Socket<A>;
    fn deref(&self) -> &Socket<A> {
        &self.0
    }
}
impl<A: Adapter> Clone for SocketRef<A> {
    fn clone(&self) -> Self {
        SocketRef(Arc::clone(&self.0))
    }
}
impl<A: Adapter> PartialEq for SocketRef<A> {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}
impl<A: Adapter> From<Arc<Socket<A>>> for SocketRef<A> {
    fn from(socket: Arc<Socket<A>>) -> Self {
        SocketRef(socket)
    }
}

impl<A: Adapter, E: Event> Extract<A, E> for SocketRef<A> {
    type Rejection = Infallible;
    fn extract(socket: &Arc<Socket<A>>, _: &E::Input) -> Result<Self, Infallible> {
        Ok(SocketRef(socket.clone()))
    }
}

impl<A: Adapter, E: Event> Extract<A, E> for SocketIo<A> {
    type Rejection = Infallible;
    fn extract(socket: &Arc<Socket<A>>, _: &E::Input) -> Result<Self, Infallible> {
        Ok(socket.get_io().clone())
    }
}

impl<A: Adapter, E: Event> Extract<A, E> for TransportType {
    type Rejection = Infallible;
    fn extract(socket: &Arc<Socket<A>>, _: &E::Input) -> Result<Self, Infallible> {
        Ok(socket.transport_type())
    }
}

impl<A: Adapter> Extract<A, OnDisconnect> for DisconnectReason {
    type Rejection = Infallible;
    fn extract(_: &Arc<Socket<A>>, reason: &DisconnectReason) -> Result<Self, Infallible> {
        Ok(*reason)
    }
}

/// Answers the acknowledgement of the current event.
///
/// Sending does nothing when the client did not ask for an acknowledgement.
#[derive(Debug)]
pub struct AckSender<A: Adapter = LocalAdapter> {
    socket: Arc<Socket<A>>,
    ack_id: Option<i64>,
}

impl<A: Adapter> Extract<A, OnMessage> for AckSender<A> {
    type Rejection = Infallible;
    fn extract(socket: &Arc<Socket<A>>, event: &crate::handler::EventArgs) -> Result<Self, Infallible> {
        Ok(AckSender::new(socket.clone(), event.ack_id))
    }
}

impl<A: Adapter> AckSender<A> {
    pub(crate) fn new(socket: Arc<Socket<A>>, ack_id: Option<i64>) -> Self {
        AckSender { socket, ack_id }
    }

    /// Whether the client waits for an acknowledgement.
    pub fn expected(&self) -> bool {
        self.ack_id.is_some()
    }

    /// Sends the acknowledgement. The data is spread into arguments like [`Socket::emit`] does.
    pub fn send<T: ?Sized + Serialize>(self, data: &T) -> Result<(), SendError> {
        let Some(id) = self.ack_id else {
            return Ok(());
        };
        let packet = Packet::ack(self.socket.ns.path.clone(), to_args(data)?, id);
        self.socket.send(packet)?;
        Ok(())
    }
}
