use std::{fmt, sync::Arc};

use relayio_core::adapter::{BroadcastOptions, RemoteSocketData, Room, RoomParam};
use serde::{Serialize, de::DeserializeOwned};

use super::event_packet;
use crate::{
    ack::AckStream,
    adapter::Adapter,
    errors::{AdapterError, RemoteActionError},
};

/// A socket known by the adapter, connected to this server or to another one.
///
/// Each call goes through the adapter with a selection holding only this socket.
#[derive(Clone)]
pub struct RemoteSocket<A> {
    adapter: Arc<A>,
    data: RemoteSocketData,
}

impl<A> RemoteSocket<A> {
    pub(crate) fn new(data: RemoteSocketData, adapter: &Arc<A>) -> Self {
        RemoteSocket {
            adapter: Arc::clone(adapter),
            data,
        }
    }

    /// The id, server and namespace of the socket.
    #[inline]
    pub fn data(&self) -> &RemoteSocketData {
        &self.data
    }

    /// Drops the adapter handle.
    #[inline]
    pub fn into_data(self) -> RemoteSocketData {
        self.data
    }
}

impl<A: Adapter> RemoteSocket<A> {
    fn only_me(&self) -> BroadcastOptions {
        BroadcastOptions::new_remote(&self.data)
    }

    /// Like [`Socket::emit`](super::Socket::emit), waiting for the adapter to forward the packet.
    pub async fn emit<T: ?Sized + Serialize>(
        &self,
        event: impl AsRef<str>,
        data: &T,
    ) -> Result<(), RemoteActionError> {
        let packet = event_packet(self.data.ns.clone(), event.as_ref(), data)?;
        self.adapter.broadcast(packet, self.only_me()).await?;
        Ok(())
    }

    /// Like [`Socket::emit_with_ack`](super::Socket::emit_with_ack), with the default timeout.
    pub async fn emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        &self,
        event: impl AsRef<str>,
        data: &T,
    ) -> Result<AckStream<V, A::AckStream>, RemoteActionError> {
        let packet = event_packet(self.data.ns.clone(), event.as_ref(), data)?;
        match self.adapter.broadcast_with_ack(packet, self.only_me(), None).await {
            Ok(acks) => Ok(AckStream::new(acks)),
            Err(e) => Err(Into::<AdapterError>::into(e).into()),
        }
    }

    /// The rooms of the socket, its own room included.
    #[inline]
    pub async fn rooms(&self) -> Result<Vec<Room>, A::Error> {
        self.adapter.rooms(self.only_me()).await
    }

    /// Puts the socket in `rooms`.
    #[inline]
    pub async fn join(&self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.adapter.add_sockets(self.only_me(), rooms).await
    }

    /// Takes the socket out of `rooms`.
    #[inline]
    pub async fn leave(&self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.adapter.del_sockets(self.only_me(), rooms).await
    }

    /// Makes the socket leave the namespace on its own server.
    pub async fn disconnect(self) -> Result<(), RemoteActionError> {
        self.adapter.disconnect_socket(self.only_me()).await?;
        Ok(())
    }
}

impl<A> fmt::Debug for RemoteSocket<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let RemoteSocketData { id, server_id, ns } = &self.data;
        write!(f, "RemoteSocket({ns}#{id}@{server_id})")
    }
}
