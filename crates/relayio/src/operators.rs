//! Builders of emissions.
//!
//! * [`ConfOperators`] tune an emission to a single socket.
//! * [`BroadcastOperators`] select the sockets of a namespace, possibly across the
//!   cluster, then emit to them or act on them.
//!
//! Every operator takes the builder by value and returns it, so they chain.
use std::{sync::Arc, time::Duration};

use relayio_core::{
    Sid,
    adapter::{BroadcastFlags, BroadcastOptions, Room, RoomParam},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    ack::AckStream,
    adapter::{Adapter, LocalAdapter},
    errors::{AdapterError, BroadcastError, EmitWithAckError, SendError, SocketError},
    extract::SocketRef,
    ns::Namespace,
    socket::{RemoteSocket, Socket, event_packet},
};

/// Tunes an emission to one socket.
#[must_use = "operators do nothing unless you emit something"]
pub struct ConfOperators<'a, A: Adapter = LocalAdapter> {
    socket: &'a Socket<A>,
    ack_timeout: Option<Duration>,
    volatile: bool,
}

/// A selection of sockets, with the settings of what is emitted to them.
#[must_use = "operators do nothing unless you emit something"]
pub struct BroadcastOperators<A: Adapter = LocalAdapter> {
    ns: Arc<Namespace<A>>,
    opts: BroadcastOptions,
    ack_timeout: Option<Duration>,
}

impl<'a, A: Adapter> ConfOperators<'a, A> {
    pub(crate) fn new(socket: &'a Socket<A>) -> Self {
        ConfOperators {
            socket,
            ack_timeout: None,
            volatile: false,
        }
    }

    /// How long [`emit_with_ack`](Self::emit_with_ack) waits, instead of the server's
    /// [`ack_timeout`](crate::SocketIoBuilder::ack_timeout).
    pub fn timeout(self, timeout: Duration) -> Self {
        let ack_timeout = Some(timeout);
        Self { ack_timeout, ..self }
    }

    /// A full socket buffer silently drops the message instead of failing.
    ///
    /// Fits messages that lose their value when late, like positions in a game.
    pub fn volatile(self) -> Self {
        Self { volatile: true, ..self }
    }

    /// Like [`Socket::emit`].
    pub fn emit<T: ?Sized + Serialize>(self, event: impl AsRef<str>, data: &T) -> Result<(), SendError> {
        let sent = self.socket.emit(event, data);
        let dropped = matches!(sent, Err(SendError::Socket(SocketError::InternalChannelFull)));
        if dropped && self.volatile { Ok(()) } else { sent }
    }

    /// Like [`Socket::emit_with_ack`], waiting for the [`timeout`](Self::timeout) if set.
    pub fn emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        self,
        event: impl AsRef<str>,
        data: &T,
    ) -> Result<AckStream<V>, SendError> {
        let socket = self.socket;
        let timeout = self.ack_timeout.unwrap_or_else(|| socket.ns.ack_timeout());
        socket.emit_with_ack_timeout(event.as_ref(), data, timeout)
    }
}

impl<A: Adapter> BroadcastOperators<A> {
    fn with_opts(ns: Arc<Namespace<A>>, opts: BroadcastOptions) -> Self {
        BroadcastOperators {
            ns,
            opts,
            ack_timeout: None,
        }
    }

    /// Selects the socket `sid` alone. The room operators then select from the rooms,
    /// excluding `sid`.
    pub(crate) fn from_sock(ns: Arc<Namespace<A>>, sid: Sid) -> Self {
        Self::with_opts(ns, BroadcastOptions::new(sid))
    }

    /// Selects every socket of the namespace.
    pub(crate) fn from_ns(ns: Arc<Namespace<A>>) -> Self {
        let mut opts = BroadcastOptions::default();
        opts.add_flag(BroadcastFlags::Broadcast);
        Self::with_opts(ns, opts)
    }

    fn flag(mut self, flag: BroadcastFlags) -> Self {
        self.opts.add_flag(flag);
        self
    }

    /// Selects the sockets of the `rooms`. From a socket, the socket itself is left out:
    /// use [`within`](Self::within) to keep it.
    pub fn to(self, rooms: impl RoomParam) -> Self {
        self.within(rooms).flag(BroadcastFlags::Broadcast)
    }

    /// Selects the sockets of the `rooms`, the emitting socket included.
    pub fn within(mut self, rooms: impl RoomParam) -> Self {
        self.opts.rooms.extend(rooms.into_room_iter());
        self
    }

    /// Leaves out the sockets of the `rooms`.
    pub fn except(mut self, rooms: impl RoomParam) -> Self {
        self.opts.except.extend(rooms.into_room_iter());
        self.flag(BroadcastFlags::Broadcast)
    }

    /// Stays on this server. Does nothing without a cluster adapter.
    pub fn local(self) -> Self {
        self.flag(BroadcastFlags::Local)
    }

    /// Selects every socket of the namespace. From a socket, the socket itself is left out.
    pub fn broadcast(self) -> Self {
        self.flag(BroadcastFlags::Broadcast)
    }

    /// Sockets whose buffer is full silently miss the message.
    pub fn volatile(self) -> Self {
        self.flag(BroadcastFlags::Volatile)
    }

    /// How long [`emit_with_ack`](Self::emit_with_ack) waits for each socket.
    /// Across the cluster, it also bounds the wait for the other servers.
    pub fn timeout(self, timeout: Duration) -> Self {
        let ack_timeout = Some(timeout);
        Self { ack_timeout, ..self }
    }

    /// Emits `event` to the selected sockets. The packet is encoded once.
    ///
    /// With a cluster adapter it reaches the other servers too, unless
    /// [`local`](Self::local) was used.
    ///
    /// # Errors
    /// * [`BroadcastError::Serialize`] or [`BroadcastError::ReservedEvent`] when the packet
    ///   can't be built.
    /// * [`BroadcastError::Socket`] with the error of each socket that refused it.
    /// * [`BroadcastError::Adapter`] when the other servers could not be reached.
    ///
    /// # Example
    /// ```
    /// # use relayio::{SocketIo, extract::{Data, SocketRef}};
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| {
    ///     socket.on("shout", async |socket: SocketRef, Data(text): Data<String>| {
    ///         // everyone in "lobby" but the sender and the muted ones
    ///         socket.to("lobby").except("muted").emit("shout", &text).await.ok();
    ///     });
    /// });
    /// ```
    pub async fn emit<T: ?Sized + Serialize>(self, event: impl AsRef<str>, data: &T) -> Result<(), BroadcastError> {
        let packet = event_packet(self.ns.path.clone(), event.as_ref(), data)?;
        self.ns.adapter.broadcast(packet, self.opts).await
    }

    /// Emits `event` to the selected sockets and streams their acks, each with the
    /// socket id. A socket silent past the timeout yields
    /// [`AckError::Timeout`](crate::AckError::Timeout).
    ///
    /// # Example
    /// ```
    /// # use relayio::{SocketIo, extract::{Data, SocketRef}};
    /// # use futures_util::StreamExt;
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| {
    ///     socket.on("poll", async |socket: SocketRef, Data(question): Data<String>| {
    ///         let votes = socket.broadcast().emit_with_ack::<_, bool>("poll", &question).await.unwrap();
    ///         let yes = votes.filter(|(_, vote)| std::future::ready(matches!(vote, Ok(true)))).count().await;
    ///         println!("{yes} yes");
    ///     });
    /// });
    /// ```
    pub async fn emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        self,
        event: impl AsRef<str>,
        data: &T,
    ) -> Result<AckStream<V, A::AckStream>, EmitWithAckError> {
        let packet = event_packet(self.ns.path.clone(), event.as_ref(), data)?;
        let adapter = &self.ns.adapter;
        match adapter.broadcast_with_ack(packet, self.opts, self.ack_timeout).await {
            Ok(acks) => Ok(AckStream::new(acks)),
            Err(e) => Err(Into::<AdapterError>::into(e).into()),
        }
    }

    /// The selected sockets of this server. See [`fetch_sockets`](Self::fetch_sockets)
    /// for the whole cluster.
    pub fn sockets(self) -> Vec<SocketRef<A>> {
        let sids = self.ns.adapter.get_local().sockets(&self.opts);
        sids.into_iter().filter_map(|sid| self.get_socket(sid)).collect()
    }

    /// The selected sockets of every server.
    pub async fn fetch_sockets(self) -> Result<Vec<RemoteSocket<A>>, A::Error> {
        let found = self.ns.adapter.fetch_sockets(self.opts).await?;
        let adapter = &self.ns.adapter;
        Ok(found.into_iter().map(|data| RemoteSocket::new(data, adapter)).collect())
    }

    /// Disconnects the selected sockets.
    pub async fn disconnect(self) -> Result<(), BroadcastError> {
        self.ns.adapter.disconnect_socket(self.opts).await
    }

    /// Makes the selected sockets join the `rooms`.
    pub async fn join(self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.ns.adapter.add_sockets(self.opts, rooms).await
    }

    /// Makes the selected sockets leave the `rooms`.
    pub async fn leave(self, rooms: impl RoomParam) -> Result<(), A::Error> {
        self.ns.adapter.del_sockets(self.opts, rooms).await
    }

    /// The rooms of the selected sockets. Without room filter, every room of the namespace.
    pub async fn rooms(self) -> Result<Vec<Room>, A::Error> {
        self.ns.adapter.rooms(self.opts).await
    }

    /// The socket `sid` of this server, selected or not.
    pub fn get_socket(&self, sid: Sid) -> Option<SocketRef<A>> {
        self.ns.get_socket(sid).ok().map(SocketRef::from)
    }
}
