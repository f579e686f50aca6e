//! The clients connected to a namespace.
//!
//! A [`Socket`] lives as long as its client stays in the namespace. Handlers reach it
//! through [`SocketRef`](crate::extract::SocketRef). Sockets of the whole cluster
//! are seen as [`RemoteSocket`]s.
use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use relayio_core::{
    PayloadValue, Str,
    adapter::{AckResult, Room, RoomParam},
    packet::{Packet, PacketData},
    parser::{Encoded, Parse},
    value::to_args,
};
use relayio_engine::{
    TransportType,
    socket::{DisconnectReason as EngineReason, Permit},
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::{mpsc::error::TrySendError, oneshot};

use crate::{
    SocketIo,
    ack::{SocketAcks, AckStream},
    adapter::{Adapter, LocalAdapter},
    client::SocketData,
    errors::{Error, SendError, SocketError},
    extensions::Extensions,
    handler::{
        self, BoxedHandler, DisconnectHandler, EventArgs, MessageHandler, OnDisconnect, OnMessage,
    },
    ns::Namespace,
    operators::{BroadcastOperators, ConfOperators},
};

mod reason;
mod remote;

pub use reason::DisconnectReason;
pub use relayio_core::Sid;
pub use remote::RemoteSocket;

/// Event names used by the protocol itself. They can't be listened to nor emitted.
pub const RESERVED_EVENTS: [&str; 6] = [
    "connect",
    "connect_error",
    "disconnect",
    "disconnecting",
    "newListener",
    "removeListener",
];

/// Returns true if the event name is reserved by the protocol.
#[inline]
pub fn is_reserved_event(event: &str) -> bool {
    RESERVED_EVENTS.contains(&event)
}

/// Build an event packet, rejecting reserved event names.
pub(crate) fn event_packet<T: ?Sized + Serialize>(
    ns: Str,
    event: &str,
    data: &T,
) -> Result<Packet, SendError> {
    if is_reserved_event(event) {
        return Err(SendError::ReservedEvent(event.to_owned()));
    }
    let args = to_args(data)?;
    Ok(Packet::event(ns, event.to_owned(), args))
}

/// Writes an encoded packet in a reserved slot of the engine socket.
pub(crate) fn write_encoded(permit: Permit<'_>, data: Encoded) {
    match data {
        Encoded::Bytes(frame) => permit.emit_binary(frame),
        Encoded::Str(text, attachments) => match attachments.is_empty() {
            true => permit.emit(text),
            false => permit.emit_many(text, attachments.into()),
        },
    }
}

/// The details of the request that opened the connection of a [`Socket`].
#[derive(Debug, Clone)]
pub struct Handshake<'a> {
    /// The headers of the first request.
    pub headers: &'a http::HeaderMap,
    /// The query parameters of the first request, not percent-decoded.
    pub query: HashMap<&'a str, &'a str>,
    /// The auth payload sent along the namespace connect packet.
    pub auth: Option<&'a PayloadValue>,
    /// The peer address, when the server inserted a [`SocketAddr`] request extension.
    pub address: Option<SocketAddr>,
    /// When the socket connected to the namespace.
    pub issued: SystemTime,
    /// The uri of the first request.
    pub url: &'a http::Uri,
    /// Whether the connection was made over tls.
    pub secure: bool,
}

type Handlers<A, E> = Mutex<Option<BoxedHandler<A, E>>>;

/// A client in a namespace.
///
/// It receives the events of its client, emits to it and manages its rooms.
/// The operators (`to`, `broadcast`...) start a selection of other sockets of the namespace.
pub struct Socket<A: Adapter = LocalAdapter> {
    /// The id of the socket, also the name of its own room.
    pub id: Sid,
    /// Data attached to the socket by the handlers. Unrelated to the extensions of the
    /// http request, see [`HttpExtension`](crate::extract::HttpExtension) for those.
    pub extensions: Extensions,
    pub(crate) ns: Arc<Namespace<A>>,
    io: SocketIo<A>,
    esocket: Arc<relayio_engine::Socket<SocketData>>,
    auth: Option<PayloadValue>,
    issued: SystemTime,
    connected: AtomicBool,
    /// Encoded packets waiting for the connection to be accepted.
    /// `None` once connected or rejected.
    buffer: Mutex<Option<Vec<Encoded>>>,
    events: RwLock<HashMap<Cow<'static, str>, BoxedHandler<A, OnMessage>>>,
    on_disconnecting: Handlers<A, OnDisconnect>,
    on_disconnect: Handlers<A, OnDisconnect>,
    acks: Mutex<HashMap<i64, oneshot::Sender<AckResult>>>,
}

/// Starts a selection of the other sockets from the socket.
macro_rules! socket_operators {
    ($($(#[$doc:meta])* $name:ident($($arg:ident: $ty:ty)?);)*) => {$(
        $(#[$doc])*
        pub fn $name(&self $(, $arg: $ty)?) -> BroadcastOperators<A> {
            BroadcastOperators::from_sock(self.ns.clone(), self.id).$name($($arg)?)
        }
    )*};
}

impl<A: Adapter> Socket<A> {
    pub(crate) fn new(
        ns: Arc<Namespace<A>>,
        esocket: Arc<relayio_engine::Socket<SocketData>>,
        auth: Option<PayloadValue>,
        io: SocketIo<A>,
    ) -> Self {
        Socket {
            id: esocket.id,
            extensions: Extensions::new(),
            ns,
            io,
            esocket,
            auth,
            issued: SystemTime::now(),
            connected: AtomicBool::default(),
            buffer: Mutex::new(Some(Vec::new())),
            events: RwLock::default(),
            on_disconnecting: Mutex::default(),
            on_disconnect: Mutex::default(),
            acks: Mutex::default(),
        }
    }

    /// Calls `handler` every time the client emits `event`, replacing the previous handler
    /// of the event. Reserved names are refused with an error log.
    ///
    /// The arguments of the handler are [extractors](crate::extract).
    ///
    /// ```
    /// # use relayio::{SocketIo, extract::{AckSender, Data, SocketRef}};
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/chat", async |socket: SocketRef| {
    ///     socket.on("nick", async |socket: SocketRef, Data(nick): Data<String>, ack: AckSender| {
    ///         socket.extensions.insert(nick.clone());
    ///         ack.send(&format!("hello {nick}")).ok();
    ///     });
    /// });
    /// ```
    pub fn on<H, T>(&self, event: impl Into<Cow<'static, str>>, handler: H)
    where
        H: MessageHandler<A, T>,
        T: 'static,
    {
        let event = event.into();
        if is_reserved_event(&event) {
            #[cfg(feature = "tracing")]
            tracing::error!(%event, "reserved event name, handler ignored");
            return;
        }
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        events.insert(event, handler::boxed(handler));
    }

    /// Calls `handler` once the socket left the namespace and its rooms.
    ///
    /// ```
    /// # use relayio::{SocketIo, socket::DisconnectReason, extract::SocketRef};
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| {
    ///     socket.on_disconnect(async |socket: SocketRef, reason: DisconnectReason| {
    ///         println!("{} left {}: {reason}", socket.id, socket.ns());
    ///     });
    /// });
    /// ```
    pub fn on_disconnect<C, T>(&self, handler: C)
    where
        C: DisconnectHandler<A, T>,
        T: 'static,
    {
        Self::set(&self.on_disconnect, handler::boxed(handler));
    }

    /// Calls `handler` when the socket starts leaving the namespace.
    /// It is still in its rooms until the handler completes.
    pub fn on_disconnecting<C, T>(&self, handler: C)
    where
        C: DisconnectHandler<A, T>,
        T: 'static,
    {
        Self::set(&self.on_disconnecting, handler::boxed(handler));
    }

    fn set(slot: &Handlers<A, OnDisconnect>, handler: BoxedHandler<A, OnDisconnect>) {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn take(slot: &Handlers<A, OnDisconnect>) -> Option<BoxedHandler<A, OnDisconnect>> {
        slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Sends `event` to the client.
    ///
    /// `data` becomes the event arguments: a tuple gives one argument per field, `()` none.
    /// [`bytes::Bytes`] values and `serde_bytes` fields travel as binary attachments.
    ///
    /// Until the connection is accepted, in a middleware for example, the packet waits
    /// in a buffer flushed right after the connect packet.
    ///
    /// # Errors
    /// * [`SendError::ReservedEvent`] for a name of [`RESERVED_EVENTS`].
    /// * [`SendError::Serialize`] when `data` can't become arguments.
    /// * [`SendError::Socket`] when the socket buffer is full or the socket closed.
    ///
    /// ```
    /// # use relayio::{SocketIo, extract::SocketRef};
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| {
    ///     socket.emit("welcome", &("relay", 1)).ok();
    ///     socket.emit("avatar", &bytes::Bytes::from_static(b"\x89PNG")).ok();
    /// });
    /// ```
    pub fn emit<T: ?Sized + Serialize>(
        &self,
        event: impl AsRef<str>,
        data: &T,
    ) -> Result<(), SendError> {
        let packet = event_packet(self.ns.path.clone(), event.as_ref(), data)?;
        Ok(self.send(packet)?)
    }

    /// Sends `event` to the client and returns its answer as an [`AckStream`].
    ///
    /// The answer is awaited for the configured ack timeout, see
    /// [`timeout`](Socket::timeout) to change it for one emit.
    ///
    /// # Errors
    /// The errors of [`Socket::emit`]. A timeout or a closed socket are reported by the stream.
    ///
    /// ```
    /// # use relayio::{SocketIo, extract::SocketRef};
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| {
    ///     let Ok(answer) = socket.emit_with_ack::<_, u32>("pick", "a number") else {
    ///         return;
    ///     };
    ///     if let Ok(n) = answer.await {
    ///         println!("picked {n}");
    ///     }
    /// });
    /// ```
    pub fn emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        &self,
        event: impl AsRef<str>,
        data: &T,
    ) -> Result<AckStream<V>, SendError> {
        self.emit_with_ack_timeout(event.as_ref(), data, self.ns.ack_timeout())
    }

    pub(crate) fn emit_with_ack_timeout<T: ?Sized + Serialize, V: DeserializeOwned>(
        &self,
        event: &str,
        data: &T,
        timeout: Duration,
    ) -> Result<AckStream<V>, SendError> {
        let packet = event_packet(self.ns.path.clone(), event, data)?;
        let rx = self.send_with_ack(packet)?;
        Ok(AckStream::local(SocketAcks::send(rx, timeout, self.id)))
    }

    /// Puts the socket in `rooms`.
    ///
    /// ```
    /// # use relayio::{SocketIo, extract::SocketRef};
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| socket.join(["lobby", "news"]));
    /// ```
    pub fn join(&self, rooms: impl RoomParam) {
        self.ns.adapter.get_local().add_all(self.id, rooms)
    }

    /// Takes the socket out of `rooms`. Its own room is kept until it disconnects.
    pub fn leave(&self, rooms: impl RoomParam) {
        let own = self.id.as_str();
        let rooms: Vec<Room> = rooms
            .into_room_iter()
            .filter(|room| room != own)
            .collect();
        self.ns.adapter.get_local().del(self.id, rooms)
    }

    /// Takes the socket out of every room but its own one.
    pub fn leave_all(&self) {
        self.leave(self.rooms());
    }

    /// The rooms of the socket. A connected socket is always in the room named after its id.
    pub fn rooms(&self) -> Vec<Room> {
        self.ns.adapter.get_local().socket_rooms(self.id)
    }

    /// Whether the connection was accepted and the socket did not leave the namespace yet.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    socket_operators! {
        /// Selects the sockets of `rooms`, this one excepted.
        ///
        /// ```
        /// # use relayio::{SocketIo, extract::{Data, SocketRef}};
        /// let (_svc, io) = SocketIo::new_svc();
        /// io.ns("/", async |socket: SocketRef| {
        ///     socket.on("say", async |socket: SocketRef, Data(text): Data<String>| {
        ///         socket.to("lobby").to(["news", "sport"]).emit("said", &text).await.ok();
        ///     });
        /// });
        /// ```
        to(rooms: impl RoomParam);
        /// Selects the sockets of `rooms`, this one included when it is in them.
        within(rooms: impl RoomParam);
        /// Excludes the sockets of `rooms` from the selection, this one being always excluded.
        except(rooms: impl RoomParam);
        /// Keeps the selection on this server. Only matters in a cluster.
        local();
        /// Selects every socket of the namespace but this one.
        /// [`SocketIo`] operators include every socket.
        broadcast();
    }

    /// Waits `timeout` for the ack of the next emit.
    ///
    /// ```
    /// # use relayio::{SocketIo, extract::SocketRef};
    /// # use std::time::Duration;
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/", async |socket: SocketRef| {
    ///     let answer = socket
    ///         .timeout(Duration::from_millis(500))
    ///         .emit_with_ack::<_, bool>("ready?", &());
    /// });
    /// ```
    pub fn timeout(&self, timeout: Duration) -> ConfOperators<'_, A> {
        ConfOperators::new(self).timeout(timeout)
    }

    /// Drops the next emit instead of failing when the socket buffer is full.
    pub fn volatile(&self) -> ConfOperators<'_, A> {
        ConfOperators::new(self).volatile()
    }

    /// The server handle.
    pub fn get_io(&self) -> &SocketIo<A> {
        &self.io
    }

    /// Makes the socket leave the namespace. The disconnect handlers run with
    /// [`DisconnectReason::ServerNSDisconnect`].
    pub fn disconnect(self: Arc<Self>) -> Result<(), SocketError> {
        self.send(Packet::disconnect(self.ns.path.clone()))?;
        self.close(DisconnectReason::ServerNSDisconnect);
        Ok(())
    }

    /// The parts of the http request that opened the session, with its extensions.
    pub fn req_parts(&self) -> &http::request::Parts {
        &self.esocket.req_parts
    }

    /// Get the details of the connection of this socket.
    pub fn handshake(&self) -> Handshake<'_> {
        let parts = &self.esocket.req_parts;
        let query = parts
            .uri
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|s| !s.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .collect();
        let forwarded_https = parts
            .headers
            .get("x-forwarded-proto")
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"https"));
        Handshake {
            headers: &parts.headers,
            query,
            auth: self.auth.as_ref(),
            address: parts.extensions.get::<SocketAddr>().copied(),
            issued: self.issued,
            url: &parts.uri,
            secure: parts.uri.scheme_str() == Some("https") || forwarded_https,
        }
    }

    /// The transport currently carrying the session.
    pub fn transport_type(&self) -> TransportType {
        self.esocket.transport_type()
    }

    /// The path of the namespace.
    pub fn ns(&self) -> &str {
        &self.ns.path
    }

    pub(crate) fn close_underlying_transport(&self) {
        if self.esocket.is_closed() {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(id = ?self.id, "closing the engine session");
        self.esocket.close(EngineReason::ClosingServer);
    }

    pub(crate) async fn transport_closed(&self) {
        self.esocket.closed().await
    }

    pub(crate) fn send(&self, packet: Packet) -> Result<(), SocketError> {
        self.send_raw(self.ns.parser().encode(packet))
    }

    /// Send an encoded packet, buffering it while the socket is connecting.
    pub(crate) fn send_raw(&self, data: Encoded) -> Result<(), SocketError> {
        if self.connected() {
            return self.write_now(data);
        }
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        match buffer.as_mut() {
            Some(pending) => {
                pending.push(data);
                Ok(())
            }
            // connected while waiting for the lock
            None if self.connected() => self.write_now(data),
            None => Err(SocketError::Closed),
        }
    }

    fn write_now(&self, data: Encoded) -> Result<(), SocketError> {
        match self.esocket.reserve() {
            Ok(permit) => {
                write_encoded(permit, data);
                Ok(())
            }
            Err(TrySendError::Full(())) => Err(SocketError::InternalChannelFull),
            Err(TrySendError::Closed(())) => Err(SocketError::Closed),
        }
    }

    /// Send the packet accepting the connection and flush every packet buffered before it.
    pub(crate) fn flush_connect(&self, packet: Packet) -> Result<(), SocketError> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_now(self.ns.parser().encode(packet))?;
        for data in buffer.take().into_iter().flatten() {
            if let Err(_e) = self.write_now(data) {
                #[cfg(feature = "tracing")]
                tracing::warn!(id = ?self.id, "dropping buffered packet: {_e}");
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Reject the connection: the buffered packets are dropped and `packet` is sent instead.
    pub(crate) fn reject_connect(&self, packet: Packet) -> Result<(), SocketError> {
        drop(self.buffer.lock().unwrap_or_else(PoisonError::into_inner).take());
        self.write_now(self.ns.parser().encode(packet))
    }

    /// Register an ack receiver for `ack_id` and send the already encoded packet.
    pub(crate) fn send_with_ack_raw(
        &self,
        ack_id: i64,
        data: Encoded,
    ) -> Result<oneshot::Receiver<AckResult>, SocketError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut acks = self.acks.lock().unwrap_or_else(PoisonError::into_inner);
            // receivers of timed out acks are gone
            acks.retain(|_, pending| !pending.is_closed());
            acks.insert(ack_id, tx);
        }
        self.send_raw(data).inspect_err(|_| {
            self.acks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&ack_id);
        })?;
        Ok(rx)
    }

    pub(crate) fn send_with_ack(
        &self,
        mut packet: Packet,
    ) -> Result<oneshot::Receiver<AckResult>, SocketError> {
        let ack_id = self.ns.next_ack_id();
        packet.inner.set_ack_id(ack_id);
        let data = self.ns.parser().encode(packet);
        self.send_with_ack_raw(ack_id, data)
    }

    /// Leave the namespace. Only the first call has an effect.
    ///
    /// The disconnecting handler runs first, then the socket leaves its rooms,
    /// its pending acks resolve with [`SocketError::Closed`] and the disconnect handler runs.
    pub(crate) fn close(self: Arc<Self>, reason: DisconnectReason) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.ns.remove_socket(self.id);

        let Some(handler) = Self::take(&self.on_disconnecting) else {
            return self.finish_close(reason);
        };
        match handler.bind(&self, &reason) {
            Ok(fut) => drop(tokio::spawn(async move {
                fut.await;
                self.finish_close(reason);
            })),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(id = ?self.id, "disconnecting handler not called: {_e}");
                self.finish_close(reason);
            }
        }
    }

    fn finish_close(self: Arc<Self>, reason: DisconnectReason) {
        self.ns.adapter.get_local().del_all(self.id);
        self.acks.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        if let Some(handler) = Self::take(&self.on_disconnect) {
            #[cfg(feature = "tracing")]
            tracing::trace!(id = ?self.id, %reason, "running disconnect handler");
            handler::spawn(&*handler, &self, &reason);
        }
    }

    /// Handles a packet of the client addressed to the namespace.
    pub(crate) fn recv(self: Arc<Self>, packet: PacketData) -> Result<(), Error> {
        match packet {
            PacketData::Event(event, args, ack_id) | PacketData::BinaryEvent(event, args, ack_id) => {
                self.dispatch(&event, args, ack_id);
                Ok(())
            }
            PacketData::EventAck(args, ack_id) | PacketData::BinaryAck(args, ack_id) => {
                self.resolve_ack(args, ack_id);
                Ok(())
            }
            PacketData::Disconnect => {
                self.close(DisconnectReason::ClientNSDisconnect);
                Ok(())
            }
            PacketData::Connect(_) | PacketData::ConnectError(_) => Err(Error::InvalidPacketType),
        }
    }

    fn dispatch(self: Arc<Self>, event: &str, args: Vec<PayloadValue>, ack_id: Option<i64>) {
        let handler = self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .cloned();
        match handler {
            Some(handler) => handler::spawn(&*handler, &self, &EventArgs { args, ack_id }),
            #[cfg(feature = "tracing")]
            None => tracing::debug!(id = ?self.id, %event, "no handler"),
            #[cfg(not(feature = "tracing"))]
            None => (),
        }
    }

    fn resolve_ack(&self, args: Vec<PayloadValue>, ack_id: i64) {
        let pending = self
            .acks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&ack_id);
        if let Some(tx) = pending {
            tx.send(Ok(args)).ok();
        }
    }
}

impl<A: Adapter> fmt::Debug for Socket<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("ns", &self.ns())
            .field("connected", &self.connected())
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

impl<A: Adapter> PartialEq for Socket<A> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[doc(hidden)]
#[cfg(any(test, feature = "__test_harness"))]
impl Socket<LocalAdapter> {
    /// A socket already connected to `ns`, on a transport that goes nowhere.
    pub fn new_dummy(sid: Sid, ns: Arc<Namespace<LocalAdapter>>) -> Arc<Socket<LocalAdapter>> {
        let esocket = relayio_engine::Socket::new_dummy(sid, Box::new(|_, _| ()));
        let socket = Arc::new(Socket::new(ns, esocket, None, SocketIo::new_dummy()));
        let accepted = Packet::connect_ok(socket.ns.path.clone(), sid);
        socket.flush_connect(accepted).ok();
        socket
    }
}
