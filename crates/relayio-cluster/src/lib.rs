#![cfg_attr(docsrs, feature(doc_cfg))]
//! # Cluster adapter for relayio
//!
//! The [`ClusterAdapter`] lets several relayio servers behave as one: broadcasts, room
//! operations, disconnections and acknowledgements reach the sockets of every server.
//! The servers talk through a pub/sub backend abstracted by the [`Driver`](drivers::Driver)
//! trait: publish to a channel, count its subscribers and subscribe to it.
//!
//! ## How it works
//! Every namespace of every server subscribes to three channels:
//! * `{prefix}-request#{path}#`: requests sent to every server.
//! * `{prefix}-request#{path}#{uid}#`: requests targeting this server only.
//! * `{prefix}-response#{path}#{uid}#`: responses to the requests of this server.
//!
//! An operation is first published to the other servers and then applied locally, unless it
//! is flagged as local. A server ignores its own requests. Requests expecting an answer
//! (`rooms`, `fetch_sockets`, `broadcast_with_ack`, `server_side_emit_with_ack`) are registered
//! in a table keyed by request id and resolve once, either when every server answered or
//! when the request timeout elapsed.
//!
//! The number of servers is the number of subscribers of the request channel.
//!
//! ## Example
//! ```
//! # use relayio::{SocketIo, adapter::Emitter, extract::SocketRef};
//! # use relayio_cluster::{ClusterAdapter, ClusterAdapterCtr, drivers::memory::InMemoryDriver};
//! # async fn doc_main() -> Result<(), Box<dyn std::error::Error>> {
//! type Adapter = ClusterAdapter<Emitter>;
//! // Servers built with clones of the same driver are part of the same cluster.
//! let driver = InMemoryDriver::new();
//! let (_svc, io) = SocketIo::builder()
//!     .with_adapter::<Adapter>(ClusterAdapterCtr::new(driver.clone()))
//!     .build_svc();
//! io.ns_init("/", async |socket: SocketRef<Adapter>| {
//!     socket.join("room");
//! })
//! .await?;
//! // Reaches the sockets of every server in "room".
//! io.to("room").emit("hello", "world").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//! * `tracing`: enable logging with [`tracing`](https://docs.rs/tracing) calls
use std::{
    borrow::Cow,
    collections::HashSet,
    fmt,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use drivers::{Driver, MessageStream, memory::InMemoryDriver};
use futures_util::{Stream, StreamExt};
use pending::PendingRequests;
use relayio_core::{
    PayloadValue, Sid, Uid,
    adapter::{
        BroadcastFlags, BroadcastOptions, CoreAdapter, CoreLocalAdapter, LocalAckStream,
        RemoteSocketData, Room, RoomParam, ServerReplies, SocketEmitter,
    },
    errors::{AdapterError, BroadcastError},
    packet::Packet,
};
use request::{
    Op, OpOut, RequestIn, RequestOut, Response, ResponseKind, timeout_to_millis,
};
use stream::ClusterAckStream;
use tokio::task::JoinHandle;

/// Drivers are an abstraction over the pub/sub backend used by the adapter.
/// You can use the provided in-memory implementation or implement your own.
pub mod drivers;

mod pending;
mod request;
mod stream;

/// The data collected before a request timed out.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialData {
    /// Rooms collected from the local server and the servers that answered.
    Rooms(Vec<Room>),
    /// Sockets collected from the local server and the servers that answered.
    Sockets(Vec<RemoteSocketData>),
}

/// Why an operation spanning the cluster failed.
#[derive(thiserror::Error)]
pub enum Error<D: Driver> {
    /// The pub/sub backend failed.
    #[error("backend: {0}")]
    Driver(D::Error),
    /// A message of another server could not be read.
    #[error("undecodable cluster message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    /// A message could not be written.
    #[error("unencodable cluster message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    /// Fewer servers than expected answered before the request timeout.
    #[error("request timeout: {received} of {expected} servers answered")]
    Timeout {
        /// The number of servers addressed
        expected: u16,
        /// The number of servers that answered
        received: u16,
        /// What was collected anyway
        partial: PartialData,
    },
}

impl<D: Driver> fmt::Debug for Error<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut t = f.debug_tuple("Error");
        match self {
            Self::Driver(err) => t.field(err),
            Self::Decode(err) => t.field(err),
            Self::Encode(err) => t.field(err),
            Self::Timeout {
                expected, received, ..
            } => t.field(&(received, expected)),
        }
        .finish()
    }
}

impl<D: Driver> From<Error<D>> for AdapterError {
    fn from(err: Error<D>) -> Self {
        AdapterError::from(Box::new(err) as Box<dyn std::error::Error + Send + Sync>)
    }
}

/// Settings shared by the adapters of every namespace of a server.
#[derive(Debug, Clone)]
pub struct ClusterAdapterConfig {
    /// How long to wait for the other servers to answer a `rooms`, `fetch_sockets` or
    /// `server_side_emit_with_ack` request. 5 seconds by default.
    pub request_timeout: Duration,
    /// Starts the name of every channel, `"relayio"` by default.
    pub prefix: Cow<'static, str>,
    /// Capacity of the queue of remote acks of one `broadcast_with_ack`, 255 by default.
    /// Acks arriving on a full queue are lost.
    pub ack_response_buffer: usize,
    /// Capacity of the queue of answers of the other requests, 255 by default.
    pub stream_buffer: usize,
}

macro_rules! config_setters {
    ($($(#[$doc:meta])* $name:ident($field:ident: $ty:ty);)*) => {
        impl ClusterAdapterConfig {
            /// The default settings.
            pub fn new() -> Self {
                Self::default()
            }
            $(
                $(#[$doc])*
                pub fn $name(self, $field: $ty) -> Self {
                    Self { $field, ..self }
                }
            )*
        }
    };
}

config_setters! {
    /// See [`ClusterAdapterConfig::request_timeout`].
    with_request_timeout(request_timeout: Duration);
    /// See [`ClusterAdapterConfig::ack_response_buffer`].
    with_ack_response_buffer(ack_response_buffer: usize);
    /// See [`ClusterAdapterConfig::stream_buffer`].
    with_stream_buffer(stream_buffer: usize);
}

impl ClusterAdapterConfig {
    /// See [`ClusterAdapterConfig::prefix`].
    pub fn with_prefix(self, prefix: impl Into<Cow<'static, str>>) -> Self {
        let prefix = prefix.into();
        Self { prefix, ..self }
    }
}

impl Default for ClusterAdapterConfig {
    fn default() -> Self {
        const QUEUE: usize = 255;
        ClusterAdapterConfig {
            prefix: "relayio".into(),
            request_timeout: Duration::from_secs(5),
            ack_response_buffer: QUEUE,
            stream_buffer: QUEUE,
        }
    }
}

/// Holds what the adapters of a server share: each namespace builds its own
/// [`ClusterAdapter`] from it.
#[derive(Debug)]
pub struct ClusterAdapterCtr<D = InMemoryDriver> {
    driver: D,
    config: ClusterAdapterConfig,
}

impl<D: Driver> ClusterAdapterCtr<D> {
    /// Create a new adapter constructor with the given driver and the default config.
    pub fn new(driver: D) -> Self {
        Self::new_with_driver(driver, ClusterAdapterConfig::default())
    }
    /// Create a new adapter constructor with the given driver and config.
    ///
    /// You can plug any pub/sub backend by implementing the [`Driver`] trait.
    pub fn new_with_driver(driver: D, config: ClusterAdapterConfig) -> Self {
        ClusterAdapterCtr { config, driver }
    }
}

/// The cluster adapter implementation.
/// It is generic over the [`Driver`] used to communicate with the other servers.
/// And over the [`SocketEmitter`] used to communicate with the local server. This avoids
/// cyclic dependencies between the adapter, `relayio-core` and `relayio` crates.
pub struct ClusterAdapter<E, D = InMemoryDriver> {
    /// The driver shared by every namespace.
    driver: D,
    config: ClusterAdapterConfig,
    /// A unique identifier for this server.
    uid: Uid,
    /// Rooms and sockets of this server.
    local: CoreLocalAdapter<E>,
    /// `{prefix}-request#{path}#`, read by every server.
    all_chan: String,
    /// Requests waiting for answers.
    pending: Arc<PendingRequests>,
    /// The task reading the subscribed channels.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<E, D> fmt::Debug for ClusterAdapter<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterAdapter")
            .field("uid", &self.uid)
            .field("channel", &self.all_chan)
            .field("config", &self.config)
            .finish()
    }
}

enum Message {
    Request(Vec<u8>),
    Response(Vec<u8>),
}

impl<E: SocketEmitter, D: Driver> ClusterAdapter<E, D> {
    /// Where `uid` reads the answers to its requests.
    fn res_chan_of(&self, uid: Uid) -> String {
        let (prefix, path) = (&self.config.prefix, self.local.path());
        format!("{prefix}-response#{path}#{uid}#")
    }

    /// Where `uid` reads the requests addressed to it alone, or the shared channel.
    fn req_chan_of(&self, uid: Option<Uid>) -> String {
        let mut chan = self.all_chan.clone();
        if let Some(uid) = uid {
            chan.push_str(&format!("{uid}#"));
        }
        chan
    }

    /// Applies a request of another server. This server's own requests come back and are skipped.
    fn recv_req(self: &Arc<Self>, item: Vec<u8>) -> Result<(), Error<D>> {
        let req = rmp_serde::from_slice::<RequestIn>(&item)?;
        if req.from != self.uid {
            #[cfg(feature = "tracing")]
            tracing::trace!(?req, "request from another server");
            self.apply(req);
        }
        Ok(())
    }

    fn apply(self: &Arc<Self>, req: RequestIn) {
        let opts = req.opts();
        match req.op {
            Op::Broadcast(p) => self.recv_broadcast(&opts, p),
            Op::BroadcastWithAck(p, timeout) => {
                self.recv_broadcast_with_ack(req.from, req.id, &opts, p, timeout)
            }
            Op::DisconnectSockets => self.recv_disconnect_sockets(&opts),
            Op::AllRooms => {
                let rooms = self.local.rooms(&opts);
                self.spawn_res(req.from, req.id, ResponseKind::AllRooms(rooms));
            }
            Op::AddSockets(rooms) => self.local.add_sockets(&opts, rooms),
            Op::DelSockets(rooms) => self.local.del_sockets(&opts, rooms),
            Op::FetchSockets => {
                let sockets = self.local.fetch_sockets(&opts);
                self.spawn_res(req.from, req.id, ResponseKind::FetchSockets(sockets));
            }
            Op::ServerSideEmit(args) => {
                drop(tokio::spawn(self.local.emitter().server_event(args)));
            }
            Op::ServerSideEmitWithAck(args) => {
                let handled = self.local.emitter().server_event(args);
                let this = self.clone();
                tokio::spawn(async move {
                    let answer = ResponseKind::ServerSideEmit(handled.await);
                    this.spawn_res(req.from, req.id, answer);
                });
            }
        }
    }

    /// Handle a response to one of our requests.
    fn recv_res(&self, item: Vec<u8>) -> Result<(), Error<D>> {
        let res: Response = rmp_serde::from_slice(&item)?;
        let _req = res.req;
        if !self.pending.dispatch(res) {
            #[cfg(feature = "tracing")]
            tracing::trace!(req = ?_req, "response to a resolved request discarded");
        }
        Ok(())
    }

    fn recv_broadcast(&self, opts: &BroadcastOptions, packet: Packet) {
        let _res = self.local.broadcast(packet, opts);
        #[cfg(feature = "tracing")]
        if let Err(e) = _res {
            tracing::warn!(ns = %self.local.path(), "remote broadcast partly failed: {e}");
        }
    }

    fn recv_disconnect_sockets(&self, opts: &BroadcastOptions) {
        let _res = self.local.disconnect_socket(opts);
        #[cfg(feature = "tracing")]
        if let Err(e) = _res {
            tracing::warn!(ns = %self.local.path(), "remote disconnection partly failed: {e}");
        }
    }

    /// Answers with the number of sockets addressed, then with each of their acks.
    fn recv_broadcast_with_ack(
        self: &Arc<Self>,
        origin: Uid,
        req: Sid,
        opts: &BroadcastOptions,
        packet: Packet,
        timeout: Option<u64>,
    ) {
        let (acks, count) =
            self.local
                .broadcast_with_ack(packet, opts, timeout.map(Duration::from_millis));
        let answers = futures_util::stream::once(async move { ResponseKind::BroadcastAckCount(count) })
            .chain(acks.map(|(sid, ack)| ResponseKind::BroadcastAck(sid, ack)));
        let this = self.clone();
        tokio::spawn(async move {
            let mut answers = std::pin::pin!(answers);
            while let Some(answer) = answers.next().await {
                let sent = this.send_res(origin, this.response(req, answer)).await;
                if let Err(_e) = sent {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(ns = %this.local.path(), "acks not forwarded: {_e}");
                    break;
                }
            }
        });
    }

    fn response(&self, req: Sid, kind: ResponseKind) -> Response {
        Response { from: self.uid, req, kind }
    }

    /// Sends an answer in the background.
    fn spawn_res(&self, origin: Uid, req: Sid, kind: ResponseKind) {
        let sending = self.send_res(origin, self.response(req, kind));
        #[cfg(feature = "tracing")]
        let ns = self.local.path().clone();
        tokio::spawn(async move {
            if let Err(_e) = sending.await {
                #[cfg(feature = "tracing")]
                tracing::warn!(%ns, "answer not sent: {_e}");
            }
        });
    }

    /// Publishes `req` to the server `to`, or to every server.
    async fn send_req(&self, req: RequestOut<'_>, to: Option<Uid>) -> Result<(), Error<D>> {
        #[cfg(feature = "tracing")]
        tracing::trace!(?req, ?to, "publishing request");
        let bytes = rmp_serde::to_vec(&req)?;
        let chan = self.req_chan_of(to);
        self.driver.group_send(&chan, bytes).await.map_err(Error::Driver)
    }

    /// Publishes `op` to the other servers, unless the operation stays on this server.
    async fn publish(&self, opts: &BroadcastOptions, op: OpOut<'_>) -> Result<(), Error<D>> {
        if is_local_op(self.uid, opts) {
            return Ok(());
        }
        self.send_req(RequestOut::new(self.uid, op, opts), opts.server_id)
            .await
    }

    /// The future is detached from `self` so it can be spawned.
    fn send_res(
        &self,
        origin: Uid,
        res: Response,
    ) -> impl Future<Output = Result<(), Error<D>>> + Send + 'static {
        #[cfg(feature = "tracing")]
        tracing::trace!(?res, %origin, "answering");
        let encoded = rmp_serde::to_vec(&res);
        let (driver, chan) = (self.driver.clone(), self.res_chan_of(origin));
        async move { driver.group_send(&chan, encoded?).await.map_err(Error::Driver) }
    }

    /// How many other servers answer a request sent with `opts`, zero when it stays local.
    async fn expected_servers(&self, opts: &BroadcastOptions) -> Result<u16, Error<D>> {
        if is_local_op(self.uid, opts) {
            return Ok(0);
        }
        Ok(match opts.server_id {
            Some(id) => u16::from(id != self.uid),
            None => self.server_count().await?.saturating_sub(1),
        })
    }

    async fn subscribe(&self, chan: String) -> Result<MessageStream, Error<D>> {
        #[cfg(feature = "tracing")]
        tracing::trace!(%chan, "subscribing");
        self.driver.subscribe(chan).await.map_err(Error::Driver)
    }

    fn abort_task(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Reads every subscribed channel until the adapter is dropped.
    fn listen(self: &Arc<Self>, mut messages: impl Stream<Item = Message> + Send + Unpin + 'static) {
        let adapter = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(msg) = messages.next().await {
                let Some(adapter) = adapter.upgrade() else {
                    break;
                };
                let handled = match msg {
                    Message::Request(item) => adapter.recv_req(item),
                    Message::Response(item) => adapter.recv_res(item),
                };
                if let Err(_e) = handled {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(ns = %adapter.local.path(), "cluster message dropped: {_e}");
                }
            }
        });
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl<E: SocketEmitter, D: Driver> CoreAdapter<E> for ClusterAdapter<E, D> {
    type Error = Error<D>;
    type State = ClusterAdapterCtr<D>;
    type AckStream = ClusterAckStream<LocalAckStream<E::AckStream>>;

    fn new(ctr: &Self::State, local: CoreLocalAdapter<E>) -> Self {
        let ClusterAdapterCtr { driver, config } = ctr;
        ClusterAdapter {
            all_chan: format!("{}-request#{}#", config.prefix, local.path()),
            uid: local.server_id(),
            driver: driver.clone(),
            config: config.clone(),
            local,
            pending: Arc::default(),
            task: Mutex::default(),
        }
    }

    /// Subscribes to the shared request channel, to the requests for this server and to
    /// the answers for this server.
    async fn init(self: Arc<Self>) -> Result<(), Self::Error> {
        let shared = self.subscribe(self.all_chan.clone()).await?;
        let own = self.subscribe(self.req_chan_of(Some(self.uid))).await?;
        let answers = self.subscribe(self.res_chan_of(self.uid)).await?;
        let messages = futures_util::stream::select_all([
            shared.map(Message::Request).boxed(),
            own.map(Message::Request).boxed(),
            answers.map(Message::Response).boxed(),
        ]);
        self.listen(messages);
        Ok(())
    }

    /// Stops reading the channels, which unsubscribes this server from them.
    async fn close(&self) -> Result<(), Self::Error> {
        #[cfg(feature = "tracing")]
        tracing::debug!(ns = %self.local.path(), "leaving the cluster");
        self.abort_task();
        self.local.close();
        Ok(())
    }

    /// Every server reads the shared request channel: the servers are its subscribers.
    async fn server_count(&self) -> Result<u16, Self::Error> {
        let subscribers = self.driver.group_member_count(&self.all_chan).await;
        let subscribers = subscribers.map_err(Error::Driver)?;
        Ok(u16::try_from(subscribers).unwrap_or(u16::MAX))
    }

    async fn broadcast(&self, packet: Packet, opts: BroadcastOptions) -> Result<(), BroadcastError> {
        self.publish(&opts, Op::Broadcast(&packet))
            .await
            .map_err(AdapterError::from)?;
        self.local.broadcast(packet, &opts)
    }

    /// Merges the acks of the local sockets with the ones of the other servers.
    ///
    /// Each of the `n` other servers answers first with the number of sockets it reached,
    /// then with one answer per ack. The stream knows how many acks to expect once the
    /// `n` counts arrived:
    /// ```text
    ///  this server           server B (2 sockets)     server C (1 socket)
    ///      | --- BroadcastWithAck ---> |                        |
    ///      | --- BroadcastWithAck ------------------------->    |
    ///      | <-- BroadcastAckCount(2)  |                        |
    ///      | <-- BroadcastAckCount(1) --------------------------|
    ///      | <-- BroadcastAck -------- |                        |
    ///      | <-- BroadcastAck ----------------------------------|
    ///      | <-- BroadcastAck -------- |                        |
    /// ```
    ///
    /// The remote side ends after the ack timeout plus the request timeout. Servers or
    /// acks still missing at this point are reported with a single
    /// [`AckItem::Shortfall`](relayio_core::adapter::AckItem::Shortfall) item.
    async fn broadcast_with_ack(
        &self,
        packet: Packet,
        opts: BroadcastOptions,
        timeout: Option<Duration>,
    ) -> Result<Self::AckStream, Self::Error> {
        let expected = self.expected_servers(&opts).await?;
        if expected == 0 {
            let (local, _) = self.local.broadcast_with_ack(packet, &opts, timeout);
            return Ok(ClusterAckStream::new_local(LocalAckStream::new(local)));
        }

        let op = Op::BroadcastWithAck(&packet, timeout_to_millis(timeout));
        let req = RequestOut::new(self.uid, op, &opts);
        // Register before sending, the answers may come back before the send returns.
        let remote = self
            .pending
            .register(req.id, self.config.ack_response_buffer);
        self.send_req(req, opts.server_id).await?;

        let ack_timeout = timeout.unwrap_or_else(|| self.local.emitter().ack_timeout());
        let (local, _) = self.local.broadcast_with_ack(packet, &opts, timeout);
        Ok(ClusterAckStream::new(
            LocalAckStream::new(local),
            remote,
            ack_timeout + self.config.request_timeout,
            expected,
        ))
    }

    async fn add_sockets(&self, opts: BroadcastOptions, rooms: impl RoomParam) -> Result<(), Self::Error> {
        let rooms = Vec::from_iter(rooms.into_room_iter());
        self.publish(&opts, Op::AddSockets(&rooms)).await?;
        self.local.add_sockets(&opts, rooms);
        Ok(())
    }

    async fn del_sockets(&self, opts: BroadcastOptions, rooms: impl RoomParam) -> Result<(), Self::Error> {
        let rooms = Vec::from_iter(rooms.into_room_iter());
        self.publish(&opts, Op::DelSockets(&rooms)).await?;
        self.local.del_sockets(&opts, rooms);
        Ok(())
    }

    async fn disconnect_socket(&self, opts: BroadcastOptions) -> Result<(), BroadcastError> {
        self.publish(&opts, Op::DisconnectSockets)
            .await
            .map_err(AdapterError::from)?;
        self.local.disconnect_socket(&opts).map_err(BroadcastError::from)
    }

    /// The union of the rooms of this server and of the servers that answered in time.
    async fn rooms(&self, opts: BroadcastOptions) -> Result<Vec<Room>, Self::Error> {
        let local = self.local.rooms(&opts);
        let (rooms, missing) = self
            .gather(&opts, Op::AllRooms, ResponseKind::into_rooms)
            .await?;
        let rooms: HashSet<Room> = local.into_iter().chain(rooms.into_iter().flatten()).collect();
        let rooms = Vec::from_iter(rooms);
        match missing {
            None => Ok(rooms),
            Some((expected, received)) => Err(Error::Timeout {
                expected,
                received,
                partial: PartialData::Rooms(rooms),
            }),
        }
    }

    async fn fetch_sockets(&self, opts: BroadcastOptions) -> Result<Vec<RemoteSocketData>, Self::Error> {
        let mut sockets = self.local.fetch_sockets(&opts);
        let (remote, missing) = self
            .gather(&opts, Op::FetchSockets, ResponseKind::into_fetch_sockets)
            .await?;
        sockets.extend(remote.into_iter().flatten());
        match missing {
            None => Ok(sockets),
            Some((expected, received)) => Err(Error::Timeout {
                expected,
                received,
                partial: PartialData::Sockets(sockets),
            }),
        }
    }

    async fn server_side_emit(&self, args: Vec<PayloadValue>) -> Result<(), Self::Error> {
        let req = RequestOut::without_opts(self.uid, Op::ServerSideEmit(&args));
        self.send_req(req, None).await
    }

    /// The replies of the servers that did not answer before the timeout are missing
    /// from the returned [`ServerReplies`].
    async fn server_side_emit_with_ack(
        &self,
        args: Vec<PayloadValue>,
        timeout: Option<Duration>,
    ) -> Result<ServerReplies<Vec<PayloadValue>>, Self::Error> {
        let expected = self.server_count().await?.saturating_sub(1);
        if expected == 0 {
            return Ok(ServerReplies::default());
        }
        let req = RequestOut::without_opts(self.uid, Op::ServerSideEmitWithAck(&args));
        let pending = self.pending.register(req.id, self.config.stream_buffer);
        self.send_req(req, None).await?;

        let timeout = timeout.unwrap_or(self.config.request_timeout);
        Ok(pending
            .collect(expected, timeout, ResponseKind::into_server_event)
            .await)
    }

    fn get_local(&self) -> &CoreLocalAdapter<E> {
        &self.local
    }
}

impl<E: SocketEmitter, D: Driver> ClusterAdapter<E, D> {
    /// Asks the servers addressed by `opts` and collects their answers until all of them
    /// answered or the request timeout elapsed. The `(expected, received)` counts are
    /// returned when some are missing.
    async fn gather<T>(
        &self,
        opts: &BroadcastOptions,
        op: OpOut<'_>,
        extract: fn(ResponseKind) -> Option<T>,
    ) -> Result<(Vec<T>, Option<(u16, u16)>), Error<D>> {
        let expected = self.expected_servers(opts).await?;
        if expected == 0 {
            return Ok((Vec::new(), None));
        }
        let req = RequestOut::new(self.uid, op, opts);
        let pending = self.pending.register(req.id, self.config.stream_buffer);
        self.send_req(req, opts.server_id).await?;

        let answers = pending
            .collect(expected, self.config.request_timeout, extract)
            .await
            .replies;
        let received = u16::try_from(answers.len()).unwrap_or(u16::MAX);
        Ok((answers, (received < expected).then_some((expected, received))))
    }
}

impl<E, D> Drop for ClusterAdapter<E, D> {
    fn drop(&mut self) {
        let task = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// A local operation is either flagged as local or targets a single socket of this server.
#[inline]
fn is_local_op(uid: Uid, opts: &BroadcastOptions) -> bool {
    opts.has_flag(BroadcastFlags::Local)
        || (!opts.has_flag(BroadcastFlags::Broadcast)
            && opts.server_id.is_none_or(|id| id == uid)
            && opts.rooms.is_empty()
            && opts.sid.is_some())
}
