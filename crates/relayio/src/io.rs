use std::{borrow::Cow, fmt, future::Future, sync::Arc, time::Duration};

use relayio_core::{
    Sid, Str,
    adapter::{CoreAdapter, Room, RoomParam, ServerReplies},
    value::{from_args, to_args},
};
use relayio_engine::service::NotFoundService;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    NsInsertError, SocketIoBuilder, SocketIoConfig,
    ack::AckStream,
    adapter::{Adapter, LocalAdapter},
    client::Client,
    errors::{AckError, AdapterError, BroadcastError, EmitWithAckError, RemoteActionError},
    extract::SocketRef,
    handler::ConnectHandler,
    layer::SocketIoLayer,
    operators::BroadcastOperators,
    service::SocketIoService,
    socket::RemoteSocket,
};

/// Methods forwarded to the operators of the root namespace.
macro_rules! on_root {
    () => {};
    ($(#[$doc:meta])* fn $name:ident($($arg:ident: $ty:ty),*) -> $ret:ty; $($rest:tt)*) => {
        $(#[$doc])*
        #[inline]
        pub fn $name(&self $(, $arg: $ty)*) -> $ret {
            self.root().$name($($arg),*)
        }
        on_root!($($rest)*);
    };
    ($(#[$doc:meta])* async fn $name:ident($($arg:ident: $ty:ty),*) -> $ret:ty; $($rest:tt)*) => {
        $(#[$doc])*
        #[inline]
        pub async fn $name(&self $(, $arg: $ty)*) -> $ret {
            self.root().$name($($arg),*).await
        }
        on_root!($($rest)*);
    };
}

/// A handle on the whole server. Cloning it is cheap.
///
/// It registers the namespaces, and its shortcuts (`to`, `emit`, `sockets`...) act on
/// the root namespace `/`. Without a root namespace they select no socket.
/// It is also an [extractor](crate::extract) of every handler.
pub struct SocketIo<A: Adapter = LocalAdapter>(Arc<Client<A>>);

impl SocketIo<LocalAdapter> {
    /// Starts a [`SocketIoBuilder`].
    pub fn builder() -> SocketIoBuilder {
        SocketIoBuilder::new()
    }

    /// A standalone service with the default settings, answering `404` outside of its path.
    pub fn new_svc() -> (SocketIoService<NotFoundService>, Self) {
        Self::builder().build_svc()
    }

    /// A service with the default settings, wrapping `svc`.
    pub fn new_inner_svc<S: Clone>(svc: S) -> (SocketIoService<S>, Self) {
        Self::builder().build_with_inner_svc(svc)
    }

    /// A tower layer with the default settings.
    pub fn new_layer() -> (SocketIoLayer, Self) {
        Self::builder().build_layer()
    }
}

impl<A: Adapter> SocketIo<A> {
    /// The settings of the server.
    #[inline]
    pub fn config(&self) -> &SocketIoConfig {
        &self.0.config
    }

    /// # Serve a namespace
    ///
    /// `callback` runs for every socket joining `path`. A missing leading `/` is added.
    /// Sockets may join as soon as the adapter of the namespace is ready,
    /// [`SocketIo::ns_init`] waits for it instead.
    ///
    /// ```
    /// # use relayio::{SocketIo, extract::{Data, SocketRef}};
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/chat", async |socket: SocketRef, Data(name): Data<String>| {
    ///     socket.extensions.insert(name);
    /// });
    /// ```
    #[inline]
    pub fn ns<C, T>(&self, path: impl Into<Cow<'static, str>>, callback: C)
    where
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        self.0.add_ns(ns_path(path.into()), callback);
    }

    /// Like [`SocketIo::ns`], returning once the adapter is ready or failed.
    pub async fn ns_init<C, T>(
        &self,
        path: impl Into<Cow<'static, str>>,
        callback: C,
    ) -> Result<(), A::Error>
    where
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        self.0.add_ns_init(ns_path(path.into()), callback).await
    }

    /// # Serve every namespace matching a pattern
    ///
    /// Patterns follow the [`matchit`] syntax, like `/room/{id}`. Each matching path gets its own
    /// namespace on first use. Static namespaces are tried first, then patterns in the order
    /// they were added.
    ///
    /// # Errors
    /// The pattern does not parse.
    #[inline]
    pub fn dyn_ns<C, T>(&self, path: impl Into<String>, callback: C) -> Result<(), NsInsertError>
    where
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        self.0.add_dyn_ns(path.into(), callback)
    }

    /// Like [`SocketIo::dyn_ns`], matching paths with any predicate.
    ///
    /// ```
    /// # use relayio::{SocketIo, extract::SocketRef};
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.dyn_ns_with(|path: &str| path.starts_with("/tenant-"), async |socket: SocketRef| {
    ///     println!("connected to {}", socket.ns());
    /// });
    /// ```
    #[inline]
    pub fn dyn_ns_with<F, C, T>(&self, predicate: F, callback: C)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        self.0.add_dyn_ns_with(predicate, callback);
    }

    /// Removes a namespace. Its sockets are disconnected with
    /// [`DisconnectReason::ServerNSDisconnect`](crate::socket::DisconnectReason::ServerNSDisconnect).
    #[inline]
    pub async fn delete_ns(&self, path: impl AsRef<str>) {
        self.0.delete_ns(path.as_ref()).await;
    }

    /// Disconnects every socket with
    /// [`DisconnectReason::ClosingServer`](crate::socket::DisconnectReason::ClosingServer)
    /// and removes every namespace.
    #[inline]
    pub async fn close(&self) {
        self.0.close().await;
    }

    /// One operator per namespace.
    pub fn nsps(&self) -> Vec<BroadcastOperators<A>> {
        let nsps = self.0.nsps();
        nsps.into_iter().map(BroadcastOperators::from_ns).collect()
    }

    /// The operators of a namespace, if it exists.
    #[inline]
    pub fn of(&self, path: impl AsRef<str>) -> Option<BroadcastOperators<A>> {
        self.0.get_ns(path.as_ref()).map(BroadcastOperators::from_ns)
    }

    on_root! {
        /// Root sockets in any of `rooms`.
        fn to(rooms: impl RoomParam) -> BroadcastOperators<A>;
        /// Same as [`SocketIo::to`].
        fn within(rooms: impl RoomParam) -> BroadcastOperators<A>;
        /// Root sockets outside of `rooms`.
        fn except(rooms: impl RoomParam) -> BroadcastOperators<A>;
        /// Root sockets of this server only.
        fn local() -> BroadcastOperators<A>;
        /// Overrides the acknowledgement timeout.
        fn timeout(timeout: Duration) -> BroadcastOperators<A>;
        /// Skips the sockets with a full buffer instead of failing.
        fn volatile() -> BroadcastOperators<A>;
        /// Root sockets of this server.
        fn sockets() -> Vec<SocketRef<A>>;
        /// A root socket of this server.
        fn get_socket(sid: Sid) -> Option<SocketRef<A>>;
        /// Root sockets of the whole cluster.
        async fn fetch_sockets() -> Result<Vec<RemoteSocket<A>>, A::Error>;
        /// Disconnects every root socket.
        async fn disconnect() -> Result<(), BroadcastError>;
        /// Adds every root socket to `rooms`.
        async fn join(rooms: impl RoomParam) -> Result<(), A::Error>;
        /// Removes every root socket from `rooms`.
        async fn leave(rooms: impl RoomParam) -> Result<(), A::Error>;
        /// Rooms of the root namespace, across the cluster.
        async fn rooms() -> Result<Vec<Room>, A::Error>;
    }

    /// Every root socket.
    #[inline]
    pub fn broadcast(&self) -> BroadcastOperators<A> {
        self.root()
    }

    /// Emits `data` to every root socket.
    #[inline]
    pub async fn emit<T>(&self, event: impl AsRef<str>, data: &T) -> Result<(), BroadcastError>
    where
        T: ?Sized + Serialize,
    {
        self.root().emit(event, data).await
    }

    /// Emits `data` to every root socket and streams their acknowledgements.
    #[inline]
    pub async fn emit_with_ack<T, V>(
        &self,
        event: impl AsRef<str>,
        data: &T,
    ) -> Result<AckStream<V, A::AckStream>, EmitWithAckError>
    where
        T: ?Sized + Serialize,
        V: DeserializeOwned,
    {
        self.root().emit_with_ack(event, data).await
    }

    /// # Emit to the other servers of the cluster
    ///
    /// The data reaches the [`on_server_event`](SocketIo::on_server_event) handler of the other
    /// servers. Nothing is sent with the [`LocalAdapter`].
    pub async fn server_side_emit<T: ?Sized + Serialize>(
        &self,
        data: &T,
    ) -> Result<(), RemoteActionError> {
        let args = to_args(data)?;
        let adapter = self.root_adapter();
        adapter.server_side_emit(args).await.map_err(Into::<AdapterError>::into)?;
        Ok(())
    }

    /// # Emit to the other servers of the cluster and collect what they answer
    ///
    /// Answers are decoded one by one. [`ServerReplies::expected`] counts the addressed servers,
    /// the ones missing from the replies timed out.
    pub async fn server_side_emit_with_ack<T: ?Sized + Serialize, V: DeserializeOwned>(
        &self,
        data: &T,
    ) -> Result<ServerReplies<Result<V, AckError>>, RemoteActionError> {
        let args = to_args(data)?;
        let adapter = self.root_adapter();
        let ServerReplies { expected, replies } = adapter
            .server_side_emit_with_ack(args, None)
            .await
            .map_err(Into::<AdapterError>::into)?;
        let replies = replies
            .into_iter()
            .map(|args| from_args(args).map_err(|e| AckError::Decode(e.to_string())))
            .collect();
        Ok(ServerReplies { expected, replies })
    }

    /// # Answer the events of the other servers
    ///
    /// The returned value goes back to the emitter when it waits for answers.
    /// Setting a handler replaces the previous one. Without a root namespace it is ignored.
    ///
    /// ```
    /// # use relayio::SocketIo;
    /// let (_svc, io) = SocketIo::new_svc();
    /// io.ns("/", async || {});
    /// io.on_server_event(async |count: usize| count + 1);
    /// ```
    pub fn on_server_event<F, Fut, T, R>(&self, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        if let Some(ns) = self.0.get_ns("/") {
            ns.on_server_event(handler);
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!("server event handler ignored, the root namespace is not defined");
        }
    }

    fn root_adapter(&self) -> Arc<A> {
        let ns = self.0.get_ns("/");
        let ns = ns.unwrap_or_else(|| self.0.detached_ns(Str::from("/")));
        ns.adapter.clone()
    }

    /// Without a root namespace, a local operator on a detached namespace that selects nothing.
    fn root(&self) -> BroadcastOperators<A> {
        if let Some(ns) = self.0.get_ns("/") {
            return BroadcastOperators::from_ns(ns);
        }
        #[cfg(feature = "tracing")]
        tracing::warn!("the root namespace is not defined, no socket is selected");
        BroadcastOperators::from_ns(self.0.detached_ns(Str::from("/"))).local()
    }
}

fn ns_path(path: Cow<'static, str>) -> Str {
    match path.starts_with('/') {
        true => Str::from(path),
        false => Str::from(format!("/{path}")),
    }
}

impl<A: Adapter> Clone for SocketIo<A> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<A: Adapter> From<Arc<Client<A>>> for SocketIo<A> {
    fn from(client: Arc<Client<A>>) -> Self {
        Self(client)
    }
}

impl<A: Adapter> fmt::Debug for SocketIo<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SocketIo({:?})", self.0)
    }
}

#[cfg(any(test, feature = "__test_harness"))]
impl SocketIo<LocalAdapter> {
    /// A server without transport, used by the dummy sockets.
    #[doc(hidden)]
    pub fn new_dummy() -> Self {
        SocketIo(Arc::new(Client::new(SocketIoConfig::default(), ())))
    }
}

/// The client end of a dummy session: packets to the server, packets from the server.
#[cfg(feature = "__test_harness")]
type DummyClient = (
    tokio::sync::mpsc::Sender<relayio_engine::Packet>,
    tokio::sync::mpsc::Receiver<relayio_engine::Packet>,
);

#[cfg(feature = "__test_harness")]
impl<A: Adapter> SocketIo<A> {
    /// Connects a fake client to `ns`. It returns the channels feeding and draining its session.
    #[doc(hidden)]
    pub async fn new_dummy_sock(&self, ns: &'static str, auth: impl Serialize) -> DummyClient {
        self.0.clone().new_dummy_sock(ns, auth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> SocketIo {
        SocketIo::new_svc().1
    }

    #[tokio::test]
    async fn root_shortcuts() {
        let io = server();
        io.ns("/", async || {});
        assert!(io.0.get_ns("/").is_some());
        assert!(io.sockets().is_empty());
        assert!(io.to("room").sockets().is_empty());
    }

    #[tokio::test]
    async fn missing_root_selects_no_socket() {
        let io = server();
        assert!(io.sockets().is_empty());
        assert!(io.emit("event", "data").await.is_ok());
        assert!(io.rooms().await.unwrap().is_empty());
        assert!(io.get_socket(Sid::new()).is_none());
    }

    #[tokio::test]
    async fn paths_get_a_leading_slash() {
        let io = server();
        io.ns("test", async || {});
        assert!(io.of("/test").is_some());
        assert!(io.of("/test2").is_none());
        assert_eq!(io.nsps().len(), 1);
    }

    #[tokio::test]
    async fn ns_init_waits_for_the_adapter() {
        let io = server();
        io.ns_init("/init", async || {}).await.unwrap();
        assert!(io.of("/init").is_some());
    }

    #[tokio::test]
    async fn dyn_ns_rejects_bad_patterns() {
        let io = server();
        assert!(io.dyn_ns("/admin/{id}", async || {}).is_ok());
        assert!(io.dyn_ns("/admin/{}", async || {}).is_err());
    }

    #[tokio::test]
    async fn lone_server_has_no_peers() {
        let io = server();
        io.ns("/", async || {});
        io.server_side_emit(&1).await.unwrap();
        let replies = io.server_side_emit_with_ack::<_, usize>(&1).await.unwrap();
        assert!(replies.replies.is_empty());
        assert_eq!(replies.expected, 0);
        assert!(replies.is_complete());
    }
}
