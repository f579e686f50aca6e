//! Namespaces: the sockets connected under one path, their connect handler and their adapter.
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{
        Arc, PoisonError, RwLock, Weak,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use futures_util::{FutureExt, future::BoxFuture};
use relayio_core::{
    PayloadValue, Sid, Str,
    adapter::CoreLocalAdapter,
    packet::{Packet, PacketData},
    value::{from_args, to_args},
};
use relayio_engine::{DisconnectReason as EngineReason, Socket as EngineSocket};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    SocketIo,
    adapter::Adapter,
    client::SocketData,
    errors::{ConnectFail, Error},
    handler::{self, BoxedConnectHandler, ConnectHandler},
    config::SocketIoConfig,
    parser::Parser,
    socket::{DisconnectReason, Socket},
};

mod emitter;

pub use emitter::Emitter;

type ServerEventHandler =
    Box<dyn Fn(Vec<PayloadValue>) -> BoxFuture<'static, Vec<PayloadValue>> + Send + Sync>;

/// Builds the namespaces matched by a dynamic namespace entry. They share its handler.
pub(crate) struct NamespaceCtr<A: Adapter>(BoxedConnectHandler<A>);

impl<A: Adapter> NamespaceCtr<A> {
    pub(crate) fn new<C, T>(handler: C) -> Self
    where
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        NamespaceCtr(handler::boxed_connect(handler))
    }

    pub(crate) fn get_new_ns(&self, path: Str, state: &A::State, config: &SocketIoConfig) -> Arc<Namespace<A>> {
        Namespace::new_boxed(path, self.0.clone(), state, config)
    }
}

/// A namespace, with its connect handler, its sockets and its adapter.
pub struct Namespace<A: Adapter> {
    /// Starts with `/`
    pub path: Str,
    pub(crate) adapter: Arc<A>,
    handler: BoxedConnectHandler<A>,
    sockets: RwLock<HashMap<Sid, Arc<Socket<A>>>>,
    parser: Parser,
    ack_timeout: Duration,
    /// The last ack id handed out
    ack_counter: AtomicI64,
    server_handler: RwLock<Option<ServerEventHandler>>,
}

impl<A: Adapter> Namespace<A> {
    pub(crate) fn new<C, T>(path: Str, handler: C, state: &A::State, config: &SocketIoConfig) -> Arc<Self>
    where
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        Self::new_boxed(path, handler::boxed_connect(handler), state, config)
    }

    /// The adapter gets an [`Emitter`] pointing back to the namespace.
    pub(crate) fn new_boxed(
        path: Str,
        handler: BoxedConnectHandler<A>,
        state: &A::State,
        config: &SocketIoConfig,
    ) -> Arc<Self> {
        let SocketIoConfig {
            parser,
            ack_timeout,
            server_id,
            ..
        } = *config;
        Arc::new_cyclic(|me: &Weak<Self>| {
            let emitter = Emitter {
                ns: me.clone(),
                path: path.clone(),
                parser,
                server_id,
                ack_timeout,
            };
            Namespace {
                adapter: Arc::new(A::new(state, CoreLocalAdapter::new(emitter))),
                path,
                handler,
                parser,
                ack_timeout,
                sockets: RwLock::default(),
                ack_counter: AtomicI64::new(0),
                server_handler: RwLock::new(None),
            }
        })
    }

    /// Runs the middlewares, then admits the socket.
    ///
    /// A rejected socket gets a `connect_error` packet with the middleware error, and the
    /// packets it emitted meanwhile are dropped. An admitted socket joins the namespace
    /// and its own room, gets the `CONNECT` packet followed by what it emitted
    /// meanwhile, then the connect handler runs.
    pub(crate) async fn connect(
        self: Arc<Self>,
        esocket: Arc<EngineSocket<SocketData>>,
        auth: Option<PayloadValue>,
        io: SocketIo<A>,
    ) -> Result<(), ConnectFail> {
        let socket = Arc::new(Socket::new(self.clone(), esocket.clone(), auth.clone(), io));

        if let Err(rejection) = self.handler.guard(socket.clone(), &auth).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(ns = %self.path, sid = ?socket.id, "connection rejected: {rejection}");
            let refusal = Packet::connect_error(self.path.clone(), rejection.to_string());
            if socket.reject_connect(refusal).is_err() {
                esocket.close(EngineReason::PacketParsingError);
            }
            return Err(ConnectFail);
        }

        self.sockets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(socket.id, socket.clone());
        let local = self.adapter.get_local();
        local.add_all(socket.id, socket.id);

        if let Err(_e) = socket.flush_connect(Packet::connect_ok(self.path.clone(), socket.id)) {
            #[cfg(feature = "tracing")]
            tracing::debug!(ns = %self.path, sid = ?socket.id, "connect packet not sent: {_e}");
            self.remove_socket(socket.id);
            local.del_all(socket.id);
            esocket.close(EngineReason::PacketParsingError);
            return Err(ConnectFail);
        }

        match self.handler.connected(&socket, &auth) {
            Ok(handled) => drop(tokio::spawn(handled)),
            #[cfg(feature = "tracing")]
            Err(e) => tracing::warn!(ns = %self.path, sid = ?socket.id, "connect handler not called: {e}"),
            #[cfg(not(feature = "tracing"))]
            Err(_) => (),
        }
        Ok(())
    }

    /// Forgets the socket. Its rooms are left by the socket itself.
    pub(crate) fn remove_socket(&self, sid: Sid) {
        #[cfg(feature = "tracing")]
        tracing::trace!(?sid, ns = %self.path, "socket left");
        let mut sockets = self.sockets.write().unwrap_or_else(PoisonError::into_inner);
        sockets.remove(&sid);
    }

    /// A connect packet for an already connected socket is a protocol violation.
    pub(crate) fn recv(&self, sid: Sid, packet: PacketData) -> Result<(), Error> {
        if let PacketData::Connect(_) = packet {
            return Err(Error::InvalidPacketType);
        }
        self.get_socket(sid)?.recv(packet)
    }

    pub(crate) fn get_socket(&self, sid: Sid) -> Result<Arc<Socket<A>>, Error> {
        let sockets = self.sockets.read().unwrap_or_else(PoisonError::into_inner);
        sockets.get(&sid).cloned().ok_or(Error::SocketGone(sid))
    }

    pub(crate) fn get_sockets(&self) -> Vec<Arc<Socket<A>>> {
        let sockets = self.sockets.read().unwrap_or_else(PoisonError::into_inner);
        sockets.values().cloned().collect()
    }

    /// Allocates a new ack id, unique within the namespace.
    pub(crate) fn next_ack_id(&self) -> i64 {
        1 + self.ack_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn parser(&self) -> Parser {
        self.parser
    }

    pub(crate) fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Sets the handler answering the events sent by the other servers of the cluster.
    /// A reply that cannot be decoded or encoded is logged and answered with no arguments.
    pub(crate) fn on_server_event<F, Fut, T, R>(&self, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        T: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let handler: ServerEventHandler = Box::new(move |args| {
            let data = match from_args::<T>(args) {
                Ok(data) => data,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("server event dropped, undecodable arguments: {_e}");
                    return emitter::no_reply();
                }
            };
            handler(data)
                .map(|reply| {
                    to_args(&reply).unwrap_or_else(|_e| {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("server event reply dropped: {_e}");
                        Vec::new()
                    })
                })
                .boxed()
        });
        *self
            .server_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Closes every socket, then the adapter.
    ///
    /// When the server shuts down the engine sessions are closed and awaited, the engine
    /// reporting each socket. Otherwise each socket gets a `DISCONNECT` packet and leaves.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self), fields(ns = %self.path)))]
    pub(crate) async fn close(&self, reason: DisconnectReason) {
        let sockets = self.get_sockets();
        #[cfg(feature = "tracing")]
        tracing::debug!(count = sockets.len(), "closing the sockets");

        match reason {
            DisconnectReason::ClosingServer => {
                sockets.iter().for_each(|s| s.close_underlying_transport());
                futures_util::future::join_all(sockets.iter().map(|s| s.transport_closed())).await;
            }
            reason => {
                for socket in sockets {
                    socket.send(Packet::disconnect(self.path.clone())).ok();
                    socket.close(reason);
                }
            }
        }

        if let Err(_e) = self.adapter.close().await {
            #[cfg(feature = "tracing")]
            tracing::warn!("adapter not closed: {_e}");
        }
    }
}

impl<A: Adapter> fmt::Debug for Namespace<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sockets = self.sockets.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Namespace")
            .field("path", &self.path)
            .field("sockets", &sockets.len())
            .finish_non_exhaustive()
    }
}

#[doc(hidden)]
#[cfg(any(test, feature = "__test_harness"))]
impl Namespace<crate::adapter::LocalAdapter> {
    /// A `/` namespace where the given sockets are connected.
    pub fn new_dummy<const S: usize>(sids: [Sid; S]) -> Arc<Self> {
        use crate::adapter::CoreAdapter;
        let ns = Namespace::new(Str::from("/"), async || (), &(), &SocketIoConfig::default());
        for sid in sids {
            let socket = Socket::new_dummy(sid, ns.clone());
            ns.sockets
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(sid, socket);
            ns.adapter.get_local().add_all(sid, sid);
        }
        ns
    }

    /// Forgets every socket without notifying them.
    pub fn clean_dummy_sockets(&self) {
        let mut sockets = self.sockets.write().unwrap_or_else(PoisonError::into_inner);
        sockets.clear();
    }
}
