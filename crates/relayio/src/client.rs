//! The engine.io handler of the server: it decodes the packets of every session and hands
//! them to their namespace.
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, Weak},
};

use bytes::Bytes;
use futures_util::FutureExt;
use relayio_core::{
    PayloadValue, Sid, Str,
    adapter::CoreAdapter,
    packet::{Packet, PacketData},
    parser::{Parse, ParserState},
};
use relayio_engine::{
    EngineIo,
    handler::EngineIoHandler,
    socket::{DisconnectReason as EngineReason, Socket as EngineSocket},
};
use tokio::sync::oneshot;

use crate::{
    SocketIo,
    adapter::Adapter,
    config::SocketIoConfig,
    errors::{Error, ParseError},
    handler::ConnectHandler,
    ns::{Namespace, NamespaceCtr},
    parser::Parser,
    socket::{DisconnectReason, write_encoded},
};

type Session = Arc<EngineSocket<SocketData>>;
type NsPredicate = Box<dyn Fn(&str) -> bool + Send + Sync + 'static>;

/// Routes the engine.io sessions to their namespaces.
pub struct Client<A: Adapter> {
    pub(crate) config: SocketIoConfig,
    nsps: RwLock<HashMap<Str, Arc<Namespace<A>>>>,
    /// Checked in insertion order when a socket connects to an unknown namespace.
    dyn_nsps: RwLock<Vec<(NsPredicate, NamespaceCtr<A>)>>,
    adapter_state: A::State,
    engine: OnceLock<Weak<EngineIo<Client<A>>>>,
}

impl<A: Adapter> Client<A> {
    pub(crate) fn new(config: SocketIoConfig, adapter_state: A::State) -> Self {
        Client {
            config,
            nsps: RwLock::default(),
            dyn_nsps: RwLock::default(),
            adapter_state,
            engine: OnceLock::new(),
        }
    }

    /// Binds the engine serving this client so it can be closed with [`Client::close`].
    pub(crate) fn set_engine(&self, engine: &Arc<EngineIo<Client<A>>>) {
        self.engine.set(Arc::downgrade(engine)).ok();
    }

    pub(crate) fn parser(&self) -> Parser {
        self.config.parser
    }

    /// A connect packet: the session joins `path` if a namespace, static or dynamic, serves it.
    fn join_ns(self: &Arc<Self>, path: &str, auth: Option<PayloadValue>, session: &Session) {
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = ?session.id, ns = path, "joining namespace");

        let io = SocketIo::from(self.clone());
        if let Some(ns) = self.get_ns(path) {
            tokio::spawn(join(ns, session.clone(), auth, io));
            return;
        }
        let Some(ns) = self.new_dyn_ns(path) else {
            return self.refuse(session, Str::from(path.to_owned()));
        };
        let this = self.clone();
        let session = session.clone();
        tokio::spawn(async move {
            match ns.adapter.clone().init().await {
                Ok(()) => join(ns, session, auth, io).await,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(ns = %ns.path, "adapter init failed: {_e}");
                    this.nsps
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&ns.path);
                    this.refuse(&session, ns.path.clone());
                }
            }
        });
    }

    fn refuse(&self, session: &Session, path: Str) {
        let packet = Packet::connect_error(path, "Invalid namespace");
        let data = self.parser().encode(packet);
        match session.reserve() {
            Ok(permit) => write_encoded(permit, data),
            #[cfg(feature = "tracing")]
            Err(e) => tracing::warn!(sid = ?session.id, "connect error not sent: {e}"),
            #[cfg(not(feature = "tracing"))]
            Err(_) => (),
        }
    }

    /// Instantiates and registers the namespace matching the first dynamic entry.
    /// Concurrent connections to the same path share the namespace created first.
    fn new_dyn_ns(&self, path: &str) -> Option<Arc<Namespace<A>>> {
        let dyn_nsps = self.dyn_nsps.read().unwrap_or_else(PoisonError::into_inner);
        let (_, ctr) = dyn_nsps.iter().find(|(matches, _)| matches(path))?;

        let mut nsps = self.nsps.write().unwrap_or_else(PoisonError::into_inner);
        let ns = nsps
            .entry(Str::from(path.to_owned()))
            .or_insert_with_key(|path| ctr.get_new_ns(path.clone(), &self.adapter_state, &self.config));
        Some(ns.clone())
    }

    /// Hands a decoded packet to its namespace. Packets for unknown namespaces are dropped.
    fn forward(&self, packet: Packet, sid: Sid) -> Result<(), Error> {
        match self.get_ns(&packet.ns) {
            Some(ns) => ns.recv(sid, packet.inner),
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?sid, ns = %packet.ns, "packet for an unknown namespace");
                Ok(())
            }
        }
    }

    fn dispatch(self: &Arc<Self>, packet: Result<Packet, ParseError>, session: Session) {
        let packet = match packet {
            Ok(packet) => packet,
            Err(ParseError::NeedsMoreBinaryData) => return,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(sid = ?session.id, "undecodable packet: {_e}");
                return session.close(EngineReason::PacketParsingError);
            }
        };
        #[cfg(feature = "tracing")]
        tracing::trace!(sid = ?session.id, ?packet, "packet received");

        let Packet { ns, inner } = packet;
        let res = match inner {
            PacketData::Connect(auth) => {
                self.join_ns(&ns, auth, &session);
                Ok(())
            }
            inner => self.forward(Packet { ns, inner }, session.id),
        };
        if let Err(err) = res {
            #[cfg(feature = "tracing")]
            tracing::debug!(sid = ?session.id, "packet rejected: {err}");
            if let Some(reason) = err.closing_reason() {
                session.close(reason);
            }
        }
    }

    /// Closes the session unless it joins a namespace within [`SocketIoConfig::connect_timeout`].
    fn arm_connect_timeout(&self, session: Session) {
        let (tx, rx) = oneshot::channel();
        *session
            .data
            .joined_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);
        let timeout = self.config.connect_timeout;
        tokio::spawn(async move {
            if tokio::time::timeout(timeout, rx).await.is_err() {
                #[cfg(feature = "tracing")]
                tracing::debug!(sid = ?session.id, "no namespace joined in time");
                session.close(EngineReason::TransportClose);
            }
        });
    }

    /// Adds a new namespace handler.
    /// The namespace is reachable once its adapter is initialized,
    /// synchronously for adapters that are ready right away.
    pub(crate) fn add_ns<C, T>(self: &Arc<Self>, path: Str, callback: C)
    where
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        #[cfg(feature = "tracing")]
        tracing::debug!(ns = %path, "adding namespace");

        let ns = Namespace::new(path, callback, &self.adapter_state, &self.config);
        let mut init = Box::pin(ns.adapter.clone().init());
        if let Some(res) = (&mut init).now_or_never() {
            return self.register_ns(ns, res);
        }
        let this = self.clone();
        tokio::spawn(async move {
            let res = init.await;
            this.register_ns(ns, res);
        });
    }

    /// Adds a new namespace handler and waits for its adapter to be initialized.
    pub(crate) async fn add_ns_init<C, T>(&self, path: Str, callback: C) -> Result<(), A::Error>
    where
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        let ns = Namespace::new(path, callback, &self.adapter_state, &self.config);
        ns.adapter.clone().init().await?;
        self.register_ns(ns, Ok::<_, A::Error>(()));
        Ok(())
    }

    fn register_ns<E: fmt::Display>(&self, ns: Arc<Namespace<A>>, init: Result<(), E>) {
        match init {
            Ok(()) => {
                let mut nsps = self.nsps.write().unwrap_or_else(PoisonError::into_inner);
                nsps.insert(ns.path.clone(), ns);
            }
            #[cfg(feature = "tracing")]
            Err(e) => tracing::error!(ns = %ns.path, "adapter init failed: {e}"),
            #[cfg(not(feature = "tracing"))]
            Err(_) => (),
        }
    }

    pub(crate) fn add_dyn_ns<C, T>(&self, path: String, callback: C) -> Result<(), matchit::InsertError>
    where
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        let mut router = matchit::Router::new();
        router.insert(path, ())?;
        self.add_dyn_ns_with(move |path: &str| router.at(path).is_ok(), callback);
        Ok(())
    }

    pub(crate) fn add_dyn_ns_with<F, C, T>(&self, predicate: F, callback: C)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
        C: ConnectHandler<A, T>,
        T: 'static,
    {
        self.dyn_nsps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Box::new(predicate), NamespaceCtr::new(callback)));
    }

    /// Unregisters a namespace, its sockets leave with [`DisconnectReason::ServerNSDisconnect`].
    pub(crate) async fn delete_ns(&self, path: &str) {
        let ns = self
            .nsps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        if let Some(ns) = ns {
            #[cfg(feature = "tracing")]
            tracing::debug!(ns = path, "deleting namespace");
            ns.close(DisconnectReason::ServerNSDisconnect).await;
        }
    }

    pub(crate) fn get_ns(&self, path: &str) -> Option<Arc<Namespace<A>>> {
        let nsps = self.nsps.read().unwrap_or_else(PoisonError::into_inner);
        nsps.get(path).cloned()
    }

    pub(crate) fn nsps(&self) -> Vec<Arc<Namespace<A>>> {
        let nsps = self.nsps.read().unwrap_or_else(PoisonError::into_inner);
        nsps.values().cloned().collect()
    }

    /// A namespace bound to nothing, used when the root namespace is not defined.
    pub(crate) fn detached_ns(&self, path: Str) -> Arc<Namespace<A>> {
        Namespace::new(path, async || (), &self.adapter_state, &self.config)
    }

    /// Closes all namespaces, then every engine.io session still open.
    pub(crate) async fn close(&self) {
        let nsps = std::mem::take(&mut *self.nsps.write().unwrap_or_else(PoisonError::into_inner));
        #[cfg(feature = "tracing")]
        tracing::debug!(count = nsps.len(), "closing namespaces");
        futures_util::future::join_all(
            nsps.values()
                .map(|ns| ns.close(DisconnectReason::ClosingServer)),
        )
        .await;

        if let Some(engine) = self.engine.get().and_then(Weak::upgrade) {
            engine.close();
        }
    }
}

async fn join<A: Adapter>(
    ns: Arc<Namespace<A>>,
    session: Session,
    auth: Option<PayloadValue>,
    io: SocketIo<A>,
) {
    if ns.connect(session.clone(), auth, io).await.is_ok() {
        session.data.joined();
    }
}

/// The state attached to each engine.io session.
#[derive(Debug, Default)]
pub struct SocketData {
    /// The binary packet waiting for its attachments
    pub(crate) parser_state: ParserState,
    /// Cancels the connect timeout
    pub(crate) joined_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl SocketData {
    /// Cancels the connect timeout, the session joined a namespace.
    fn joined(&self) {
        let tx = self
            .joined_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = tx {
            tx.send(()).ok();
        }
    }
}

impl<A: Adapter> EngineIoHandler for Client<A> {
    type Data = SocketData;

    fn on_connect(self: Arc<Self>, session: Session) {
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = ?session.id, "session opened");
        self.arm_connect_timeout(session);
    }

    /// The session left: so does each of its sockets.
    fn on_disconnect(&self, session: Session, reason: EngineReason) {
        #[cfg(feature = "tracing")]
        tracing::debug!(sid = ?session.id, %reason, "session closed");
        for ns in self.nsps() {
            if let Ok(socket) = ns.get_socket(session.id) {
                socket.close(reason.into());
            }
        }
    }

    fn on_message(self: &Arc<Self>, msg: Str, session: Session) {
        let packet = self.parser().decode_str(&session.data.parser_state, msg);
        self.dispatch(packet, session);
    }

    /// An attachment of the pending binary packet.
    fn on_binary(self: &Arc<Self>, data: Bytes, session: Session) {
        let packet = self.parser().decode_bin(&session.data.parser_state, data);
        self.dispatch(packet, session);
    }
}

impl<A: Adapter> fmt::Debug for Client<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<Str> = self.nsps().iter().map(|ns| ns.path.clone()).collect();
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("nsps", &paths)
            .finish_non_exhaustive()
    }
}

#[doc(hidden)]
#[cfg(feature = "__test_harness")]
impl<A: Adapter> Client<A> {
    /// Opens a session connected to `ns` with `auth`. The sender plays the client packets,
    /// the receiver gets the server ones.
    pub async fn new_dummy_sock(
        self: Arc<Self>,
        ns: &'static str,
        auth: impl serde::Serialize,
    ) -> (
        tokio::sync::mpsc::Sender<relayio_engine::Packet>,
        tokio::sync::mpsc::Receiver<relayio_engine::Packet>,
    ) {
        use relayio_engine::Packet as Frame;

        let capacity = self.config.engine_config.max_buffer_size;
        let (session, from_server) =
            EngineSocket::<SocketData>::new_dummy_piped(Sid::new(), Box::new(|_, _| {}), capacity);
        let (to_server, mut frames) = tokio::sync::mpsc::channel(capacity);
        let client = self.clone();
        let relay = session.clone();
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                match frame {
                    Frame::Message(msg) => client.on_message(msg, relay.clone()),
                    Frame::Binary(bin) => client.on_binary(bin, relay.clone()),
                    Frame::Close => client.on_disconnect(relay.clone(), EngineReason::TransportClose),
                    _ => (),
                }
            }
        });

        let auth = relayio_core::value::to_value(&auth).ok();
        if let relayio_core::parser::Encoded::Str(connect, _) =
            self.parser().encode(Packet::connect(ns, auth))
        {
            self.on_message(connect, session);
        }
        // leaves time to the connect handler
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        (to_server, from_server)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relayio_core::parser::Encoded;
    use tokio::sync::mpsc;

    use super::*;
    use crate::adapter::LocalAdapter;

    const CONNECT_TIMEOUT: Duration = Duration::from_millis(50);

    fn client() -> Arc<Client<LocalAdapter>> {
        let config = SocketIoConfig {
            connect_timeout: CONNECT_TIMEOUT,
            ..SocketIoConfig::default()
        };
        let client = Arc::new(Client::<LocalAdapter>::new(config, ()));
        client.add_ns(Str::from("/"), async || ());
        client
    }

    fn text(client: &Client<LocalAdapter>, packet: Packet) -> Str {
        match client.parser().encode(packet) {
            Encoded::Str(s, _) => s,
            Encoded::Bytes(_) => unreachable!("common parser encodes text"),
        }
    }

    fn watched() -> (Session, mpsc::Receiver<EngineReason>) {
        let (tx, rx) = mpsc::channel(1);
        let on_close = Box::new(move |_, reason| {
            tx.try_send(reason).ok();
        });
        (EngineSocket::new_dummy(Sid::new(), on_close), rx)
    }

    #[tokio::test]
    async fn idle_session_is_closed() {
        let client = client();
        let (session, mut closed) = watched();
        client.on_connect(session);
        let reason = tokio::time::timeout(CONNECT_TIMEOUT * 2, closed.recv())
            .await
            .unwrap();
        assert_eq!(reason, Some(EngineReason::TransportClose));
    }

    #[tokio::test]
    async fn joining_cancels_the_connect_timeout() {
        let client = client();
        let (session, mut closed) = watched();
        client.clone().on_connect(session.clone());
        client.on_message(text(&client, Packet::connect("/", None)), session);
        tokio::time::timeout(CONNECT_TIMEOUT * 2, closed.recv())
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn add_ns_is_available_right_away() {
        let client = client();
        assert!(client.get_ns("/").is_some());
        assert!(client.get_ns("/other").is_none());
    }

    #[tokio::test]
    async fn dyn_ns_matches_in_order() {
        let client = client();
        client.add_dyn_ns("/admin/{id}".to_string(), async || ()).unwrap();
        client.add_dyn_ns_with(|path: &str| path.starts_with("/admin"), async || ());
        assert!(client.new_dyn_ns("/admin/1").is_some());
        assert!(client.new_dyn_ns("/admin").is_some());
        assert!(client.new_dyn_ns("/user").is_none());

        let first = client.new_dyn_ns("/admin/1").unwrap();
        let second = client.new_dyn_ns("/admin/1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(client.get_ns("/admin/1").is_some());
    }

    #[tokio::test]
    async fn invalid_namespace_is_rejected() {
        let client = client();
        let (session, mut rx) =
            EngineSocket::<SocketData>::new_dummy_piped(Sid::new(), Box::new(|_, _| ()), 16);
        client.on_message(text(&client, Packet::connect("/nope", None)), session);
        assert_eq!(
            rx.recv().await.unwrap(),
            relayio_engine::Packet::Message("4/nope,{\"message\":\"Invalid namespace\"}".into())
        );
    }

    #[tokio::test]
    async fn invalid_packet_closes_session() {
        let client = client();
        let (session, mut closed) = watched();
        client.on_message(Str::from("not a packet"), session);
        assert_eq!(closed.recv().await, Some(EngineReason::PacketParsingError));
    }

    #[tokio::test]
    async fn delete_ns_disconnects_sockets() {
        let client = client();
        let (session, mut rx) =
            EngineSocket::<SocketData>::new_dummy_piped(Sid::new(), Box::new(|_, _| ()), 16);
        client.on_message(text(&client, Packet::connect("/", None)), session);
        rx.recv().await.unwrap();
        assert_eq!(client.get_ns("/").unwrap().get_sockets().len(), 1);

        client.delete_ns("/").await;
        assert!(client.get_ns("/").is_none());
        assert_eq!(
            rx.recv().await.unwrap(),
            relayio_engine::Packet::Message("1".into())
        );
    }
}
