//! Server settings and the [`SocketIoBuilder`] that assembles them.
use std::{borrow::Cow, future::Future, sync::Arc, time::Duration};

use http::request::Parts;
use relayio_core::Uid;
use relayio_engine::{
    CorsConfig, EngineIo, TransportType,
    config::{AllowRequestResult, EngineIoConfig, EngineIoConfigBuilder},
    service::NotFoundService,
};

use crate::{
    SocketIo,
    adapter::{Adapter, LocalAdapter},
    client::Client,
    layer::SocketIoLayer,
    parser::{CommonParser, Parser},
    service::{self, SocketIoService},
};

/// Selects the packet [parser](crate::parser). Clients must use the same one.
#[derive(Debug, Clone, Copy)]
pub struct ParserConfig(Parser);

impl ParserConfig {
    /// Text packets with binary attachments, the format of the reference clients.
    pub fn common() -> Self {
        Self(Parser::Common(CommonParser))
    }

    /// Every packet is a single msgpack frame.
    #[cfg(feature = "msgpack")]
    #[cfg_attr(docsrs, doc(cfg(feature = "msgpack")))]
    pub fn msgpack() -> Self {
        Self(Parser::MsgPack(crate::parser::MsgPackParser))
    }
}

/// Settings of a server. The transport ones live in [`engine_config`](Self::engine_config).
#[derive(Debug, Clone)]
pub struct SocketIoConfig {
    /// Transport settings. The request path defaults to `/socket.io`.
    pub engine_config: EngineIoConfig,

    /// How long an emit with acknowledgement waits for the answers. 5 seconds by default.
    pub ack_timeout: Duration,

    /// How long a fresh session may stay without joining any namespace. 45 seconds by default.
    pub connect_timeout: Duration,

    pub(crate) parser: Parser,

    /// Identifies this server within a cluster. Random by default.
    pub server_id: Uid,
}

const ACK_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(45);

impl Default for SocketIoConfig {
    fn default() -> Self {
        Self {
            engine_config: engine_defaults().build(),
            ack_timeout: ACK_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            parser: Parser::Common(CommonParser),
            server_id: Uid::new(),
        }
    }
}

fn engine_defaults() -> EngineIoConfigBuilder {
    EngineIoConfigBuilder::new().req_path("/socket.io")
}

/// Setters forwarded to the transport settings.
macro_rules! engine_setters {
    ($($(#[$doc:meta])* $name:ident($ty:ty);)*) => {$(
        $(#[$doc])*
        #[inline]
        pub fn $name(mut self, value: $ty) -> Self {
            self.engine = self.engine.$name(value);
            self
        }
    )*};
}

/// Setters of the [`SocketIoConfig`] fields.
macro_rules! settings_setters {
    ($($(#[$doc:meta])* $name:ident($ty:ty);)*) => {$(
        $(#[$doc])*
        #[inline]
        pub fn $name(mut self, value: $ty) -> Self {
            self.settings.$name = value;
            self
        }
    )*};
}

/// Assembles a [`SocketIoConfig`] and an adapter, then builds the server
/// as a tower [`Layer`](tower_layer::Layer) or as a service.
pub struct SocketIoBuilder<A: Adapter = LocalAdapter> {
    settings: SocketIoConfig,
    engine: EngineIoConfigBuilder,
    adapter: A::State,
}

impl SocketIoBuilder<LocalAdapter> {
    /// A builder with the default settings and the [`LocalAdapter`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SocketIoBuilder<LocalAdapter> {
    fn default() -> Self {
        Self {
            settings: SocketIoConfig::default(),
            engine: engine_defaults(),
            adapter: (),
        }
    }
}

impl<A: Adapter> SocketIoBuilder<A> {
    engine_setters! {
        /// Interval between two heartbeats. 25 seconds by default.
        ping_interval(Duration);
        /// How long the server waits for a heartbeat answer before closing the session.
        /// 20 seconds by default.
        ping_timeout(Duration);
        /// How long a websocket may take to take over a polling session. 10 seconds by default.
        upgrade_timeout(Duration);
        /// Packets buffered per session before emitting fails with a full buffer error.
        /// 128 by default.
        max_buffer_size(usize);
        /// Largest accepted payload, in bytes. 100 kB by default.
        max_payload(u64);
        /// The CORS policy of the engine responses.
        cors(CorsConfig);
    }

    /// The path served by the server. `/socket.io` by default.
    #[inline]
    pub fn req_path(mut self, req_path: impl Into<Cow<'static, str>>) -> Self {
        self.engine = self.engine.req_path(req_path);
        self
    }

    /// The transports clients may use. Both of them by default.
    #[inline]
    pub fn transports<const N: usize>(mut self, transports: [TransportType; N]) -> Self {
        self.engine = self.engine.transports(transports);
        self
    }

    /// Checks the request of every handshake. A rejection is answered with a `403`
    /// carrying the returned message.
    #[inline]
    pub fn allow_request<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(&Parts) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AllowRequestResult> + Send + 'static,
    {
        self.engine = self.engine.allow_request(hook);
        self
    }

    settings_setters! {
        /// See [`SocketIoConfig::ack_timeout`].
        ack_timeout(Duration);
        /// See [`SocketIoConfig::connect_timeout`].
        connect_timeout(Duration);
        /// See [`SocketIoConfig::server_id`]. Servers of a cluster need distinct ids.
        server_id(Uid);
    }

    /// Selects the packet parser.
    #[inline]
    pub fn with_parser(mut self, ParserConfig(parser): ParserConfig) -> Self {
        self.settings.parser = parser;
        self
    }

    /// Replaces the adapter. `state` is shared by the adapters of every namespace.
    pub fn with_adapter<B: Adapter>(self, state: B::State) -> SocketIoBuilder<B> {
        let Self { settings, engine, .. } = self;
        SocketIoBuilder { settings, engine, adapter: state }
    }

    /// Builds the server as a tower layer.
    pub fn build_layer(self) -> (SocketIoLayer<A>, SocketIo<A>) {
        let (engine, client) = self.finish();
        (SocketIoLayer::new(engine), SocketIo::from(client))
    }

    /// Builds the server as a standalone service answering `404` outside of its path.
    pub fn build_svc(self) -> (SocketIoService<NotFoundService, A>, SocketIo<A>) {
        self.build_with_inner_svc(NotFoundService)
    }

    /// Builds the server as a service forwarding the requests outside of its path to `svc`.
    pub fn build_with_inner_svc<S: Clone>(self, svc: S) -> (SocketIoService<S, A>, SocketIo<A>) {
        let (engine, client) = self.finish();
        (SocketIoService::on_engine(svc, engine), SocketIo::from(client))
    }

    fn finish(self) -> (Arc<EngineIo<Client<A>>>, Arc<Client<A>>) {
        let Self { mut settings, engine, adapter } = self;
        settings.engine_config = engine.build();
        service::new_engine(settings, adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_settings() {
        let id = Uid::new();
        let (_svc, io) = SocketIo::builder()
            .ack_timeout(Duration::from_secs(1))
            .connect_timeout(Duration::from_secs(2))
            .ping_interval(Duration::from_secs(3))
            .max_payload(42)
            .server_id(id)
            .build_svc();
        let config = io.config();
        assert_eq!(config.server_id, id);
        assert_eq!(config.engine_config.req_path, "/socket.io");
        assert_eq!(config.engine_config.ping_interval, Duration::from_secs(3));
        assert_eq!(config.engine_config.max_payload, 42);
        assert_eq!(config.ack_timeout, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
    }

    #[test]
    fn defaults() {
        let config = SocketIoConfig::default();
        assert_eq!(config.engine_config.req_path, "/socket.io");
        assert_eq!(config.ack_timeout, ACK_TIMEOUT);
        assert_ne!(config.server_id, SocketIoConfig::default().server_id);
    }
}
