//! ## Configuration for the engine.io server
//!
//! ```rust
//! # use relayio_engine::config::EngineIoConfig;
//! # use relayio_engine::TransportType;
//! # use std::time::Duration;
//! let config = EngineIoConfig::builder()
//!     .ping_interval(Duration::from_millis(300))
//!     .ping_timeout(Duration::from_millis(200))
//!     .transports([TransportType::Websocket])
//!     .max_payload(1e6 as u64)
//!     .build();
//! ```
use std::{borrow::Cow, fmt, future::Future, sync::Arc, time::Duration};

use futures_util::future::BoxFuture;
use http::request::Parts;

use crate::{TransportType, cors::CorsConfig};

/// The outcome of the [`allow_request`](EngineIoConfigBuilder::allow_request) hook.
/// `Err` holds the message sent back to the client with a `403` status.
pub type AllowRequestResult = Result<(), Cow<'static, str>>;

pub(crate) type AllowRequestFn =
    Arc<dyn Fn(&Parts) -> BoxFuture<'static, AllowRequestResult> + Send + Sync>;

/// Configuration of an engine.io server. Use [`EngineIoConfig::builder`] to build one.
#[derive(Clone)]
pub struct EngineIoConfig {
    /// The path to listen for engine.io requests on.
    /// Defaults to "/engine.io".
    pub req_path: Cow<'static, str>,

    /// The interval at which the server will send a ping packet to the client.
    /// Defaults to 25 seconds.
    pub ping_interval: Duration,

    /// The amount of time the server will wait for a ping response from the client before closing the connection.
    /// Defaults to 20 seconds.
    pub ping_timeout: Duration,

    /// The amount of time a websocket may take to complete an upgrade from polling.
    /// Only the new websocket is dropped when it expires.
    /// Defaults to 10 seconds.
    pub upgrade_timeout: Duration,

    /// The maximum number of packets that can be buffered per connection before being emitted to the client.
    ///
    /// If the buffer if full the `emit()` method will return an error
    ///
    /// Defaults to 128 packets
    pub max_buffer_size: usize,

    /// The maximum number of bytes that can be received per http request or websocket message.
    /// Defaults to 100kb.
    pub max_payload: u64,

    /// Allowed transports on this server
    /// It is represented as a bitfield to allow to combine any number of transports easily
    pub transports: u8,

    /// Cross origin headers added to every engine.io response.
    /// Disabled by default.
    pub cors: Option<CorsConfig>,

    pub(crate) allow_request: Option<AllowRequestFn>,
}

impl Default for EngineIoConfig {
    fn default() -> Self {
        Self {
            req_path: "/engine.io".into(),
            ping_interval: Duration::from_millis(25000),
            ping_timeout: Duration::from_millis(20000),
            upgrade_timeout: Duration::from_millis(10000),
            max_buffer_size: 128,
            max_payload: 1e5 as u64, // 100kb
            transports: TransportType::Polling as u8 | TransportType::Websocket as u8,
            cors: None,
            allow_request: None,
        }
    }
}

impl fmt::Debug for EngineIoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineIoConfig")
            .field("req_path", &self.req_path)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("upgrade_timeout", &self.upgrade_timeout)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("max_payload", &self.max_payload)
            .field("transports", &self.transports)
            .field("cors", &self.cors)
            .field("allow_request", &self.allow_request.is_some())
            .finish()
    }
}

impl EngineIoConfig {
    /// Create a new builder with a default config
    pub fn builder() -> EngineIoConfigBuilder {
        EngineIoConfigBuilder::new()
    }

    /// Check if a [`TransportType`] is enabled in the [`EngineIoConfig`]
    #[inline(always)]
    pub fn allowed_transport(&self, transport: TransportType) -> bool {
        self.transports & transport as u8 == transport as u8
    }
}

/// Builder for [`EngineIoConfig`]
#[derive(Debug, Default)]
pub struct EngineIoConfigBuilder {
    config: EngineIoConfig,
}

impl EngineIoConfigBuilder {
    /// Create a new builder with a default config
    pub fn new() -> Self {
        Self {
            config: EngineIoConfig::default(),
        }
    }

    /// The path to listen for engine.io requests on.
    /// Defaults to "/engine.io".
    pub fn req_path(mut self, req_path: impl Into<Cow<'static, str>>) -> Self {
        self.config.req_path = req_path.into();
        self
    }

    /// The interval at which the server will send a ping packet to the client.
    /// Defaults to 25 seconds.
    pub fn ping_interval(mut self, ping_interval: Duration) -> Self {
        self.config.ping_interval = ping_interval;
        self
    }

    /// The amount of time the server will wait for a ping response from the client before closing the connection.
    /// Defaults to 20 seconds.
    pub fn ping_timeout(mut self, ping_timeout: Duration) -> Self {
        self.config.ping_timeout = ping_timeout;
        self
    }

    /// The amount of time a websocket may take to complete an upgrade.
    /// Defaults to 10 seconds.
    pub fn upgrade_timeout(mut self, upgrade_timeout: Duration) -> Self {
        self.config.upgrade_timeout = upgrade_timeout;
        self
    }

    /// The maximum number of packets that can be buffered per connection before being emitted to the client.
    ///
    /// If the buffer if full the `emit()` method will return an error
    pub fn max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.config.max_buffer_size = max_buffer_size;
        self
    }

    /// The maximum number of bytes that can be received per http request or websocket message.
    /// Defaults to 100kb.
    pub fn max_payload(mut self, max_payload: u64) -> Self {
        self.config.max_payload = max_payload;
        self
    }

    /// Allowed transports on this server
    ///
    /// The `transports` array should have a size of 1 or 2
    ///
    /// Defaults to :
    /// `[TransportType::Polling, TransportType::Websocket]`
    pub fn transports<const N: usize>(mut self, transports: [TransportType; N]) -> Self {
        assert!(N > 0 && N <= 2);
        self.config.transports = 0;
        for transport in transports {
            self.config.transports |= transport as u8;
        }
        self
    }

    /// Add cross origin headers to every engine.io response and answer preflight requests.
    pub fn cors(mut self, cors: CorsConfig) -> Self {
        self.config.cors = Some(cors);
        self
    }

    /// A hook called with the request parts of every handshake, before any session is created.
    ///
    /// Returning an error rejects the handshake with a `403` status, the error being used as message.
    /// ```rust
    /// # use relayio_engine::config::EngineIoConfig;
    /// # use std::borrow::Cow;
    /// let config = EngineIoConfig::builder()
    ///     .allow_request(|parts| {
    ///         let authorized = parts.headers.contains_key("authorization");
    ///         async move {
    ///             if authorized { Ok(()) } else { Err(Cow::Borrowed("unauthorized")) }
    ///         }
    ///     })
    ///     .build();
    /// ```
    pub fn allow_request<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(&Parts) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AllowRequestResult> + Send + 'static,
    {
        self.config.allow_request = Some(Arc::new(move |parts| Box::pin(hook(parts))));
        self
    }

    /// Build the config
    pub fn build(self) -> EngineIoConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn config_transports() {
        let conf = EngineIoConfig::builder()
            .transports([TransportType::Polling])
            .build();
        assert!(conf.allowed_transport(TransportType::Polling));
        assert!(!conf.allowed_transport(TransportType::Websocket));

        let conf = EngineIoConfig::builder()
            .transports([TransportType::Websocket])
            .build();
        assert!(conf.allowed_transport(TransportType::Websocket));
        assert!(!conf.allowed_transport(TransportType::Polling));
        let conf = EngineIoConfig::builder()
            .transports([TransportType::Polling, TransportType::Websocket])
            .build();
        assert!(conf.allowed_transport(TransportType::Polling));
        assert!(conf.allowed_transport(TransportType::Websocket));
    }

    #[tokio::test]
    async fn allow_request_hook() {
        let conf = EngineIoConfig::builder()
            .allow_request(|parts| {
                let ok = parts.uri.path() == "/ok";
                async move { if ok { Ok(()) } else { Err(Cow::Borrowed("nope")) } }
            })
            .build();
        let hook = conf.allow_request.unwrap();
        let ok = http::Request::get("/ok").body(()).unwrap().into_parts().0;
        let ko = http::Request::get("/ko").body(()).unwrap().into_parts().0;
        assert_eq!(hook(&ok).await, Ok(()));
        assert_eq!(hook(&ko).await, Err("nope".into()));
    }
}
