//! Engine.IO as a tower [`Layer`] wrapping an existing service.
//!
//! ```rust
//! # use std::sync::Arc;
//! # use bytes::Bytes;
//! # use tower_layer::Layer;
//! # use relayio_engine::{DisconnectReason, Socket, Str};
//! # use relayio_engine::{handler::EngineIoHandler, layer::EngineIoLayer, service::NotFoundService};
//! #[derive(Debug)]
//! struct Discard;
//!
//! impl EngineIoHandler for Discard {
//!     type Data = ();
//!     fn on_connect(self: Arc<Self>, _: Arc<Socket<()>>) {}
//!     fn on_disconnect(&self, _: Arc<Socket<()>>, _: DisconnectReason) {}
//!     fn on_message(self: &Arc<Self>, _: Str, _: Arc<Socket<()>>) {}
//!     fn on_binary(self: &Arc<Self>, _: Bytes, _: Arc<Socket<()>>) {}
//! }
//!
//! let svc = EngineIoLayer::new(Arc::new(Discard)).layer(NotFoundService);
//! ```
use std::{fmt, sync::Arc};

use tower_layer::Layer;

use crate::{
    config::EngineIoConfig, engine::EngineIo, handler::EngineIoHandler, service::EngineIoService,
};

/// Wraps services into an [`EngineIoService`]. All of them share one engine and its sessions.
pub struct EngineIoLayer<H: EngineIoHandler>(Arc<EngineIo<H>>);

impl<H: EngineIoHandler> EngineIoLayer<H> {
    /// A layer with the default [`EngineIoConfig`].
    pub fn new(handler: Arc<H>) -> Self {
        Self::from_config(handler, EngineIoConfig::default())
    }

    /// A layer with a custom [`EngineIoConfig`].
    pub fn from_config(handler: Arc<H>, config: EngineIoConfig) -> Self {
        Self::from_engine(Arc::new(EngineIo::new(handler, config)))
    }

    /// A layer over an existing engine.
    pub fn from_engine(engine: Arc<EngineIo<H>>) -> Self {
        EngineIoLayer(engine)
    }

    /// The engine shared by the services of this layer.
    pub fn engine(&self) -> &Arc<EngineIo<H>> {
        &self.0
    }
}

impl<S: Clone, H: EngineIoHandler> Layer<S> for EngineIoLayer<H> {
    type Service = EngineIoService<H, S>;

    fn layer(&self, inner: S) -> EngineIoService<H, S> {
        EngineIoService::with_engine(inner, self.0.clone())
    }
}

impl<H: EngineIoHandler> Clone for EngineIoLayer<H> {
    fn clone(&self) -> Self {
        EngineIoLayer(self.0.clone())
    }
}

impl<H: EngineIoHandler> fmt::Debug for EngineIoLayer<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EngineIoLayer").field(&self.0).finish()
    }
}
