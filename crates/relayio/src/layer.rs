//! The socket.io server as a tower [`Layer`] wrapping an existing service.
//!
//! Every service made by a layer drives the same engine, so they share their sessions.
//!
//! ```rust
//! # use relayio::SocketIo;
//! # use tower_layer::Layer;
//! # use relayio_engine::service::NotFoundService;
//! let (layer, io) = SocketIo::new_layer();
//! io.ns("/", async || {});
//! let svc = layer.layer(NotFoundService);
//! ```
use std::{fmt, sync::Arc};

use relayio_engine::{EngineIo, layer::EngineIoLayer};
use tower_layer::Layer;

use crate::{
    adapter::{Adapter, LocalAdapter},
    client::Client,
    service::SocketIoService,
};

/// Wraps services into a [`SocketIoService`].
pub struct SocketIoLayer<A: Adapter = LocalAdapter>(EngineIoLayer<Client<A>>);

impl<A: Adapter> SocketIoLayer<A> {
    pub(crate) fn new(engine: Arc<EngineIo<Client<A>>>) -> Self {
        SocketIoLayer(EngineIoLayer::from_engine(engine))
    }
}

impl<S: Clone, A: Adapter> Layer<S> for SocketIoLayer<A> {
    type Service = SocketIoService<S, A>;

    fn layer(&self, inner: S) -> SocketIoService<S, A> {
        SocketIoService(self.0.layer(inner))
    }
}

impl<A: Adapter> Clone for SocketIoLayer<A> {
    fn clone(&self) -> Self {
        SocketIoLayer(self.0.clone())
    }
}

impl<A: Adapter> fmt::Debug for SocketIoLayer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SocketIoLayer").field(&self.0).finish()
    }
}
