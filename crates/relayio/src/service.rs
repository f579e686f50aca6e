//! The socket.io server as a standalone [tower](tower_service::Service) or
//! [hyper](hyper::service::Service) service.
//!
//! Requests under the engine path (`/socket.io` by default) are answered by the server,
//! the other ones are forwarded to the inner service.
//!
//! ```no_run
//! # use relayio::{SocketIo, extract::SocketRef};
//! # async fn serve(stream: impl hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static) {
//! let (svc, io) = SocketIo::new_svc();
//! io.ns("/", async |socket: SocketRef| println!("{} connected", socket.id));
//!
//! hyper::server::conn::http1::Builder::new()
//!     .serve_connection(stream, svc)
//!     .with_upgrades()
//!     .await
//!     .ok();
//! # }
//! ```
use std::{
    fmt,
    sync::Arc,
    task::{Context, Poll},
};

use http::Request;
use relayio_engine::{
    EngineIo, ProtocolVersion,
    service::{EngineIoService, MakeEngineIoService},
};

use crate::{
    SocketIoConfig,
    adapter::{Adapter, LocalAdapter},
    client::Client,
};

type Engine<A, S> = EngineIoService<Client<A>, S>;

/// Creates the client and the engine that feeds it.
pub(crate) fn new_engine<A: Adapter>(
    config: SocketIoConfig,
    adapter_state: A::State,
) -> (Arc<EngineIo<Client<A>>>, Arc<Client<A>>) {
    let engine_config = config.engine_config.clone();
    let client = Arc::new(Client::new(config, adapter_state));
    let engine = Arc::new(EngineIo::new(client.clone(), engine_config));
    client.set_engine(&engine);
    (engine, client)
}

/// The socket.io service, built by [`SocketIo::new_svc`](crate::SocketIo::new_svc)
/// or a [`SocketIoLayer`](crate::layer::SocketIoLayer).
pub struct SocketIoService<S: Clone, A: Adapter = LocalAdapter>(pub(crate) Engine<A, S>);

impl<A: Adapter, S: Clone> SocketIoService<S, A> {
    pub(crate) fn on_engine(inner: S, engine: Arc<EngineIo<Client<A>>>) -> Self {
        SocketIoService(EngineIoService::with_engine(inner, engine))
    }

    /// Turns the service into a hyper `MakeService`.
    pub fn into_make_service(self) -> MakeEngineIoService<Client<A>, S> {
        self.0.into_make_service()
    }

    /// Serves an already upgraded websocket stream, without the http upgrade.
    #[doc(hidden)]
    pub fn ws_init<T>(
        &self,
        stream: T,
        req: http::request::Parts,
    ) -> impl Future<Output = Result<(), relayio_engine::Error>> + Send + 'static
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        self.0.ws_init(stream, ProtocolVersion::V4, None, req)
    }
}

impl<A, S, B> tower_service::Service<Request<B>> for SocketIoService<S, A>
where
    A: Adapter,
    S: Clone,
    Engine<A, S>: tower_service::Service<Request<B>>,
{
    type Response = <Engine<A, S> as tower_service::Service<Request<B>>>::Response;
    type Error = <Engine<A, S> as tower_service::Service<Request<B>>>::Error;
    type Future = <Engine<A, S> as tower_service::Service<Request<B>>>::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        tower_service::Service::poll_ready(&mut self.0, cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        tower_service::Service::call(&mut self.0, req)
    }
}

impl<A, S, B> hyper::service::Service<Request<B>> for SocketIoService<S, A>
where
    A: Adapter,
    S: Clone,
    Engine<A, S>: hyper::service::Service<Request<B>>,
{
    type Response = <Engine<A, S> as hyper::service::Service<Request<B>>>::Response;
    type Error = <Engine<A, S> as hyper::service::Service<Request<B>>>::Error;
    type Future = <Engine<A, S> as hyper::service::Service<Request<B>>>::Future;

    fn call(&self, req: Request<B>) -> Self::Future {
        hyper::service::Service::call(&self.0, req)
    }
}

impl<A: Adapter, S: Clone> Clone for SocketIoService<S, A> {
    fn clone(&self) -> Self {
        SocketIoService(self.0.clone())
    }
}

impl<A: Adapter, S: Clone + fmt::Debug> fmt::Debug for SocketIoService<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SocketIoService").field(&self.0).finish()
    }
}
