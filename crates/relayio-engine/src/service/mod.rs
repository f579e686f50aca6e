//! ## A tower [`Service`](tower_service::Service) and hyper [`Service`](hyper::service::Service) for engine.io so it can be used with frameworks supporting tower services
//!
//! #### Example with a `hyper` standalone service :
//!
//! ```no_run
//! # use bytes::Bytes;
//! # use relayio_engine::{handler::EngineIoHandler, service::EngineIoService, Socket, DisconnectReason, Str};
//! # use std::sync::Arc;
//! # use hyper::server::conn::http1;
//! # use hyper_util::rt::TokioIo;
//! # use tokio::net::TcpListener;
//! #[derive(Debug)]
//! struct MyHandler;
//!
//! impl EngineIoHandler for MyHandler {
//!     type Data = ();
//!     fn on_connect(self: Arc<Self>, socket: Arc<Socket<()>>) { }
//!     fn on_disconnect(&self, socket: Arc<Socket<()>>, reason: DisconnectReason) { }
//!     fn on_message(self: &Arc<Self>, msg: Str, socket: Arc<Socket<()>>) { }
//!     fn on_binary(self: &Arc<Self>, data: Bytes, socket: Arc<Socket<()>>) { }
//! }
//!
//! # async fn doc() {
//! let svc = EngineIoService::new(Arc::new(MyHandler));
//! let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
//! loop {
//!     let (stream, _) = listener.accept().await.unwrap();
//!     let svc = svc.clone();
//!     tokio::spawn(async move {
//!         http1::Builder::new()
//!             .serve_connection(TokioIo::new(stream), svc)
//!             .with_upgrades()
//!             .await
//!             .ok();
//!     });
//! }
//! # }
//! ```

use std::{
    convert::Infallible,
    fmt::Debug,
    future::Future,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures_util::future::{Ready, ready};
use http::{HeaderValue, Method, Request, Response, StatusCode, header::ORIGIN};
use http_body::Body;
use http_body_util::Empty;
use relayio_engine_core::{ProtocolVersion, Sid, TransportType};

use crate::{
    body::ResponseBody,
    config::EngineIoConfig,
    cors::cors_headers,
    engine::EngineIo,
    errors::{Error, RequestError},
    handler::EngineIoHandler,
    transport::{polling, ws},
};

mod futures;
mod parser;

pub use self::futures::ResponseFuture;
pub use self::parser::RequestInfo;

/// A `Service` that handles engine.io requests as a middleware.
/// If the request is not an engine.io request, it forwards it to the inner service.
/// If it is an engine.io request it will forward it to the appropriate `transport` module.
///
/// By default, it uses a [`NotFoundService`] as the inner service so it can be used as a standalone [`Service`](tower_service::Service).
pub struct EngineIoService<H: EngineIoHandler, S = NotFoundService> {
    inner: S,
    engine: Arc<EngineIo<H>>,
}

impl<H: EngineIoHandler> EngineIoService<H, NotFoundService> {
    /// Create a new [`EngineIoService`] with a [`NotFoundService`] as the inner service.
    /// If the request is not an `EngineIo` request, it will always return a 404 response.
    pub fn new(handler: Arc<H>) -> Self {
        EngineIoService::with_config(handler, EngineIoConfig::default())
    }
    /// Create a new [`EngineIoService`] with a custom config
    pub fn with_config(handler: Arc<H>, config: EngineIoConfig) -> Self {
        EngineIoService::with_config_inner(NotFoundService, handler, config)
    }
}

impl<S: Clone, H: EngineIoHandler> EngineIoService<H, S> {
    /// Create a new [`EngineIoService`] with a custom inner service.
    pub fn with_inner(inner: S, handler: Arc<H>) -> Self {
        EngineIoService::with_config_inner(inner, handler, EngineIoConfig::default())
    }

    /// Create a new [`EngineIoService`] with a custom inner service and a custom config.
    pub fn with_config_inner(inner: S, handler: Arc<H>, config: EngineIoConfig) -> Self {
        EngineIoService {
            inner,
            engine: Arc::new(EngineIo::new(handler, config)),
        }
    }

    /// Create a new [`EngineIoService`] sharing an existing engine.
    pub fn with_engine(inner: S, engine: Arc<EngineIo<H>>) -> Self {
        EngineIoService { inner, engine }
    }

    /// The engine driven by this service
    pub fn engine(&self) -> &Arc<EngineIo<H>> {
        &self.engine
    }

    /// Convert this [`EngineIoService`] into a [`MakeEngineIoService`].
    /// This is useful when using [`EngineIoService`] without layers.
    pub fn into_make_service(self) -> MakeEngineIoService<H, S> {
        MakeEngineIoService::new(self)
    }

    /// Drive a websocket connection from an already upgraded stream.
    ///
    /// It is used to test the websocket transport without a real http server.
    #[doc(hidden)]
    pub fn ws_init<T>(
        &self,
        conn: T,
        protocol: ProtocolVersion,
        sid: Option<Sid>,
        req_data: http::request::Parts,
    ) -> impl Future<Output = Result<(), Error>> + Send + 'static
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        ws::serve(self.engine.clone(), conn, protocol, sid, req_data)
    }
}

impl<S: Clone, H: EngineIoHandler> Clone for EngineIoService<H, S> {
    fn clone(&self) -> Self {
        EngineIoService {
            inner: self.inner.clone(),
            engine: self.engine.clone(),
        }
    }
}
impl<H: EngineIoHandler, S: Debug> Debug for EngineIoService<H, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineIoService")
            .field("inner", &self.inner)
            .field("engine", &self.engine)
            .finish()
    }
}

/// Tower Service implementation.
impl<ReqBody, ResBody, S, H> tower_service::Service<Request<ReqBody>> for EngineIoService<H, S>
where
    ReqBody: Body + Send + Unpin + 'static,
    ReqBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    ReqBody::Data: Send,
    ResBody: Body + Send + 'static,
    S: tower_service::Service<Request<ReqBody>, Response = Response<ResBody>>,
    H: EngineIoHandler,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    /// Handle the request.
    /// Each request is parsed to extract the [`TransportType`] and the socket id.
    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        if req.uri().path().starts_with(&*self.engine.config.req_path) {
            ResponseFuture::Engine {
                fut: Box::pin(dispatch(self.engine.clone(), req)),
            }
        } else {
            ResponseFuture::Forward {
                fut: self.inner.call(req),
            }
        }
    }
}

/// Hyper 1.0 Service implementation.
impl<ReqBody, ResBody, S, H> hyper::service::Service<Request<ReqBody>> for EngineIoService<H, S>
where
    ReqBody: Body + Send + Unpin + 'static,
    ReqBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    ReqBody::Data: Send,
    ResBody: Body + Send + 'static,
    S: hyper::service::Service<Request<ReqBody>, Response = Response<ResBody>>,
    H: EngineIoHandler,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn call(&self, req: Request<ReqBody>) -> Self::Future {
        if req.uri().path().starts_with(&*self.engine.config.req_path) {
            ResponseFuture::Engine {
                fut: Box::pin(dispatch(self.engine.clone(), req)),
            }
        } else {
            ResponseFuture::Forward {
                fut: self.inner.call(req),
            }
        }
    }
}

/// Answer an engine.io request: preflight, request checks, transport dispatch and response headers.
async fn dispatch<H, R, B>(engine: Arc<EngineIo<H>>, req: Request<R>) -> Response<ResponseBody<B>>
where
    H: EngineIoHandler,
    R: Body + Send + Unpin + 'static,
    R::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    R::Data: Send,
{
    let origin = req.headers().get(ORIGIN).cloned();
    let preflight = req.method() == Method::OPTIONS && engine.config.cors.is_some();
    let mut handshake = false;

    let res = if preflight {
        let mut res = Response::new(ResponseBody::empty_response());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    } else {
        match RequestInfo::parse(&req, &engine.config) {
            Ok(info) => {
                handshake = info.sid.is_none();
                handle(engine.clone(), info, req).await
            }
            Err(e) => Err(e.into()),
        }
    };

    let mut res = res.unwrap_or_else(|e| {
        if let Error::Request(ref err) = e {
            #[cfg(feature = "tracing")]
            tracing::debug!("request rejected: {err}");
            engine.handler.on_connection_error(err);
        }
        e.into()
    });
    apply_headers(&engine, &mut res, origin.as_ref(), preflight, handshake);
    res
}

async fn handle<H, R, B>(
    engine: Arc<EngineIo<H>>,
    info: RequestInfo,
    req: Request<R>,
) -> Result<Response<ResponseBody<B>>, Error>
where
    H: EngineIoHandler,
    R: Body + Send + Unpin + 'static,
    R::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    R::Data: Send,
{
    let req = match (&info.sid, &engine.config.allow_request) {
        (None, Some(allow_request)) => {
            let (parts, body) = req.into_parts();
            allow_request(&parts).await.map_err(RequestError::Forbidden)?;
            Request::from_parts(parts, body)
        }
        _ => req,
    };

    match info {
        RequestInfo {
            protocol,
            sid: None,
            transport: TransportType::Polling,
            method: Method::GET,
        } => polling::open_req(engine, protocol, req),
        RequestInfo {
            sid: Some(sid),
            transport: TransportType::Polling,
            method: Method::GET,
            ..
        } => polling::polling_req(engine, sid).await,
        RequestInfo {
            sid: Some(sid),
            transport: TransportType::Polling,
            method: Method::POST,
            ..
        } => polling::post_req(engine, sid, req).await,
        RequestInfo {
            protocol,
            sid,
            transport: TransportType::Websocket,
            method: Method::GET,
        } => {
            if let Some(sid) = sid {
                engine
                    .get_socket(sid)
                    .ok_or(RequestError::UnknownSessionId)?;
            }
            ws::new_req(engine, protocol, sid, req)
        }
        _ => Err(RequestError::BadHandshakeMethod.into()),
    }
}

fn apply_headers<H: EngineIoHandler, B>(
    engine: &EngineIo<H>,
    res: &mut Response<ResponseBody<B>>,
    origin: Option<&HeaderValue>,
    preflight: bool,
    handshake: bool,
) {
    let headers = res.headers_mut();
    if let Some(cors) = &engine.config.cors {
        headers.extend(cors_headers(cors, origin, preflight));
    }
    if handshake {
        engine.handler.on_initial_headers(headers);
    }
    engine.handler.on_headers(headers);
}

/// A MakeService that always returns a clone of the [`EngineIoService`] it was created with.
pub struct MakeEngineIoService<H: EngineIoHandler, S> {
    svc: EngineIoService<H, S>,
}

impl<H: EngineIoHandler, S> MakeEngineIoService<H, S> {
    /// Create a new [`MakeEngineIoService`] with a custom inner service.
    pub fn new(svc: EngineIoService<H, S>) -> Self {
        MakeEngineIoService { svc }
    }
}

impl<H: EngineIoHandler, S: Clone, T> tower_service::Service<T> for MakeEngineIoService<H, S> {
    type Response = EngineIoService<H, S>;

    type Error = Infallible;

    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _req: T) -> Self::Future {
        ready(Ok(self.svc.clone()))
    }
}

/// A [`Service`](tower_service::Service) that always returns a 404 response and that is compatible with [`EngineIoService`].
#[derive(Debug, Clone)]
pub struct NotFoundService;

fn not_found() -> Response<Empty<Bytes>> {
    let mut res = Response::new(Empty::new());
    *res.status_mut() = StatusCode::NOT_FOUND;
    res
}

impl<ReqBody> tower_service::Service<Request<ReqBody>> for NotFoundService
where
    ReqBody: Body + Send + 'static,
{
    type Response = Response<Empty<Bytes>>;
    type Error = Infallible;
    type Future = Ready<Result<Response<Empty<Bytes>>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _: Request<ReqBody>) -> Self::Future {
        ready(Ok(not_found()))
    }
}

impl<ReqBody> hyper::service::Service<Request<ReqBody>> for NotFoundService
where
    ReqBody: Body + Send + 'static,
{
    type Response = Response<Empty<Bytes>>;
    type Error = Infallible;
    type Future = Ready<Result<Response<Empty<Bytes>>, Infallible>>;

    fn call(&self, _: Request<ReqBody>) -> Self::Future {
        ready(Ok(not_found()))
    }
}
